// Artifact module - OFF-LEDGER FILES
// Uploads proof attachments and reward images, and builds proof bundles

mod proof;
mod uploader;

pub use proof::{Attachment, ProofBundle, ProofFile, MAX_PROOF_TEXT};
pub use uploader::{
    content_id, ArtifactUploader, DirectoryUploader, MemoryUploader, UploadError, UploaderConfig,
};
