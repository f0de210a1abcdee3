// Proof Bundle - The JSON document submitted as a task's proof

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest proof text kept, in characters
pub const MAX_PROOF_TEXT: usize = 500;

/// A file to attach to a submission, before upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }
}

/// An uploaded attachment as referenced from the bundle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofFile {
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub url: String,
}

/// Proof text plus uploaded files, stored on the ledger as JSON
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBundle {
    pub text: String,
    pub files: Vec<ProofFile>,
    /// Submission time in unix milliseconds
    pub timestamp: i64,
}

impl ProofBundle {
    pub fn new(text: &str, files: Vec<ProofFile>, at: DateTime<Utc>) -> Self {
        Self {
            text: text.trim().chars().take(MAX_PROOF_TEXT).collect(),
            files,
            timestamp: at.timestamp_millis(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.files.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
