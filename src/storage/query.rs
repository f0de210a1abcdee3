// Mirror Queries - Filters for the list reads served from the mirror

use crate::model::{Address, Appeal, Task, TaskStatus};

/// Filter for task listings. Results are newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub assignee: Option<Address>,
    pub creator: Option<Address>,
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_assignee(mut self, assignee: Address) -> Self {
        self.assignee = Some(assignee);
        self
    }

    pub fn with_creator(mut self, creator: Address) -> Self {
        self.creator = Some(creator);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .assignee
                .as_ref()
                .map_or(true, |a| task.assignee.as_ref() == Some(a))
            && self.creator.as_ref().map_or(true, |c| &task.creator == c)
    }
}

/// Filter for appeal listings. Results are newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppealQuery {
    pub pending_only: bool,
    pub user: Option<Address>,
    pub limit: Option<usize>,
}

impl AppealQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending() -> Self {
        Self {
            pending_only: true,
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: Address) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, appeal: &Appeal) -> bool {
        (!self.pending_only || !appeal.resolved)
            && self.user.as_ref().map_or(true, |u| &appeal.user == u)
    }
}
