use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a task, carrying the full chain of tasks that caused it.
///
/// The chain is serialized with the id so that provenance survives a hop to
/// another node: a worker derives its own id from the source task id with
/// [`TaskId::child_of`] and bulk termination by ancestor keeps working there.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    id: String,
    parent: Option<Box<TaskId>>,
}

impl TaskId {
    /// A task with no ancestor
    pub fn new_root() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent: None,
        }
    }

    /// A fresh id whose parent chain is `parent` followed by its own chain
    pub fn child_of(parent: &TaskId) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent: Some(Box::new(parent.clone())),
        }
    }

    /// Create a child when a parent is known, otherwise a root
    pub fn new(parent: Option<&TaskId>) -> Self {
        match parent {
            Some(parent) => Self::child_of(parent),
            None => Self::new_root(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent(&self) -> Option<&TaskId> {
        self.parent.as_deref()
    }

    /// Iterate over the ancestors of this id, nearest first
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Number of ancestors
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// True if `ancestor` appears anywhere in this id's parent chain
    pub fn is_descendant_of(&self, ancestor: &TaskId) -> bool {
        self.ancestors().any(|a| a.id == ancestor.id)
    }

    /// True if this is `other` or one of its descendants
    pub fn is_or_descends_from(&self, other: &TaskId) -> bool {
        self.id == other.id || self.is_descendant_of(other)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a TaskId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a TaskId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
