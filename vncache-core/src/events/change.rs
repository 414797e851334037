//! Change events emitted by key mutation.

use std::sync::Arc;

/// Notification that a single key was added, updated, renamed or deleted.
///
/// Events are cheaply copyable (the id strings are refcounted) and carry no
/// ownership of the blob itself; a follower pulls the fresh bytes with a
/// separate GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The key the mutation applied to (the rename source, for renames).
    pub current_id: Arc<str>,
    /// The new key, present only on rename.
    pub alternate_id: Option<Arc<str>>,
    /// True when the key was removed. Implies `alternate_id` is `None`.
    pub deleted: bool,
}

impl ChangeEvent {
    /// Event for an insert or in-place overwrite of `id`.
    #[must_use]
    pub fn modified(id: &str) -> Self {
        Self {
            current_id: Arc::from(id),
            alternate_id: None,
            deleted: false,
        }
    }

    /// Event for a rename of `old_id` to `new_id` (contents may also have
    /// been overwritten).
    #[must_use]
    pub fn renamed(old_id: &str, new_id: &str) -> Self {
        Self {
            current_id: Arc::from(old_id),
            alternate_id: Some(Arc::from(new_id)),
            deleted: false,
        }
    }

    /// Event for a delete of `id`.
    #[must_use]
    pub fn deleted(id: &str) -> Self {
        Self {
            current_id: Arc::from(id),
            alternate_id: None,
            deleted: true,
        }
    }

    /// The key a follower should fetch after this event: the rename target
    /// when present, the mutated key otherwise.
    #[must_use]
    pub fn effective_id(&self) -> &str {
        self.alternate_id.as_deref().unwrap_or(&self.current_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_id_prefers_rename_target() {
        assert_eq!(ChangeEvent::modified("aaaa").effective_id(), "aaaa");
        assert_eq!(ChangeEvent::renamed("aaaa", "bbbb").effective_id(), "bbbb");
    }

    #[test]
    fn test_delete_never_carries_alternate() {
        let ev = ChangeEvent::deleted("aaaa");
        assert!(ev.deleted);
        assert!(ev.alternate_id.is_none());
    }
}
