//! Guarded storage for a facade's native handle.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DuckDbError, DuckDbResult};

/// The slot a facade keeps its engine handle in.
///
/// Empty before the handle is ready and after teardown. Every engine call
/// goes through [`HandleSlot::get`], so an empty slot fails the call before
/// the engine is reached. The lock is never held across an await.
pub(crate) struct HandleSlot<H: ?Sized> {
    owner: &'static str,
    kind: &'static str,
    slot: RwLock<Option<Arc<H>>>,
}

impl<H: ?Sized> HandleSlot<H> {
    /// An empty slot.
    pub(crate) fn empty(owner: &'static str, kind: &'static str) -> Self {
        Self {
            owner,
            kind,
            slot: RwLock::new(None),
        }
    }

    /// A slot holding an already-ready handle.
    pub(crate) fn ready(owner: &'static str, kind: &'static str, handle: Arc<H>) -> Self {
        Self {
            owner,
            kind,
            slot: RwLock::new(Some(handle)),
        }
    }

    fn uninitialized(&self, operation: &'static str) -> DuckDbError {
        DuckDbError::uninitialized(self.owner, operation, self.kind)
    }

    /// The handle, or the uninitialized condition naming `operation`.
    pub(crate) fn get(&self, operation: &'static str) -> DuckDbResult<Arc<H>> {
        self.slot
            .read()
            .clone()
            .ok_or_else(|| self.uninitialized(operation))
    }

    /// The handle without guarding, if present.
    pub(crate) fn peek(&self) -> Option<Arc<H>> {
        self.slot.read().clone()
    }

    /// Remove the handle for teardown.
    ///
    /// A second teardown sees an empty slot and fails instead of releasing
    /// the handle again.
    pub(crate) fn take(&self, operation: &'static str) -> DuckDbResult<Arc<H>> {
        self.slot
            .write()
            .take()
            .ok_or_else(|| self.uninitialized(operation))
    }

    /// Put a handle back after a failed teardown, unless one was set since.
    pub(crate) fn restore(&self, handle: Arc<H>) {
        let mut slot = self.slot.write();
        if slot.is_none() {
            *slot = Some(handle);
        }
    }

    /// Mark the slot ready.
    pub(crate) fn set(&self, handle: Arc<H>) {
        *self.slot.write() = Some(handle);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.slot.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot_is_uninitialized() {
        let slot: HandleSlot<str> = HandleSlot::empty("Database", "database");
        assert!(!slot.is_ready());
        let err = slot.get("all").unwrap_err();
        assert_eq!(err.to_string(), "Database.all: uninitialized database");
    }

    #[test]
    fn test_take_once() {
        let slot = HandleSlot::ready("Connection", "connection", Arc::new(5u8));
        assert_eq!(*slot.get("run").unwrap(), 5);
        assert_eq!(*slot.take("close").unwrap(), 5);
        assert!(slot.take("close").unwrap_err().is_uninitialized());
        assert!(slot.peek().is_none());
    }

    #[test]
    fn test_restore_after_failed_teardown() {
        let slot = HandleSlot::ready("Statement", "statement", Arc::new(1u8));
        let handle = slot.take("finalize").unwrap();
        slot.restore(handle);
        assert!(slot.is_ready());

        slot.set(Arc::new(2u8));
        slot.restore(Arc::new(3u8));
        assert_eq!(*slot.get("all").unwrap(), 2);
    }
}
