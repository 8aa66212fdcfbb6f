//! Bounded scratch arena for building header lines.
//!
//! Mirrors a per-request workspace: allocations only move a high-water mark
//! forward and are reclaimed all at once when the request ends. Callers that
//! cannot know their final size up front bound their writes by `remaining()`
//! and allocate what they actually used afterwards.

use thiserror::Error;

/// Default workspace per phase context.
pub const DEFAULT_WORKSPACE_BYTES: usize = 64 * 1024;

/// The arena ran out of space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("workspace overflow: requested {requested} bytes, {available} available")]
pub struct WorkspaceOverflow {
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    capacity: usize,
    used: usize,
    overflowed: bool,
}

impl Workspace {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            overflowed: false,
        }
    }

    /// Account for `len` bytes.
    pub fn alloc(&mut self, len: usize) -> Result<(), WorkspaceOverflow> {
        let available = self.remaining();
        if len > available {
            self.overflowed = true;
            return Err(WorkspaceOverflow {
                requested: len,
                available,
            });
        }
        self.used += len;
        Ok(())
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether any allocation has failed since the last reset.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn reset(&mut self) {
        self.used = 0;
        self.overflowed = false;
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new(DEFAULT_WORKSPACE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_full() {
        let mut ws = Workspace::new(10);
        assert!(ws.alloc(4).is_ok());
        assert!(ws.alloc(6).is_ok());
        assert_eq!(ws.remaining(), 0);
        assert!(!ws.overflowed());

        let err = ws.alloc(1).unwrap_err();
        assert_eq!(err.requested, 1);
        assert_eq!(err.available, 0);
        assert!(ws.overflowed());

        ws.reset();
        assert_eq!(ws.remaining(), 10);
        assert!(!ws.overflowed());
    }
}
