//! Arena-based per-function analysis session.
//!
//! The session wraps a [`bumpalo::Bump`] handed in by the driver and owns
//! nothing else but statistics. Working state of the pass lives in ordinary
//! vectors; finished immutable artifacts (tied-register slices, liveness
//! snapshots) are copied into the arena and returned with the arena
//! lifetime. Resetting the bump invalidates everything in one step, so no
//! analysis data survives between functions.

use bumpalo::Bump;
use std::cell::RefCell;
use std::fmt;

/// Per-function compilation session.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Underlying arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Copy a slice into the arena.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &'arena [T] {
        self.arena.alloc_slice_copy(slice)
    }

    pub fn record_function_analyzed(&self) {
        self.stats.borrow_mut().functions_analyzed += 1;
    }

    pub fn record_blocks_created(&self, count: usize) {
        self.stats.borrow_mut().blocks_created += count;
    }

    pub fn record_inst_tagged(&self) {
        self.stats.borrow_mut().insts_tagged += 1;
    }

    pub fn record_liveness_visits(&self, count: usize) {
        self.stats.borrow_mut().liveness_visits += count;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Counters collected while analyzing functions.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Functions fully analyzed.
    pub functions_analyzed: usize,
    /// Basic blocks created by CFG construction.
    pub blocks_created: usize,
    /// Instruction nodes tagged with register data.
    pub insts_tagged: usize,
    /// Block visits performed by the liveness fixed point.
    pub liveness_visits: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analysis Session Statistics:")?;
        writeln!(f, "  Functions analyzed: {}", self.functions_analyzed)?;
        writeln!(f, "  Blocks created: {}", self.blocks_created)?;
        writeln!(f, "  Instructions tagged: {}", self.insts_tagged)?;
        writeln!(f, "  Liveness visits: {}", self.liveness_visits)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let stats = session.stats();
        assert_eq!(stats.functions_analyzed, 0);
        assert_eq!(stats.blocks_created, 0);
    }

    #[test]
    fn test_arena_slice_allocation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let slice = session.alloc_slice(&[1u64, 2, 3]);
        assert_eq!(slice, &[1, 2, 3]);

        let empty: &[u64] = session.alloc_slice(&[]);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_statistics_recording() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        session.record_function_analyzed();
        session.record_blocks_created(4);
        session.record_inst_tagged();
        session.record_inst_tagged();
        session.record_liveness_visits(7);

        let stats = session.stats();
        assert_eq!(stats.functions_analyzed, 1);
        assert_eq!(stats.blocks_created, 4);
        assert_eq!(stats.insts_tagged, 2);
        assert_eq!(stats.liveness_visits, 7);

        let text = stats.to_string();
        assert!(text.contains("Blocks created: 4"));
        assert!(text.contains("Liveness visits: 7"));
    }
}
