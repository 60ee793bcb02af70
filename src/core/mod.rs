//! Core infrastructure shared by the code compiler and the allocation pass.
//!
//! - `session` — arena-backed per-function analysis session (`bumpalo`).
//! - `error` — error codes and the crate-wide result alias.
//! - `bitvec` — packed bit vectors with change-reporting set operations.
//! - `reg` — register kinds, per-kind counts/masks/statistics.
//! - `operand` — operands, virtual-register and label ids.
//! - `compiler` — the node list and virtual-register table.

pub mod bitvec;
pub mod compiler;
pub mod error;
pub mod operand;
pub mod reg;
pub mod session;

pub use bitvec::{BitVec, BitWord, BITS_PER_WORD};
pub use compiler::{Arch, CodeCompiler, Node, NodeId, NodeKind, VRegState, VirtReg};
pub use error::{CompileError, CompileResult};
pub use operand::{InstId, LabelId, MemOperand, Operand, VirtId};
pub use reg::{
    lsb_mask, phys_mask, PhysId, RegCount, RegKind, RegMask, RegStats, ANY_PHYS_ID, MAX_REG_KINDS,
};
pub use session::{CompilationSession, SessionStats};
