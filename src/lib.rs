//! forgejit - JIT assembler framework with register allocation analysis.
//!
//! The framework sits between a code compiler that emits abstract
//! instructions over unbounded *virtual* registers and an assembler
//! back-end that encodes against machine registers. Its centerpiece is the
//! register allocation pass: it turns the compiler's linear node list into
//! basic blocks with successor edges, computes a post-order view, a
//! dominator tree and natural loops, and runs live-variable analysis over
//! packed bit vectors. Register *assignment* consumes these results and is
//! deliberately left to a later stage.
//!
//! # Usage
//!
//! ```
//! use bumpalo::Bump;
//! use forgejit::{
//!     Arch, CodeCompiler, CompilationSession, Operand, RaPass, X86Adapter, X86Inst,
//! };
//!
//! let mut cc = CodeCompiler::new(Arch::X64);
//! let total = cc.new_gp("total");
//! cc.add_func(&[]).unwrap();
//! cc.emit(X86Inst::Mov, &[Operand::Reg(total), Operand::Imm(1)]);
//! cc.func_ret(&[Operand::Reg(total)]);
//! cc.end_func().unwrap();
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let pass = RaPass::new(X86Adapter::x64());
//! let ra = pass.run_on_function(&session, &mut cc).unwrap();
//! assert_eq!(ra.blocks().len(), 1);
//! ```
//!
//! # Architecture
//!
//! - [`core`] - shared infrastructure: arena session, errors, bit vectors,
//!   register primitives, operands and the code compiler node list.
//! - [`ra`] - the allocation pass: CFG builder, post-order view, dominator
//!   tree, loop discovery, liveness.
//! - [`arch`] - architecture adapters: the full x86/x86-64 adapter with its
//!   fixed-register tables, and an AArch64 stub.

pub mod arch;
pub mod core;
pub mod ra;

pub use crate::core::{
    Arch, BitVec, CodeCompiler, CompilationSession, CompileError, CompileResult, InstId, LabelId,
    MemOperand, NodeId, NodeKind, Operand, PhysId, RegCount, RegKind, RegMask, RegStats,
    SessionStats, VirtId, VirtReg, ANY_PHYS_ID,
};

pub use crate::arch::a64::{A64Adapter, A64Inst};
pub use crate::arch::x86::{X86Adapter, X86Inst};
pub use crate::arch::{ArchAdapter, CommonData, InstInfo, JumpKind, OpRole, SingleRegCase};

pub use crate::ra::{
    BlockFlags, LoopFlags, RaBlock, RaFunction, RaInstData, RaLoop, RaPass, TiedFlags, TiedReg,
    WorkReg, INVALID_POV,
};
