//! Architecture adapters.
//!
//! The adapter is the only architecture-specific dependency of the CFG
//! builder: it supplies register counts and allocable masks, resolves
//! instruction ids against the instruction database and tags every operand
//! of an instruction with its read/write role and fixed-register pins.
//! Swapping the adapter swaps targets.

pub mod a64;
pub mod x86;

use crate::core::compiler::Arch;
use crate::core::error::CompileResult;
use crate::core::operand::{InstId, Operand};
use crate::core::reg::{PhysId, RegCount, RegKind, RegMask, ANY_PHYS_ID};
use crate::ra::tied::TiedFlags;

/// Maximum explicit operands an instruction role table describes.
pub const MAX_OP_ROLES: usize = 6;

/// How an instruction transfers control.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Straight-line instruction.
    #[default]
    None,
    /// Unconditional jump; code after it is unreachable until a label.
    Direct,
    /// Conditional jump; the next node starts the fall-through successor.
    Conditional,
}

/// Behavior when every operand names the same virtual register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SingleRegCase {
    #[default]
    None,
    /// The combined use degenerates to a read (`and x, x`).
    ReadOnly,
    /// The combined use degenerates to a write (`xor x, x`).
    WriteOnly,
}

/// Summary bits an instruction database entry carries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommonData {
    flags: u16,
    single_reg: SingleRegCase,
    jump: JumpKind,
}

impl CommonData {
    /// First operand is read.
    pub const USE_R: u16 = 0x0001;
    /// First operand is written.
    pub const USE_W: u16 = 0x0002;
    /// First operand is read and written.
    pub const USE_X: u16 = 0x0004;
    /// First two operands are read and written.
    pub const USE_XX: u16 = 0x0008;
    /// Operand roles come from the fixed-register table, not from the
    /// `USE_*` bits.
    pub const FIXED_RM: u16 = 0x0010;

    pub const fn new(flags: u16, single_reg: SingleRegCase, jump: JumpKind) -> Self {
        Self {
            flags,
            single_reg,
            jump,
        }
    }

    pub const fn uses_r(&self) -> bool {
        self.flags & Self::USE_R != 0
    }

    pub const fn uses_w(&self) -> bool {
        self.flags & Self::USE_W != 0
    }

    pub const fn uses_x(&self) -> bool {
        self.flags & Self::USE_X != 0
    }

    pub const fn uses_xx(&self) -> bool {
        self.flags & Self::USE_XX != 0
    }

    pub const fn has_fixed_rm(&self) -> bool {
        self.flags & Self::FIXED_RM != 0
    }

    pub const fn single_reg_case(&self) -> SingleRegCase {
        self.single_reg
    }

    pub const fn jump_kind(&self) -> JumpKind {
        self.jump
    }
}

/// Instruction database entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InstInfo {
    pub common: CommonData,
}

impl InstInfo {
    pub const fn new(common: CommonData) -> Self {
        Self { common }
    }
}

/// Role of one explicit operand: read/write flags plus fixed physical pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpRole {
    pub r_phys: PhysId,
    pub w_phys: PhysId,
    pub flags: TiedFlags,
}

impl OpRole {
    /// Read, optionally pinned to a physical register.
    pub const fn r(id: PhysId) -> OpRole {
        OpRole {
            r_phys: id,
            w_phys: ANY_PHYS_ID,
            flags: TiedFlags::R,
        }
    }

    /// Write, optionally pinned to a physical register.
    pub const fn w(id: PhysId) -> OpRole {
        OpRole {
            r_phys: ANY_PHYS_ID,
            w_phys: id,
            flags: TiedFlags::W,
        }
    }

    /// Read-write, optionally pinned to a physical register.
    pub const fn x(id: PhysId) -> OpRole {
        OpRole {
            r_phys: id,
            w_phys: id,
            flags: TiedFlags::X,
        }
    }

    /// Operand without register semantics.
    pub const fn none() -> OpRole {
        OpRole {
            r_phys: ANY_PHYS_ID,
            w_phys: ANY_PHYS_ID,
            flags: TiedFlags::NONE,
        }
    }

    pub const fn read_any() -> OpRole {
        Self::r(ANY_PHYS_ID)
    }

    pub const fn is_fixed(&self) -> bool {
        self.r_phys != ANY_PHYS_ID || self.w_phys != ANY_PHYS_ID
    }
}

/// Architecture-specific services consumed by the allocation pass.
pub trait ArchAdapter {
    /// Architecture this adapter targets.
    fn arch(&self) -> Arch;

    /// Machine register counts per kind.
    fn reg_counts(&self) -> RegCount;

    /// Registers the allocator may freely assign, per kind.
    fn allocable_regs(&self) -> RegMask;

    /// Registers destroyed by a function call under the default calling
    /// convention.
    fn call_clobbers(&self) -> RegMask;

    /// Whether the instruction database knows this id.
    fn is_defined_id(&self, id: InstId) -> bool;

    /// Instruction database lookup.
    fn inst_info(&self, id: InstId) -> CompileResult<InstInfo>;

    /// Per-operand roles for an instruction. Entries beyond the operand
    /// count are meaningless.
    fn tag_operands(
        &self,
        id: InstId,
        info: &InstInfo,
        ops: &[Operand],
    ) -> CompileResult<&'static [OpRole; MAX_OP_ROLES]>;

    /// Role of the extra implicit register attached to an instruction
    /// (repeat counter, mask selector).
    fn tag_extra_reg(&self, kind: RegKind) -> OpRole;

    /// Physical register carrying the `index`-th argument of the given
    /// kind, [`ANY_PHYS_ID`] when passed on the stack.
    fn arg_phys(&self, kind: RegKind, index: usize) -> PhysId;

    /// Physical register carrying the `index`-th return value of the given
    /// kind.
    fn ret_phys(&self, kind: RegKind, index: usize) -> PhysId;
}
