//! AArch64 architecture adapter (stub).
//!
//! Enough to drive the framework on AArch64 shaped input: register
//! geometry, the AAPCS64 argument/result registers and default operand
//! roles. AArch64's three-operand encodings need no fixed-register table.

use strum::FromRepr;

use crate::arch::{ArchAdapter, CommonData, InstInfo, JumpKind, OpRole, SingleRegCase, MAX_OP_ROLES};
use crate::core::compiler::Arch;
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::{InstId, Operand};
use crate::core::reg::{lsb_mask, PhysId, RegCount, RegKind, RegMask, ANY_PHYS_ID};

/// AArch64 instruction identifiers known to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u16)]
pub enum A64Inst {
    Nop,
    Mov,
    Add,
    Sub,
    Mul,
    And,
    Orr,
    Eor,
    Cmp,
    Ldr,
    Str,
    B,
    BCond,
    Cbz,
    Cbnz,
    Ret,
}

impl A64Inst {
    pub const fn id(self) -> InstId {
        InstId(self as u16)
    }

    pub fn from_id(id: InstId) -> Option<A64Inst> {
        A64Inst::from_repr(id.0)
    }

    pub const fn info(self) -> InstInfo {
        use A64Inst::*;
        let common = match self {
            Nop => CommonData::new(0, SingleRegCase::None, JumpKind::None),
            // Destination-first three-operand encodings: first operand is
            // written, the rest are read.
            Mov | Add | Sub | Mul | And | Orr | Eor | Ldr => {
                CommonData::new(CommonData::USE_W, SingleRegCase::None, JumpKind::None)
            }
            Cmp | Str | Ret => CommonData::new(CommonData::USE_R, SingleRegCase::None, JumpKind::None),
            B => CommonData::new(0, SingleRegCase::None, JumpKind::Direct),
            BCond => CommonData::new(0, SingleRegCase::None, JumpKind::Conditional),
            Cbz | Cbnz => {
                CommonData::new(CommonData::USE_R, SingleRegCase::None, JumpKind::Conditional)
            }
        };
        InstInfo::new(common)
    }
}

impl From<A64Inst> for InstId {
    fn from(inst: A64Inst) -> InstId {
        inst.id()
    }
}

static RWI_R: [OpRole; MAX_OP_ROLES] = [
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
];
static RWI_W: [OpRole; MAX_OP_ROLES] = [
    OpRole::w(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
    OpRole::r(ANY_PHYS_ID),
];

/// AArch64 adapter.
pub struct A64Adapter;

impl A64Adapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for A64Adapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchAdapter for A64Adapter {
    fn arch(&self) -> Arch {
        Arch::A64
    }

    fn reg_counts(&self) -> RegCount {
        let mut count = RegCount::new();
        // x0..x28; x29 is the frame pointer, x30 the link register.
        count.set(RegKind::Gp, 29);
        count.set(RegKind::Vec, 32);
        count
    }

    fn allocable_regs(&self) -> RegMask {
        let count = self.reg_counts();
        let mut mask = RegMask::new();
        mask.set(RegKind::Gp, lsb_mask(count.get(RegKind::Gp)));
        mask.set(RegKind::Vec, lsb_mask(count.get(RegKind::Vec)));
        mask
    }

    fn call_clobbers(&self) -> RegMask {
        let mut mask = RegMask::new();
        // x0..x17 are caller saved.
        mask.set(RegKind::Gp, lsb_mask(18));
        mask.set(RegKind::Vec, self.allocable_regs().get(RegKind::Vec));
        mask
    }

    fn is_defined_id(&self, id: InstId) -> bool {
        A64Inst::from_id(id).is_some()
    }

    fn inst_info(&self, id: InstId) -> CompileResult<InstInfo> {
        A64Inst::from_id(id)
            .map(A64Inst::info)
            .ok_or(CompileError::InvalidInstruction)
    }

    fn tag_operands(
        &self,
        id: InstId,
        info: &InstInfo,
        _ops: &[Operand],
    ) -> CompileResult<&'static [OpRole; MAX_OP_ROLES]> {
        if A64Inst::from_id(id).is_none() {
            return Err(CompileError::InvalidInstruction);
        }
        if info.common.uses_w() {
            Ok(&RWI_W)
        } else {
            Ok(&RWI_R)
        }
    }

    fn tag_extra_reg(&self, _kind: RegKind) -> OpRole {
        OpRole::read_any()
    }

    fn arg_phys(&self, kind: RegKind, index: usize) -> PhysId {
        match kind {
            RegKind::Gp | RegKind::Vec if index < 8 => index as PhysId,
            _ => ANY_PHYS_ID,
        }
    }

    fn ret_phys(&self, kind: RegKind, index: usize) -> PhysId {
        match kind {
            RegKind::Gp | RegKind::Vec if index < 2 => index as PhysId,
            _ => ANY_PHYS_ID,
        }
    }
}
