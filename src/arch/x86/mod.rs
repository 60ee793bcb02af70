//! x86/x86-64 architecture adapter.
//!
//! Provides register geometry, the System V calling convention registers and
//! the per-instruction operand role tables, including every fixed-register
//! special case (accumulator-pair multiplies, string operations pinning the
//! index registers, `pcmpistri` writing the count register, and so on).

pub mod inst;

pub use inst::X86Inst;

use crate::arch::{ArchAdapter, InstInfo, OpRole, MAX_OP_ROLES};
use crate::core::compiler::Arch;
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::{InstId, Operand};
use crate::core::reg::{lsb_mask, phys_mask, PhysId, RegCount, RegKind, RegMask, ANY_PHYS_ID};

/// General purpose register ids.
pub mod gp {
    use crate::core::reg::PhysId;

    pub const AX: PhysId = 0;
    pub const CX: PhysId = 1;
    pub const DX: PhysId = 2;
    pub const BX: PhysId = 3;
    pub const SP: PhysId = 4;
    pub const BP: PhysId = 5;
    pub const SI: PhysId = 6;
    pub const DI: PhysId = 7;
    pub const R8: PhysId = 8;
    pub const R9: PhysId = 9;
    pub const R10: PhysId = 10;
    pub const R11: PhysId = 11;
}

const fn r(id: PhysId) -> OpRole {
    OpRole::r(id)
}

const fn w(id: PhysId) -> OpRole {
    OpRole::w(id)
}

const fn x(id: PhysId) -> OpRole {
    OpRole::x(id)
}

const ANY: PhysId = ANY_PHYS_ID;

/// Build a role table, padding unspecified trailing operands.
macro_rules! rw_ops {
    ($($role:expr),+ $(,)?) => {{
        let mut table = [OpRole::none(); MAX_OP_ROLES];
        let src = [$($role),+];
        let mut i = 0;
        while i < src.len() {
            table[i] = src[i];
            i += 1;
        }
        table
    }};
}

static RWI_R: [OpRole; MAX_OP_ROLES] = rw_ops!(r(ANY), r(ANY), r(ANY), r(ANY), r(ANY), r(ANY));
static RWI_W: [OpRole; MAX_OP_ROLES] = rw_ops!(w(ANY), r(ANY), r(ANY), r(ANY), r(ANY), r(ANY));
static RWI_X: [OpRole; MAX_OP_ROLES] = rw_ops!(x(ANY), r(ANY), r(ANY), r(ANY), r(ANY), r(ANY));
static RWI_XX: [OpRole; MAX_OP_ROLES] = rw_ops!(x(ANY), x(ANY), r(ANY), r(ANY), r(ANY), r(ANY));

/// Operand roles for an x86 instruction, resolving the fixed-register
/// special cases that the common `USE_*` bits cannot express.
pub fn op_roles(
    inst: X86Inst,
    info: &InstInfo,
    ops: &[Operand],
) -> &'static [OpRole; MAX_OP_ROLES] {
    use X86Inst::*;

    if !info.common.has_fixed_rm() {
        if info.common.uses_xx() {
            return &RWI_XX;
        }
        if info.common.uses_x() {
            return &RWI_X;
        }
        if info.common.uses_w() {
            return &RWI_W;
        }
        if info.common.uses_r() {
            return &RWI_R;
        }
        return &RWI_X;
    }

    match inst {
        Aaa | Aad | Aam | Aas | Daa | Das => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::AX));
            &T
        }

        Cpuid => {
            static T: [OpRole; MAX_OP_ROLES] =
                rw_ops!(x(gp::AX), w(gp::BX), x(gp::CX), w(gp::DX));
            &T
        }

        Cbw | Cdqe | Cwde => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::AX));
            &T
        }
        Cdq | Cwd | Cqo => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::DX), r(gp::AX));
            &T
        }

        Cmpxchg => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(ANY), r(ANY), x(gp::AX));
            &T
        }
        Cmpxchg8b | Cmpxchg16b => {
            static T: [OpRole; MAX_OP_ROLES] =
                rw_ops!(OpRole::none(), x(gp::DX), x(gp::AX), r(gp::CX), r(gp::BX));
            &T
        }

        Div | Idiv => {
            if ops.len() == 2 {
                static T2: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::AX), r(ANY));
                &T2
            } else {
                static T3: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::DX), x(gp::AX), r(ANY));
                &T3
            }
        }

        Imul | Mul => {
            if inst == Imul {
                // Two-operand and immediate forms behave like plain
                // read-write instructions.
                if ops.len() == 2 {
                    return &RWI_X;
                }
                if ops.len() == 3
                    && !(ops[0].is_reg() && ops[1].is_reg() && ops[2].is_reg_or_mem())
                {
                    return &RWI_X;
                }
            }
            if ops.len() == 2 {
                static T2: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::AX), r(ANY));
                &T2
            } else {
                static T3: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::DX), x(gp::AX), r(ANY));
                &T3
            }
        }

        Mulx => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(ANY), w(ANY), r(ANY), r(gp::DX));
            &T
        }

        Jecxz | Loop | Loope | Loopne => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(r(gp::CX));
            &T
        }

        Lahf => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::AX));
            &T
        }
        Sahf => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(r(gp::AX));
            &T
        }

        Push => &RWI_R,
        Pop => &RWI_W,

        Rcl | Rcr | Rol | Ror | Sal | Sar | Shl | Shr => {
            // Special only when the count operand is a register.
            if ops.len() > 1 && ops[1].is_reg() {
                static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(ANY), r(gp::CX));
                &T
            } else {
                &RWI_X
            }
        }
        Shld | Shrd => {
            if ops.len() > 2 && ops[2].is_reg() {
                static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(ANY), r(ANY), r(gp::CX));
                &T
            } else {
                &RWI_X
            }
        }

        Rdtsc | Rdtscp => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::DX), w(gp::AX), w(gp::CX));
            &T
        }

        Xrstor | Xrstor64 | Xsave | Xsave64 | Xsaveopt | Xsaveopt64 => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(ANY), r(gp::DX), r(gp::AX));
            &T
        }
        Xgetbv => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::DX), w(gp::AX), r(gp::CX));
            &T
        }
        Xsetbv => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(r(gp::DX), r(gp::AX), r(gp::CX));
            &T
        }

        In => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::AX), r(gp::DX));
            &T
        }
        Ins => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::DI), r(gp::DX));
            &T
        }
        Out => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(r(gp::DX), r(gp::AX));
            &T
        }
        Outs => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(r(gp::DX), x(gp::SI));
            &T
        }

        Cmps => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::SI), x(gp::DI));
            &T
        }
        Lods => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(gp::AX), x(gp::SI));
            &T
        }
        Movs => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::DI), x(gp::SI));
            &T
        }
        Scas | Stos => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(x(gp::DI), r(gp::AX));
            &T
        }

        Maskmovq | Maskmovdqu | Vmaskmovdqu => {
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(r(ANY), r(ANY), r(gp::DI));
            &T
        }

        Blendvpd | Blendvps | Pblendvb | Sha256rnds2 => {
            // Third operand is implicitly xmm0.
            static T: [OpRole; MAX_OP_ROLES] = rw_ops!(w(ANY), r(ANY), r(0));
            &T
        }

        Pcmpestri | Vpcmpestri => {
            static T: [OpRole; MAX_OP_ROLES] =
                rw_ops!(r(ANY), r(ANY), OpRole::none(), w(gp::CX), r(gp::AX), r(gp::DX));
            &T
        }
        Pcmpistri | Vpcmpistri => {
            static T: [OpRole; MAX_OP_ROLES] =
                rw_ops!(r(ANY), r(ANY), OpRole::none(), w(gp::CX));
            &T
        }
        Pcmpestrm | Vpcmpestrm => {
            static T: [OpRole; MAX_OP_ROLES] =
                rw_ops!(r(ANY), r(ANY), OpRole::none(), w(0), r(gp::AX), r(gp::DX));
            &T
        }
        Pcmpistrm | Vpcmpistrm => {
            static T: [OpRole; MAX_OP_ROLES] =
                rw_ops!(r(ANY), r(ANY), OpRole::none(), w(0));
            &T
        }

        _ => &RWI_X,
    }
}

/// x86/x86-64 adapter.
pub struct X86Adapter {
    arch: Arch,
    preserved_fp: bool,
}

impl X86Adapter {
    /// 64-bit adapter.
    pub fn x64() -> Self {
        Self {
            arch: Arch::X64,
            preserved_fp: false,
        }
    }

    /// 32-bit adapter.
    pub fn x86() -> Self {
        Self {
            arch: Arch::X86,
            preserved_fp: false,
        }
    }

    /// Reserve the frame pointer, removing it from the allocable set.
    pub fn with_preserved_fp(mut self) -> Self {
        self.preserved_fp = true;
        self
    }

    fn is_64bit(&self) -> bool {
        self.arch == Arch::X64
    }
}

impl ArchAdapter for X86Adapter {
    fn arch(&self) -> Arch {
        self.arch
    }

    fn reg_counts(&self) -> RegCount {
        let mut count = RegCount::new();
        count.set(RegKind::Gp, if self.is_64bit() { 15 } else { 7 });
        count.set(RegKind::Vec, if self.is_64bit() { 16 } else { 8 });
        count.set(RegKind::K, 7);
        count.set(RegKind::Mm, 8);
        if self.preserved_fp {
            count.sub(RegKind::Gp, 1);
        }
        count
    }

    fn allocable_regs(&self) -> RegMask {
        let count = self.reg_counts();
        let mut mask = RegMask::new();
        mask.set(
            RegKind::Gp,
            lsb_mask(count.get(RegKind::Gp)) & !phys_mask(gp::SP),
        );
        mask.set(RegKind::Vec, lsb_mask(count.get(RegKind::Vec)));
        // k0 is not addressable as a write mask.
        mask.set(RegKind::K, lsb_mask(count.get(RegKind::K)) & !phys_mask(0));
        mask.set(RegKind::Mm, lsb_mask(count.get(RegKind::Mm)));
        if self.preserved_fp {
            mask.and_not_kind(RegKind::Gp, phys_mask(gp::BP));
        }
        mask
    }

    fn call_clobbers(&self) -> RegMask {
        let mut mask = RegMask::new();
        if self.is_64bit() {
            mask.set(
                RegKind::Gp,
                phys_mask(gp::AX)
                    | phys_mask(gp::CX)
                    | phys_mask(gp::DX)
                    | phys_mask(gp::SI)
                    | phys_mask(gp::DI)
                    | phys_mask(gp::R8)
                    | phys_mask(gp::R9)
                    | phys_mask(gp::R10)
                    | phys_mask(gp::R11),
            );
        } else {
            mask.set(
                RegKind::Gp,
                phys_mask(gp::AX) | phys_mask(gp::CX) | phys_mask(gp::DX),
            );
        }
        let allocable = self.allocable_regs();
        mask.set(RegKind::Vec, allocable.get(RegKind::Vec));
        mask.set(RegKind::K, allocable.get(RegKind::K));
        mask.set(RegKind::Mm, allocable.get(RegKind::Mm));
        mask
    }

    fn is_defined_id(&self, id: InstId) -> bool {
        X86Inst::from_id(id).is_some()
    }

    fn inst_info(&self, id: InstId) -> CompileResult<InstInfo> {
        X86Inst::from_id(id)
            .map(X86Inst::info)
            .ok_or(CompileError::InvalidInstruction)
    }

    fn tag_operands(
        &self,
        id: InstId,
        info: &InstInfo,
        ops: &[Operand],
    ) -> CompileResult<&'static [OpRole; MAX_OP_ROLES]> {
        let inst = X86Inst::from_id(id).ok_or(CompileError::InvalidInstruction)?;
        Ok(op_roles(inst, info, ops))
    }

    fn tag_extra_reg(&self, kind: RegKind) -> OpRole {
        if kind == RegKind::K {
            // AVX-512 {k} selector: read-only, any mask register but k0.
            OpRole::read_any()
        } else {
            // REP counter, pinned to CX.
            OpRole::x(gp::CX)
        }
    }

    fn arg_phys(&self, kind: RegKind, index: usize) -> PhysId {
        if !self.is_64bit() {
            return ANY_PHYS_ID;
        }
        match kind {
            RegKind::Gp => [gp::DI, gp::SI, gp::DX, gp::CX, gp::R8, gp::R9]
                .get(index)
                .copied()
                .unwrap_or(ANY_PHYS_ID),
            RegKind::Vec => {
                if index < 8 {
                    index as PhysId
                } else {
                    ANY_PHYS_ID
                }
            }
            _ => ANY_PHYS_ID,
        }
    }

    fn ret_phys(&self, kind: RegKind, index: usize) -> PhysId {
        match kind {
            RegKind::Gp => [gp::AX, gp::DX].get(index).copied().unwrap_or(ANY_PHYS_ID),
            RegKind::Vec => {
                if index < 2 {
                    index as PhysId
                } else {
                    ANY_PHYS_ID
                }
            }
            _ => ANY_PHYS_ID,
        }
    }
}
