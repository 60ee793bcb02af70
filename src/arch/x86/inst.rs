//! x86 instruction ids and their common data.
//!
//! This is the instruction-info database the allocation pass consults: for
//! every id it answers how the first operand is used by default, whether the
//! operand roles come from the fixed-register table instead, how the
//! instruction transfers control, and what a same-register operand pair
//! degenerates to.

use strum::FromRepr;

use crate::arch::{CommonData, InstInfo, JumpKind, SingleRegCase};
use crate::core::operand::InstId;

const fn rw(flags: u16) -> InstInfo {
    InstInfo::new(CommonData::new(flags, SingleRegCase::None, JumpKind::None))
}

const fn rw_single(flags: u16, single_reg: SingleRegCase) -> InstInfo {
    InstInfo::new(CommonData::new(flags, single_reg, JumpKind::None))
}

const fn fixed() -> InstInfo {
    InstInfo::new(CommonData::new(
        CommonData::FIXED_RM,
        SingleRegCase::None,
        JumpKind::None,
    ))
}

const fn fixed_jump(jump: JumpKind) -> InstInfo {
    InstInfo::new(CommonData::new(CommonData::FIXED_RM, SingleRegCase::None, jump))
}

const fn jump(flags: u16, jump: JumpKind) -> InstInfo {
    InstInfo::new(CommonData::new(flags, SingleRegCase::None, jump))
}

/// x86/x86-64 instruction identifiers known to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr)]
#[repr(u16)]
pub enum X86Inst {
    Nop,

    // Data movement.
    Mov,
    Movsx,
    Movzx,
    Lea,
    Xchg,
    Push,
    Pop,

    // Integer arithmetic and logic.
    Add,
    Adc,
    Sub,
    Sbb,
    And,
    Or,
    Xor,
    Not,
    Neg,
    Inc,
    Dec,
    Cmp,
    Test,

    // Shifts and rotates.
    Rcl,
    Rcr,
    Rol,
    Ror,
    Sal,
    Sar,
    Shl,
    Shr,
    Shld,
    Shrd,

    // Multiply and divide.
    Mul,
    Imul,
    Div,
    Idiv,
    Mulx,

    // Legacy BCD.
    Aaa,
    Aad,
    Aam,
    Aas,
    Daa,
    Das,

    // Sign extension.
    Cbw,
    Cdq,
    Cdqe,
    Cqo,
    Cwd,
    Cwde,

    // Fixed-register specials.
    Cpuid,
    Cmpxchg,
    Cmpxchg8b,
    Cmpxchg16b,
    Lahf,
    Sahf,
    Rdtsc,
    Rdtscp,
    Xgetbv,
    Xsetbv,
    Xrstor,
    Xrstor64,
    Xsave,
    Xsave64,
    Xsaveopt,
    Xsaveopt64,

    // Port I/O.
    In,
    Ins,
    Out,
    Outs,

    // String operations.
    Cmps,
    Lods,
    Movs,
    Scas,
    Stos,

    // Jumps.
    Jmp,
    Ja,
    Jae,
    Jb,
    Jbe,
    Je,
    Jne,
    Jg,
    Jge,
    Jl,
    Jle,
    Jecxz,
    Loop,
    Loope,
    Loopne,

    // SSE/AVX data movement and arithmetic.
    Movd,
    Movq,
    Movaps,
    Movups,
    Movdqa,
    Movdqu,
    Addps,
    Addpd,
    Subps,
    Mulps,
    Divps,
    Xorps,
    Xorpd,
    Andps,
    Orps,
    Pand,
    Por,
    Pxor,
    Paddd,
    Psubd,

    // Implicit-register SSE/AVX.
    Maskmovq,
    Maskmovdqu,
    Vmaskmovdqu,
    Blendvpd,
    Blendvps,
    Pblendvb,
    Sha256rnds2,
    Pcmpestri,
    Pcmpestrm,
    Pcmpistri,
    Pcmpistrm,
    Vpcmpestri,
    Vpcmpestrm,
    Vpcmpistri,
    Vpcmpistrm,
}

impl X86Inst {
    pub const fn id(self) -> InstId {
        InstId(self as u16)
    }

    pub fn from_id(id: InstId) -> Option<X86Inst> {
        X86Inst::from_repr(id.0)
    }

    /// Common data of the instruction.
    pub const fn info(self) -> InstInfo {
        use X86Inst::*;
        match self {
            Nop => rw(0),

            Mov | Movsx | Movzx | Lea | Movd | Movq | Movaps | Movups | Movdqa | Movdqu => {
                rw(CommonData::USE_W)
            }

            Add | Adc | Not | Neg | Inc | Dec | Addps | Addpd | Mulps | Divps | Paddd => {
                rw(CommonData::USE_X)
            }

            // Same-register forms degenerate: `and x, x` keeps the value,
            // `xor x, x` produces it from nothing.
            And | Or | Pand | Por | Andps | Orps => {
                rw_single(CommonData::USE_X, SingleRegCase::ReadOnly)
            }
            Xor | Sub | Sbb | Pxor | Psubd | Subps | Xorps | Xorpd => {
                rw_single(CommonData::USE_X, SingleRegCase::WriteOnly)
            }

            Cmp | Test => rw(CommonData::USE_R),

            Xchg => rw(CommonData::USE_XX),

            Rcl | Rcr | Rol | Ror | Sal | Sar | Shl | Shr | Shld | Shrd => fixed(),

            Mul | Div | Idiv | Mulx => fixed(),
            Imul => InstInfo::new(CommonData::new(
                CommonData::FIXED_RM | CommonData::USE_X,
                SingleRegCase::None,
                JumpKind::None,
            )),

            Aaa | Aad | Aam | Aas | Daa | Das => fixed(),
            Cbw | Cdq | Cdqe | Cqo | Cwd | Cwde => fixed(),

            Cpuid | Cmpxchg | Cmpxchg8b | Cmpxchg16b | Lahf | Sahf | Push | Pop | Rdtsc
            | Rdtscp | Xgetbv | Xsetbv | Xrstor | Xrstor64 | Xsave | Xsave64 | Xsaveopt
            | Xsaveopt64 => fixed(),

            In | Ins | Out | Outs => fixed(),
            Cmps | Lods | Movs | Scas | Stos => fixed(),

            Jmp => jump(CommonData::USE_R, JumpKind::Direct),
            Ja | Jae | Jb | Jbe | Je | Jne | Jg | Jge | Jl | Jle => {
                jump(0, JumpKind::Conditional)
            }
            Jecxz | Loop | Loope | Loopne => fixed_jump(JumpKind::Conditional),

            Maskmovq | Maskmovdqu | Vmaskmovdqu | Blendvpd | Blendvps | Pblendvb
            | Sha256rnds2 => fixed(),
            Pcmpestri | Pcmpestrm | Pcmpistri | Pcmpistrm | Vpcmpestri | Vpcmpestrm
            | Vpcmpistri | Vpcmpistrm => fixed(),
        }
    }
}

impl From<X86Inst> for InstId {
    fn from(inst: X86Inst) -> InstId {
        inst.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip() {
        for inst in [X86Inst::Nop, X86Inst::Mov, X86Inst::Mul, X86Inst::Vpcmpistrm] {
            assert_eq!(X86Inst::from_id(inst.id()), Some(inst));
        }
        assert_eq!(X86Inst::from_id(InstId(0xFFFF)), None);
    }

    #[test]
    fn test_common_data_classification() {
        assert!(X86Inst::Mov.info().common.uses_w());
        assert!(X86Inst::Add.info().common.uses_x());
        assert!(X86Inst::Cmp.info().common.uses_r());
        assert!(X86Inst::Xchg.info().common.uses_xx());
        assert!(X86Inst::Mul.info().common.has_fixed_rm());
        assert!(!X86Inst::Mov.info().common.has_fixed_rm());
    }

    #[test]
    fn test_single_reg_cases() {
        assert_eq!(
            X86Inst::Xor.info().common.single_reg_case(),
            SingleRegCase::WriteOnly
        );
        assert_eq!(
            X86Inst::And.info().common.single_reg_case(),
            SingleRegCase::ReadOnly
        );
        assert_eq!(
            X86Inst::Add.info().common.single_reg_case(),
            SingleRegCase::None
        );
    }

    #[test]
    fn test_jump_kinds() {
        assert_eq!(X86Inst::Jmp.info().common.jump_kind(), JumpKind::Direct);
        assert_eq!(X86Inst::Jne.info().common.jump_kind(), JumpKind::Conditional);
        assert_eq!(X86Inst::Jecxz.info().common.jump_kind(), JumpKind::Conditional);
        assert!(X86Inst::Jecxz.info().common.has_fixed_rm());
        assert_eq!(X86Inst::Mov.info().common.jump_kind(), JumpKind::None);
    }
}
