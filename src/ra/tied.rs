//! Tied registers, work registers and per-instruction allocation data.
//!
//! A *tied register* describes how one instruction uses one virtual
//! register: read/write roles, memory substitutability, function-call roles,
//! the allocable-register mask and optional fixed physical ids. Operands of
//! one instruction that name the same virtual register coalesce into a
//! single tied register.
//!
//! A *work register* is the pass-local handle for a virtual register that is
//! actually referenced by the current function; its dense `work_id` is the
//! bit position in every liveness bit vector.

use std::ops::{BitAnd, BitOr, BitOrAssign};

use smallvec::SmallVec;

use crate::core::bitvec::BitWord;
use crate::core::compiler::{CodeCompiler, NodeId};
use crate::core::error::{CompileError, CompileResult};
use crate::core::operand::VirtId;
use crate::core::reg::{phys_mask, PhysId, RegCount, RegKind, RegMask, RegStats, ANY_PHYS_ID};

use super::block::BlockFlags;
use super::RaFunction;

/// Role and constraint flags of a [`TiedReg`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TiedFlags(u16);

impl TiedFlags {
    pub const NONE: TiedFlags = TiedFlags(0);
    /// Register is read.
    pub const R: TiedFlags = TiedFlags(0x0001);
    /// Register is written.
    pub const W: TiedFlags = TiedFlags(0x0002);
    /// Register is read and written.
    pub const X: TiedFlags = TiedFlags(0x0003);
    /// The read can be satisfied from memory.
    pub const R_MEM: TiedFlags = TiedFlags(0x0004);
    /// The write can be satisfied to memory.
    pub const W_MEM: TiedFlags = TiedFlags(0x0008);
    /// Read-write memory substitutable.
    pub const X_MEM: TiedFlags = TiedFlags(0x000C);
    /// Function argument passed in a register.
    pub const R_FUNC: TiedFlags = TiedFlags(0x0010);
    /// Function return value produced into a register.
    pub const W_FUNC: TiedFlags = TiedFlags(0x0020);
    /// Argument and return value at once.
    pub const X_FUNC: TiedFlags = TiedFlags(0x0030);
    /// Has an exclusive write operand.
    pub const W_EXCLUSIVE: TiedFlags = TiedFlags(0x0080);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: TiedFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TiedFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: TiedFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for TiedFlags {
    type Output = TiedFlags;
    fn bitor(self, rhs: TiedFlags) -> TiedFlags {
        TiedFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TiedFlags {
    fn bitor_assign(&mut self, rhs: TiedFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TiedFlags {
    type Output = TiedFlags;
    fn bitand(self, rhs: TiedFlags) -> TiedFlags {
        TiedFlags(self.0 & rhs.0)
    }
}

/// One instruction's view of one virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiedReg {
    /// The virtual register this entry describes.
    pub vreg: VirtId,
    /// Role and constraint flags.
    pub flags: TiedFlags,
    /// Mask of physical registers the allocator may pick from.
    pub allocable: u32,
    /// How many operands of the instruction reference `vreg`.
    pub ref_count: u8,
    /// Fixed input register or [`ANY_PHYS_ID`].
    pub r_phys: PhysId,
    /// Fixed output register or [`ANY_PHYS_ID`].
    pub w_phys: PhysId,
}

impl TiedReg {
    pub fn new(vreg: VirtId, flags: TiedFlags, allocable: u32, r_phys: PhysId, w_phys: PhysId) -> Self {
        Self {
            vreg,
            flags,
            allocable,
            ref_count: 1,
            r_phys,
            w_phys,
        }
    }

    pub fn is_read_only(&self) -> bool {
        (self.flags & TiedFlags::X) == TiedFlags::R
    }

    pub fn is_write_only(&self) -> bool {
        (self.flags & TiedFlags::X) == TiedFlags::W
    }

    pub fn is_read_write(&self) -> bool {
        (self.flags & TiedFlags::X) == TiedFlags::X
    }

    pub fn has_r_phys(&self) -> bool {
        self.r_phys != ANY_PHYS_ID
    }

    pub fn has_w_phys(&self) -> bool {
        self.w_phys != ANY_PHYS_ID
    }
}

/// Pass-local handle for a referenced virtual register.
#[derive(Debug, Clone, Copy)]
pub struct WorkReg {
    work_id: u32,
    virt_id: VirtId,
    kind: RegKind,
}

impl WorkReg {
    pub(crate) fn new(work_id: u32, virt_id: VirtId, kind: RegKind) -> Self {
        Self {
            work_id,
            virt_id,
            kind,
        }
    }

    pub fn work_id(&self) -> u32 {
        self.work_id
    }

    pub fn virt_id(&self) -> VirtId {
        self.virt_id
    }

    pub fn kind(&self) -> RegKind {
        self.kind
    }
}

/// Allocation data attached to one instruction node.
#[derive(Debug, Clone, Copy)]
pub struct RaInstData<'arena> {
    /// Tied registers, grouped by register kind.
    pub tied: &'arena [TiedReg],
    /// Start index of each kind's group within `tied`.
    pub tied_index: RegCount,
    /// Count of tied registers per kind.
    pub tied_count: RegCount,
    /// All fixed physical inputs.
    pub in_regs: RegMask,
    /// All fixed physical outputs.
    pub out_regs: RegMask,
    /// Registers destroyed implicitly (volatiles around a call).
    pub clobbered: RegMask,
    /// Live work registers entering the instruction, filled by liveness.
    pub live: Option<&'arena [BitWord]>,
}

impl<'arena> RaInstData<'arena> {
    pub fn tied_total(&self) -> usize {
        self.tied.len()
    }

    pub fn tied_of_kind(&self, kind: RegKind) -> &'arena [TiedReg] {
        let start = self.tied_index.get(kind) as usize;
        let count = self.tied_count.get(kind) as usize;
        &self.tied[start..start + count]
    }

    pub fn find_tied(&self, vreg: VirtId) -> Option<&TiedReg> {
        self.tied.iter().find(|t| t.vreg == vreg)
    }

    /// Whether the given work register is live entering this instruction.
    pub fn is_live(&self, work_id: u32) -> bool {
        match self.live {
            Some(words) => {
                let word = (work_id / BitWord::BITS) as usize;
                word < words.len() && (words[word] >> (work_id % BitWord::BITS)) & 1 != 0
            }
            None => false,
        }
    }
}

/// Accumulates tied registers for a single node, then stores the grouped
/// result into the pass.
pub(crate) struct TiedBuilder {
    tied: SmallVec<[TiedReg; 8]>,
    count: RegCount,
    pub(crate) stats: RegStats,
}

impl TiedBuilder {
    pub(crate) fn new() -> Self {
        Self {
            tied: SmallVec::new(),
            count: RegCount::new(),
            stats: RegStats::new(),
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.tied.len()
    }

    /// Add one register use. A second use of the same virtual register in
    /// the same instruction coalesces: flags accumulate, the allocable mask
    /// intersects and the reference count grows. Two different fixed output
    /// registers for one virtual register are an allocation conflict.
    pub(crate) fn add(
        &mut self,
        ra: &mut RaFunction<'_>,
        cc: &mut CodeCompiler,
        vreg: VirtId,
        flags: TiedFlags,
        allocable: u32,
        r_phys: PhysId,
        w_phys: PhysId,
    ) -> CompileResult<()> {
        let kind = cc.virt_reg(vreg).kind();
        self.stats.make_used(kind);
        if r_phys != ANY_PHYS_ID || w_phys != ANY_PHYS_ID {
            self.stats.make_precolored(kind);
        }

        match cc.virt_reg(vreg).tied_link() {
            None => {
                ra.add_to_work_regs(cc, vreg)?;
                let index = self.tied.len() as u32;
                self.tied.push(TiedReg::new(vreg, flags, allocable, r_phys, w_phys));
                self.count.add(kind, 1);
                cc.virt_reg_mut(vreg).tied_link = Some(index);
            }
            Some(index) => {
                let tied = &mut self.tied[index as usize];
                if w_phys != ANY_PHYS_ID {
                    if tied.w_phys != ANY_PHYS_ID && tied.w_phys != w_phys {
                        return Err(CompileError::OverlappedRegs);
                    }
                    tied.w_phys = w_phys;
                }
                if r_phys != ANY_PHYS_ID && tied.r_phys == ANY_PHYS_ID {
                    tied.r_phys = r_phys;
                }
                tied.ref_count += 1;
                tied.flags |= flags;
                tied.allocable &= allocable;
            }
        }
        Ok(())
    }

    /// Narrow the only tied register to read-only after a same-register
    /// collapse.
    pub(crate) fn make_read_only(&mut self) {
        if let Some(tied) = self.tied.first_mut() {
            tied.flags.remove(TiedFlags::W);
        }
    }

    /// Narrow the only tied register to write-only after a same-register
    /// collapse.
    pub(crate) fn make_write_only(&mut self) {
        if let Some(tied) = self.tied.first_mut() {
            tied.flags.remove(TiedFlags::R);
        }
    }

    /// Group the tied registers by kind, copy them into the arena, attach
    /// the result to `node` and clear the per-instruction virtual-register
    /// links.
    pub(crate) fn store_to<'arena>(
        &mut self,
        ra: &mut RaFunction<'arena>,
        cc: &mut CodeCompiler,
        node: NodeId,
        block: u32,
        clobbered: RegMask,
    ) -> CompileResult<()> {
        let tied_count = self.count;
        let tied_index = RegCount::index_from_count(&tied_count);

        let mut grouped: SmallVec<[TiedReg; 8]> = SmallVec::new();
        for kind_index in 0..crate::core::reg::MAX_REG_KINDS {
            for tied in &self.tied {
                if cc.virt_reg(tied.vreg).kind().index() == kind_index {
                    grouped.push(*tied);
                }
            }
        }
        debug_assert_eq!(grouped.len(), self.tied.len());

        let mut in_regs = RegMask::new();
        let mut out_regs = RegMask::new();
        let mut has_fixed = false;
        for tied in &grouped {
            let kind = cc.virt_reg(tied.vreg).kind();
            if tied.has_r_phys() {
                in_regs.or_kind(kind, phys_mask(tied.r_phys));
                has_fixed = true;
            }
            if tied.has_w_phys() {
                out_regs.or_kind(kind, phys_mask(tied.w_phys));
                has_fixed = true;
            }
            cc.virt_reg_mut(tied.vreg).tied_link = None;
        }
        if has_fixed {
            ra.block_mut(block).add_flags(BlockFlags::HAS_FIXED_REGS);
        }

        let tied_slice = ra.arena().alloc_slice_copy(&grouped);
        ra.set_inst_data(
            node,
            RaInstData {
                tied: tied_slice,
                tied_index,
                tied_count,
                in_regs,
                out_regs,
                clobbered,
                live: None,
            },
        );
        Ok(())
    }
}
