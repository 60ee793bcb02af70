//! Code compiler: the node list the allocation pass consumes.
//!
//! The compiler records a function as a doubly-linked list of nodes
//! (function entry, labels, instructions, calls, returns, an end sentinel,
//! plus informative align/comment nodes) referring to unbounded virtual
//! registers. The allocation pass walks this list, stamps node positions,
//! removes unreachable instructions and attaches per-node analysis data; the
//! list is logically frozen while a pass runs.
//!
//! Virtual registers are owned here. The analysis slots on [`VirtReg`]
//! (tied/work/stack links, physical id, state) are written only by the pass
//! and are cleared again before it returns, whether it succeeded or failed.

use smallvec::SmallVec;

use super::error::{CompileError, CompileResult};
use super::operand::{InstId, LabelId, Operand, VirtId};
use super::reg::{PhysId, RegKind, ANY_PHYS_ID};

/// Target architecture of a [`CodeCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 32-bit x86.
    X86,
    /// 64-bit x86.
    X64,
    /// AArch64.
    A64,
}

/// Identity of a node inside one [`CodeCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Payload of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Function entry; carries the argument registers. Must be the first
    /// node of a function.
    Func { args: SmallVec<[VirtId; 4]> },
    /// Function return; operands are the returned values.
    FuncRet { rets: SmallVec<[Operand; 2]> },
    /// Function call with target, arguments and returned values.
    FuncCall {
        target: Operand,
        args: SmallVec<[Operand; 6]>,
        rets: SmallVec<[VirtId; 2]>,
    },
    /// Machine instruction with operands and an optional extra register
    /// (REP counter or AVX-512 mask selector).
    Inst {
        id: InstId,
        ops: SmallVec<[Operand; 4]>,
        extra: Option<VirtId>,
    },
    /// Label definition.
    Label(LabelId),
    /// End-of-function sentinel.
    Sentinel,
    /// Alignment directive, purely informative to the allocator.
    Align(u32),
    /// Comment, purely informative.
    Comment(String),
}

impl NodeKind {
    /// Whether the node carries operands and participates in register
    /// allocation like an instruction.
    pub fn acts_as_inst(&self) -> bool {
        matches!(
            self,
            NodeKind::Inst { .. } | NodeKind::FuncCall { .. } | NodeKind::FuncRet { .. }
        )
    }
}

/// One node of the linked list.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub(crate) prev: Option<NodeId>,
    pub(crate) next: Option<NodeId>,
    /// Scan position stamped by the allocation pass; zero means unset.
    pub(crate) position: u32,
}

impl Node {
    pub fn prev(&self) -> Option<NodeId> {
        self.prev
    }

    pub fn next(&self) -> Option<NodeId> {
        self.next
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn has_position(&self) -> bool {
        self.position != 0
    }
}

/// Allocation state of a virtual register, maintained by the pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VRegState {
    #[default]
    None,
    /// Currently held in a physical register.
    Reg,
    /// Currently held in memory (spilled).
    Mem,
}

/// Virtual register.
#[derive(Debug)]
pub struct VirtReg {
    id: VirtId,
    kind: RegKind,
    size: u32,
    alignment: u32,
    name: String,
    preferred_regs: u32,

    // Analysis slots, valid only while a pass runs on the function.
    pub(crate) tied_link: Option<u32>,
    pub(crate) work_link: Option<u32>,
    pub(crate) stack_slot: Option<u32>,
    pub(crate) phys_id: PhysId,
    pub(crate) state: VRegState,
}

impl VirtReg {
    pub fn id(&self) -> VirtId {
        self.id
    }

    pub fn kind(&self) -> RegKind {
        self.kind
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Preferred physical registers, a hint the allocator may ignore.
    pub fn preferred_regs(&self) -> u32 {
        self.preferred_regs
    }

    /// Tied-register link, set only while an instruction is being tagged.
    pub fn tied_link(&self) -> Option<u32> {
        self.tied_link
    }

    /// Work-register link, set only while a pass runs.
    pub fn work_link(&self) -> Option<u32> {
        self.work_link
    }

    /// Stack-slot link, set only while a pass runs.
    pub fn stack_slot(&self) -> Option<u32> {
        self.stack_slot
    }

    pub fn state(&self) -> VRegState {
        self.state
    }

    pub fn phys_id(&self) -> PhysId {
        self.phys_id
    }

    pub(crate) fn reset_ra_links(&mut self) {
        self.tied_link = None;
        self.work_link = None;
        self.stack_slot = None;
        self.phys_id = ANY_PHYS_ID;
        self.state = VRegState::None;
    }
}

/// Label bookkeeping: binding node and the block attached by the pass.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct LabelEntry {
    pub(crate) node: Option<NodeId>,
    pub(crate) block: Option<u32>,
}

/// Builds and owns the node list of a single function.
pub struct CodeCompiler {
    arch: Arch,
    nodes: Vec<Node>,
    first: Option<NodeId>,
    last: Option<NodeId>,
    vregs: Vec<VirtReg>,
    labels: Vec<LabelEntry>,
    func: Option<NodeId>,
    end: Option<NodeId>,
}

impl CodeCompiler {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            nodes: Vec::new(),
            first: None,
            last: None,
            vregs: Vec::new(),
            labels: Vec::new(),
            func: None,
            end: None,
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    // ------------------------------------------------------------------
    // Virtual registers
    // ------------------------------------------------------------------

    pub fn new_vreg(&mut self, kind: RegKind, size: u32, alignment: u32, name: &str) -> VirtId {
        let id = VirtId(self.vregs.len() as u32);
        self.vregs.push(VirtReg {
            id,
            kind,
            size,
            alignment,
            name: name.to_string(),
            preferred_regs: 0,
            tied_link: None,
            work_link: None,
            stack_slot: None,
            phys_id: ANY_PHYS_ID,
            state: VRegState::None,
        });
        id
    }

    /// New native-size general purpose register.
    pub fn new_gp(&mut self, name: &str) -> VirtId {
        let size = if self.arch == Arch::X86 { 4 } else { 8 };
        self.new_vreg(RegKind::Gp, size, size, name)
    }

    /// New 128-bit vector register.
    pub fn new_vec(&mut self, name: &str) -> VirtId {
        self.new_vreg(RegKind::Vec, 16, 16, name)
    }

    /// New predicate/mask register.
    pub fn new_mask(&mut self, name: &str) -> VirtId {
        self.new_vreg(RegKind::K, 8, 8, name)
    }

    pub fn is_virt_reg_valid(&self, id: VirtId) -> bool {
        id.index() < self.vregs.len()
    }

    pub fn virt_reg(&self, id: VirtId) -> &VirtReg {
        &self.vregs[id.index()]
    }

    pub(crate) fn virt_reg_mut(&mut self, id: VirtId) -> &mut VirtReg {
        &mut self.vregs[id.index()]
    }

    pub fn virt_reg_count(&self) -> usize {
        self.vregs.len()
    }

    pub fn virt_regs(&self) -> &[VirtReg] {
        &self.vregs
    }

    pub(crate) fn virt_regs_mut(&mut self) -> &mut [VirtReg] {
        &mut self.vregs
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(LabelEntry::default());
        id
    }

    /// Bind a label at the current end of the node list.
    pub fn bind(&mut self, label: LabelId) -> CompileResult<NodeId> {
        if label.index() >= self.labels.len() || self.labels[label.index()].node.is_some() {
            return Err(CompileError::InvalidState);
        }
        let node = self.append(NodeKind::Label(label));
        self.labels[label.index()].node = Some(node);
        Ok(node)
    }

    /// Node a label is bound to, if it has been bound.
    pub fn label_node(&self, label: LabelId) -> Option<NodeId> {
        self.labels.get(label.index()).and_then(|entry| entry.node)
    }

    pub(crate) fn label_block(&self, label: LabelId) -> Option<u32> {
        self.labels.get(label.index()).and_then(|entry| entry.block)
    }

    pub(crate) fn set_label_block(&mut self, label: LabelId, block: Option<u32>) {
        self.labels[label.index()].block = block;
    }

    // ------------------------------------------------------------------
    // Function structure
    // ------------------------------------------------------------------

    /// Open a function. Must be the first node emitted.
    pub fn add_func(&mut self, args: &[VirtId]) -> CompileResult<NodeId> {
        if self.func.is_some() || self.first.is_some() {
            return Err(CompileError::InvalidState);
        }
        let node = self.append(NodeKind::Func {
            args: args.iter().copied().collect(),
        });
        self.func = Some(node);
        Ok(node)
    }

    /// Close the function with the end sentinel.
    pub fn end_func(&mut self) -> CompileResult<NodeId> {
        if self.func.is_none() || self.end.is_some() {
            return Err(CompileError::InvalidState);
        }
        let node = self.append(NodeKind::Sentinel);
        self.end = Some(node);
        Ok(node)
    }

    pub fn func_node(&self) -> Option<NodeId> {
        self.func
    }

    /// End-of-function sentinel node.
    pub fn end_node(&self) -> Option<NodeId> {
        self.end
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    pub fn emit(&mut self, id: impl Into<InstId>, ops: &[Operand]) -> NodeId {
        self.append(NodeKind::Inst {
            id: id.into(),
            ops: ops.iter().copied().collect(),
            extra: None,
        })
    }

    /// Emit with an extra implicit register (REP counter, `{k}` selector).
    pub fn emit_with_extra(&mut self, id: impl Into<InstId>, ops: &[Operand], extra: VirtId) -> NodeId {
        self.append(NodeKind::Inst {
            id: id.into(),
            ops: ops.iter().copied().collect(),
            extra: Some(extra),
        })
    }

    pub fn func_ret(&mut self, rets: &[Operand]) -> NodeId {
        self.append(NodeKind::FuncRet {
            rets: rets.iter().copied().collect(),
        })
    }

    pub fn func_call(&mut self, target: Operand, args: &[Operand], rets: &[VirtId]) -> NodeId {
        self.append(NodeKind::FuncCall {
            target,
            args: args.iter().copied().collect(),
            rets: rets.iter().copied().collect(),
        })
    }

    pub fn align(&mut self, alignment: u32) -> NodeId {
        self.append(NodeKind::Align(alignment))
    }

    pub fn comment(&mut self, text: &str) -> NodeId {
        self.append(NodeKind::Comment(text.to_string()))
    }

    fn append(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            prev: self.last,
            next: None,
            position: 0,
        });
        if let Some(last) = self.last {
            self.nodes[last.index()].next = Some(id);
        } else {
            self.first = Some(id);
        }
        self.last = Some(id);
        id
    }

    // ------------------------------------------------------------------
    // Node access and mutation
    // ------------------------------------------------------------------

    pub fn first_node(&self) -> Option<NodeId> {
        self.first
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.last
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Upper bound of node ids ever created, for side tables indexed by node.
    pub fn node_storage_len(&self) -> usize {
        self.nodes.len()
    }

    /// Unlink a node from the list. The node id stays allocated but is no
    /// longer reachable by `prev`/`next` traversal.
    pub fn remove_node(&mut self, id: NodeId) {
        let (prev, next) = {
            let node = &self.nodes[id.index()];
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p.index()].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.nodes[n.index()].prev = prev,
            None => self.last = prev,
        }
        let node = &mut self.nodes[id.index()];
        node.prev = None;
        node.next = None;
        node.position = 0;
    }

    /// Count of nodes reachable by forward traversal.
    pub fn linked_node_count(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.first;
        while let Some(id) = cursor {
            count += 1;
            cursor = self.nodes[id.index()].next;
        }
        count
    }

    /// Clear everything a previous analysis pass may have left behind:
    /// node positions, label block attachments and virtual register links.
    pub(crate) fn reset_ra_annotations(&mut self) {
        for node in &mut self.nodes {
            node.position = 0;
        }
        for label in &mut self.labels {
            label.block = None;
        }
        for vreg in &mut self.vregs {
            vreg.reset_ra_links();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linked_list_building() {
        let mut cc = CodeCompiler::new(Arch::X64);
        let a = cc.new_gp("a");
        let func = cc.add_func(&[]).unwrap();
        let inst = cc.emit(InstId(0), &[Operand::Reg(a), Operand::Imm(1)]);
        let end = cc.end_func().unwrap();

        assert_eq!(cc.first_node(), Some(func));
        assert_eq!(cc.node(func).next(), Some(inst));
        assert_eq!(cc.node(inst).prev(), Some(func));
        assert_eq!(cc.node(inst).next(), Some(end));
        assert_eq!(cc.end_node(), Some(end));
        assert_eq!(cc.linked_node_count(), 3);
    }

    #[test]
    fn test_add_func_must_be_first() {
        let mut cc = CodeCompiler::new(Arch::X64);
        cc.comment("header");
        assert_eq!(cc.add_func(&[]), Err(CompileError::InvalidState));
    }

    #[test]
    fn test_label_binding() {
        let mut cc = CodeCompiler::new(Arch::X64);
        cc.add_func(&[]).unwrap();
        let label = cc.new_label();
        assert_eq!(cc.label_node(label), None);

        let node = cc.bind(label).unwrap();
        assert_eq!(cc.label_node(label), Some(node));

        // Double bind is rejected.
        assert_eq!(cc.bind(label), Err(CompileError::InvalidState));
    }

    #[test]
    fn test_remove_node() {
        let mut cc = CodeCompiler::new(Arch::X64);
        let a = cc.new_gp("a");
        let func = cc.add_func(&[]).unwrap();
        let inst = cc.emit(InstId(0), &[Operand::Reg(a)]);
        let end = cc.end_func().unwrap();

        cc.remove_node(inst);
        assert_eq!(cc.node(func).next(), Some(end));
        assert_eq!(cc.node(end).prev(), Some(func));
        assert_eq!(cc.linked_node_count(), 2);
    }

    #[test]
    fn test_vreg_links_default_clear() {
        let mut cc = CodeCompiler::new(Arch::X64);
        let a = cc.new_gp("a");
        let vreg = cc.virt_reg(a);
        assert_eq!(vreg.tied_link(), None);
        assert_eq!(vreg.work_link(), None);
        assert_eq!(vreg.stack_slot(), None);
        assert_eq!(vreg.state(), VRegState::None);
        assert_eq!(vreg.phys_id(), ANY_PHYS_ID);
    }

    #[test]
    fn test_gp_size_tracks_arch() {
        let mut cc32 = CodeCompiler::new(Arch::X86);
        let v32 = cc32.new_gp("a");
        assert_eq!(cc32.virt_reg(v32).size(), 4);

        let mut cc64 = CodeCompiler::new(Arch::X64);
        let v64 = cc64.new_gp("a");
        assert_eq!(cc64.virt_reg(v64).size(), 8);
        assert_eq!(cc64.virt_reg(v64).kind(), RegKind::Gp);
    }
}
