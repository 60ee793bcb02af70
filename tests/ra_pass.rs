//! End-to-end scenarios for the register allocation pass.

use bumpalo::Bump;
use forgejit::{
    A64Adapter, A64Inst, Arch, ArchAdapter, BlockFlags, CodeCompiler, CompilationSession, Operand,
    RaFunction, RaPass, RegKind, TiedFlags, VirtId, X86Adapter, X86Inst,
};

fn analyze<'a>(session: &CompilationSession<'a>, cc: &mut CodeCompiler) -> RaFunction<'a> {
    RaPass::new(X86Adapter::x64())
        .run_on_function(session, cc)
        .expect("pass should succeed")
}

fn reg(v: VirtId) -> Operand {
    Operand::Reg(v)
}

#[test]
fn straight_line_function() {
    // mov a, 1; mov b, 2; add a, b; ret a
    let mut cc = CodeCompiler::new(Arch::X64);
    let a = cc.new_gp("a");
    let b = cc.new_gp("b");
    cc.add_func(&[]).unwrap();
    let mov_a = cc.emit(X86Inst::Mov, &[reg(a), Operand::Imm(1)]);
    let mov_b = cc.emit(X86Inst::Mov, &[reg(b), Operand::Imm(2)]);
    let add = cc.emit(X86Inst::Add, &[reg(a), reg(b)]);
    let ret = cc.func_ret(&[reg(a)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    assert_eq!(ra.blocks().len(), 1);
    assert_eq!(ra.exits(), &[0]);
    assert!(ra.entry_block().is_entry());
    assert!(ra.entry_block().is_exit());
    assert!(ra.entry_block().live_in().none());
    assert!(ra.entry_block().live_out().none());

    let wa = ra.work_id_of(a).unwrap();
    let wb = ra.work_id_of(b).unwrap();

    // Entering `add` both are live; entering `ret` only `a` survives.
    let add_data = ra.inst_data(add).unwrap();
    assert!(add_data.is_live(wa));
    assert!(add_data.is_live(wb));

    let ret_data = ra.inst_data(ret).unwrap();
    assert!(ret_data.is_live(wa));
    assert!(!ret_data.is_live(wb));

    // Entering `mov b` only `a` is live; nothing is live at entry.
    let mov_b_data = ra.inst_data(mov_b).unwrap();
    assert!(mov_b_data.is_live(wa));
    assert!(!mov_b_data.is_live(wb));
    let mov_a_data = ra.inst_data(mov_a).unwrap();
    assert!(!mov_a_data.is_live(wa));
}

#[test]
fn if_then_else_diamond() {
    // cmp x, 0; jne L1; mov y, 1; jmp L2; L1: mov y, 2; L2: ret y
    let mut cc = CodeCompiler::new(Arch::X64);
    let x = cc.new_gp("x");
    let y = cc.new_gp("y");
    let l1 = cc.new_label();
    let l2 = cc.new_label();
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Cmp, &[reg(x), Operand::Imm(0)]);
    cc.emit(X86Inst::Jne, &[Operand::Label(l1)]);
    cc.emit(X86Inst::Mov, &[reg(y), Operand::Imm(1)]);
    cc.emit(X86Inst::Jmp, &[Operand::Label(l2)]);
    cc.bind(l1).unwrap();
    cc.emit(X86Inst::Mov, &[reg(y), Operand::Imm(2)]);
    cc.bind(l2).unwrap();
    cc.func_ret(&[reg(y)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    assert_eq!(ra.blocks().len(), 4);

    let entry = ra.entry_block();
    assert_eq!(entry.successors().len(), 2);

    // The fall-through (then) branch is the first successor by convention.
    let then_block = entry.successors()[0];
    let else_block = entry.successors()[1];
    assert_ne!(then_block, else_block);

    // Both arms join at the return block.
    let join = ra.block(then_block).successors()[0];
    assert_eq!(ra.block(else_block).successors(), &[join]);
    assert_eq!(ra.block(join).predecessors().len(), 2);
    assert!(ra.block(join).is_exit());

    // The join is dominated by the entry directly.
    assert_eq!(ra.block(join).idom(), Some(0));
    assert_eq!(ra.block(then_block).idom(), Some(0));
    assert_eq!(ra.block(else_block).idom(), Some(0));
    assert!(ra.strictly_dominates(0, join));
    assert_eq!(ra.nearest_common_dominator(then_block, else_block), 0);

    // y flows into the join, x dies in the entry block.
    let wy = ra.work_id_of(y).unwrap();
    let wx = ra.work_id_of(x).unwrap();
    assert!(ra.block(join).live_in().get(wy as usize));
    assert!(entry.live_in().get(wx as usize));
    assert!(!ra.block(join).live_in().get(wx as usize));
}

#[test]
fn loop_with_induction_variable() {
    // mov i, 0; L: add i, 1; cmp i, 10; jne L; ret i
    let mut cc = CodeCompiler::new(Arch::X64);
    let i = cc.new_gp("i");
    let l = cc.new_label();
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Mov, &[reg(i), Operand::Imm(0)]);
    cc.bind(l).unwrap();
    cc.emit(X86Inst::Add, &[reg(i), Operand::Imm(1)]);
    cc.emit(X86Inst::Cmp, &[reg(i), Operand::Imm(10)]);
    cc.emit(X86Inst::Jne, &[Operand::Label(l)]);
    cc.func_ret(&[reg(i)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    // Preheader, loop body, exit.
    assert_eq!(ra.blocks().len(), 3);
    assert_eq!(ra.loops().len(), 1);

    let body = 1u32;
    let lp = &ra.loops()[0];
    assert_eq!(lp.header(), body);
    assert_eq!(lp.body(), &[body]);
    assert_eq!(lp.parent(), None);

    // The back-edge targets the body itself.
    assert!(ra.block(body).successors().contains(&body));
    assert!(ra.block(body).predecessors().contains(&body));

    // Loop membership: weight one inside, single-pass outside.
    assert_eq!(ra.block(body).weight(), 1);
    assert_eq!(ra.block(body).loop_id(), Some(0));
    assert_eq!(ra.block(0).weight(), 0);
    assert!(ra.block(0).has_flag(BlockFlags::SINGLE_PASS));
    assert!(!ra.block(body).has_flag(BlockFlags::SINGLE_PASS));

    // i stays live across the back-edge.
    let wi = ra.work_id_of(i).unwrap() as usize;
    assert!(ra.block(body).live_in().get(wi));
    assert!(ra.block(body).live_out().get(wi));

    assert_eq!(ra.block(body).idom(), Some(0));
    assert_eq!(ra.block(2).idom(), Some(body));
}

#[test]
fn dead_code_after_direct_jump_is_removed() {
    // jmp L; mov x, 1; L: ret
    let mut cc = CodeCompiler::new(Arch::X64);
    let x = cc.new_gp("x");
    let l = cc.new_label();
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Jmp, &[Operand::Label(l)]);
    cc.emit(X86Inst::Mov, &[reg(x), Operand::Imm(1)]);
    cc.bind(l).unwrap();
    cc.func_ret(&[]);
    cc.end_func().unwrap();

    let before = cc.linked_node_count();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    assert_eq!(ra.blocks().len(), 2);
    assert_eq!(cc.linked_node_count(), before - 1);
    // The removed instruction never touched a work register.
    assert_eq!(ra.work_id_of(x), None);
    assert_eq!(ra.work_regs().len(), 0);
}

#[test]
fn mul_pins_the_accumulator_pair() {
    // Widening multiply: hi/lo pinned to the accumulator pair, source free.
    let mut cc = CodeCompiler::new(Arch::X64);
    let hi = cc.new_gp("hi");
    let lo = cc.new_gp("lo");
    let src = cc.new_gp("src");
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Mov, &[reg(lo), Operand::Imm(3)]);
    cc.emit(X86Inst::Mov, &[reg(src), Operand::Imm(5)]);
    let mul = cc.emit(X86Inst::Mul, &[reg(hi), reg(lo), reg(src)]);
    cc.func_ret(&[reg(lo)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    let data = ra.inst_data(mul).unwrap();
    assert_eq!(data.tied_total(), 3);

    let tied_src = data.find_tied(src).unwrap();
    assert!(tied_src.is_read_only());
    assert!(!tied_src.has_r_phys());

    let tied_hi = data.find_tied(hi).unwrap();
    assert!(tied_hi.is_write_only());
    assert_eq!(tied_hi.w_phys, 2); // dx

    let tied_lo = data.find_tied(lo).unwrap();
    assert!(tied_lo.is_read_write());
    assert_eq!(tied_lo.r_phys, 0); // ax
    assert_eq!(tied_lo.w_phys, 0);

    // Fixed ids surface in the per-instruction masks and the block flag.
    assert_ne!(data.in_regs.get(RegKind::Gp) & 0b1, 0);
    assert_ne!(data.out_regs.get(RegKind::Gp) & 0b101, 0);
    assert!(ra.entry_block().has_flag(BlockFlags::HAS_FIXED_REGS));
}

#[test]
fn xor_same_register_collapses_to_write_only() {
    // xor v, v defines v without reading it.
    let mut cc = CodeCompiler::new(Arch::X64);
    let v = cc.new_gp("v");
    cc.add_func(&[]).unwrap();
    let xor = cc.emit(X86Inst::Xor, &[reg(v), reg(v)]);
    cc.func_ret(&[]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    let data = ra.inst_data(xor).unwrap();
    assert_eq!(data.tied_total(), 1);
    let tied = data.find_tied(v).unwrap();
    assert_eq!(tied.ref_count, 2);
    assert!(tied.is_write_only());

    let wv = ra.work_id_of(v).unwrap() as usize;
    assert!(!ra.entry_block().gen().get(wv));
    assert!(ra.entry_block().kill().get(wv));
    assert!(ra.entry_block().live_in().none());
    // Nothing is live entering the xor either.
    assert!(!data.is_live(wv as u32));
}

#[test]
fn and_same_register_collapses_to_read_only() {
    let mut cc = CodeCompiler::new(Arch::X64);
    let v = cc.new_gp("v");
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Mov, &[reg(v), Operand::Imm(7)]);
    let and = cc.emit(X86Inst::And, &[reg(v), reg(v)]);
    cc.func_ret(&[]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    let tied = ra.inst_data(and).unwrap().find_tied(v).unwrap();
    assert_eq!(tied.ref_count, 2);
    assert!(tied.is_read_only());
}

#[test]
fn function_arguments_are_defined_at_entry() {
    let mut cc = CodeCompiler::new(Arch::X64);
    let a = cc.new_gp("a");
    let b = cc.new_gp("b");
    let func = cc.add_func(&[a, b]).unwrap();
    let add = cc.emit(X86Inst::Add, &[reg(a), reg(b)]);
    cc.func_ret(&[reg(a)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    // Arguments are produced by the function node, so nothing is live
    // before it.
    assert!(ra.entry_block().live_in().none());

    let data = ra.inst_data(func).unwrap();
    let tied_a = data.find_tied(a).unwrap();
    assert!(tied_a.is_write_only());
    assert!(tied_a.flags.contains(TiedFlags::W_FUNC));
    assert_eq!(tied_a.w_phys, 7); // di
    let tied_b = data.find_tied(b).unwrap();
    assert_eq!(tied_b.w_phys, 6); // si

    // Nothing is live entering the function node itself; both arguments
    // are live entering the first real instruction.
    let wa = ra.work_id_of(a).unwrap();
    let wb = ra.work_id_of(b).unwrap();
    assert!(!data.is_live(wa));
    assert!(!data.is_live(wb));
    let add_data = ra.inst_data(add).unwrap();
    assert!(add_data.is_live(wa));
    assert!(add_data.is_live(wb));
}

#[test]
fn function_calls_record_clobbers() {
    let mut cc = CodeCompiler::new(Arch::X64);
    let target = cc.new_gp("target");
    let arg = cc.new_gp("arg");
    let ret = cc.new_gp("ret");
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Mov, &[reg(target), Operand::Imm(0x1000)]);
    cc.emit(X86Inst::Mov, &[reg(arg), Operand::Imm(1)]);
    let call = cc.func_call(reg(target), &[reg(arg)], &[ret]);
    cc.func_ret(&[reg(ret)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    assert!(ra.entry_block().has_flag(BlockFlags::HAS_FUNC_CALLS));
    assert!(ra.entry_block().reg_stats().has_clobbered_kind(RegKind::Gp));

    let data = ra.inst_data(call).unwrap();
    assert!(data.clobbered.has(RegKind::Gp));
    assert!(!ra.clobbered_regs().is_empty());

    // First GP argument rides in rdi, the result comes back in rax.
    let tied_arg = data.find_tied(arg).unwrap();
    assert!(tied_arg.flags.contains(TiedFlags::R_FUNC));
    assert_eq!(tied_arg.r_phys, 7);
    let tied_ret = data.find_tied(ret).unwrap();
    assert!(tied_ret.flags.contains(TiedFlags::W_FUNC));
    assert_eq!(tied_ret.w_phys, 0);
}

#[test]
fn rep_prefix_pins_the_counter() {
    let mut cc = CodeCompiler::new(Arch::X64);
    let dst = cc.new_gp("dst");
    let src = cc.new_gp("src");
    let count = cc.new_gp("count");
    cc.add_func(&[dst, src, count]).unwrap();
    let movs = cc.emit_with_extra(X86Inst::Movs, &[reg(dst), reg(src)], count);
    cc.func_ret(&[]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    let data = ra.inst_data(movs).unwrap();
    let tied_count = data.find_tied(count).unwrap();
    assert!(tied_count.is_read_write());
    assert_eq!(tied_count.r_phys, 1); // cx
    assert_eq!(tied_count.w_phys, 1);
    assert_eq!(tied_count.allocable, 0);

    // The string operands themselves are pinned to di/si.
    assert_eq!(data.find_tied(dst).unwrap().r_phys, 7);
    assert_eq!(data.find_tied(src).unwrap().r_phys, 6);
}

#[test]
fn mask_selector_reads_any_mask_but_k0() {
    let mut cc = CodeCompiler::new(Arch::X64);
    let dst = cc.new_vec("dst");
    let src = cc.new_vec("src");
    let k = cc.new_mask("k");
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Pxor, &[reg(src), reg(src)]);
    let inst = cc.emit_with_extra(X86Inst::Movdqu, &[reg(dst), reg(src)], k);
    cc.func_ret(&[]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    let data = ra.inst_data(inst).unwrap();
    let tied_k = data.find_tied(k).unwrap();
    assert!(tied_k.is_read_only());
    assert_eq!(tied_k.allocable & 1, 0);
    assert_ne!(tied_k.allocable, 0);

    // Tied registers are grouped by kind: vectors first, then masks.
    assert_eq!(data.tied_of_kind(RegKind::Vec).len(), 2);
    assert_eq!(data.tied_of_kind(RegKind::K).len(), 1);
    assert_eq!(data.tied_of_kind(RegKind::Gp).len(), 0);
}

#[test]
fn informative_nodes_pass_through() {
    let mut cc = CodeCompiler::new(Arch::X64);
    let v = cc.new_gp("v");
    let l = cc.new_label();
    cc.add_func(&[]).unwrap();
    cc.emit(X86Inst::Mov, &[reg(v), Operand::Imm(1)]);
    cc.emit(X86Inst::Jmp, &[Operand::Label(l)]);
    cc.align(16);
    cc.comment("join point");
    cc.bind(l).unwrap();
    cc.func_ret(&[reg(v)]);
    cc.end_func().unwrap();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = analyze(&session, &mut cc);

    // Align and comment sit in dead space after the jump but are neither
    // removed nor do they break reachability.
    assert_eq!(ra.blocks().len(), 2);
    let wv = ra.work_id_of(v).unwrap() as usize;
    assert!(ra.block(1).live_in().get(wv));
}

#[test]
fn a64_stub_backend_runs_the_framework() {
    let mut cc = CodeCompiler::new(Arch::A64);
    let n = cc.new_gp("n");
    let l = cc.new_label();
    cc.add_func(&[n]).unwrap();
    cc.bind(l).unwrap();
    cc.emit(A64Inst::Sub, &[reg(n), reg(n), Operand::Imm(1)]);
    cc.emit(A64Inst::Cbnz, &[reg(n), Operand::Label(l)]);
    cc.func_ret(&[reg(n)]);
    cc.end_func().unwrap();

    let adapter = A64Adapter::new();
    assert_eq!(adapter.arch(), Arch::A64);

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let ra = RaPass::new(adapter)
        .run_on_function(&session, &mut cc)
        .expect("pass should succeed");

    assert_eq!(ra.blocks().len(), 2);
    assert_eq!(ra.loops().len(), 1);
    let wn = ra.work_id_of(n).unwrap() as usize;
    // n is carried around the back-edge and into the return block.
    assert!(ra.block(0).live_out().get(wn));
    assert!(ra.block(1).live_in().get(wn));
}
