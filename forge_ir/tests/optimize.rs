//! Optimization pass tests: individual rewrites and whole-pipeline behavior.

use forge_ir::builder::FunctionBuilder;
use forge_ir::optimize::{
    default_pipeline, run_step_to_fixed_point, CommonSubexpressionEliminationStep,
    ConstantFoldingStep, CopyPropagationStep, DeadCodeEliminationStep, PassContext,
    PostProcessStep, ReduceMemoryAccessStep,
};
use forge_ir::registry::{FunctionSig, Registry, TypeId};
use forge_ir::{CodeHolder, OpCode};
use test_case::test_case;

fn holder_of(fb: &FunctionBuilder, registry: &Registry) -> CodeHolder {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut ch = CodeHolder::from_builder(fb);
    ch.rebuild_all(registry).unwrap();
    ch
}

fn run_pass(step: &mut dyn PostProcessStep, ch: &mut CodeHolder, registry: &Registry) -> bool {
    let mut cx = PassContext::new(ch, registry, u32::MAX);
    run_step_to_fixed_point(step, &mut cx).unwrap()
}

fn run_full_pipeline(ch: &mut CodeHolder, registry: &Registry) -> bool {
    let mut pipeline = default_pipeline();
    run_pass(&mut pipeline, ch, registry)
}

#[test]
fn copy_propagation_replaces_copied_registers() {
    let registry = Registry::new();
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a = fb.arg(0).unwrap();
    let copy = fb.val(TypeId::I32);
    fb.assign(&copy, &a).unwrap();
    let sum = fb.expr_add(&copy, &copy).unwrap();
    fb.generate_return(Some(&sum)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    let changed = run_pass(&mut CopyPropagationStep, &mut ch, &registry);
    assert!(changed);

    let add = ch.code.iter().find(|i| i.op == OpCode::IAdd).unwrap();
    pretty_assertions::assert_eq!(add.operands[1].reg_id(), a.reg_id());
    pretty_assertions::assert_eq!(add.operands[2].reg_id(), a.reg_id());
}

#[test]
fn copy_propagation_preserves_operand_types() {
    let registry = Registry::new();
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let c = fb.val(TypeId::I32);
    fb.assign(&c, &fb.imm(5i32)).unwrap();
    let sum = fb.expr_add(&c, &c).unwrap();
    fb.generate_return(Some(&sum)).unwrap();

    let before: Vec<_> = holder_of(&fb, &registry)
        .code
        .iter()
        .map(|i| [i.operands[0].ty(), i.operands[1].ty(), i.operands[2].ty()])
        .collect();

    let mut ch = holder_of(&fb, &registry);
    run_pass(&mut CopyPropagationStep, &mut ch, &registry);

    let add = ch.code.iter().find(|i| i.op == OpCode::IAdd).unwrap();
    assert!(add.operands[1].is_imm());
    pretty_assertions::assert_eq!(add.operands[1].imm_bits().i(), 5);

    // no pass changed any operand's declared type
    for (i, types) in ch.code.iter().zip(&before) {
        pretty_assertions::assert_eq!([i.operands[0].ty(), i.operands[1].ty(), i.operands[2].ty()], *types);
    }
}

#[test]
fn cse_rewrites_recomputations_into_assigns() {
    let registry = Registry::new();
    let func =
        registry.register_function("f", FunctionSig::new(TypeId::I32, vec![TypeId::I32, TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a = fb.arg(0).unwrap();
    let b = fb.arg(1).unwrap();
    let first = fb.expr_add(&a, &b).unwrap();
    let second = fb.expr_add(&a, &b).unwrap();
    let sum = fb.expr_add(&first, &second).unwrap();
    fb.generate_return(Some(&sum)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    let changed = run_pass(&mut CommonSubexpressionEliminationStep, &mut ch, &registry);
    assert!(changed);

    // the second a+b is now an assign from the first result
    let rewritten = ch
        .code
        .iter()
        .find(|i| i.op == OpCode::Assign && i.operands[0].reg_id() == second.reg_id())
        .expect("second computation was rewritten");
    pretty_assertions::assert_eq!(rewritten.operands[1].reg_id(), first.reg_id());
}

#[test]
fn cse_is_blocked_by_intervening_reassignment() {
    let registry = Registry::new();
    let func =
        registry.register_function("f", FunctionSig::new(TypeId::I32, vec![TypeId::I32, TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a = fb.arg(0).unwrap();
    let b = fb.arg(1).unwrap();
    let first = fb.expr_add(&a, &b).unwrap();
    fb.expr_add_assign(&a, &first).unwrap(); // a changes
    let second = fb.expr_add(&a, &b).unwrap();
    let sum = fb.expr_add(&first, &second).unwrap();
    fb.generate_return(Some(&sum)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    run_pass(&mut CommonSubexpressionEliminationStep, &mut ch, &registry);

    // the second computation must survive as a real iadd
    let adds = ch.code.iter().filter(|i| i.op == OpCode::IAdd).count();
    pretty_assertions::assert_eq!(adds, 4, "no iadd may be rewritten when an operand changed in between");
}

#[test]
fn reduce_memory_access_rewrites_store_load_pairs() {
    let registry = Registry::new();
    let i32_ptr = registry.pointer_to(TypeId::I32);
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![i32_ptr, TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let p = fb.arg(0).unwrap();
    let v = fb.arg(1).unwrap();
    fb.store(&v, &p, 0).unwrap();
    let w = fb.val(TypeId::I32);
    fb.load(&w, &p, 0).unwrap();
    fb.generate_return(Some(&w)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    run_pass(&mut ReduceMemoryAccessStep, &mut ch, &registry);

    // the load is now an assign from the stored register
    let rewritten = ch
        .code
        .iter()
        .find(|i| i.op == OpCode::Assign && i.operands[0].reg_id() == w.reg_id())
        .expect("load was rewritten to an assign");
    pretty_assertions::assert_eq!(rewritten.operands[1].reg_id(), v.reg_id());
    assert!(ch.code.iter().all(|i| i.op != OpCode::Load));

    // after the full pipeline nothing reloads and the copy is gone too
    let mut ch = holder_of(&fb, &registry);
    run_full_pipeline(&mut ch, &registry);
    assert!(ch.code.iter().all(|i| i.op != OpCode::Load));
    let ret = ch.code.iter().find(|i| i.op == OpCode::Ret).unwrap();
    pretty_assertions::assert_eq!(ret.operands[0].reg_id(), v.reg_id());
}

#[test]
fn reduce_memory_access_skips_nonzero_offsets() {
    let registry = Registry::new();
    let i32_ptr = registry.pointer_to(TypeId::I32);
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![i32_ptr, TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let p = fb.arg(0).unwrap();
    let v = fb.arg(1).unwrap();
    fb.store(&v, &p, 4).unwrap();
    let w = fb.val(TypeId::I32);
    fb.load(&w, &p, 4).unwrap();
    fb.generate_return(Some(&w)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    let changed = run_pass(&mut ReduceMemoryAccessStep, &mut ch, &registry);

    assert!(!changed);
    assert!(ch.code.iter().any(|i| i.op == OpCode::Load));
}

#[test]
fn redundant_stores_are_deleted() {
    let registry = Registry::new();
    let i32_ptr = registry.pointer_to(TypeId::I32);
    let func = registry.register_function("f", FunctionSig::new(TypeId::VOID, vec![i32_ptr, TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let p = fb.arg(0).unwrap();
    let v = fb.arg(1).unwrap();
    fb.store(&v, &p, 0).unwrap();
    fb.store(&v, &p, 0).unwrap();
    fb.generate_return(None).unwrap();

    let mut ch = holder_of(&fb, &registry);
    run_pass(&mut ReduceMemoryAccessStep, &mut ch, &registry);

    pretty_assertions::assert_eq!(ch.code.iter().filter(|i| i.op == OpCode::Store).count(), 1);
}

#[test]
fn constant_folding_rewrites_cvt_to_an_assign() {
    let registry = Registry::new();
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let dest = fb.val(TypeId::I32);
    fb.cvt(&dest, &fb.imm(3.7f32)).unwrap();
    fb.generate_return(Some(&dest)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    let changed = run_pass(&mut ConstantFoldingStep, &mut ch, &registry);
    assert!(changed);

    let folded = ch
        .code
        .iter()
        .find(|i| i.op == OpCode::Assign && i.operands[0].reg_id() == dest.reg_id())
        .expect("cvt folded to assign");
    assert!(folded.operands[1].is_imm());
    pretty_assertions::assert_eq!(folded.operands[1].imm_bits().i(), 3);
    assert!(ch.code.iter().all(|i| i.op != OpCode::Cvt));
}

#[test]
fn constant_folding_covers_binary_arithmetic() {
    let registry = Registry::new();
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let r = fb.val(TypeId::I32);
    fb.iadd(&r, &fb.imm(10i32), &fb.imm(15i32)).unwrap();
    fb.generate_return(Some(&r)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    run_pass(&mut ConstantFoldingStep, &mut ch, &registry);

    let folded = ch.code.iter().find(|i| i.op == OpCode::Assign).unwrap();
    pretty_assertions::assert_eq!(folded.operands[1].imm_bits().i(), 25);
}

#[test_case(OpCode::IAdd, 10, 15 => 25; "signed add")]
#[test_case(OpCode::ISub, 5, 9 => -4; "signed sub")]
#[test_case(OpCode::IMul, 6, 7 => 42; "signed mul")]
#[test_case(OpCode::IDiv, 42, 5 => 8; "signed div truncates")]
#[test_case(OpCode::IMod, 42, 5 => 2; "signed mod")]
fn binary_folding(op: OpCode, a: i32, b: i32) -> i64 {
    let registry = Registry::new();
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let r = fb.val(TypeId::I32);
    let (a, b) = (fb.imm(a), fb.imm(b));
    match op {
        OpCode::IAdd => fb.iadd(&r, &a, &b).unwrap(),
        OpCode::ISub => fb.isub(&r, &a, &b).unwrap(),
        OpCode::IMul => fb.imul(&r, &a, &b).unwrap(),
        OpCode::IDiv => fb.idiv(&r, &a, &b).unwrap(),
        OpCode::IMod => fb.imod(&r, &a, &b).unwrap(),
        _ => unreachable!(),
    };
    fb.generate_return(Some(&r)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    run_pass(&mut ConstantFoldingStep, &mut ch, &registry);

    let folded = ch.code.iter().find(|i| i.op == OpCode::Assign).expect("folded to assign");
    folded.operands[1].imm_bits().i()
}

#[test]
fn dead_code_elimination_drops_unused_definitions_but_keeps_calls() {
    let registry = Registry::new();
    let ext = registry.register_function("ext", FunctionSig::new(TypeId::I32, vec![]));
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a = fb.arg(0).unwrap();
    let dead = fb.val(TypeId::I32);
    fb.assign(&dead, &fb.imm(9i32)).unwrap();
    fb.generate_call(ext, &[], None).unwrap(); // result unused, side effects stay
    fb.generate_return(Some(&a)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    let changed = run_pass(&mut DeadCodeEliminationStep, &mut ch, &registry);
    assert!(changed);

    assert!(ch.code.iter().all(|i| i.op != OpCode::Assign));
    pretty_assertions::assert_eq!(ch.code.iter().filter(|i| i.op == OpCode::Call).count(), 1);
}

#[test]
fn pipeline_reaches_a_fixed_point_and_stays_there() {
    let registry = Registry::new();
    let i32_ptr = registry.pointer_to(TypeId::I32);
    let func = registry.register_function("f", FunctionSig::new(TypeId::I32, vec![i32_ptr, TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let p = fb.arg(0).unwrap();
    let v = fb.arg(1).unwrap();
    fb.store(&v, &p, 0).unwrap();
    let w = fb.val(TypeId::I32);
    fb.load(&w, &p, 0).unwrap();
    let doubled = fb.expr_add(&w, &w).unwrap();
    let also = fb.expr_add(&w, &w).unwrap();
    let sum = fb.expr_add(&doubled, &also).unwrap();
    fb.generate_return(Some(&sum)).unwrap();

    let mut ch = holder_of(&fb, &registry);
    let first = run_full_pipeline(&mut ch, &registry);
    assert!(first);

    let settled = ch.code.clone();
    let second = run_full_pipeline(&mut ch, &registry);
    assert!(!second, "a second pipeline run performs zero rewrites");
    pretty_assertions::assert_eq!(ch.code, settled);

    // the label index stays a bijection over the surviving labels
    let label_addrs: Vec<usize> = ch
        .code
        .iter()
        .enumerate()
        .filter(|(_, i)| i.op == OpCode::Label)
        .map(|(a, _)| a)
        .collect();
    pretty_assertions::assert_eq!(ch.labels.len(), label_addrs.len());
    for addr in label_addrs {
        let id = ch.code[addr].operands[0].label_id();
        pretty_assertions::assert_eq!(ch.labels.get(id).unwrap(), addr);
    }
}
