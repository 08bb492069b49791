//! End-to-end execution tests: build IR, optionally optimize, interpret, and
//! compare against reference computations.

use forge_ir::backend::ALL_STEPS;
use forge_ir::builder::FunctionBuilder;
use forge_ir::optimize::{default_pipeline, run_step_to_fixed_point, PassContext};
use forge_ir::registry::{FuncId, FunctionSig, NativeHandler, Registry, TypeId};
use forge_ir::value::{Immediate, Value};
use forge_ir::{Backend, CodeHolder, OpCode};
use forge_interpreter::{call_function, Interpreter, TestBackend};
use test_case::test_case;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn plain_holder(fb: &FunctionBuilder, registry: &Registry) -> CodeHolder {
    let mut ch = CodeHolder::from_builder(fb);
    ch.rebuild_all(registry).unwrap();
    ch
}

fn optimized_holder(fb: &FunctionBuilder, registry: &Registry) -> CodeHolder {
    let mut ch = plain_holder(fb, registry);
    let mut pipeline = default_pipeline();
    let mut cx = PassContext::new(&mut ch, registry, ALL_STEPS);
    run_step_to_fixed_point(&mut pipeline, &mut cx).unwrap();
    ch
}

fn build_add_fn(registry: &Registry) -> (FuncId, FunctionBuilder<'_>) {
    let func = registry.register_function("add", FunctionSig::new(TypeId::I32, vec![TypeId::I32, TypeId::I32]));
    let mut fb = FunctionBuilder::new(registry, func);
    fb.enable_validation();
    let a = fb.arg(0).unwrap();
    let b = fb.arg(1).unwrap();
    let sum = fb.expr_add(&a, &b).unwrap();
    fb.generate_return(Some(&sum)).unwrap();
    (func, fb)
}

#[test]
fn primitive_add_executes_through_the_test_backend() {
    init_logging();
    let registry = Registry::new();
    let (func, fb) = build_add_fn(&registry);

    // optimized code keeps the expected shape
    let ch = optimized_holder(&fb, &registry);
    pretty_assertions::assert_eq!(ch.code.iter().filter(|i| i.op == OpCode::IAdd).count(), 1);
    pretty_assertions::assert_eq!(ch.code.iter().filter(|i| i.op == OpCode::Ret).count(), 1);
    pretty_assertions::assert_eq!(ch.code[0].op, OpCode::Argument);
    pretty_assertions::assert_eq!(ch.code[1].op, OpCode::Argument);

    let mut backend = TestBackend::with_default_pipeline();
    backend.process(&fb, ALL_STEPS).unwrap();

    let mut out: i32 = 0;
    let mut a: i32 = 10;
    let mut b: i32 = 15;
    call_function(
        &registry,
        func,
        &mut out as *mut i32 as *mut u8,
        &[&mut a as *mut i32 as *mut u8, &mut b as *mut i32 as *mut u8],
    )
    .unwrap();

    pretty_assertions::assert_eq!(out, 25);
}

#[test]
fn conversion_folding_matches_execution() {
    init_logging();
    let registry = Registry::new();
    let func = registry.register_function("trunc", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let dest = fb.val(TypeId::I32);
    fb.cvt(&dest, &fb.imm(3.7f32)).unwrap();
    fb.generate_return(Some(&dest)).unwrap();

    // unoptimized execution evaluates the cvt at run time
    let plain = plain_holder(&fb, &registry);
    let mut out: i32 = 0;
    let mut exe = Interpreter::new(&plain, &registry);
    exe.set_return_value_pointer(&mut out as *mut i32 as *mut u8);
    exe.execute().unwrap();
    pretty_assertions::assert_eq!(out, 3);

    // optimized execution runs the folded assign
    let opt = optimized_holder(&fb, &registry);
    assert!(opt.code.iter().all(|i| i.op != OpCode::Cvt));
    let mut out_opt: i32 = 0;
    let mut exe = Interpreter::new(&opt, &registry);
    exe.set_return_value_pointer(&mut out_opt as *mut i32 as *mut u8);
    exe.execute().unwrap();
    pretty_assertions::assert_eq!(out_opt, 3);
}

#[test_case(TypeId::F32, Immediate::of_f32(3.7), TypeId::I32 => 3; "f32 to i32 truncates")]
#[test_case(TypeId::F32, Immediate::of_f32(-3.7), TypeId::I32 => -3; "negative f32 to i32 truncates toward zero")]
#[test_case(TypeId::F64, Immediate::of_f64(255.9), TypeId::U8 => 255; "f64 to u8 truncates")]
#[test_case(TypeId::I32, Immediate::of_i32(-1), TypeId::U16 => 65535; "sign wraps into unsigned")]
#[test_case(TypeId::I8, Immediate::of_i8(-5), TypeId::I64 => -5; "sign extension widens")]
#[test_case(TypeId::U32, Immediate::of_u32(7), TypeId::F64 => 7; "int to float is exact")]
fn conversion_matrix_agrees_between_folding_and_interpreter(src_ty: TypeId, bits: Immediate, dst_ty: TypeId) -> i64 {
    init_logging();
    let registry = Registry::new();
    let func = registry.register_function("cvt_case", FunctionSig::new(dst_ty, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let dest = fb.val(dst_ty);
    fb.cvt(&dest, &Value::imm(src_ty, bits)).unwrap();
    fb.generate_return(Some(&dest)).unwrap();

    let run = |ch: &CodeHolder| -> i64 {
        let mut exe = Interpreter::new(ch, &registry);
        exe.execute().unwrap();
        // read the destination register in its canonical representation
        let bits = exe.register_value::<u64>(dest.reg_id());
        let info = registry.info(dst_ty);
        if info.is_floating_point {
            if info.size == 4 {
                f32::from_bits(bits as u32) as i64
            } else {
                f64::from_bits(bits) as i64
            }
        } else if info.is_unsigned {
            bits as i64
        } else {
            bits as i64
        }
    };

    let plain = run(&plain_holder(&fb, &registry));
    let folded = run(&optimized_holder(&fb, &registry));
    pretty_assertions::assert_eq!(plain, folded, "folded cvt must match the interpreter");
    plain
}

#[test]
fn vector_add_works_on_stack_memory() {
    init_logging();
    let registry = Registry::new();
    let f32_ptr = registry.pointer_to(TypeId::F32);
    let func = registry.register_function("vec4_add", FunctionSig::new(TypeId::VOID, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a_alloc = fb.stack_alloc(16).unwrap();
    let b_alloc = fb.stack_alloc(16).unwrap();
    let mut pa = fb.val(f32_ptr);
    fb.stack_ptr(&mut pa, a_alloc).unwrap();
    let mut pb = fb.val(f32_ptr);
    fb.stack_ptr(&mut pb, b_alloc).unwrap();

    for (i, v) in [1.0f32, 2.0, 3.0, 4.0].iter().enumerate() {
        fb.store(&fb.imm(*v), &pa, (i * 4) as u32).unwrap();
    }
    for (i, v) in [5.0f32, 6.0, 7.0, 8.0].iter().enumerate() {
        fb.store(&fb.imm(*v), &pb, (i * 4) as u32).unwrap();
    }

    fb.vadd(&pa, &pb, 4).unwrap();
    fb.generate_return(None).unwrap();

    let ch = plain_holder(&fb, &registry);
    let mut exe = Interpreter::new(&ch, &registry);
    exe.execute().unwrap();

    let base = exe.stack_address_of(a_alloc).unwrap() as *const f32;
    let result: Vec<f32> = (0..4).map(|i| unsafe { base.add(i).read_unaligned() }).collect();
    pretty_assertions::assert_eq!(result, vec![6.0, 8.0, 10.0, 12.0]);
}

#[test]
fn vector_broadcast_dot_and_cross() {
    init_logging();
    let registry = Registry::new();
    let f32_ptr = registry.pointer_to(TypeId::F32);
    let func = registry.register_function("vec3_ops", FunctionSig::new(TypeId::VOID, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a_alloc = fb.stack_alloc(12).unwrap();
    let b_alloc = fb.stack_alloc(12).unwrap();
    let c_alloc = fb.stack_alloc(12).unwrap();
    let mut pa = fb.val(f32_ptr);
    fb.stack_ptr(&mut pa, a_alloc).unwrap();
    let mut pb = fb.val(f32_ptr);
    fb.stack_ptr(&mut pb, b_alloc).unwrap();
    let mut pc = fb.val(f32_ptr);
    fb.stack_ptr(&mut pc, c_alloc).unwrap();

    for (i, v) in [1.0f32, 2.0, 3.0].iter().enumerate() {
        fb.store(&fb.imm(*v), &pa, (i * 4) as u32).unwrap();
    }
    for (i, v) in [4.0f32, 5.0, 6.0].iter().enumerate() {
        fb.store(&fb.imm(*v), &pb, (i * 4) as u32).unwrap();
    }

    // c = broadcast 2, then c = a x b, dot = a . b
    fb.vset(&pc, &fb.imm(2.0f32), 3).unwrap();
    let dot = fb.val(TypeId::F32);
    fb.vdot(&dot, &pa, &pb, 3).unwrap();
    fb.vcross(&pc, &pa, &pb).unwrap();
    fb.generate_return(None).unwrap();

    let ch = plain_holder(&fb, &registry);
    let mut exe = Interpreter::new(&ch, &registry);
    exe.execute().unwrap();

    pretty_assertions::assert_eq!(exe.register_value::<f32>(dot.reg_id()), 32.0);
    let base = exe.stack_address_of(c_alloc).unwrap() as *const f32;
    let cross: Vec<f32> = (0..3).map(|i| unsafe { base.add(i).read_unaligned() }).collect();
    pretty_assertions::assert_eq!(cross, vec![-3.0, 6.0, -3.0]);
}

fn build_loop_fn(registry: &Registry) -> (FuncId, FunctionBuilder<'_>) {
    let func = registry.register_function("loop_sum", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(registry, func);
    fb.enable_validation();

    let acc = fb.val(TypeId::I32);
    fb.assign(&acc, &fb.imm(0i32)).unwrap();
    let i = fb.val(TypeId::I32);
    fb.assign(&i, &fb.imm(0i32)).unwrap();

    fb.generate_for(
        |fb| fb.expr_lt(&i, &fb.imm(10i32)),
        |fb| {
            fb.expr_pre_inc(&i)?;
            Ok(())
        },
        |fb| {
            let alloc = fb.stack_alloc(4)?;
            let ptr_ty = fb.registry().pointer_to(TypeId::I32);
            let mut p = fb.val(ptr_ty);
            fb.stack_ptr(&mut p, alloc)?;
            fb.store(&i, &p, 0)?;

            let bit = fb.expr_band(&i, &fb.imm(1i32))?;
            let is_odd = fb.expr_neq(&bit, &fb.imm(0i32))?;
            fb.generate_if(&is_odd, |fb| fb.loop_continue())?;

            let tmp = fb.expr_deref(&p)?;
            fb.expr_add_assign(&acc, &tmp)?;
            let over = fb.expr_gt(&acc, &fb.imm(5i32))?;
            fb.generate_if(&over, |fb| fb.loop_break())?;
            Ok(())
        },
    )
    .unwrap();

    fb.generate_return(Some(&acc)).unwrap();
    (func, fb)
}

#[test]
fn loop_with_break_and_continue_matches_the_reference_computation() {
    init_logging();

    // reference semantics
    let mut acc = 0i32;
    let mut i = 0i32;
    while i < 10 {
        if i % 2 != 0 {
            i += 1;
            continue;
        }
        acc += i;
        if acc > 5 {
            break;
        }
        i += 1;
    }
    pretty_assertions::assert_eq!(acc, 6);

    let registry = Registry::new();
    let (_, fb) = build_loop_fn(&registry);

    let run = |ch: &CodeHolder| -> i32 {
        let mut out: i32 = 0;
        let mut exe = Interpreter::new(ch, &registry);
        exe.set_return_value_pointer(&mut out as *mut i32 as *mut u8);
        exe.execute().unwrap();
        out
    };

    let plain = run(&plain_holder(&fb, &registry));
    let optimized = run(&optimized_holder(&fb, &registry));

    pretty_assertions::assert_eq!(plain, acc);
    pretty_assertions::assert_eq!(optimized, acc, "optimization must not change observable results");
}

#[test]
fn branches_fall_through_on_truthy_conditions() {
    init_logging();
    let registry = Registry::new();
    let func = registry.register_function("step", FunctionSig::new(TypeId::I32, vec![TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a = fb.arg(0).unwrap();
    let out = fb.val(TypeId::I32);
    fb.assign(&out, &fb.imm(0i32)).unwrap();
    let big = fb.expr_gt(&a, &fb.imm(10i32)).unwrap();
    fb.generate_if(&big, |fb| {
        fb.expr_assign(&out, &fb.imm(1i32))?;
        Ok(())
    })
    .unwrap();
    fb.generate_return(Some(&out)).unwrap();

    let ch = plain_holder(&fb, &registry);
    let run = |value: i32| -> i32 {
        let mut out: i32 = -1;
        let mut exe = Interpreter::new(&ch, &registry);
        exe.set_arg(0, value);
        exe.set_return_value_pointer(&mut out as *mut i32 as *mut u8);
        exe.execute().unwrap();
        out
    };

    pretty_assertions::assert_eq!(run(5), 0);
    pretty_assertions::assert_eq!(run(20), 1);
}

#[test]
fn calls_marshal_arguments_and_returns_through_handlers() {
    init_logging();
    let registry = Registry::new();

    let double_fn = registry.register_function("double", FunctionSig::new(TypeId::I32, vec![TypeId::I32]));
    registry.set_call_handler(
        double_fn,
        NativeHandler::new(|_reg, _func, ret, args| unsafe {
            let v = (args[0] as *const i32).read_unaligned();
            (ret as *mut i32).write_unaligned(v * 2);
        }),
    );

    let func = registry.register_function("caller", FunctionSig::new(TypeId::I32, vec![TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();
    let a = fb.arg(0).unwrap();
    let doubled = fb.generate_call(double_fn, &[a], None).unwrap();
    let out = fb.expr_add(&doubled, &fb.imm(1i32)).unwrap();
    fb.generate_return(Some(&out)).unwrap();

    let mut backend = TestBackend::new();
    backend.process(&fb, ALL_STEPS).unwrap();

    let mut result: i32 = 0;
    let mut arg: i32 = 21;
    call_function(
        &registry,
        func,
        &mut result as *mut i32 as *mut u8,
        &[&mut arg as *mut i32 as *mut u8],
    )
    .unwrap();

    pretty_assertions::assert_eq!(result, 43);
}

#[test]
fn methods_receive_their_this_pointer() {
    init_logging();
    let registry = Registry::new();
    let obj = registry.register_type("counter", 4);
    let obj_ptr = registry.pointer_to(obj);

    // counter::bump(amount) adds amount to the i32 behind `this`
    let bump = registry.register_function(
        "counter::bump",
        FunctionSig::method(TypeId::VOID, vec![TypeId::I32], obj_ptr),
    );
    registry.set_call_handler(
        bump,
        NativeHandler::new(|_reg, _func, _ret, args| unsafe {
            let this = (args[0] as *const *mut i32).read_unaligned();
            let amount = (args[1] as *const i32).read_unaligned();
            *this += amount;
        }),
    );

    let func = registry.register_function("poke", FunctionSig::new(TypeId::VOID, vec![obj_ptr]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();
    let target = fb.arg(0).unwrap();
    fb.generate_call(bump, &[fb.imm(5i32)], Some(&target)).unwrap();
    fb.generate_return(None).unwrap();

    let mut backend = TestBackend::new();
    backend.process(&fb, ALL_STEPS).unwrap();

    let mut cell: i32 = 37;
    let mut cell_ptr: *mut i32 = &mut cell;
    call_function(&registry, func, std::ptr::null_mut(), &[&mut cell_ptr as *mut *mut i32 as *mut u8]).unwrap();

    pretty_assertions::assert_eq!(cell, 42);
}

#[test]
fn composite_arguments_carry_their_object_address_between_interpreted_functions() {
    init_logging();
    let registry = Registry::new();
    let pair = registry.register_type("pair", 8);
    let pair_ptr = registry.pointer_to(pair);

    // pair::sum() reads both i32 fields through the receiver
    let sum = registry.register_function("pair::sum", FunctionSig::method(TypeId::I32, vec![], pair_ptr));
    registry.set_call_handler(
        sum,
        NativeHandler::new(|_reg, _func, ret, args| unsafe {
            let this = (args[0] as *const *const i32).read_unaligned();
            let total = this.read_unaligned() + this.add(1).read_unaligned();
            (ret as *mut i32).write_unaligned(total);
        }),
    );

    // sum_of(p: pair) -> i32, interpreted: forwards its by-value composite
    // argument as the receiver of the native method
    let sum_of = registry.register_function("sum_of", FunctionSig::new(TypeId::I32, vec![pair]));
    let mut inner = FunctionBuilder::new(&registry, sum_of);
    inner.enable_validation();
    let p = inner.arg(0).unwrap();
    let total = inner.generate_call(sum, &[], Some(&p)).unwrap();
    inner.generate_return(Some(&total)).unwrap();

    // relay(p: pair) -> i32, interpreted: passes the composite on to another
    // interpreted function, which is where the argument marshalling between
    // two interpreter frames is exercised
    let relay = registry.register_function("relay", FunctionSig::new(TypeId::I32, vec![pair]));
    let mut outer = FunctionBuilder::new(&registry, relay);
    outer.enable_validation();
    let p = outer.arg(0).unwrap();
    let forwarded = outer.generate_call(sum_of, &[p], None).unwrap();
    outer.generate_return(Some(&forwarded)).unwrap();

    let mut backend = TestBackend::new();
    backend.process(&inner, ALL_STEPS).unwrap();
    backend.process(&outer, ALL_STEPS).unwrap();

    let mut obj = [11i32, 31i32];
    let mut obj_addr: *mut u8 = obj.as_mut_ptr() as *mut u8;
    let mut result: i32 = 0;
    call_function(
        &registry,
        relay,
        &mut result as *mut i32 as *mut u8,
        &[&mut obj_addr as *mut *mut u8 as *mut u8],
    )
    .unwrap();

    pretty_assertions::assert_eq!(result, 42);
}

#[test]
fn globals_resolve_to_their_host_addresses() {
    init_logging();
    let mut cell: i32 = 123;

    let registry = Registry::new();
    let global = registry.register_global("answer", TypeId::I32, &mut cell as *mut i32 as usize);

    let func = registry.register_function("read_answer", FunctionSig::new(TypeId::I32, vec![]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let p = fb.val_of_global(global).unwrap();
    let v = fb.expr_deref(&p).unwrap();
    fb.generate_return(Some(&v)).unwrap();

    let ch = plain_holder(&fb, &registry);
    let mut out: i32 = 0;
    let mut exe = Interpreter::new(&ch, &registry);
    exe.set_return_value_pointer(&mut out as *mut i32 as *mut u8);
    exe.execute().unwrap();

    pretty_assertions::assert_eq!(out, 123);
}

#[test]
fn in_place_increments_and_unary_ops_execute() {
    init_logging();
    let registry = Registry::new();
    let func = registry.register_function("mix", FunctionSig::new(TypeId::I32, vec![TypeId::I32]));
    let mut fb = FunctionBuilder::new(&registry, func);
    fb.enable_validation();

    let a = fb.arg(0).unwrap();
    let pre = fb.expr_pre_inc(&a).unwrap(); // a += 1, observes new value
    let neg = fb.expr_neg(&pre).unwrap();
    let out = fb.expr_sub(&a, &neg).unwrap(); // a - (-(a)) == 2a
    fb.generate_return(Some(&out)).unwrap();

    let ch = plain_holder(&fb, &registry);
    let mut out_v: i32 = 0;
    let mut exe = Interpreter::new(&ch, &registry);
    exe.set_arg(0, 6i32);
    exe.set_return_value_pointer(&mut out_v as *mut i32 as *mut u8);
    exe.execute().unwrap();

    pretty_assertions::assert_eq!(out_v, 14); // (6+1) * 2
}
