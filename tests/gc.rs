mod common;

use common::{Program, run_with, tight_config, write_stmt};
use iconx::gc::RegionKind;
use iconx::image::{Image, Instruction as I, Operator as Op, ProcBuilder};
use iconx::vm::{RunError, Vm, VmConfig, VmIo};

/// `every i := 1 to n do x := repl("ab", 50)` with `i` in local 0 and `x` in local 1.
fn churn(p: &mut Program, b: &mut ProcBuilder, n: i64) {
    let done = b.label();
    b.mark(done);
    b.emit_all([
        I::Pnull,
        I::Local(0),
        I::Pnull,
        I::Int(1),
        I::Int(n),
        I::Push1,
        I::Op(Op::Toby),
        I::Op(Op::Asgn),
        I::Pop,
        I::Mark0,
    ]);
    let (repl, ab) = (p.function("repl"), p.str("ab"));
    b.emit_all([
        I::Pnull,
        I::Local(1),
        repl,
        ab,
        I::Int(50),
        I::Invoke(2),
        I::Op(Op::Asgn),
        I::Unmark,
        I::Efail,
    ]);
    b.bind(done);
}

#[test]
fn garbage_strings_are_reclaimed() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 2);
    churn(&mut p, &mut b, 2000);
    write_stmt(&mut p, &mut b, &[I::Pnull, I::Local(1), I::Op(Op::Size)]);
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run_with(p.finish(), &[], "", tight_config());
    let report = out.result.expect("run");
    assert_eq!(out.output, "100\n");
    assert!(report.gc.collections > 0);
    let metrics = report.metrics.expect("metrics enabled");
    assert_eq!(metrics.collections, report.gc.collections);
    assert!(metrics.string_bytes_reclaimed > 0);
}

#[test]
fn reachable_structures_survive_collections() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 3);
    let list = p.function("list");
    let done = b.label();
    b.mark(done);
    b.emit_all([I::Pnull, I::Local(2), list, I::Invoke(0), I::Op(Op::Asgn), I::Unmark]);
    b.bind(done);

    // every i := 1 to 300 do put(L, string(i))
    let (put, string) = (p.function("put"), p.function("string"));
    let done = b.label();
    b.mark(done);
    b.emit_all([
        I::Pnull,
        I::Local(0),
        I::Pnull,
        I::Int(1),
        I::Int(300),
        I::Push1,
        I::Op(Op::Toby),
        I::Op(Op::Asgn),
        I::Pop,
        I::Mark0,
        put,
        I::Local(2),
        string,
        I::Local(0),
        I::Invoke(1),
        I::Invoke(2),
        I::Unmark,
        I::Efail,
    ]);
    b.bind(done);
    churn(&mut p, &mut b, 500);
    write_stmt(&mut p, &mut b, &[I::Pnull, I::Local(2), I::Op(Op::Size)]);
    write_stmt(&mut p, &mut b, &[I::Pnull, I::Local(2), I::Int(1), I::Op(Op::Subsc)]);
    write_stmt(&mut p, &mut b, &[I::Pnull, I::Local(2), I::Int(300), I::Op(Op::Subsc)]);
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run_with(p.finish(), &[], "", tight_config());
    let report = out.result.expect("run");
    assert!(report.gc.collections > 0);
    assert_eq!(out.output, "300\n1\n300\n");
}

#[test]
fn forced_collection_keeps_regions_consistent() {
    let mut vm = Vm::new(Image::default(), VmConfig::default(), VmIo::null()).expect("vm");
    let before = vm.region_usage(RegionKind::Block);
    vm.collect_garbage_now().expect("collect");
    let after = vm.region_usage(RegionKind::Block);
    assert_eq!(vm.gc_stats().collections, 1);
    assert!(after.used <= before.used);
    assert!(after.capacity >= before.capacity);
}

#[test]
fn unbounded_recursion_overflows_the_stack() {
    let mut p = Program::new();
    let mut rec = ProcBuilder::new("rec", 0, 0);
    let me = p.global("rec");
    rec.emit_all([me, I::Invoke(0), I::Pret]);
    p.procedure(rec);
    let mut b = ProcBuilder::new("main", 0, 0);
    let rec = p.global("rec");
    b.emit_all([rec, I::Invoke(0), I::Pop, I::Pfail]);
    p.procedure(b);

    let config = VmConfig {
        main_stack_slots: 500,
        ..VmConfig::default()
    };
    let out = run_with(p.finish(), &[], "", config);
    assert!(matches!(out.result, Err(RunError::Runtime { code: 301, .. })));
}
