mod common;

use common::{Program, run, write_stmt};
use iconx::gc::RegionKind;
use iconx::image::{Instruction as I, Keyword, Operator as Op, ProcBuilder};
use iconx::vm::{RunError, RunReport, Vm, VmConfig, VmIo};

/// `c := create <body>` in local 0 of `main`, with the body's entry code around it.
fn create_into_local(b: &mut ProcBuilder, body: &[I]) {
    let (entry, after, exhausted) = (b.label(), b.label(), b.label());
    b.goto(after);
    b.bind(entry);
    b.emit(I::Pop);
    b.mark(exhausted);
    b.emit_all(body.iter().cloned());
    b.emit_all([I::Coret, I::Efail]);
    b.bind(exhausted);
    b.emit(I::Cofail);
    b.goto(exhausted);

    b.bind(after);
    let done = b.label();
    b.mark(done);
    b.emit_all([I::Pnull, I::Local(0)]);
    b.create(entry);
    b.emit_all([I::Op(Op::Asgn), I::Unmark]);
    b.bind(done);
}

/// `while write(@c)`
fn drain_local(p: &mut Program, b: &mut ProcBuilder, local: u32) {
    let (top, done) = (b.label(), b.label());
    b.bind(top);
    b.mark(done);
    let write = p.function("write");
    b.emit_all([write, I::Pnull, I::Local(local), I::Coact, I::Invoke(1), I::Unmark]);
    b.goto(top);
    b.bind(done);
}

const ONE_TO_THREE: [I; 5] = [I::Pnull, I::Int(1), I::Int(3), I::Push1, I::Op(Op::Toby)];

#[test]
fn activation_produces_each_result_then_fails() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 1);
    create_into_local(&mut b, &ONE_TO_THREE);
    drain_local(&mut p, &mut b, 0);
    write_stmt(&mut p, &mut b, &[I::Pnull, I::Local(0), I::Op(Op::Size)]);
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run(p.finish());
    assert!(out.result.is_ok(), "{:?}", out.result);
    assert_eq!(out.output, "1\n2\n3\n3\n");
}

#[test]
fn refreshing_restarts_from_the_beginning() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 2);
    create_into_local(&mut b, &ONE_TO_THREE);
    drain_local(&mut p, &mut b, 0);

    let done = b.label();
    b.mark(done);
    b.emit_all([
        I::Pnull,
        I::Local(1),
        I::Pnull,
        I::Local(0),
        I::Op(Op::Refresh),
        I::Op(Op::Asgn),
        I::Unmark,
    ]);
    b.bind(done);
    drain_local(&mut p, &mut b, 1);
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run(p.finish());
    assert_eq!(out.output, "1\n2\n3\n1\n2\n3\n");
}

#[test]
fn locals_are_copied_at_creation() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 2);
    let done = b.label();
    b.mark(done);
    b.emit_all([I::Pnull, I::Local(1), I::Int(10), I::Op(Op::Asgn), I::Unmark]);
    b.bind(done);
    create_into_local(&mut b, &[I::Pnull, I::Local(1), I::Int(1), I::Op(Op::Plus)]);

    let done = b.label();
    b.mark(done);
    b.emit_all([I::Pnull, I::Local(1), I::Int(20), I::Op(Op::Asgn), I::Unmark]);
    b.bind(done);
    drain_local(&mut p, &mut b, 0);
    write_stmt(&mut p, &mut b, &[I::Local(1)]);
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run(p.finish());
    assert_eq!(out.output, "11\n20\n");
}

#[test]
fn activating_an_active_co_expression_is_error_214() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 1);
    create_into_local(&mut b, &[I::Pnull, I::Keywd(Keyword::Main), I::Coact]);
    drain_local(&mut p, &mut b, 0);
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run(p.finish());
    assert!(
        matches!(out.result, Err(RunError::Runtime { code: 214, .. })),
        "{:?}",
        out.result
    );
}

#[test]
fn refreshing_main_is_error_118() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 0);
    write_stmt(
        &mut p,
        &mut b,
        &[I::Pnull, I::Keywd(Keyword::Main), I::Op(Op::Refresh)],
    );
    b.emit(I::Pfail);
    p.procedure(b);

    let out = run(p.finish());
    assert!(matches!(out.result, Err(RunError::Runtime { code: 118, .. })));
}

/// Runs `c := create 1 to 3`, optionally `c := &null`, then `collect()`; returns the static
/// region usage at exit with the run report.
fn static_usage_after_collect(drop_reference: bool) -> (usize, RunReport) {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 1);
    create_into_local(&mut b, &ONE_TO_THREE);
    if drop_reference {
        let done = b.label();
        b.mark(done);
        b.emit_all([I::Pnull, I::Local(0), I::Pnull, I::Op(Op::Asgn), I::Unmark]);
        b.bind(done);
    }
    let collect = p.function("collect");
    b.emit_all([collect, I::Invoke(0), I::Pop, I::Pfail]);
    p.procedure(b);

    let config = VmConfig {
        metrics: true,
        ..VmConfig::default()
    };
    let mut vm = Vm::new(p.finish(), config, VmIo::null()).expect("vm");
    let report = vm.run(&[]).expect("run");
    (vm.region_usage(RegionKind::Static).used, report)
}

#[test]
fn unreachable_coexpressions_release_their_stacks() {
    let (kept_used, kept) = static_usage_after_collect(false);
    let (dropped_used, dropped) = static_usage_after_collect(true);

    assert_eq!(kept.gc.collections, 1);
    assert_eq!(kept.gc.static_bytes_reclaimed, 0);

    let stack_bytes = (kept_used - dropped_used) as u64;
    assert!(stack_bytes >= u64::from(VmConfig::default().coexpr_stack_slots));
    assert_eq!(dropped.gc.collections, 1);
    assert_eq!(dropped.gc.static_bytes_reclaimed, stack_bytes);
    let metrics = dropped.metrics.expect("metrics enabled");
    assert_eq!(metrics.static_bytes_reclaimed, stack_bytes);
}
