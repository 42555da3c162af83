mod common;

use common::{Program, run};
use iconx::image::{Instruction as I, Operator as Op, ProcBuilder};

/// `every write(<gen>)`
fn every_write(p: &mut Program, b: &mut ProcBuilder, generator: &[I]) {
    let done = b.label();
    b.mark(done);
    let write = p.function("write");
    b.emit(write);
    b.emit_all(generator.iter().cloned());
    b.emit_all([I::Invoke(1), I::Efail]);
    b.bind(done);
}

fn main_output(p: &mut Program, mut b: ProcBuilder) -> String {
    b.emit(I::Pfail);
    p.procedure(b);
    let image = std::mem::take(&mut p.image);
    let out = run(image);
    assert!(out.result.is_ok(), "{:?}", out.result);
    out.output
}

#[test]
fn to_by_counts_up_and_down() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 0);
    every_write(
        &mut p,
        &mut b,
        &[I::Pnull, I::Int(1), I::Int(7), I::Int(3), I::Op(Op::Toby)],
    );
    every_write(
        &mut p,
        &mut b,
        &[I::Pnull, I::Int(3), I::Int(1), I::Pushn1, I::Op(Op::Toby)],
    );
    assert_eq!(main_output(&mut p, b), "1\n4\n7\n3\n2\n1\n");
}

#[test]
fn alternation_produces_both_operands() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 0);
    let done = b.label();
    b.mark(done);
    let write = p.function("write");
    b.emit(write);
    let (second, joined) = (b.label(), b.label());
    b.mark(second);
    b.emit_all([I::Int(1), I::Esusp]);
    b.goto(joined);
    b.bind(second);
    b.emit(I::Int(2));
    b.bind(joined);
    b.emit_all([I::Invoke(1), I::Efail]);
    b.bind(done);
    assert_eq!(main_output(&mut p, b), "1\n2\n");
}

#[test]
fn limitation_stops_a_generator_early() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 0);
    every_write(
        &mut p,
        &mut b,
        &[
            I::Int(3),
            I::Limit,
            I::Pnull,
            I::Int(1),
            I::Int(10),
            I::Push1,
            I::Op(Op::Toby),
            I::Lsusp,
        ],
    );
    assert_eq!(main_output(&mut p, b), "1\n2\n3\n");
}

#[test]
fn suspending_procedures_are_resumed() {
    let mut p = Program::new();
    let mut upto = ProcBuilder::new("upto3", 0, 0);
    let done = upto.label();
    upto.mark(done);
    upto.emit_all([
        I::Pnull,
        I::Int(1),
        I::Int(3),
        I::Push1,
        I::Op(Op::Toby),
        I::Psusp,
        I::Efail,
    ]);
    upto.bind(done);
    upto.emit(I::Pfail);
    p.procedure(upto);

    let mut b = ProcBuilder::new("main", 0, 0);
    let upto = p.global("upto3");
    every_write(&mut p, &mut b, &[upto, I::Invoke(0)]);
    assert_eq!(main_output(&mut p, b), "1\n2\n3\n");
}

#[test]
fn find_generates_every_match() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 1);
    let (find, needle, hay) = (p.function("find"), p.str("a"), p.str("banana"));
    every_write(&mut p, &mut b, &[find, needle, hay, I::Invoke(2)]);

    let (table, insert) = (p.function("table"), p.function("insert"));
    let done = b.label();
    b.mark(done);
    b.emit_all([
        I::Pnull,
        I::Local(0),
        table,
        I::Invoke(0),
        I::Op(Op::Asgn),
        I::Unmark,
    ]);
    b.bind(done);
    for k in ["x", "y"] {
        let k = p.str(k);
        let done = b.label();
        b.mark(done);
        b.emit_all([insert.clone(), I::Local(0), k, I::Int(1), I::Invoke(3), I::Unmark]);
        b.bind(done);
    }
    let sort = p.function("sort");
    every_write(
        &mut p,
        &mut b,
        &[I::Pnull, sort, I::Local(0), I::Int(3), I::Invoke(2), I::Op(Op::Bang)],
    );
    assert_eq!(main_output(&mut p, b), "2\n4\n6\nx\n1\ny\n1\n");
}

#[test]
fn reversible_assignment_is_undone_on_backtracking() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 1);
    let done = b.label();
    b.mark(done);
    b.emit_all([I::Pnull, I::Local(0), I::Int(1), I::Op(Op::Asgn), I::Unmark]);
    b.bind(done);

    // (x <- 2) & &fail
    let done = b.label();
    b.mark(done);
    b.emit_all([
        I::Pnull,
        I::Local(0),
        I::Int(2),
        I::Op(Op::Rasgn),
        I::Pop,
        I::Efail,
    ]);
    b.bind(done);
    let write = p.function("write");
    b.emit_all([write, I::Local(0), I::Invoke(1), I::Pop]);
    assert_eq!(main_output(&mut p, b), "1\n");
}

#[test]
fn bang_on_a_string_yields_each_character() {
    let mut p = Program::new();
    let mut b = ProcBuilder::new("main", 0, 0);
    let s = p.str("abc");
    every_write(&mut p, &mut b, &[I::Pnull, s, I::Op(Op::Bang)]);
    assert_eq!(main_output(&mut p, b), "a\nb\nc\n");
}
