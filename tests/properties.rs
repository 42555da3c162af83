//! Property-based tests for values that must survive list operations and collections.

mod common;

use common::{Program, run_with, tight_config, write_stmt};
use iconx::image::{Instruction as I, Operator as Op, ProcBuilder};
use proptest::prelude::*;

fn every_write(p: &mut Program, b: &mut ProcBuilder, generator: &[I]) {
    let done = b.label();
    b.mark(done);
    let write = p.function("write");
    b.emit(write);
    b.emit_all(generator.iter().cloned());
    b.emit_all([I::Invoke(1), I::Efail]);
    b.bind(done);
}

fn output_of(mut p: Program, mut b: ProcBuilder) -> String {
    b.emit(I::Pfail);
    p.procedure(b);
    let out = run_with(p.finish(), &[], "", tight_config());
    assert!(out.result.is_ok(), "{:?}", out.result);
    out.output
}

fn lines<T: ToString>(values: impl IntoIterator<Item = T>) -> String {
    values
        .into_iter()
        .map(|v| format!("{}\n", v.to_string()))
        .collect()
}

fn list_literal(values: &[i64]) -> Vec<I> {
    let mut code = vec![I::Pnull];
    code.extend(values.iter().map(|v| I::Int(*v)));
    code.push(I::Llist(values.len() as u32));
    code
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// `every write(!L)` yields the elements in order.
    #[test]
    fn list_elements_come_back_in_order(values in prop::collection::vec(-1000i64..1000, 0..40)) {
        let mut p = Program::new();
        let mut b = ProcBuilder::new("main", 0, 0);
        let mut code = vec![I::Pnull];
        code.extend(list_literal(&values));
        code.push(I::Op(Op::Bang));
        every_write(&mut p, &mut b, &code);
        prop_assert_eq!(output_of(p, b), lines(&values));
    }

    /// `push` then `pop` and `put` then `pull` return the pushed value and leave the rest.
    #[test]
    fn end_operations_round_trip(values in prop::collection::vec(-50i64..50, 0..20), x in -50i64..50) {
        let mut p = Program::new();
        let mut b = ProcBuilder::new("main", 0, 1);
        let done = b.label();
        b.mark(done);
        b.emit_all([I::Pnull, I::Local(0)]);
        b.emit_all(list_literal(&values));
        b.emit_all([I::Op(Op::Asgn), I::Unmark]);
        b.bind(done);

        let (push, pop, put, pull) =
            (p.function("push"), p.function("pop"), p.function("put"), p.function("pull"));
        for f in [push, put] {
            let done = b.label();
            b.mark(done);
            b.emit_all([f, I::Local(0), I::Int(x), I::Invoke(2), I::Unmark]);
            b.bind(done);
        }
        write_stmt(&mut p, &mut b, &[pop, I::Local(0), I::Invoke(1)]);
        write_stmt(&mut p, &mut b, &[pull, I::Local(0), I::Invoke(1)]);
        every_write(&mut p, &mut b, &[I::Pnull, I::Local(0), I::Op(Op::Bang)]);

        let expected = format!("{x}\n{x}\n{}", lines(&values));
        prop_assert_eq!(output_of(p, b), expected);
    }

    /// Concatenations built while the string region is tiny read back intact.
    #[test]
    fn concatenated_strings_survive_collections(parts in prop::collection::vec("[a-z]{0,30}", 1..30)) {
        let mut p = Program::new();
        let mut b = ProcBuilder::new("main", 0, 1);
        let done = b.label();
        b.mark(done);
        let empty = p.str("");
        b.emit_all([I::Pnull, I::Local(0), empty, I::Op(Op::Asgn), I::Unmark]);
        b.bind(done);
        for part in &parts {
            let s = p.str(part);
            let done = b.label();
            b.mark(done);
            b.emit_all([
                I::Pnull,
                I::Local(0),
                I::Pnull,
                I::Local(0),
                s,
                I::Op(Op::Cat),
                I::Op(Op::Asgn),
                I::Unmark,
            ]);
            b.bind(done);
        }
        write_stmt(&mut p, &mut b, &[I::Local(0)]);
        prop_assert_eq!(output_of(p, b), format!("{}\n", parts.concat()));
    }

    /// Table assignments made across collections keep the last value per key.
    #[test]
    fn table_overwrites_keep_the_last_value(
        writes in prop::collection::vec((0i64..8, -100i64..100), 1..40),
    ) {
        let mut p = Program::new();
        let mut b = ProcBuilder::new("main", 0, 1);
        let table = p.function("table");
        let done = b.label();
        b.mark(done);
        b.emit_all([I::Pnull, I::Local(0), table, I::Invoke(0), I::Op(Op::Asgn), I::Unmark]);
        b.bind(done);
        for (k, v) in &writes {
            let done = b.label();
            b.mark(done);
            b.emit_all([
                I::Pnull,
                I::Pnull,
                I::Local(0),
                I::Int(*k),
                I::Op(Op::Subsc),
                I::Int(*v),
                I::Op(Op::Asgn),
                I::Unmark,
            ]);
            b.bind(done);
        }
        let collect = p.function("collect");
        b.emit_all([collect, I::Invoke(0), I::Pop]);
        let mut last = std::collections::BTreeMap::new();
        for (k, v) in &writes {
            last.insert(*k, *v);
        }
        for k in last.keys() {
            write_stmt(&mut p, &mut b, &[I::Pnull, I::Local(0), I::Int(*k), I::Op(Op::Subsc)]);
        }
        prop_assert_eq!(output_of(p, b), lines(last.values()));
    }

    /// Sorting a list of integers agrees with sorting the same integers in Rust.
    #[test]
    fn sort_matches_integer_order(values in prop::collection::vec(-1000i64..1000, 0..30)) {
        let mut p = Program::new();
        let mut b = ProcBuilder::new("main", 0, 0);
        let sort = p.function("sort");
        let mut code = vec![I::Pnull, sort];
        code.extend(list_literal(&values));
        code.extend([I::Invoke(1), I::Op(Op::Bang)]);
        every_write(&mut p, &mut b, &code);
        let mut sorted = values.clone();
        sorted.sort();
        prop_assert_eq!(output_of(p, b), lines(&sorted));
    }
}
