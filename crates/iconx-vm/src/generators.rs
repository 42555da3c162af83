//! Resumable state of builtin generators and generative operators.
//!
//! A suspended builtin keeps its [`GenState`] in the generator frame on the stack; resuming
//! it produces the next value together with the state for the one after, or fails.

use iconx_gc::{BlockRef, Need, Relocate, Relocation, Trace, Tracer};
use iconx_image::CsetBits;

use crate::block::SUBS_SIZE;
use crate::error::Fault;
use crate::vm::{Signal, Vm};
use crate::{Desc, Loc};

#[derive(Clone, Debug)]
pub(crate) enum GenState {
    /// `i to j by k`.
    Toby { next: i64, to: i64, by: i64 },
    /// `seq(i, j)`.
    Seq { next: i64, by: i64 },
    /// `!s` for a string value or a string-valued variable.
    BangStr { var: Desc, s: Desc, pos: i64 },
    /// `!L`, `!R` and `!T`: variables for consecutive slots.
    BangSlots { slots: Vec<Loc>, pos: usize },
    /// `!S` and `key(T)`: a snapshot of members.
    Values { values: Vec<Desc>, pos: usize },
    /// `!f`: lines of a file.
    Lines { file: BlockRef },
    /// `find(s1, s2, i, j)`.
    Find {
        needle: Vec<u8>,
        hay: Vec<u8>,
        pos: usize,
        end: usize,
    },
    /// `upto(c, s, i, j)`.
    Upto {
        cset: CsetBits,
        hay: Vec<u8>,
        pos: usize,
        end: usize,
    },
    /// `move(i)` and `tab(i)`: puts `&pos` back when resumed.
    RestorePos { old: i64 },
    /// `v <- e`: restores the old value of `var` when resumed.
    Rasgn { var: Desc, old: Desc },
    /// `v1 <-> v2`: swaps back when resumed.
    Rswap {
        var1: Desc,
        var2: Desc,
        old1: Desc,
        old2: Desc,
    },
}

/// Suspends `v` with `state`, or returns `v` when `last` says no further value follows.
fn produce(v: Desc, state: GenState, last: bool) -> Signal {
    if last { Signal::Return(v) } else { Signal::Suspend(v, state) }
}

impl GenState {
    /// Produces the next value. `cargp` is the result slot of the original call.
    pub(crate) fn resume(self, vm: &mut Vm, _cargp: u32) -> Result<Signal, Fault> {
        match self {
            GenState::Toby { next, to, by } => {
                if (by > 0 && next > to) || (by < 0 && next < to) {
                    return Ok(Signal::Fail);
                }
                let Some(after) = next.checked_add(by) else {
                    return Ok(Signal::Return(Desc::Int(next)));
                };
                Ok(Signal::Suspend(
                    Desc::Int(next),
                    GenState::Toby {
                        next: after,
                        to,
                        by,
                    },
                ))
            }
            GenState::Seq { next, by } => match next.checked_add(by) {
                Some(after) => Ok(Signal::Suspend(
                    Desc::Int(next),
                    GenState::Seq { next: after, by },
                )),
                None => Ok(Signal::Return(Desc::Int(next))),
            },
            GenState::BangStr { var, s, pos } => {
                let mut keep = [var, s];
                vm.reserve_with(Need::blocks(SUBS_SIZE), &mut keep)?;
                let [var, s] = keep;
                let current = if var.is_var() { vm.deref(var)? } else { s };
                let Desc::Str(q) = current else {
                    return crate::error::runerr(103, current);
                };
                if pos > q.len() as i64 {
                    return Ok(Signal::Fail);
                }
                let v = vm.mksubs(var, q, pos, 1)?;
                let next = GenState::BangStr {
                    var,
                    s,
                    pos: pos + 1,
                };
                Ok(Signal::Suspend(v, next))
            }
            GenState::BangSlots { slots, pos } => match slots.get(pos) {
                Some(loc) => {
                    let v = Desc::Var(*loc);
                    let last = pos + 1 == slots.len();
                    Ok(produce(v, GenState::BangSlots { slots, pos: pos + 1 }, last))
                }
                None => Ok(Signal::Fail),
            },
            GenState::Values { values, pos } => match values.get(pos) {
                Some(v) => {
                    let v = *v;
                    let last = pos + 1 == values.len();
                    Ok(produce(v, GenState::Values { values, pos: pos + 1 }, last))
                }
                None => Ok(Signal::Fail),
            },
            GenState::Lines { file } => {
                let Some(line) = vm.read_line(file)? else {
                    return Ok(Signal::Fail);
                };
                let mut keep = [Desc::File(file)];
                vm.reserve_with(Need::strings(line.len()), &mut keep)?;
                let [Desc::File(file)] = keep else {
                    return crate::error::syserr("held file changed type");
                };
                let v = vm.mkstr(&line)?;
                Ok(Signal::Suspend(v, GenState::Lines { file }))
            }
            GenState::Find {
                needle,
                hay,
                pos,
                end,
            } => {
                let limit = end.saturating_sub(needle.len());
                let mut at = pos;
                while at <= limit && at + needle.len() <= end {
                    if hay[at..at + needle.len()] == needle[..] {
                        let next = GenState::Find {
                            needle,
                            hay,
                            pos: at + 1,
                            end,
                        };
                        return Ok(Signal::Suspend(Desc::Int(at as i64 + 1), next));
                    }
                    at += 1;
                }
                Ok(Signal::Fail)
            }
            GenState::Upto {
                cset,
                hay,
                pos,
                end,
            } => {
                match (pos..end).find(|&i| cset.contains(hay[i])) {
                    Some(at) => Ok(Signal::Suspend(
                        Desc::Int(at as i64 + 1),
                        GenState::Upto {
                            cset,
                            hay,
                            pos: at + 1,
                            end,
                        },
                    )),
                    None => Ok(Signal::Fail),
                }
            }
            GenState::RestorePos { old } => {
                let len = vm.k_subject_len();
                if old > len + 1 {
                    return crate::error::runerr(205, Desc::Int(old));
                }
                vm.k_pos = old;
                Ok(Signal::Fail)
            }
            GenState::Rasgn { var, old } => {
                vm.assign(var, old)?;
                Ok(Signal::Fail)
            }
            GenState::Rswap {
                var1,
                var2,
                old1,
                old2,
            } => {
                let first = vm.assign_need(var1, old1)?;
                let second = vm.assign_need(var2, old2)?;
                let mut keep = [var1, old1, var2, old2];
                vm.reserve_with(
                    Need {
                        blocks: first.blocks + second.blocks,
                        strings: first.strings + second.strings,
                        statics: 0,
                    },
                    &mut keep,
                )?;
                let [var1, old1, var2, old2] = keep;
                if vm.assign(var1, old1)? {
                    vm.assign(var2, old2)?;
                }
                Ok(Signal::Fail)
            }
        }
    }
}

impl Trace for GenState {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self {
            GenState::BangStr { var, s, .. } => {
                var.trace(tracer);
                s.trace(tracer);
            }
            GenState::BangSlots { slots, .. } => {
                for loc in slots {
                    Desc::Var(*loc).trace(tracer);
                }
            }
            GenState::Values { values, .. } => {
                for v in values {
                    v.trace(tracer);
                }
            }
            GenState::Lines { file } => tracer.mark_block(*file),
            GenState::Rasgn { var, old } => {
                var.trace(tracer);
                old.trace(tracer);
            }
            GenState::Rswap {
                var1,
                var2,
                old1,
                old2,
            } => {
                for d in [var1, var2, old1, old2] {
                    d.trace(tracer);
                }
            }
            GenState::Toby { .. }
            | GenState::Seq { .. }
            | GenState::Find { .. }
            | GenState::Upto { .. }
            | GenState::RestorePos { .. } => {}
        }
    }
}

impl Relocate for GenState {
    fn relocate(&mut self, map: &Relocation) {
        match self {
            GenState::BangStr { var, s, .. } => {
                var.relocate(map);
                s.relocate(map);
            }
            GenState::BangSlots { slots, .. } => {
                for loc in slots {
                    if let Loc::Block { block, .. } = loc {
                        *block = map.block(*block);
                    }
                }
            }
            GenState::Values { values, .. } => {
                for v in values {
                    v.relocate(map);
                }
            }
            GenState::Lines { file } => *file = map.block(*file),
            GenState::Rasgn { var, old } => {
                var.relocate(map);
                old.relocate(map);
            }
            GenState::Rswap {
                var1,
                var2,
                old1,
                old2,
            } => {
                for d in [var1, var2, old1, old2] {
                    d.relocate(map);
                }
            }
            GenState::Toby { .. }
            | GenState::Seq { .. }
            | GenState::Find { .. }
            | GenState::Upto { .. }
            | GenState::RestorePos { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VmConfig, VmIo};
    use iconx_image::Image;

    fn vm() -> Vm {
        Vm::new(Image::default(), VmConfig::default(), VmIo::null()).unwrap()
    }

    fn drain(vm: &mut Vm, mut state: GenState) -> Vec<Desc> {
        let mut out = Vec::new();
        loop {
            match state.resume(vm, 0).unwrap() {
                Signal::Suspend(v, next) => {
                    out.push(v);
                    state = next;
                }
                Signal::Return(v) => {
                    out.push(v);
                    return out;
                }
                Signal::Fail => return out,
            }
        }
    }

    #[test]
    fn toby_counts_in_either_direction() {
        let mut vm = vm();
        let up = drain(&mut vm, GenState::Toby { next: 1, to: 7, by: 3 });
        assert_eq!(up, vec![Desc::Int(1), Desc::Int(4), Desc::Int(7)]);
        let down = drain(&mut vm, GenState::Toby { next: 3, to: 1, by: -1 });
        assert_eq!(down, vec![Desc::Int(3), Desc::Int(2), Desc::Int(1)]);
        assert!(drain(&mut vm, GenState::Toby { next: 2, to: 1, by: 1 }).is_empty());
    }

    #[test]
    fn find_reports_overlapping_positions() {
        let mut vm = vm();
        let found = drain(
            &mut vm,
            GenState::Find {
                needle: b"aa".to_vec(),
                hay: b"aaab".to_vec(),
                pos: 0,
                end: 4,
            },
        );
        assert_eq!(found, vec![Desc::Int(1), Desc::Int(2)]);
    }

    #[test]
    fn upto_stops_at_the_end_bound() {
        let mut vm = vm();
        let found = drain(
            &mut vm,
            GenState::Upto {
                cset: CsetBits::from_bytes(b"ab"),
                hay: b"xaxbxa".to_vec(),
                pos: 0,
                end: 5,
            },
        );
        assert_eq!(found, vec![Desc::Int(2), Desc::Int(4)]);
    }

    #[test]
    fn snapshot_values_end_with_a_return() {
        let mut vm = vm();
        let state = GenState::Values {
            values: vec![Desc::Int(1), Desc::Int(2)],
            pos: 0,
        };
        let Signal::Suspend(first, next) = state.resume(&mut vm, 0).unwrap() else {
            panic!("expected a suspension");
        };
        assert_eq!(first, Desc::Int(1));
        assert!(matches!(next.resume(&mut vm, 0).unwrap(), Signal::Return(Desc::Int(2))));
    }
}
