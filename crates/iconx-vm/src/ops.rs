//! The operators dispatched by the `Op` instruction.
//!
//! An operator finds its operands above a null result slot, exactly like a builtin function,
//! and finishes through the same [`Vm::finish_call`] protocol, so generative operators (`!`,
//! `to-by`, `<-`, `<->`) suspend in ordinary generator frames.

use std::cmp::Ordering;

use iconx_gc::Need;
use iconx_image::{CsetBits, Operator};

use crate::block::{Block, CSET_SIZE, ELEM_SIZE, HASH_SIZE};
use crate::convert::{Num, cvpos};
use crate::error::{Fault, runerr, syserr};
use crate::generators::GenState;
use crate::structs::list_need;
use crate::vm::{Signal, Vm};
use crate::{Desc, Loc};

const RAND_A: i64 = 1103515245;
const RAND_C: i64 = 453816694;
const RAND_MASK: i64 = 0x7FFF_FFFF;

/// Whether operand `i` (1-based) of `op` is dereferenced before the operator runs.
fn derefs_operand(op: Operator, i: u32) -> bool {
    use Operator::*;
    match op {
        Swap | Rasgn | Rswap | Nonnull | Null | Bang | Random => false,
        Asgn | Subsc | Sect => i > 1,
        _ => true,
    }
}

impl Vm {
    pub(crate) fn operate(&mut self, op: Operator) -> Result<(), Fault> {
        let arity = op.arity();
        let Some(cargp) = (self.stack.len() as u32).checked_sub(arity + 1) else {
            return syserr(format!("operator {} below the stack bottom", op.symbol()));
        };
        for i in 1..=arity {
            if derefs_operand(op, i) {
                let v = self.deref(self.desc(cargp + i)?)?;
                self.set(cargp + i, v)?;
            }
        }
        let a = self.desc(cargp + 1)?;
        let signal = match op {
            Operator::Neg => self.negate(a)?,
            Operator::Number => Signal::Return(self.num_arg(a)?.into_desc()),
            Operator::Compl => {
                let bits = self.cset_arg(a)?;
                let mut out = CsetBits::default();
                for (o, w) in out.0.iter_mut().zip(bits.0) {
                    *o = !w;
                }
                Signal::Return(self.mkcset(out)?)
            }
            Operator::Refresh => match a {
                Desc::Coexpr(c) => Signal::Return(self.refresh(c)?),
                other => return runerr(118, other),
            },
            Operator::Size => Signal::Return(Desc::Int(self.size_of(a)?)),
            Operator::Value => Signal::Return(a),
            Operator::Nonnull | Operator::Null => {
                let is_null = matches!(self.deref(a)?, Desc::Null);
                if is_null == matches!(op, Operator::Null) {
                    Signal::Return(a)
                } else {
                    Signal::Fail
                }
            }
            Operator::Random => self.random(cargp)?,
            Operator::Bang => self.bang(cargp)?,

            Operator::Plus
            | Operator::Minus
            | Operator::Mult
            | Operator::Div
            | Operator::Mod
            | Operator::Power => {
                let b = self.desc(cargp + 2)?;
                Signal::Return(self.arith(op, a, b)?)
            }
            Operator::Cat => {
                let b = self.desc(cargp + 2)?;
                let mut s = self.str_arg(a)?;
                s.extend_from_slice(&self.str_arg(b)?);
                Signal::Return(self.mkstr(&s)?)
            }
            Operator::Lconcat => self.lconcat(cargp)?,
            Operator::Diff | Operator::Inter | Operator::Unions => self.set_op(op, cargp)?,
            Operator::Eqv | Operator::Neqv => {
                let b = self.desc(cargp + 2)?;
                if self.equiv(a, b) == matches!(op, Operator::Eqv) {
                    Signal::Return(b)
                } else {
                    Signal::Fail
                }
            }
            Operator::Lexeq
            | Operator::Lexne
            | Operator::Lexlt
            | Operator::Lexle
            | Operator::Lexgt
            | Operator::Lexge => {
                let b = self.desc(cargp + 2)?;
                let ord = self.str_arg(a)?.cmp(&self.str_arg(b)?);
                if holds(op, ord) {
                    match self.tostr(b)? {
                        Some(s) => Signal::Return(s),
                        None => return runerr(103, b),
                    }
                } else {
                    Signal::Fail
                }
            }
            Operator::Numeq
            | Operator::Numne
            | Operator::Numlt
            | Operator::Numle
            | Operator::Numgt
            | Operator::Numge => {
                let b = self.desc(cargp + 2)?;
                let (x, y) = (self.num_arg(a)?, self.num_arg(b)?);
                let ord = match (x, y) {
                    (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
                    _ => x.as_real().partial_cmp(&y.as_real()),
                };
                match ord {
                    Some(ord) if holds(op, ord) => Signal::Return(y.into_desc()),
                    _ => Signal::Fail,
                }
            }

            Operator::Asgn => {
                let b = self.desc(cargp + 2)?;
                if self.assign(a, b)? {
                    Signal::Return(self.desc(cargp + 1)?)
                } else {
                    Signal::Fail
                }
            }
            Operator::Swap => {
                if self.swap(cargp)?.is_some() {
                    Signal::Return(self.desc(cargp + 1)?)
                } else {
                    Signal::Fail
                }
            }
            Operator::Rasgn => {
                let b = self.desc(cargp + 2)?;
                let old = self.deref(a)?;
                let value = self.deref(b)?;
                let need = self.assign_need(a, value)?;
                let mut keep = [old, value];
                self.reserve_with(need, &mut keep)?;
                let [old, value] = keep;
                let var = self.desc(cargp + 1)?;
                if self.assign(var, value)? {
                    Signal::Suspend(var, GenState::Rasgn { var, old })
                } else {
                    Signal::Fail
                }
            }
            Operator::Rswap => {
                if let Some((old1, old2)) = self.swap(cargp)? {
                    let var1 = self.desc(cargp + 1)?;
                    let var2 = self.desc(cargp + 2)?;
                    Signal::Suspend(
                        var1,
                        GenState::Rswap {
                            var1,
                            var2,
                            old1,
                            old2,
                        },
                    )
                } else {
                    Signal::Fail
                }
            }
            Operator::Subsc => self.subscript(cargp)?,
            Operator::Sect => self.section(cargp)?,
            Operator::Toby => {
                let from = self.int_arg(a)?;
                let to = self.int_arg(self.desc(cargp + 2)?)?;
                let by = self.int_arg(self.desc(cargp + 3)?)?;
                if by == 0 {
                    return runerr(211, Desc::Int(by));
                }
                GenState::Toby {
                    next: from,
                    to,
                    by,
                }
                .resume(self, cargp)?
            }
        };
        if !self.finish_call(signal, cargp)? {
            self.efail()?;
        }
        Ok(())
    }

    fn negate(&self, a: Desc) -> Result<Signal, Fault> {
        Ok(Signal::Return(match self.num_arg(a)? {
            Num::Int(i) => match i.checked_neg() {
                Some(n) => Desc::Int(n),
                None => return runerr(203, a),
            },
            Num::Real(r) => Desc::Real(-r),
        }))
    }

    fn arith(&self, op: Operator, a: Desc, b: Desc) -> Result<Desc, Fault> {
        let (x, y) = (self.num_arg(a)?, self.num_arg(b)?);
        if let (Num::Int(x), Num::Int(y)) = (x, y) {
            let r = match op {
                Operator::Plus => x.checked_add(y),
                Operator::Minus => x.checked_sub(y),
                Operator::Mult => x.checked_mul(y),
                Operator::Div => {
                    if y == 0 {
                        return runerr(201, b);
                    }
                    x.checked_div(y)
                }
                Operator::Mod => {
                    if y == 0 {
                        return runerr(202, b);
                    }
                    x.checked_rem(y)
                }
                _ => return int_power(x, y, a),
            };
            return match r {
                Some(r) => Ok(Desc::Int(r)),
                None => runerr(203, a),
            };
        }
        let (x, y) = (x.as_real(), y.as_real());
        let r = match op {
            Operator::Plus => x + y,
            Operator::Minus => x - y,
            Operator::Mult => x * y,
            Operator::Div => {
                if y == 0.0 {
                    return runerr(204, b);
                }
                x / y
            }
            Operator::Mod => {
                if y == 0.0 {
                    return runerr(202, b);
                }
                x % y
            }
            _ => {
                if x == 0.0 && y <= 0.0 {
                    return runerr(204, b);
                }
                if x < 0.0 && y.fract() != 0.0 {
                    return runerr(206, a);
                }
                x.powf(y)
            }
        };
        if r.is_finite() { Ok(Desc::Real(r)) } else { runerr(204, a) }
    }

    pub(crate) fn mkcset(&mut self, bits: CsetBits) -> Result<Desc, Fault> {
        self.reserve(Need::blocks(CSET_SIZE))?;
        Ok(Desc::Cset(self.heap.alloc(Block::Cset(bits))?))
    }

    fn size_of(&self, a: Desc) -> Result<i64, Fault> {
        Ok(match a {
            Desc::Str(q) => q.len() as i64,
            Desc::Cset(_) => self.cset_bits(a).map_or(0, |b| b.size() as i64),
            Desc::List(b) => self.list_size(b)? as i64,
            Desc::Table(b) | Desc::Set(b) => self.hash_size(b)? as i64,
            Desc::Record(b) => match self.block(b)? {
                Block::Record(r) => r.fields.len() as i64,
                _ => return syserr("record descriptor without a record block"),
            },
            Desc::Coexpr(c) => self.coexpr(c)?.size,
            other => match self.cvstr(other) {
                Some(s) => s.len() as i64,
                None => return runerr(112, other),
            },
        })
    }

    /// Advances `&random` and returns a value in `[0, 1)`.
    fn next_random(&mut self) -> f64 {
        self.k_random = (RAND_A.wrapping_mul(self.k_random).wrapping_add(RAND_C)) & RAND_MASK;
        self.k_random as f64 / (RAND_MASK as f64 + 1.0)
    }

    /// A random position in `1..=n`.
    fn random_index(&mut self, n: i64) -> i64 {
        (self.next_random() * n as f64) as i64 + 1
    }

    fn random(&mut self, cargp: u32) -> Result<Signal, Fault> {
        let var = self.desc(cargp + 1)?;
        let v = self.deref(var)?;
        match v {
            Desc::Str(q) => {
                if q.is_empty() {
                    return Ok(Signal::Fail);
                }
                let pos = self.random_index(q.len() as i64);
                Ok(Signal::Return(self.mksubs(var, q, pos, 1)?))
            }
            Desc::List(b) => {
                let n = self.list_size(b)?;
                if n == 0 {
                    return Ok(Signal::Fail);
                }
                let i = self.random_index(n as i64) as u32;
                match self.list_elem_var(b, i)? {
                    Some(loc) => Ok(Signal::Return(Desc::Var(loc))),
                    None => Ok(Signal::Fail),
                }
            }
            Desc::Record(b) => {
                let n = self.size_of(v)?;
                if n == 0 {
                    return Ok(Signal::Fail);
                }
                let i = self.random_index(n) as u32 - 1;
                Ok(Signal::Return(Desc::Var(Loc::Block { block: b, index: i })))
            }
            Desc::Table(b) | Desc::Set(b) => {
                let elems = self.hash_elems(b)?;
                if elems.is_empty() {
                    return Ok(Signal::Fail);
                }
                let i = self.random_index(elems.len() as i64) as usize - 1;
                let elem = elems[i];
                Ok(Signal::Return(if matches!(v, Desc::Table(_)) {
                    Desc::Var(Loc::Block {
                        block: elem,
                        index: 0,
                    })
                } else {
                    self.elem_key_value(elem)?.0
                }))
            }
            Desc::Cset(_) => {
                let chars = self.cvstr(v).unwrap_or_default();
                if chars.is_empty() {
                    return Ok(Signal::Fail);
                }
                let i = self.random_index(chars.len() as i64) as usize - 1;
                Ok(Signal::Return(self.mkstr(&chars[i..=i])?))
            }
            other => match self.cvint(other) {
                Some(n) if n < 0 => runerr(205, other),
                Some(0) => Ok(Signal::Return(Desc::Real(self.next_random()))),
                Some(n) => Ok(Signal::Return(Desc::Int(self.random_index(n)))),
                None => runerr(113, other),
            },
        }
    }

    fn bang(&mut self, cargp: u32) -> Result<Signal, Fault> {
        let var = self.desc(cargp + 1)?;
        let v = self.deref(var)?;
        let state = match v {
            Desc::Str(_) => GenState::BangStr {
                var: if var.is_var() { var } else { Desc::Null },
                s: v,
                pos: 1,
            },
            Desc::List(b) => {
                let n = self.list_size(b)?;
                let mut slots = Vec::with_capacity(n as usize);
                for i in 1..=n {
                    if let Some(loc) = self.list_elem_var(b, i)? {
                        slots.push(loc);
                    }
                }
                GenState::BangSlots { slots, pos: 0 }
            }
            Desc::Record(b) => {
                let n = self.size_of(v)? as u32;
                let slots = (0..n).map(|index| Loc::Block { block: b, index }).collect();
                GenState::BangSlots { slots, pos: 0 }
            }
            Desc::Table(b) => {
                let slots = self
                    .hash_elems(b)?
                    .into_iter()
                    .map(|block| Loc::Block { block, index: 0 })
                    .collect();
                GenState::BangSlots { slots, pos: 0 }
            }
            Desc::Set(b) => {
                let values = self
                    .hash_elems(b)?
                    .into_iter()
                    .map(|e| self.elem_key_value(e).map(|(k, _)| k))
                    .collect::<Result<Vec<_>, _>>()?;
                GenState::Values { values, pos: 0 }
            }
            Desc::File(f) => {
                self.readable_stream(f)?;
                GenState::Lines { file: f }
            }
            Desc::Int(_) | Desc::Real(_) | Desc::Cset(_) => match self.tostr(v)? {
                Some(s) => GenState::BangStr {
                    var: Desc::Null,
                    s,
                    pos: 1,
                },
                None => return runerr(116, v),
            },
            other => return runerr(116, other),
        };
        state.resume(self, cargp)
    }

    fn lconcat(&mut self, cargp: u32) -> Result<Signal, Fault> {
        let (a, b) = (self.desc(cargp + 1)?, self.desc(cargp + 2)?);
        let (Desc::List(x), Desc::List(y)) = (a, b) else {
            let bad = if matches!(a, Desc::List(_)) { b } else { a };
            return runerr(108, bad);
        };
        let n = (self.list_size(x)? + self.list_size(y)?) as usize;
        self.reserve(list_need(n))?;
        let (Desc::List(x), Desc::List(y)) = (self.desc(cargp + 1)?, self.desc(cargp + 2)?) else {
            return syserr("operand changed type");
        };
        let mut values = self.list_values(x);
        values.extend(self.list_values(y));
        Ok(Signal::Return(Desc::List(self.alc_list(&values)?)))
    }

    /// `--`, `**` and `++` on csets, or on sets when the left operand is a set.
    fn set_op(&mut self, op: Operator, cargp: u32) -> Result<Signal, Fault> {
        let (a, b) = (self.desc(cargp + 1)?, self.desc(cargp + 2)?);
        if let Desc::Set(x) = a {
            let Desc::Set(y) = b else {
                return runerr(119, b);
            };
            let n = (self.hash_size(x)? + self.hash_size(y)?) as usize;
            self.reserve(Need::blocks(HASH_SIZE + n * ELEM_SIZE))?;
            let (Desc::Set(x), Desc::Set(y)) = (self.desc(cargp + 1)?, self.desc(cargp + 2)?)
            else {
                return syserr("operand changed type");
            };
            let members = |vm: &Vm, s: iconx_gc::BlockRef| -> Result<Vec<Desc>, Fault> {
                vm.hash_elems(s)?
                    .into_iter()
                    .map(|e| vm.elem_key_value(e).map(|(k, _)| k))
                    .collect()
            };
            let (xs, ys) = (members(self, x)?, members(self, y)?);
            let result = self.alc_set()?;
            let add = |vm: &mut Vm, k: Desc| -> Result<(), Fault> {
                let h = vm.hash(k);
                vm.hash_insert(result, k, Desc::Null, h)?;
                Ok(())
            };
            for k in xs {
                let h = self.hash(k);
                let in_y = self.hash_lookup(y, k, h)?.is_some();
                let keep = match op {
                    Operator::Diff => !in_y,
                    Operator::Inter => in_y,
                    _ => true,
                };
                if keep {
                    add(self, k)?;
                }
            }
            if op == Operator::Unions {
                for k in ys {
                    add(self, k)?;
                }
            }
            return Ok(Signal::Return(Desc::Set(result)));
        }
        if let Desc::Set(_) = b {
            return runerr(119, a);
        }
        let (x, y) = (self.cset_arg(a)?, self.cset_arg(b)?);
        let mut out = CsetBits::default();
        for ((o, x), y) in out.0.iter_mut().zip(x.0).zip(y.0) {
            *o = match op {
                Operator::Diff => x & !y,
                Operator::Inter => x & y,
                _ => x | y,
            };
        }
        Ok(Signal::Return(self.mkcset(out)?))
    }

    /// `v1 :=: v2`. Returns the old values, or `None` when an assignment failed.
    fn swap(&mut self, cargp: u32) -> Result<Option<(Desc, Desc)>, Fault> {
        let (var1, var2) = (self.desc(cargp + 1)?, self.desc(cargp + 2)?);
        let (v1, v2) = (self.deref(var1)?, self.deref(var2)?);
        let first = self.assign_need(var1, v2)?;
        let second = self.assign_need(var2, v1)?;
        let mut keep = [v1, v2];
        self.reserve_with(
            Need {
                blocks: first.blocks + second.blocks,
                strings: first.strings + second.strings,
                statics: 0,
            },
            &mut keep,
        )?;
        let [v1, v2] = keep;
        let (var1, var2) = (self.desc(cargp + 1)?, self.desc(cargp + 2)?);
        if self.assign(var1, v2)? && self.assign(var2, v1)? {
            Ok(Some((v1, v2)))
        } else {
            Ok(None)
        }
    }

    /// The string value of a subscripted operand and the variable it came from; `Null` stands
    /// for "not a variable" when the value had to be converted.
    fn string_operand(&mut self, cargp: u32, v: Desc) -> Result<Option<(Desc, Desc)>, Fault> {
        let var = self.desc(cargp + 1)?;
        if let Desc::Str(_) = v {
            return Ok(Some((if var.is_var() { var } else { Desc::Null }, v)));
        }
        Ok(self.tostr(v)?.map(|s| (Desc::Null, s)))
    }

    fn subscript(&mut self, cargp: u32) -> Result<Signal, Fault> {
        let v = self.deref(self.desc(cargp + 1)?)?;
        let key = self.desc(cargp + 2)?;
        match v {
            Desc::List(b) => {
                let n = self.list_size(b)? as i64;
                let mut i = self.int_arg(key)?;
                if i <= 0 {
                    i += n + 1;
                }
                if i < 1 || i > n {
                    return Ok(Signal::Fail);
                }
                Ok(match self.list_elem_var(b, i as u32)? {
                    Some(loc) => Signal::Return(Desc::Var(loc)),
                    None => Signal::Fail,
                })
            }
            Desc::Table(_) => {
                self.set(cargp + 1, v)?;
                Ok(Signal::Return(self.table_var(cargp, 1, 2)?))
            }
            Desc::Record(b) => {
                let n = self.size_of(v)?;
                let mut i = self.int_arg(key)?;
                if i <= 0 {
                    i += n + 1;
                }
                if i < 1 || i > n {
                    return Ok(Signal::Fail);
                }
                Ok(Signal::Return(Desc::Var(Loc::Block {
                    block: b,
                    index: i as u32 - 1,
                })))
            }
            Desc::Set(_) | Desc::File(_) | Desc::Proc(_) | Desc::Coexpr(_) | Desc::Null => {
                runerr(114, v)
            }
            _ => {
                let i = self.int_arg(key)?;
                let Some((var, s)) = self.string_operand(cargp, v)? else {
                    return runerr(114, v);
                };
                let Desc::Str(q) = s else {
                    return syserr("string conversion produced a non-string");
                };
                let len = q.len() as i64;
                match cvpos(i, len) {
                    Some(pos) if pos <= len => Ok(Signal::Return(self.mksubs(var, q, pos, 1)?)),
                    _ => Ok(Signal::Fail),
                }
            }
        }
    }

    fn section(&mut self, cargp: u32) -> Result<Signal, Fault> {
        let v = self.deref(self.desc(cargp + 1)?)?;
        let i = self.int_arg(self.desc(cargp + 2)?)?;
        let j = self.int_arg(self.desc(cargp + 3)?)?;
        match v {
            Desc::List(b) => {
                let n = self.list_size(b)? as i64;
                let (Some(i), Some(j)) = (cvpos(i, n), cvpos(j, n)) else {
                    return Ok(Signal::Fail);
                };
                let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
                self.reserve(list_need((hi - lo) as usize))?;
                let Desc::List(b) = self.deref(self.desc(cargp + 1)?)? else {
                    return syserr("operand changed type");
                };
                let values = self.list_values(b);
                let slice = &values[(lo - 1) as usize..(hi - 1) as usize];
                Ok(Signal::Return(Desc::List(self.alc_list(slice)?)))
            }
            _ => {
                let Some((var, s)) = self.string_operand(cargp, v)? else {
                    return runerr(110, v);
                };
                let Desc::Str(q) = s else {
                    return syserr("string conversion produced a non-string");
                };
                let len = q.len() as i64;
                let (Some(i), Some(j)) = (cvpos(i, len), cvpos(j, len)) else {
                    return Ok(Signal::Fail);
                };
                let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
                Ok(Signal::Return(self.mksubs(var, q, lo, hi - lo)?))
            }
        }
    }
}

/// Whether `ord` satisfies the comparison operator `op`.
fn holds(op: Operator, ord: Ordering) -> bool {
    use Operator::*;
    match op {
        Lexeq | Numeq => ord == Ordering::Equal,
        Lexne | Numne => ord != Ordering::Equal,
        Lexlt | Numlt => ord == Ordering::Less,
        Lexle | Numle => ord != Ordering::Greater,
        Lexgt | Numgt => ord == Ordering::Greater,
        _ => ord != Ordering::Less,
    }
}

fn int_power(x: i64, y: i64, a: Desc) -> Result<Desc, Fault> {
    if y < 0 {
        return match x {
            0 => runerr(204, a),
            1 => Ok(Desc::Int(1)),
            -1 => Ok(Desc::Int(if y % 2 == 0 { 1 } else { -1 })),
            _ => Ok(Desc::Int(0)),
        };
    }
    match u32::try_from(y).ok().and_then(|y| x.checked_pow(y)) {
        Some(r) => Ok(Desc::Int(r)),
        None if x == 0 || x == 1 => Ok(Desc::Int(x)),
        None if x == -1 => Ok(Desc::Int(if y % 2 == 0 { 1 } else { -1 })),
        None => runerr(203, a),
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

    fn code(r: Result<Desc, Fault>) -> u32 {
        match r {
            Err(Fault::Runtime { code, .. }) => code,
            other => panic!("expected a run-time error, got {other:?}"),
        }
    }

    #[test]
    fn integer_arithmetic_reports_overflow_and_zero_divisors() {
        let vm = vm();
        let (a, b) = (Desc::Int(i64::MAX), Desc::Int(1));
        assert_eq!(code(vm.arith(Operator::Plus, a, b)), 203);
        assert_eq!(code(vm.arith(Operator::Div, b, Desc::Int(0))), 201);
        assert_eq!(code(vm.arith(Operator::Mod, b, Desc::Int(0))), 202);
        assert_eq!(vm.arith(Operator::Mod, Desc::Int(-7), Desc::Int(3)).unwrap(), Desc::Int(-1));
        assert_eq!(vm.arith(Operator::Div, Desc::Int(-7), Desc::Int(2)).unwrap(), Desc::Int(-3));
    }

    #[test]
    fn mixed_arithmetic_is_real() {
        let vm = vm();
        assert_eq!(
            vm.arith(Operator::Mult, Desc::Int(3), Desc::Real(0.5)).unwrap(),
            Desc::Real(1.5)
        );
        assert_eq!(code(vm.arith(Operator::Div, Desc::Real(1.0), Desc::Int(0))), 204);
        assert_eq!(code(vm.arith(Operator::Power, Desc::Real(-8.0), Desc::Real(0.5))), 206);
    }

    #[test]
    fn integer_powers() {
        assert_eq!(int_power(2, 10, Desc::Null).unwrap(), Desc::Int(1024));
        assert_eq!(int_power(2, -1, Desc::Null).unwrap(), Desc::Int(0));
        assert_eq!(int_power(-1, -3, Desc::Null).unwrap(), Desc::Int(-1));
        assert_eq!(code(int_power(0, -1, Desc::Null)), 204);
        assert_eq!(code(int_power(10, 40, Desc::Null)), 203);
    }

    #[test]
    fn random_sequence_follows_the_seed() {
        let mut vm = vm();
        vm.k_random = 0;
        let first = vm.next_random();
        assert_eq!(vm.k_random, RAND_C & RAND_MASK);
        assert!((0.0..1.0).contains(&first));
        for _ in 0..100 {
            let i = vm.random_index(6);
            assert!((1..=6).contains(&i));
        }
    }

    #[test]
    fn comparisons_pick_the_right_relation() {
        assert!(holds(Operator::Numle, Ordering::Equal));
        assert!(!holds(Operator::Lexlt, Ordering::Equal));
        assert!(holds(Operator::Lexge, Ordering::Greater));
        assert!(holds(Operator::Numne, Ordering::Less));
    }
}
