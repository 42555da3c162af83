//! Variables: dereferencing, assignment, trapped variables and keywords.

use iconx_image::Keyword;

use super::*;
use crate::block::{ELEM_SIZE, SUBS_SIZE, SubsVar, TABLE_VAR_SIZE, TableVar};
use crate::convert::cvpos;
use crate::{Loc, Trapped, TrappedKeyword};

pub(crate) const VERSION: &str = "Icon Version 6.0 (iconx)";

impl Vm {
    /// The value of `d`; non-variables are returned unchanged.
    pub(crate) fn deref(&self, d: Desc) -> Result<Desc, Fault> {
        match d {
            Desc::Var(loc) => self.read_loc(loc),
            Desc::Kywd(k) => Ok(self.keyword_value(k)),
            Desc::Tv(Trapped::Subs(b)) => {
                let Block::Subs(s) = self.block(b)? else {
                    return syserr("substring variable without a substring block");
                };
                let (var, pos, len) = (s.var, s.pos, s.len);
                let whole = self.deref(var)?;
                let Desc::Str(q) = whole else {
                    return runerr(103, whole);
                };
                if pos < 1 || pos - 1 + len > q.len() as i64 {
                    return runerr_bare(205);
                }
                Ok(Desc::Str(q.slice((pos - 1) as u32, len as u32)))
            }
            Desc::Tv(Trapped::TableElem(b)) => {
                let Block::TableVar(tv) = self.block(b)? else {
                    return syserr("table element variable without its block");
                };
                let (table, key, hash) = (tv.table, tv.key, tv.hash);
                match self.hash_lookup(table, key, hash)? {
                    Some(elem) => Ok(self.elem_key_value(elem)?.1),
                    None => self.table_default(table),
                }
            }
            other => Ok(other),
        }
    }

    /// Dereferences a value about to leave a procedure if it refers to the procedure's stack.
    pub(crate) fn deref_if_local(&self, d: Desc) -> Result<Desc, Fault> {
        let local = match d {
            Desc::Var(Loc::Slot(_)) => true,
            Desc::Tv(Trapped::Subs(b)) => {
                matches!(self.block(b)?, Block::Subs(SubsVar { var: Desc::Var(Loc::Slot(_)), .. }))
            }
            _ => false,
        };
        if local { self.deref(d) } else { Ok(d) }
    }

    pub(crate) fn keyword_value(&self, k: TrappedKeyword) -> Desc {
        match k {
            TrappedKeyword::Pos => Desc::Int(self.k_pos),
            TrappedKeyword::Subject => self.k_subject,
            TrappedKeyword::Random => Desc::Int(self.k_random),
            TrappedKeyword::Trace => Desc::Int(self.k_trace),
        }
    }

    pub(crate) fn write_loc(&mut self, loc: Loc, value: Desc) -> Result<(), Fault> {
        let slot = match loc {
            Loc::Global(i) => self.globals.get_mut(i as usize),
            Loc::Static(i) => self.statics.get_mut(i as usize),
            Loc::Slot(i) => return self.set(i, value),
            Loc::Block { block, index } => {
                self.heap.get_mut(block).and_then(|b| b.slot_mut(index))
            }
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => syserr(format!("dangling variable {loc:?}")),
        }
    }

    /// Assigns the dereferenced `value` to `var`. Returns `false` when a keyword setter rejects
    /// the value, which makes the assignment fail.
    pub(crate) fn assign(&mut self, var: Desc, value: Desc) -> Result<bool, Fault> {
        let need = self.assign_need(var, value)?;
        let mut held = [var, value];
        self.reserve_with(need, &mut held)?;
        let [var, value] = held;
        self.assign_reserved(var, value)
    }

    pub(crate) fn assign_need(&self, var: Desc, value: Desc) -> Result<Need, Fault> {
        let mut need = Need::blocks(ELEM_SIZE);
        let value_len = match value {
            Desc::Str(q) => q.len() as usize,
            _ => self.cvstr(value).map_or(0, |s| s.len()),
        };
        let mut var = var;
        // Substring variables nest; each level may build a new string.
        while let Desc::Tv(Trapped::Subs(b)) = var {
            let Block::Subs(s) = self.block(b)? else { break };
            if let Desc::Str(q) = self.deref(s.var)? {
                need.strings += q.len() as usize + value_len;
            }
            var = s.var;
        }
        if let (Desc::Kywd(TrappedKeyword::Subject), false) = (var, matches!(value, Desc::Str(_))) {
            need.strings += value_len;
        }
        Ok(need)
    }

    fn assign_reserved(&mut self, var: Desc, value: Desc) -> Result<bool, Fault> {
        match var {
            Desc::Var(loc) => {
                self.write_loc(loc, value)?;
                Ok(true)
            }
            Desc::Kywd(k) => self.set_keyword(k, value),
            Desc::Tv(Trapped::Subs(b)) => {
                let Block::Subs(s) = self.block(b)? else {
                    return syserr("substring variable without a substring block");
                };
                let (ssvar, pos, len) = (s.var, s.pos, s.len);
                let Some(repl) = self.cvstr(value) else {
                    return runerr(103, value);
                };
                let whole = self.deref(ssvar)?;
                let Desc::Str(q) = whole else {
                    return runerr(103, whole);
                };
                if pos < 1 || pos - 1 + len > q.len() as i64 {
                    return runerr_bare(205);
                }
                let bytes = self.qual_bytes(q);
                let (head, tail) = ((pos - 1) as usize, (pos - 1 + len) as usize);
                let mut joined = Vec::with_capacity(bytes.len() - len as usize + repl.len());
                joined.extend_from_slice(&bytes[..head]);
                joined.extend_from_slice(&repl);
                joined.extend_from_slice(&bytes[tail..]);
                let joined = if joined.is_empty() {
                    Desc::Str(Qual::EMPTY)
                } else {
                    Desc::Str(Qual::Heap(self.heap.alloc_str(&joined)?))
                };
                if !self.assign_reserved(ssvar, joined)? {
                    return Ok(false);
                }
                if let Block::Subs(s) = self.block_mut(b)? {
                    s.len = repl.len() as i64;
                }
                Ok(true)
            }
            Desc::Tv(Trapped::TableElem(b)) => {
                let Block::TableVar(tv) = self.block(b)? else {
                    return syserr("table element variable without its block");
                };
                let (table, key, hash) = (tv.table, tv.key, tv.hash);
                self.hash_insert(table, key, value, hash)?;
                Ok(true)
            }
            other => runerr(111, other),
        }
    }

    fn set_keyword(&mut self, k: TrappedKeyword, value: Desc) -> Result<bool, Fault> {
        match k {
            TrappedKeyword::Pos => {
                let i = self.int_arg(value)?;
                let len = match self.k_subject {
                    Desc::Str(q) => q.len() as i64,
                    _ => 0,
                };
                match cvpos(i, len) {
                    Some(p) => {
                        self.k_pos = p;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            TrappedKeyword::Subject => {
                self.k_subject = match value {
                    Desc::Str(_) => value,
                    _ => match self.cvstr(value) {
                        Some(bytes) if bytes.is_empty() => Desc::Str(Qual::EMPTY),
                        Some(bytes) => Desc::Str(Qual::Heap(self.heap.alloc_str(&bytes)?)),
                        None => return runerr(103, value),
                    },
                };
                self.k_pos = 1;
                Ok(true)
            }
            TrappedKeyword::Random => {
                self.k_random = self.int_arg(value)?;
                Ok(true)
            }
            TrappedKeyword::Trace => {
                self.k_trace = self.int_arg(value)?;
                Ok(true)
            }
        }
    }

    /// Makes a substring of the string `val` (the value of `var`), trapped when `var` is a
    /// variable. `pos` is 1-based and the range is already checked.
    pub(crate) fn mksubs(&mut self, var: Desc, val: Qual, pos: i64, len: i64) -> Result<Desc, Fault> {
        if !var.is_var() {
            return Ok(Desc::Str(val.slice((pos - 1) as u32, len as u32)));
        }
        let mut held = [var];
        self.reserve_with(Need::blocks(SUBS_SIZE), &mut held)?;
        let [mut var] = held;
        let mut pos = pos;
        if let Desc::Tv(Trapped::Subs(b)) = var {
            if let Block::Subs(inner) = self.block(b)? {
                pos += inner.pos - 1;
                var = inner.var;
            }
        }
        let b = self.heap.alloc(Block::Subs(SubsVar { var, pos, len }))?;
        Ok(Desc::Tv(Trapped::Subs(b)))
    }

    /// A variable for `t[key]`: the element's value slot when it exists, otherwise a table
    /// element trapped variable.
    pub(crate) fn table_var(&mut self, cargp: u32, table_arg: u32, key_arg: u32) -> Result<Desc, Fault> {
        self.reserve(Need::blocks(TABLE_VAR_SIZE))?;
        let (Desc::Table(table), key) = (self.desc(cargp + table_arg)?, self.desc(cargp + key_arg)?) else {
            return syserr("table operand changed type");
        };
        let hash = self.hash(key);
        if let Some(elem) = self.hash_lookup(table, key, hash)? {
            return Ok(Desc::Var(Loc::Block {
                block: elem,
                index: 0,
            }));
        }
        let b = self.heap.alloc(Block::TableVar(TableVar { table, key, hash }))?;
        Ok(Desc::Tv(Trapped::TableElem(b)))
    }

    /// The value of a keyword, or `None` for `&fail`.
    pub(crate) fn keyword(&mut self, k: Keyword) -> Result<Option<Desc>, Fault> {
        Ok(Some(match k {
            Keyword::Null => Desc::Null,
            Keyword::Fail => return Ok(None),
            Keyword::Ascii => Desc::Cset(self.kcsets.ascii),
            Keyword::Cset => Desc::Cset(self.kcsets.cset),
            Keyword::Lcase => Desc::Cset(self.kcsets.lcase),
            Keyword::Ucase => Desc::Cset(self.kcsets.ucase),
            Keyword::Digits => Desc::Cset(self.kcsets.digits),
            Keyword::Letters => Desc::Cset(self.kcsets.letters),
            Keyword::Main => Desc::Coexpr(self.main),
            Keyword::Current => Desc::Coexpr(self.current),
            Keyword::Source => Desc::Coexpr(self.coexpr(self.current)?.activator.unwrap_or(self.main)),
            Keyword::Level => Desc::Int(self.k_level),
            Keyword::Line => Desc::Int(self.regs.line as i64),
            Keyword::File => {
                let file = self.current_file().as_bytes().to_vec();
                self.mkstr(&file)?
            }
            Keyword::Version => self.mkstr(VERSION.as_bytes())?,
            Keyword::Input => Desc::File(self.files.input),
            Keyword::Output => Desc::File(self.files.output),
            Keyword::Errout => Desc::File(self.files.errout),
            Keyword::Time => Desc::Int(self.elapsed_ms()),
            Keyword::Collections => Desc::Int(self.heap.stats().collections as i64),
            Keyword::Pos => Desc::Kywd(TrappedKeyword::Pos),
            Keyword::Subject => Desc::Kywd(TrappedKeyword::Subject),
            Keyword::Random => Desc::Kywd(TrappedKeyword::Random),
            Keyword::Trace => Desc::Kywd(TrappedKeyword::Trace),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm::new(Image::default(), VmConfig::default(), VmIo::null()).unwrap()
    }

    #[test]
    fn substring_assignment_splices_the_variable() {
        let mut vm = vm();
        vm.statics.push(Desc::Null);
        let var = Desc::Var(Loc::Static(0));
        let s = vm.mkstr(b"abcdef").unwrap();
        assert!(vm.assign(var, s).unwrap());

        let Desc::Str(q) = vm.deref(var).unwrap() else { panic!() };
        let sub = vm.mksubs(var, q, 2, 3).unwrap();
        assert_eq!(vm.outimage_string(sub), "\"abcdef\"[2+:3] = \"bcd\"");

        let x = vm.mkstr(b"XY").unwrap();
        assert!(vm.assign(sub, x).unwrap());
        let Desc::Str(q) = vm.deref(var).unwrap() else { panic!() };
        assert_eq!(vm.qual_bytes(q), b"aXYef");
        let Desc::Str(q) = vm.deref(sub).unwrap() else { panic!() };
        assert_eq!(vm.qual_bytes(q), b"XY");
    }

    #[test]
    fn pos_setter_rejects_out_of_range_positions() {
        let mut vm = vm();
        let s = vm.mkstr(b"abc").unwrap();
        assert!(vm.assign(Desc::Kywd(TrappedKeyword::Subject), s).unwrap());
        assert!(vm.assign(Desc::Kywd(TrappedKeyword::Pos), Desc::Int(0)).unwrap());
        assert_eq!(vm.k_pos, 4);
        assert!(!vm.assign(Desc::Kywd(TrappedKeyword::Pos), Desc::Int(5)).unwrap());
        assert_eq!(vm.k_pos, 4);
        assert!(vm.assign(Desc::Kywd(TrappedKeyword::Subject), Desc::Int(12)).unwrap());
        assert_eq!(vm.k_pos, 1);
        let Desc::Str(q) = vm.k_subject else { panic!() };
        assert_eq!(vm.qual_bytes(q), b"12");
    }

    #[test]
    fn table_variables_insert_on_assignment() {
        let mut vm = vm();
        let t = vm.alc_table(Desc::Int(0)).unwrap();
        vm.push(Desc::Null).unwrap();
        vm.push(Desc::Table(t)).unwrap();
        vm.push(Desc::Int(7)).unwrap();
        let var = vm.table_var(0, 1, 2).unwrap();
        assert!(matches!(var, Desc::Tv(Trapped::TableElem(_))));
        assert_eq!(vm.deref(var).unwrap(), Desc::Int(0));
        assert!(vm.assign(var, Desc::Int(70)).unwrap());
        assert_eq!(vm.deref(var).unwrap(), Desc::Int(70));
        assert_eq!(vm.hash_size(t).unwrap(), 1);

        let again = vm.table_var(0, 1, 2).unwrap();
        assert!(matches!(again, Desc::Var(Loc::Block { index: 0, .. })));
        assert_eq!(vm.deref(again).unwrap(), Desc::Int(70));
    }

    /// A descriptor of the given shape, stored through statics, keywords or a table as needed.
    fn shaped(vm: &mut Vm, shape: u8, n: i64, text: &[u8]) -> Desc {
        let s = vm.mkstr(text).unwrap();
        let stored = |vm: &mut Vm, value: Desc| {
            vm.statics.push(value);
            Desc::Var(Loc::Static(vm.statics.len() as u32 - 1))
        };
        match shape % 9 {
            0 => Desc::Null,
            1 => Desc::Int(n),
            2 => Desc::Real(n as f64 / 4.0),
            3 => s,
            4 => stored(vm, Desc::Int(n)),
            5 => stored(vm, s),
            6 => {
                let k = [
                    TrappedKeyword::Pos,
                    TrappedKeyword::Subject,
                    TrappedKeyword::Random,
                    TrappedKeyword::Trace,
                ];
                Desc::Kywd(k[n.rem_euclid(4) as usize])
            }
            7 => {
                let var = stored(vm, s);
                let Desc::Str(q) = s else { panic!() };
                vm.mksubs(var, q, 1, text.len() as i64).unwrap()
            }
            _ => {
                let t = vm.alc_table(Desc::Int(n)).unwrap();
                vm.push(Desc::Table(t)).unwrap();
                vm.push(Desc::Int(n)).unwrap();
                let base = vm.top_index().unwrap() - 1;
                vm.table_var(base, 0, 1).unwrap()
            }
        }
    }

    proptest::proptest! {
        #[test]
        fn dereferencing_twice_changes_nothing(
            shape in 0u8..9,
            n in -1000i64..1000,
            text in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..12),
        ) {
            let mut vm = vm();
            let d = shaped(&mut vm, shape, n, &text);
            let once = vm.deref(d).unwrap();
            proptest::prop_assert!(!once.is_var(), "{once:?}");
            proptest::prop_assert_eq!(vm.deref(once).unwrap(), once);
            proptest::prop_assert_eq!(vm.deref_if_local(once).unwrap(), once);
        }
    }
}
