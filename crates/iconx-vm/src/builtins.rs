//! The builtin function table.
//!
//! Every function receives its already dereferenced arguments above the result slot `cargp`.
//! Fixed-arity functions see exactly `arity` arguments (missing ones are `&null`); variadic
//! ones (`arity < 0`) see what the caller passed.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use iconx_gc::{BlockRef, Need};
use iconx_image::CsetBits;

use crate::block::{
    Block, ELEM_SIZE, FS_APPEND, FS_BUFFERED, FS_CREATE, FS_READ, FS_WRITE, FileBlock,
    HASH_SIZE, file_size,
};
use crate::convert::{Num, cvpos};
use crate::error::{Fault, runerr, runerr_bare, syserr};
use crate::generators::GenState;
use crate::structs::{elem_need, hash_need, list_grow_need, list_need};
use crate::vm::{Signal, Stream, Vm};
use crate::{Desc, ProcRef, Qual};

type BuiltinFn = fn(&mut Vm, u32, u32) -> Result<Signal, Fault>;

pub(crate) struct Function {
    pub(crate) name: &'static str,
    /// Number of arguments, or `-1` for a variadic function.
    pub(crate) arity: i32,
    pub(crate) func: BuiltinFn,
}

macro_rules! functions {
    ($($name:literal / $arity:literal => $func:ident),* $(,)?) => {
        &[$(Function { name: $name, arity: $arity, func: $func }),*]
    };
}

pub(crate) static FUNCTIONS: &[Function] = functions![
    "abs" / 1 => abs,
    "any" / 4 => any,
    "center" / 3 => center,
    "char" / 1 => char,
    "close" / 1 => close,
    "collect" / 0 => collect,
    "copy" / 1 => copy,
    "cset" / 1 => cset,
    "delete" / 2 => delete,
    "exit" / 1 => exit,
    "find" / 4 => find,
    "get" / 1 => get,
    "image" / 1 => image,
    "insert" / 3 => insert,
    "integer" / 1 => integer,
    "key" / 1 => key,
    "left" / 3 => left,
    "list" / 2 => list,
    "many" / 4 => many,
    "map" / 3 => map,
    "match" / 4 => match_prefix,
    "member" / 2 => member,
    "move" / 1 => move_pos,
    "numeric" / 1 => numeric,
    "open" / 2 => open,
    "ord" / 1 => ord,
    "pop" / 1 => pop,
    "pos" / 1 => pos,
    "proc" / 2 => proc,
    "pull" / 1 => pull,
    "push" / 2 => push,
    "put" / 2 => put,
    "read" / 1 => read,
    "reads" / 2 => reads,
    "real" / 1 => real,
    "repl" / 2 => repl,
    "reverse" / 1 => reverse,
    "right" / 3 => right,
    "seq" / 2 => seq,
    "set" / 1 => set,
    "sort" / 2 => sort,
    "stop" / -1 => stop,
    "string" / 1 => string,
    "tab" / 1 => tab,
    "table" / 1 => table,
    "trim" / 2 => trim,
    "type" / 1 => type_of,
    "upto" / 4 => upto,
    "write" / -1 => write,
    "writes" / -1 => writes,
];

fn arg(vm: &Vm, cargp: u32, i: u32) -> Result<Desc, Fault> {
    vm.desc(cargp + i)
}

/// An integer argument that defaults to `default` when null.
fn int_or(vm: &Vm, cargp: u32, i: u32, default: i64) -> Result<i64, Fault> {
    match arg(vm, cargp, i)? {
        Desc::Null => Ok(default),
        d => vm.int_arg(d),
    }
}

fn str_or(vm: &Vm, cargp: u32, i: u32, default: &[u8]) -> Result<Vec<u8>, Fault> {
    match arg(vm, cargp, i)? {
        Desc::Null => Ok(default.to_vec()),
        d => vm.str_arg(d),
    }
}

fn cset_or(vm: &Vm, cargp: u32, i: u32, default: CsetBits) -> Result<CsetBits, Fault> {
    match arg(vm, cargp, i)? {
        Desc::Null => Ok(default),
        d => vm.cset_arg(d),
    }
}

/// A list argument.
fn list_arg(vm: &Vm, cargp: u32, i: u32) -> Result<BlockRef, Fault> {
    match arg(vm, cargp, i)? {
        Desc::List(b) => Ok(b),
        other => runerr(108, other),
    }
}

fn done(d: Desc) -> Result<Signal, Fault> {
    Ok(Signal::Return(d))
}

fn fail() -> Result<Signal, Fault> {
    Ok(Signal::Fail)
}

impl Vm {
    pub(crate) fn k_subject_len(&self) -> i64 {
        match self.k_subject {
            Desc::Str(q) => q.len() as i64,
            _ => 0,
        }
    }

    fn file_block(&self, f: BlockRef) -> Result<&FileBlock, Fault> {
        match self.block(f)? {
            Block::File(fb) => Ok(fb),
            _ => runerr(105, Desc::File(f)),
        }
    }

    /// The stream of a file open for reading.
    pub(crate) fn readable_stream(&self, f: BlockRef) -> Result<usize, Fault> {
        let fb = self.file_block(f)?;
        if fb.status & FS_READ == 0 {
            return runerr(212, Desc::File(f));
        }
        Ok(fb.stream as usize)
    }

    fn writable_stream(&self, f: BlockRef) -> Result<usize, Fault> {
        let fb = self.file_block(f)?;
        if fb.status & FS_WRITE == 0 {
            return runerr(213, Desc::File(f));
        }
        Ok(fb.stream as usize)
    }

    /// Reads one line without its terminating newline; `None` at end of file.
    pub(crate) fn read_line(&mut self, f: BlockRef) -> Result<Option<Vec<u8>>, Fault> {
        let idx = self.readable_stream(f)?;
        let mut line = Vec::new();
        let read = match self.streams.get_mut(idx) {
            Some(Stream::Reader(r)) => r.read_until(b'\n', &mut line),
            Some(Stream::Duplex(r)) => r.read_until(b'\n', &mut line),
            _ => return runerr(212, Desc::File(f)),
        };
        match read {
            Ok(0) => Ok(None),
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Err(err) => {
                log::warn!("read failed: {err}");
                Ok(None)
            }
        }
    }

    fn read_bytes(&mut self, f: BlockRef, n: usize) -> Result<Vec<u8>, Fault> {
        let idx = self.readable_stream(f)?;
        let mut buf = Vec::with_capacity(n);
        let read = match self.streams.get_mut(idx) {
            Some(Stream::Reader(r)) => r.take(n as u64).read_to_end(&mut buf),
            Some(Stream::Duplex(r)) => r.take(n as u64).read_to_end(&mut buf),
            _ => return runerr(212, Desc::File(f)),
        };
        if let Err(err) = read {
            log::warn!("read failed: {err}");
        }
        Ok(buf)
    }

    fn put_bytes(&mut self, f: BlockRef, bytes: &[u8], flush: bool) -> Result<(), Fault> {
        let idx = self.writable_stream(f)?;
        let written = match self.streams.get_mut(idx) {
            Some(Stream::Writer(w)) => w
                .write_all(bytes)
                .and_then(|()| if flush { w.flush() } else { Ok(()) }),
            Some(Stream::Duplex(d)) => d.get_mut().write_all(bytes),
            _ => return runerr(213, Desc::File(f)),
        };
        if let Err(err) = written {
            log::warn!("write failed: {err}");
        }
        Ok(())
    }

    /// The bytes of the scanning subject.
    fn subject_bytes(&self) -> Vec<u8> {
        match self.k_subject {
            Desc::Str(q) => self.qual_bytes(q).to_vec(),
            _ => Vec::new(),
        }
    }

    /// The string, bounds and 0-based `[lo, hi)` range named by the `s, i, j` arguments of a
    /// scanning function starting at argument `s_at`; `None` when a bound is out of range.
    fn scan_range(&self, cargp: u32, s_at: u32) -> Result<Option<(Vec<u8>, usize, usize)>, Fault> {
        let (hay, default_i) = match arg(self, cargp, s_at)? {
            Desc::Null => (self.subject_bytes(), self.k_pos),
            s => (self.str_arg(s)?, 1),
        };
        let i = int_or(self, cargp, s_at + 1, default_i)?;
        let j = int_or(self, cargp, s_at + 2, 0)?;
        let len = hay.len() as i64;
        let (Some(i), Some(j)) = (cvpos(i, len), cvpos(j, len)) else {
            return Ok(None);
        };
        let (lo, hi) = if i <= j { (i, j) } else { (j, i) };
        Ok(Some((hay, lo as usize - 1, hi as usize - 1)))
    }

    fn new_stream(&mut self, stream: Stream) -> u32 {
        let free = self
            .streams
            .iter()
            .skip(3)
            .position(|s| matches!(s, Stream::Closed));
        match free {
            Some(i) => {
                self.streams[i + 3] = stream;
                (i + 3) as u32
            }
            None => {
                self.streams.push(stream);
                (self.streams.len() - 1) as u32
            }
        }
    }
}

fn abs(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    done(match vm.num_arg(a)? {
        Num::Int(i) => match i.checked_abs() {
            Some(n) => Desc::Int(n),
            None => return runerr(203, a),
        },
        Num::Real(r) => Desc::Real(r.abs()),
    })
}

fn any(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let c = vm.cset_arg(arg(vm, cargp, 1)?)?;
    match vm.scan_range(cargp, 2)? {
        Some((hay, lo, hi)) if lo < hi && c.contains(hay[lo]) => done(Desc::Int(lo as i64 + 2)),
        _ => fail(),
    }
}

fn many(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let c = vm.cset_arg(arg(vm, cargp, 1)?)?;
    let Some((hay, lo, hi)) = vm.scan_range(cargp, 2)? else {
        return fail();
    };
    let run = hay[lo..hi].iter().take_while(|&&b| c.contains(b)).count();
    if run == 0 {
        return fail();
    }
    done(Desc::Int((lo + run) as i64 + 1))
}

fn match_prefix(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let prefix = vm.str_arg(arg(vm, cargp, 1)?)?;
    match vm.scan_range(cargp, 2)? {
        Some((hay, lo, hi)) if hay[lo..hi].starts_with(&prefix) => {
            done(Desc::Int((lo + prefix.len()) as i64 + 1))
        }
        _ => fail(),
    }
}

fn find(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let needle = vm.str_arg(arg(vm, cargp, 1)?)?;
    let Some((hay, pos, end)) = vm.scan_range(cargp, 2)? else {
        return fail();
    };
    GenState::Find {
        needle,
        hay,
        pos,
        end,
    }
    .resume(vm, cargp)
}

fn upto(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let cset = vm.cset_arg(arg(vm, cargp, 1)?)?;
    let Some((hay, pos, end)) = vm.scan_range(cargp, 2)? else {
        return fail();
    };
    GenState::Upto {
        cset,
        hay,
        pos,
        end,
    }
    .resume(vm, cargp)
}

fn pos(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let i = vm.int_arg(arg(vm, cargp, 1)?)?;
    match cvpos(i, vm.k_subject_len()) {
        Some(p) if p == vm.k_pos => done(Desc::Int(p)),
        _ => fail(),
    }
}

/// Sets `&pos` to `new` and suspends the part of `&subject` passed over.
fn move_to(vm: &mut Vm, new: i64) -> Result<Signal, Fault> {
    let old = vm.k_pos;
    vm.k_pos = new;
    let (lo, hi) = if old <= new { (old, new) } else { (new, old) };
    let Desc::Str(q) = vm.k_subject else {
        return syserr("&subject is not a string");
    };
    let spanned = Desc::Str(q.slice((lo - 1) as u32, (hi - lo) as u32));
    Ok(Signal::Suspend(spanned, GenState::RestorePos { old }))
}

fn move_pos(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let by = vm.int_arg(arg(vm, cargp, 1)?)?;
    let new = vm.k_pos.saturating_add(by);
    if new <= 0 || new > vm.k_subject_len() + 1 {
        return fail();
    }
    move_to(vm, new)
}

fn tab(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let i = vm.int_arg(arg(vm, cargp, 1)?)?;
    match cvpos(i, vm.k_subject_len()) {
        Some(new) => move_to(vm, new),
        None => fail(),
    }
}

/// `n` bytes of `pad` repeated so that the copies line up with the right end.
fn fill_from_right(n: usize, pad: &[u8]) -> Vec<u8> {
    (0..n).map(|k| pad[(pad.len() - 1) - ((n - 1 - k) % pad.len())]).collect()
}

/// `n` bytes of `pad` repeated from the left end.
fn fill_from_left(n: usize, pad: &[u8]) -> Vec<u8> {
    (0..n).map(|k| pad[k % pad.len()]).collect()
}

fn padding_args(vm: &Vm, cargp: u32) -> Result<(Vec<u8>, usize, Vec<u8>), Fault> {
    let s = vm.str_arg(arg(vm, cargp, 1)?)?;
    let n = int_or(vm, cargp, 2, 1)?;
    if n < 0 {
        return runerr(205, Desc::Int(n));
    }
    let mut pad = str_or(vm, cargp, 3, b" ")?;
    if pad.is_empty() {
        pad.push(b' ');
    }
    let n = vm.string_len_fits(usize::try_from(n).ok())?;
    Ok((s, n, pad))
}

fn left_bytes(s: &[u8], n: usize, pad: &[u8]) -> Vec<u8> {
    let mut out = fill_from_right(n, pad);
    let m = s.len().min(n);
    out[..m].copy_from_slice(&s[..m]);
    out
}

fn right_bytes(s: &[u8], n: usize, pad: &[u8]) -> Vec<u8> {
    let mut out = fill_from_left(n, pad);
    let m = s.len().min(n);
    out[n - m..].copy_from_slice(&s[s.len() - m..]);
    out
}

fn center_bytes(s: &[u8], n: usize, pad: &[u8]) -> Vec<u8> {
    let half = n / 2;
    let mut out = fill_from_left(half, pad);
    out.extend(fill_from_right(n - half, pad));
    let odd = (!n & s.len() & 1) as usize;
    if n < s.len() {
        let from = s.len() / 2 - half + odd;
        out.copy_from_slice(&s[from..from + n]);
    } else {
        let at = half - s.len() / 2 - odd;
        out[at..at + s.len()].copy_from_slice(s);
    }
    out
}

fn left(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let (s, n, pad) = padding_args(vm, cargp)?;
    done(vm.mkstr(&left_bytes(&s, n, &pad))?)
}

fn right(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let (s, n, pad) = padding_args(vm, cargp)?;
    done(vm.mkstr(&right_bytes(&s, n, &pad))?)
}

fn center(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let (s, n, pad) = padding_args(vm, cargp)?;
    done(vm.mkstr(&center_bytes(&s, n, &pad))?)
}

fn map_bytes(s: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut table: [u8; 256] = std::array::from_fn(|i| i as u8);
    for (&f, &t) in from.iter().zip(to) {
        table[f as usize] = t;
    }
    s.iter().map(|&b| table[b as usize]).collect()
}

fn map(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let s = vm.str_arg(arg(vm, cargp, 1)?)?;
    let ucase = vm.cvstr(Desc::Cset(vm.kcsets.ucase)).unwrap_or_default();
    let lcase = vm.cvstr(Desc::Cset(vm.kcsets.lcase)).unwrap_or_default();
    let from = str_or(vm, cargp, 2, &ucase)?;
    let to = str_or(vm, cargp, 3, &lcase)?;
    if from.len() != to.len() {
        return runerr_bare(208);
    }
    done(vm.mkstr(&map_bytes(&s, &from, &to))?)
}

fn repl(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let s = vm.str_arg(arg(vm, cargp, 1)?)?;
    let n = vm.int_arg(arg(vm, cargp, 2)?)?;
    if n < 0 {
        return runerr(205, Desc::Int(n));
    }
    let total = usize::try_from(n)
        .ok()
        .and_then(|n| s.len().checked_mul(n));
    vm.string_len_fits(total)?;
    done(vm.mkstr(&s.repeat(n as usize))?)
}

fn reverse(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let mut s = vm.str_arg(arg(vm, cargp, 1)?)?;
    s.reverse();
    done(vm.mkstr(&s)?)
}

fn trim(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    let c = cset_or(vm, cargp, 2, CsetBits::from_bytes(b" "))?;
    let s = vm.str_arg(a)?;
    let keep = s.len() - s.iter().rev().take_while(|&&b| c.contains(b)).count();
    match a {
        Desc::Str(q) => done(Desc::Str(q.slice(0, keep as u32))),
        _ => done(vm.mkstr(&s[..keep])?),
    }
}

fn char(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let i = vm.int_arg(arg(vm, cargp, 1)?)?;
    match u8::try_from(i) {
        Ok(b) => done(vm.mkstr(&[b])?),
        Err(_) => runerr(205, Desc::Int(i)),
    }
}

fn ord(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    match vm.str_arg(a)?.as_slice() {
        [b] => done(Desc::Int(*b as i64)),
        _ => runerr(205, a),
    }
}

fn image(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let s = vm.image_value(arg(vm, cargp, 1)?);
    done(vm.mkstr(s.as_bytes())?)
}

fn type_of(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    let name = match a {
        Desc::Record(b) => match vm.block(b)? {
            Block::Record(r) => vm.proc_name(ProcRef::Record(r.decl)).to_string(),
            _ => return syserr("record descriptor without a record block"),
        },
        other => other.type_name().to_string(),
    };
    done(vm.mkstr(name.as_bytes())?)
}

fn copy(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    done(vm.copy_value(cargp)?)
}

fn string(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    match vm.tostr(arg(vm, cargp, 1)?)? {
        Some(s) => done(s),
        None => fail(),
    }
}

fn integer(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    match vm.cvint(arg(vm, cargp, 1)?) {
        Some(i) => done(Desc::Int(i)),
        None => fail(),
    }
}

fn real(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    match vm.cvreal(arg(vm, cargp, 1)?) {
        Some(r) => done(Desc::Real(r)),
        None => fail(),
    }
}

fn numeric(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    match vm.cvnum(arg(vm, cargp, 1)?) {
        Some(n) => done(n.into_desc()),
        None => fail(),
    }
}

fn cset(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    if let Desc::Cset(_) = a {
        return done(a);
    }
    match vm.cvcset(a) {
        Some(bits) => done(vm.mkcset(bits)?),
        None => fail(),
    }
}

fn list(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let n = int_or(vm, cargp, 1, 0)?;
    if n < 0 {
        return runerr(205, Desc::Int(n));
    }
    vm.reserve(list_need(n as usize))?;
    let init = arg(vm, cargp, 2)?;
    let values = vec![init; n as usize];
    done(Desc::List(vm.alc_list(&values)?))
}

fn table(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    vm.reserve(hash_need())?;
    let default = arg(vm, cargp, 1)?;
    done(Desc::Table(vm.alc_table(default)?))
}

fn set(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let n = match arg(vm, cargp, 1)? {
        Desc::Null => 0,
        Desc::List(b) => vm.list_size(b)? as usize,
        other => return runerr(108, other),
    };
    vm.reserve(Need::blocks(HASH_SIZE + n * ELEM_SIZE))?;
    let members = match arg(vm, cargp, 1)? {
        Desc::List(b) => vm.list_values(b),
        _ => Vec::new(),
    };
    let s = vm.alc_set()?;
    for m in members {
        let h = vm.hash(m);
        vm.hash_insert(s, m, Desc::Null, h)?;
    }
    done(Desc::Set(s))
}

/// The table or set argument of `insert`, `delete` and `member`.
fn hashed_arg(vm: &Vm, cargp: u32) -> Result<BlockRef, Fault> {
    match arg(vm, cargp, 1)? {
        Desc::Table(b) | Desc::Set(b) => Ok(b),
        other => runerr(119, other),
    }
}

fn insert(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    hashed_arg(vm, cargp)?;
    vm.reserve(elem_need())?;
    let h = hashed_arg(vm, cargp)?;
    let key = arg(vm, cargp, 2)?;
    let value = match arg(vm, cargp, 1)? {
        Desc::Table(_) => arg(vm, cargp, 3)?,
        _ => Desc::Null,
    };
    let hash = vm.hash(key);
    vm.hash_insert(h, key, value, hash)?;
    done(arg(vm, cargp, 1)?)
}

fn delete(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let h = hashed_arg(vm, cargp)?;
    let key = arg(vm, cargp, 2)?;
    let hash = vm.hash(key);
    vm.hash_delete(h, key, hash)?;
    done(arg(vm, cargp, 1)?)
}

fn member(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let h = hashed_arg(vm, cargp)?;
    let key = arg(vm, cargp, 2)?;
    let hash = vm.hash(key);
    match vm.hash_lookup(h, key, hash)? {
        Some(_) => done(key),
        None => fail(),
    }
}

fn key(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let Desc::Table(t) = arg(vm, cargp, 1)? else {
        return runerr(115, arg(vm, cargp, 1)?);
    };
    let values = vm
        .hash_elems(t)?
        .into_iter()
        .map(|e| vm.elem_key_value(e).map(|(k, _)| k))
        .collect::<Result<Vec<_>, _>>()?;
    GenState::Values { values, pos: 0 }.resume(vm, cargp)
}

/// Adds one value to an end of the list argument.
fn grow_list(vm: &mut Vm, cargp: u32, front: bool) -> Result<Signal, Fault> {
    let list = list_arg(vm, cargp, 1)?;
    let size = vm.list_size(list)?;
    vm.reserve(list_grow_need(size))?;
    let list = list_arg(vm, cargp, 1)?;
    let v = arg(vm, cargp, 2)?;
    if front {
        vm.list_push(list, v)?;
    } else {
        vm.list_put(list, v)?;
    }
    done(Desc::List(list))
}

fn push(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    grow_list(vm, cargp, true)
}

fn put(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    grow_list(vm, cargp, false)
}

fn pop(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let list = list_arg(vm, cargp, 1)?;
    match vm.list_get(list)? {
        Some(v) => done(v),
        None => fail(),
    }
}

fn get(vm: &mut Vm, cargp: u32, nargs: u32) -> Result<Signal, Fault> {
    pop(vm, cargp, nargs)
}

fn pull(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let list = list_arg(vm, cargp, 1)?;
    match vm.list_pull(list)? {
        Some(v) => done(v),
        None => fail(),
    }
}

fn sort(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    match arg(vm, cargp, 1)? {
        Desc::List(b) => {
            let n = vm.list_size(b)? as usize;
            vm.reserve(list_need(n))?;
            let mut values = vm.list_values(list_arg(vm, cargp, 1)?);
            values.sort_by(|x, y| vm.anycmp(*x, *y));
            done(Desc::List(vm.alc_list(&values)?))
        }
        Desc::Set(b) => {
            let n = vm.hash_size(b)? as usize;
            vm.reserve(list_need(n))?;
            let Desc::Set(b) = arg(vm, cargp, 1)? else {
                return syserr("argument changed type");
            };
            let mut values = vm
                .hash_elems(b)?
                .into_iter()
                .map(|e| vm.elem_key_value(e).map(|(k, _)| k))
                .collect::<Result<Vec<_>, _>>()?;
            values.sort_by(|x, y| vm.anycmp(*x, *y));
            done(Desc::List(vm.alc_list(&values)?))
        }
        Desc::Table(b) => {
            let how = int_or(vm, cargp, 2, 1)?;
            if !(1..=4).contains(&how) {
                return runerr(205, Desc::Int(how));
            }
            let n = vm.hash_size(b)? as usize;
            let need = if how <= 2 {
                list_need(n).blocks + n * list_need(2).blocks
            } else {
                list_need(2 * n).blocks
            };
            vm.reserve(Need::blocks(need))?;
            let Desc::Table(b) = arg(vm, cargp, 1)? else {
                return syserr("argument changed type");
            };
            let mut pairs = vm
                .hash_elems(b)?
                .into_iter()
                .map(|e| vm.elem_key_value(e))
                .collect::<Result<Vec<_>, _>>()?;
            if how % 2 == 1 {
                pairs.sort_by(|x, y| vm.anycmp(x.0, y.0));
            } else {
                pairs.sort_by(|x, y| vm.anycmp(x.1, y.1));
            }
            let values = if how <= 2 {
                pairs
                    .into_iter()
                    .map(|(k, v)| vm.alc_list(&[k, v]).map(Desc::List))
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                pairs.into_iter().flat_map(|(k, v)| [k, v]).collect()
            };
            done(Desc::List(vm.alc_list(&values)?))
        }
        other => runerr(115, other),
    }
}

fn proc(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    int_or(vm, cargp, 2, 1)?;
    if let Desc::Proc(_) = a {
        return done(a);
    }
    let Some(name) = vm.cvstr(a) else {
        return fail();
    };
    match vm.proc_named(&name) {
        Some(p) => done(Desc::Proc(p)),
        None => fail(),
    }
}

fn collect(vm: &mut Vm, _: u32, _: u32) -> Result<Signal, Fault> {
    vm.collect()?;
    done(Desc::Null)
}

fn seq(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let from = int_or(vm, cargp, 1, 1)?;
    let by = int_or(vm, cargp, 2, 1)?;
    if by == 0 {
        return runerr(211, Desc::Int(by));
    }
    GenState::Seq { next: from, by }.resume(vm, cargp)
}

fn open(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let name = vm.str_arg(arg(vm, cargp, 1)?)?;
    let mode = str_or(vm, cargp, 2, b"r")?;
    let mut status = 0;
    for c in &mode {
        status |= match c.to_ascii_lowercase() {
            b'a' => FS_WRITE | FS_APPEND,
            b'b' => FS_READ | FS_WRITE,
            b'c' => FS_CREATE | FS_WRITE,
            b'r' => FS_READ,
            b'w' => FS_WRITE,
            _ => return runerr(209, arg(vm, cargp, 2)?),
        };
    }
    if status & (FS_READ | FS_WRITE) == 0 {
        status |= FS_READ;
    }

    let path = String::from_utf8_lossy(&name).into_owned();
    let mut opts = OpenOptions::new();
    if status & FS_CREATE != 0 {
        opts.write(true).create(true).truncate(true);
    } else if status & FS_APPEND != 0 {
        opts.append(true).create(true);
    } else if status & FS_READ != 0 {
        opts.read(true);
    } else {
        opts.write(true).create(true).truncate(true);
    }
    let duplex = status & (FS_READ | FS_WRITE) == FS_READ | FS_WRITE;
    if duplex {
        opts.read(true).write(true);
    }
    let file = match opts.open(&path) {
        Ok(f) => f,
        Err(err) => {
            log::debug!("open({path:?}) failed: {err}");
            return fail();
        }
    };

    let stream = if duplex {
        Stream::Duplex(BufReader::new(file))
    } else if status & FS_READ != 0 {
        Stream::Reader(Box::new(BufReader::new(file)))
    } else if vm.buffered_streams < vm.config.io_buffers {
        vm.buffered_streams += 1;
        status |= FS_BUFFERED;
        Stream::Writer(Box::new(BufWriter::new(file)))
    } else {
        Stream::Writer(Box::new(file))
    };
    vm.reserve(Need::blocks(file_size(name.len())))?;
    let stream = vm.new_stream(stream);
    let f = vm.heap.alloc(Block::File(FileBlock {
        stream,
        status,
        name,
    }))?;
    log::debug!("opened {path:?} as stream {stream}");
    done(Desc::File(f))
}

fn close(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let a = arg(vm, cargp, 1)?;
    let Desc::File(f) = a else {
        return runerr(105, a);
    };
    let Block::File(fb) = vm.block_mut(f)? else {
        return runerr(105, a);
    };
    let (idx, status) = (fb.stream as usize, fb.status);
    fb.status = 0;
    if status & FS_BUFFERED != 0 {
        vm.buffered_streams = vm.buffered_streams.saturating_sub(1);
    }
    if status != 0 {
        if let Some(s) = vm.streams.get_mut(idx) {
            let flushed = match s {
                Stream::Writer(w) => w.flush(),
                Stream::Duplex(d) => d.get_mut().flush(),
                Stream::Reader(_) | Stream::Closed => Ok(()),
            };
            if let Err(err) = flushed {
                log::warn!("flush on close failed: {err}");
            }
            *s = Stream::Closed;
        }
    }
    done(a)
}

fn read(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let f = match arg(vm, cargp, 1)? {
        Desc::Null => vm.files.input,
        Desc::File(f) => f,
        other => return runerr(105, other),
    };
    match vm.read_line(f)? {
        Some(line) => done(vm.mkstr(&line)?),
        None => fail(),
    }
}

fn reads(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let f = match arg(vm, cargp, 1)? {
        Desc::Null => vm.files.input,
        Desc::File(f) => f,
        other => return runerr(105, other),
    };
    let n = int_or(vm, cargp, 2, 1)?;
    if n <= 0 {
        return runerr(205, Desc::Int(n));
    }
    let bytes = vm.read_bytes(f, n as usize)?;
    if bytes.is_empty() {
        return fail();
    }
    done(vm.mkstr(&bytes)?)
}

/// The text `write`, `writes` and `stop` output for a non-file argument.
fn output_text(vm: &Vm, d: Desc) -> Result<Vec<u8>, Fault> {
    match d {
        Desc::Null => Ok(Vec::new()),
        other => match vm.cvstr(other) {
            Some(s) => Ok(s),
            None => runerr(109, other),
        },
    }
}

/// Writes the arguments, switching files on file arguments; returns the last string written.
fn write_args(vm: &mut Vm, cargp: u32, nargs: u32, newline: bool) -> Result<Signal, Fault> {
    let mut file = vm.files.output;
    let mut last = Desc::Str(Qual::EMPTY);
    let mut converted: Option<Vec<u8>> = None;
    for n in 1..=nargs {
        let a = arg(vm, cargp, n)?;
        if let Desc::File(f) = a {
            if n > 1 && newline {
                vm.put_bytes(file, b"\n", true)?;
            }
            vm.writable_stream(f)?;
            file = f;
            last = Desc::Str(Qual::EMPTY);
            converted = None;
        } else {
            let text = output_text(vm, a)?;
            vm.put_bytes(file, &text, !newline)?;
            match a {
                Desc::Str(_) => {
                    last = a;
                    converted = None;
                }
                Desc::Null => {
                    last = Desc::Str(Qual::EMPTY);
                    converted = None;
                }
                _ => converted = Some(text),
            }
        }
    }
    if newline {
        vm.put_bytes(file, b"\n", true)?;
    }
    match converted {
        Some(text) => done(vm.mkstr(&text)?),
        None => done(last),
    }
}

fn write(vm: &mut Vm, cargp: u32, nargs: u32) -> Result<Signal, Fault> {
    write_args(vm, cargp, nargs, true)
}

fn writes(vm: &mut Vm, cargp: u32, nargs: u32) -> Result<Signal, Fault> {
    write_args(vm, cargp, nargs, false)
}

fn stop(vm: &mut Vm, cargp: u32, nargs: u32) -> Result<Signal, Fault> {
    let mut file = vm.files.errout;
    for n in 1..=nargs {
        let a = arg(vm, cargp, n)?;
        if let Desc::File(f) = a {
            if n > 1 {
                vm.put_bytes(file, b"\n", false)?;
            }
            vm.writable_stream(f)?;
            file = f;
        } else {
            let text = output_text(vm, a)?;
            vm.put_bytes(file, &text, false)?;
        }
    }
    vm.put_bytes(file, b"\n", true)?;
    vm.flush_streams();
    Err(Fault::Exit(1))
}

fn exit(vm: &mut Vm, cargp: u32, _: u32) -> Result<Signal, Fault> {
    let code = int_or(vm, cargp, 1, 0)?;
    match i32::try_from(code) {
        Ok(code) => Err(Fault::Exit(code)),
        Err(_) => runerr(205, Desc::Int(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_table_is_sorted_and_unique() {
        let names: Vec<_> = FUNCTIONS.iter().map(|f| f.name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn padding_lines_up_the_pad_string() {
        assert_eq!(left_bytes(b"abc", 7, b"12"), b"abc1212");
        assert_eq!(right_bytes(b"abc", 7, b"12"), b"1212abc");
        assert_eq!(right_bytes(b"abcdef", 3, b" "), b"def");
        assert_eq!(left_bytes(b"abcdef", 3, b" "), b"abc");
        assert_eq!(center_bytes(b"abc", 7, b" "), b"  abc  ");
        assert_eq!(center_bytes(b"abcdef", 2, b" "), b"cd");
    }

    #[test]
    fn map_uses_the_last_mapping_for_repeated_characters() {
        assert_eq!(map_bytes(b"hello", b"lo", b"LO"), b"heLLO");
        assert_eq!(map_bytes(b"aaa", b"aa", b"xy"), b"yyy");
    }
}
