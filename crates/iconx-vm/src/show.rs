//! Printable images of values, for diagnostics, tracing and `image()`.

use std::fmt::Write as _;

use crate::block::Block;
use crate::vm::Vm;
use crate::{Desc, Loc, ProcRef, Qual, Trapped, TrappedKeyword};

/// Longest string imaged in full by diagnostics.
const STRING_LIMIT: usize = 16;
/// Lists longer than this are imaged with their middle elided.
const LIST_LIMIT: u32 = 6;

/// Appends the image of character `c`, escaping it if it is unprintable, a backslash, or the
/// quote character `q`.
pub(crate) fn push_char_image(out: &mut String, c: u8, q: u8) {
    match c {
        b'\\' => out.push_str("\\\\"),
        b'"' | b'\'' if c == q => {
            out.push('\\');
            out.push(c as char);
        }
        b' '..=b'~' => out.push(c as char),
        0x08 => out.push_str("\\b"),
        0x7f => out.push_str("\\d"),
        0x1b => out.push_str("\\e"),
        0x0c => out.push_str("\\f"),
        b'\n' => out.push_str("\\n"),
        b'\r' => out.push_str("\\r"),
        b'\t' => out.push_str("\\t"),
        0x0b => out.push_str("\\v"),
        _ => {
            let _ = write!(out, "\\{c:03o}");
        }
    }
}

fn push_quoted(out: &mut String, bytes: &[u8], q: u8, limit: Option<usize>) {
    out.push(q as char);
    let shown = limit.map_or(bytes.len(), |l| bytes.len().min(l));
    for &c in &bytes[..shown] {
        push_char_image(out, c, q);
    }
    if shown < bytes.len() {
        out.push_str("...");
    }
    out.push(q as char);
}

fn push_name(out: &mut String, name: &[u8]) {
    for &c in name {
        push_char_image(out, c, 0);
    }
}

impl Vm {
    /// The image used in diagnostics and trace messages.
    pub(crate) fn outimage_string(&self, d: Desc) -> String {
        let mut out = String::new();
        self.outimage(&mut out, d, 0);
        out
    }

    /// Appends the diagnostic image of `d`; `restrict > 0` inside structures.
    pub(crate) fn outimage(&self, out: &mut String, d: Desc, restrict: u32) {
        match d {
            Desc::Str(q) => push_quoted(out, self.qual_bytes(q), b'"', Some(STRING_LIMIT)),
            Desc::Var(loc) => {
                out.push_str("variable = ");
                match self.read_loc(loc) {
                    Ok(v) => self.outimage(out, v, restrict),
                    Err(_) => out.push('?'),
                }
            }
            Desc::Null => {
                if restrict == 0 {
                    out.push_str("&null");
                }
            }
            Desc::Cset(_) => {
                if let Some(name) = self.cset_name(d) {
                    out.push_str(name);
                } else if let Some(bits) = self.cset_bits(d) {
                    let members: Vec<u8> = bits.chars().collect();
                    push_quoted(out, &members, b'\'', Some(STRING_LIMIT));
                }
            }
            Desc::List(b) => self.list_image(out, b, restrict),
            Desc::Record(b) => {
                let Some(Block::Record(r)) = self.heap.get(b) else {
                    out.push_str("record");
                    return;
                };
                out.push_str("record ");
                push_name(out, self.proc_name(ProcRef::Record(r.decl)).as_bytes());
                if r.fields.is_empty() {
                    out.push_str("()");
                } else if restrict > 0 {
                    let _ = write!(out, "({})", r.fields.len());
                } else {
                    out.push('(');
                    for (i, f) in r.fields.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        self.outimage(out, *f, restrict + 1);
                    }
                    out.push(')');
                }
            }
            Desc::Coexpr(_) => out.push_str("co-expression"),
            Desc::Tv(Trapped::Subs(b)) => self.subs_image(out, b, restrict),
            Desc::Tv(Trapped::TableElem(b)) => match self.heap.get(b) {
                Some(Block::TableVar(tv)) => {
                    self.outimage(out, Desc::Table(tv.table), restrict);
                    out.push('[');
                    self.outimage(out, tv.key, restrict);
                    out.push(']');
                }
                _ => out.push_str("table element"),
            },
            Desc::Kywd(k) => {
                out.push_str(k.name());
                out.push_str(" = ");
                self.outimage(out, self.keyword_value(k), restrict);
            }
            _ => self.scalar_image(out, d),
        }
    }

    /// Images shared by `image()` and diagnostics.
    fn scalar_image(&self, out: &mut String, d: Desc) {
        match d {
            Desc::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Desc::Real(r) => out.push_str(&crate::convert::format_real(r)),
            Desc::File(b) => {
                if b == self.files.input {
                    out.push_str("&input");
                } else if b == self.files.output {
                    out.push_str("&output");
                } else if b == self.files.errout {
                    out.push_str("&errout");
                } else if let Some(Block::File(f)) = self.heap.get(b) {
                    out.push_str("file(");
                    push_name(out, &f.name);
                    out.push(')');
                }
            }
            Desc::Proc(p) => {
                out.push_str(match p {
                    ProcRef::Icon(_) => "procedure ",
                    ProcRef::Builtin(_) => "function ",
                    ProcRef::Record(_) => "record constructor ",
                });
                push_name(out, self.proc_name(p).as_bytes());
            }
            Desc::Table(b) | Desc::Set(b) => {
                let (kind, size) = match self.heap.get(b) {
                    Some(Block::Table(h)) => ("table", h.size),
                    Some(Block::Set(h)) => ("set", h.size),
                    _ => ("table", 0),
                };
                let _ = write!(out, "{kind}({size})");
            }
            other => out.push_str(other.type_name()),
        }
    }

    /// The string `image(d)` produces.
    pub(crate) fn image_value(&self, d: Desc) -> String {
        let mut out = String::new();
        match d {
            Desc::Str(q) => push_quoted(&mut out, self.qual_bytes(q), b'"', None),
            Desc::Null => out.push_str("&null"),
            Desc::Cset(_) => {
                if let Some(name) = self.cset_name(d) {
                    out.push_str(name);
                } else if let Some(bits) = self.cset_bits(d) {
                    let members: Vec<u8> = bits.chars().collect();
                    push_quoted(&mut out, &members, b'\'', None);
                }
            }
            Desc::List(b) => {
                let size = match self.heap.get(b) {
                    Some(Block::List(l)) => l.size,
                    _ => 0,
                };
                let _ = write!(out, "list({size})");
            }
            Desc::Record(b) => {
                if let Some(Block::Record(r)) = self.heap.get(b) {
                    out.push_str("record ");
                    push_name(&mut out, self.proc_name(ProcRef::Record(r.decl)).as_bytes());
                    let _ = write!(out, "({})", r.fields.len());
                }
            }
            Desc::Coexpr(b) => {
                let size = match self.heap.get(b) {
                    Some(Block::Coexpr(c)) => c.size,
                    _ => 0,
                };
                let _ = write!(out, "co-expression({size})");
            }
            _ => self.scalar_image(&mut out, d),
        }
        out
    }

    fn cset_name(&self, d: Desc) -> Option<&'static str> {
        let Desc::Cset(b) = d else { return None };
        let k = &self.kcsets;
        if b == k.ascii {
            Some("&ascii")
        } else if b == k.cset {
            Some("&cset")
        } else if b == k.lcase {
            Some("&lcase")
        } else if b == k.ucase {
            Some("&ucase")
        } else {
            None
        }
    }

    fn list_image(&self, out: &mut String, list: iconx_gc::BlockRef, restrict: u32) {
        let elems = self.list_values(list);
        let size = elems.len() as u32;
        if restrict > 0 && size > 0 {
            let _ = write!(out, "list({size})");
            return;
        }
        out.push('[');
        let half = LIST_LIMIT / 2;
        for (i, v) in elems.iter().enumerate() {
            let count = i as u32 + 1;
            if count <= half || count > size.saturating_sub(half) {
                self.outimage(out, *v, restrict + 1);
                if count < size {
                    out.push(',');
                }
            } else if count == half + 1 {
                out.push_str("...,");
            }
        }
        out.push(']');
    }

    fn subs_image(&self, out: &mut String, b: iconx_gc::BlockRef, restrict: u32) {
        let Some(Block::Subs(s)) = self.heap.get(b) else {
            out.push_str("substring");
            return;
        };
        let is_subject = matches!(s.var, Desc::Kywd(TrappedKeyword::Subject));
        if is_subject {
            out.push_str("&subject");
        } else {
            match s.var {
                Desc::Var(loc) => match self.read_loc(loc) {
                    Ok(v) => self.outimage(out, v, restrict),
                    Err(_) => out.push('?'),
                },
                other => self.outimage(out, other, restrict),
            }
        }
        if s.len == 1 {
            let _ = write!(out, "[{}]", s.pos);
        } else {
            let _ = write!(out, "[{}+:{}]", s.pos, s.len);
        }
        let whole = match s.var {
            Desc::Kywd(TrappedKeyword::Subject) => Some(self.k_subject),
            Desc::Var(loc) => self.read_loc(loc).ok(),
            _ => None,
        };
        if let Some(Desc::Str(q)) = whole {
            let start = (s.pos - 1).max(0) as u32;
            if start as i64 + s.len <= q.len() as i64 {
                out.push_str(" = ");
                self.outimage(out, Desc::Str(Qual::slice(q, start, s.len as u32)), restrict);
            }
        }
    }

    /// Reads a plain variable location without dereferencing further.
    pub(crate) fn read_loc(&self, loc: Loc) -> Result<Desc, crate::error::Fault> {
        let found = match loc {
            Loc::Global(i) => self.globals.get(i as usize).copied(),
            Loc::Static(i) => self.statics.get(i as usize).copied(),
            Loc::Slot(i) => return self.desc(i),
            Loc::Block { block, index } => {
                self.heap.get(block).and_then(|b| b.slot(index)).copied()
            }
        };
        match found {
            Some(d) => Ok(d),
            None => crate::error::syserr(format!("dangling variable {loc:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(bytes: &[u8], q: u8) -> String {
        let mut out = String::new();
        push_quoted(&mut out, bytes, q, Some(STRING_LIMIT));
        out
    }

    #[test]
    fn strings_are_escaped_and_truncated() {
        assert_eq!(image(b"a\"b\\c\n", b'"'), "\"a\\\"b\\\\c\\n\"");
        assert_eq!(image(b"it's", b'"'), "\"it's\"");
        assert_eq!(image(b"it's", b'\''), "'it\\'s'");
        assert_eq!(image(&[1, 0x7f, 0x1b], b'"'), "\"\\001\\d\\e\"");
        assert_eq!(
            image(b"abcdefghijklmnopqrstuvwxyz", b'"'),
            "\"abcdefghijklmnop...\""
        );
    }
}
