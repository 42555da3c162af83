//! Descriptors, string qualifiers and variable locations.

use iconx_gc::{BlockRef, Relocate, Relocation, StrRef, Trace, Tracer};
use iconx_image::{ProcId, RecordId, StrConst};

/// A string qualifier: a length plus the location of the bytes.
///
/// String constants point into the image string pool and never move; everything else lives in
/// the string arena and is rewritten by compaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Qual {
    Image(StrConst),
    Heap(StrRef),
}

impl Qual {
    pub const EMPTY: Qual = Qual::Image(StrConst::EMPTY);

    pub fn len(self) -> u32 {
        match self {
            Qual::Image(s) => s.len,
            Qual::Heap(s) => s.len,
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// The substring of `len` bytes starting at 0-based offset `start`.
    pub fn slice(self, start: u32, len: u32) -> Qual {
        if len == 0 {
            return Qual::EMPTY;
        }
        match self {
            Qual::Image(s) => Qual::Image(StrConst {
                offset: s.offset + start,
                len,
            }),
            Qual::Heap(s) => Qual::Heap(s.slice(start, len)),
        }
    }
}

/// A callable value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcRef {
    Icon(ProcId),
    /// Index into the builtin function table.
    Builtin(u16),
    Record(RecordId),
}

/// Where a plain variable points.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loc {
    Global(u32),
    Static(u32),
    /// A slot of the stack that holds the variable; only meaningful while that stack is active.
    Slot(u32),
    /// A descriptor slot inside a block: a record field, a list element or a table value.
    Block { block: BlockRef, index: u32 },
}

/// A variable whose access and assignment are computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trapped {
    /// A substring of a string-valued variable (a `Block::Subs`).
    Subs(BlockRef),
    /// A table element that may not exist yet (a `Block::TableVar`).
    TableElem(BlockRef),
}

/// Keywords that are variables with assignment setters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrappedKeyword {
    Pos,
    Subject,
    Random,
    Trace,
}

impl TrappedKeyword {
    pub fn name(self) -> &'static str {
        match self {
            TrappedKeyword::Pos => "&pos",
            TrappedKeyword::Subject => "&subject",
            TrappedKeyword::Random => "&random",
            TrappedKeyword::Trace => "&trace",
        }
    }
}

/// The universal value representation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Desc {
    Null,
    Int(i64),
    Real(f64),
    Str(Qual),
    Cset(BlockRef),
    File(BlockRef),
    Proc(ProcRef),
    List(BlockRef),
    Set(BlockRef),
    Table(BlockRef),
    Record(BlockRef),
    Coexpr(BlockRef),
    Var(Loc),
    Tv(Trapped),
    Kywd(TrappedKeyword),
}

impl Desc {
    pub fn is_var(&self) -> bool {
        matches!(self, Desc::Var(_) | Desc::Tv(_) | Desc::Kywd(_))
    }

    /// The name `type()` reports for a dereferenced value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Desc::Null => "null",
            Desc::Int(_) => "integer",
            Desc::Real(_) => "real",
            Desc::Str(_) => "string",
            Desc::Cset(_) => "cset",
            Desc::File(_) => "file",
            Desc::Proc(_) => "procedure",
            Desc::List(_) => "list",
            Desc::Set(_) => "set",
            Desc::Table(_) => "table",
            Desc::Record(_) => "record",
            Desc::Coexpr(_) => "co-expression",
            Desc::Var(_) | Desc::Tv(_) | Desc::Kywd(_) => "variable",
        }
    }

    /// Rank of the type in the sort order used by `sort` and by comparison of mixed values.
    pub(crate) fn order(&self) -> u8 {
        match self {
            Desc::Null => 0,
            Desc::Int(_) => 1,
            Desc::Real(_) => 2,
            Desc::Str(_) => 3,
            Desc::Cset(_) => 4,
            Desc::File(_) => 5,
            Desc::Proc(_) => 6,
            Desc::List(_) => 7,
            Desc::Set(_) => 8,
            Desc::Table(_) => 9,
            Desc::Record(_) => 10,
            Desc::Coexpr(_) => 11,
            Desc::Var(_) | Desc::Tv(_) | Desc::Kywd(_) => 12,
        }
    }

    fn block(&self) -> Option<BlockRef> {
        match self {
            Desc::Cset(b)
            | Desc::File(b)
            | Desc::List(b)
            | Desc::Set(b)
            | Desc::Table(b)
            | Desc::Record(b)
            | Desc::Coexpr(b)
            | Desc::Var(Loc::Block { block: b, .. })
            | Desc::Tv(Trapped::Subs(b))
            | Desc::Tv(Trapped::TableElem(b)) => Some(*b),
            _ => None,
        }
    }
}

impl Trace for Desc {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Desc::Str(Qual::Heap(s)) = self {
            tracer.mark_str(*s);
        } else if let Some(b) = self.block() {
            tracer.mark_block(b);
        }
    }
}

impl Relocate for Desc {
    fn relocate(&mut self, map: &Relocation) {
        match self {
            Desc::Str(Qual::Heap(s)) => *s = map.string(*s),
            Desc::Cset(b)
            | Desc::File(b)
            | Desc::List(b)
            | Desc::Set(b)
            | Desc::Table(b)
            | Desc::Record(b)
            | Desc::Coexpr(b)
            | Desc::Var(Loc::Block { block: b, .. })
            | Desc::Tv(Trapped::Subs(b))
            | Desc::Tv(Trapped::TableElem(b)) => *b = map.block(*b),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slices_collapse_to_the_shared_empty_string() {
        let q = Qual::Image(StrConst { offset: 4, len: 3 });
        assert_eq!(q.slice(1, 0), Qual::EMPTY);
        assert_eq!(q.slice(1, 2), Qual::Image(StrConst { offset: 5, len: 2 }));
    }

    #[test]
    fn variables_are_classified() {
        assert!(Desc::Var(Loc::Global(0)).is_var());
        assert!(Desc::Kywd(TrappedKeyword::Pos).is_var());
        assert!(!Desc::Int(3).is_var());
        assert_eq!(Desc::Real(1.0).type_name(), "real");
    }
}
