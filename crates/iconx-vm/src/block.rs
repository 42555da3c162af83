//! Heap block layouts and their accounting sizes.

use iconx_gc::{BlockRef, Relocate, Relocation, Trace, Tracer};
use iconx_image::{CsetBits, RecordId};

use crate::Desc;
use crate::vm::{Ipc, Regs, Slot};

/// Number of hash buckets in every table and set header.
pub(crate) const TABLE_SLOTS: usize = 37;
/// Minimum number of slots in a list-element block.
pub(crate) const MIN_LIST_SLOTS: usize = 8;

/// Accounting size of one descriptor, in bytes.
pub(crate) const DESC_BYTES: usize = 16;
const HEADER_BYTES: usize = 16;

pub(crate) const FS_READ: u8 = 0x01;
pub(crate) const FS_WRITE: u8 = 0x02;
pub(crate) const FS_CREATE: u8 = 0x04;
pub(crate) const FS_APPEND: u8 = 0x08;
/// The file's writer holds one of the `io_buffers` buffers.
pub(crate) const FS_BUFFERED: u8 = 0x10;

/// A heap object in the block region.
#[derive(Debug)]
pub enum Block {
    Cset(CsetBits),
    File(FileBlock),
    List(ListHeader),
    ListElem(ListElem),
    Table(HashHeader),
    Set(HashHeader),
    /// A table or set element; set elements leave `value` null.
    Elem(HashElem),
    Record(RecordBlock),
    Coexpr(Box<CoexprBlock>),
    Refresh(RefreshBlock),
    Subs(SubsVar),
    TableVar(TableVar),
}

#[derive(Debug)]
pub struct FileBlock {
    /// Index into the interpreter's stream table.
    pub(crate) stream: u32,
    pub(crate) status: u8,
    pub(crate) name: Vec<u8>,
}

#[derive(Debug)]
pub struct ListHeader {
    pub(crate) size: u32,
    pub(crate) head: Option<BlockRef>,
    pub(crate) tail: Option<BlockRef>,
}

/// A run of list elements stored circularly in `slots` starting at `first`.
#[derive(Debug)]
pub struct ListElem {
    pub(crate) first: u32,
    pub(crate) nused: u32,
    pub(crate) slots: Vec<Desc>,
    pub(crate) prev: Option<BlockRef>,
    pub(crate) next: Option<BlockRef>,
}

impl ListElem {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            first: 0,
            nused: 0,
            slots: vec![Desc::Null; n.max(MIN_LIST_SLOTS)],
            prev: None,
            next: None,
        }
    }

    /// Raw slot index of the `i`th used element (0-based).
    pub(crate) fn slot_of(&self, i: u32) -> u32 {
        let n = self.slots.len() as u32;
        let j = self.first + i;
        if j >= n { j - n } else { j }
    }
}

/// Header shared by tables and sets.
#[derive(Debug)]
pub struct HashHeader {
    pub(crate) size: u32,
    /// Value of absent keys (tables only).
    pub(crate) default: Desc,
    /// Element chains, ordered by ascending hash number.
    pub(crate) buckets: [Option<BlockRef>; TABLE_SLOTS],
}

impl HashHeader {
    pub(crate) fn new(default: Desc) -> Self {
        Self {
            size: 0,
            default,
            buckets: [None; TABLE_SLOTS],
        }
    }
}

#[derive(Debug)]
pub struct HashElem {
    pub(crate) hash: i64,
    pub(crate) key: Desc,
    pub(crate) value: Desc,
    pub(crate) next: Option<BlockRef>,
}

#[derive(Debug)]
pub struct RecordBlock {
    pub(crate) decl: RecordId,
    pub(crate) fields: Vec<Desc>,
}

/// A co-expression: an independent stack plus the registers saved when it last lost control.
#[derive(Debug)]
pub struct CoexprBlock {
    /// Empty while this co-expression is running; the interpreter holds its stack.
    pub(crate) stack: Vec<Slot>,
    pub(crate) regs: Regs,
    pub(crate) activator: Option<BlockRef>,
    /// Number of results produced so far.
    pub(crate) size: i64,
    pub(crate) refresh: Option<BlockRef>,
    /// Slot awaiting the value transmitted back by the co-expression this one activated.
    pub(crate) tvalloc: Option<u32>,
    pub(crate) slot_limit: u32,
    /// Static-region bytes charged for the stack.
    pub(crate) stack_bytes: usize,
}

/// Everything needed to start a co-expression from scratch.
#[derive(Debug)]
pub struct RefreshBlock {
    pub(crate) entry: Ipc,
    pub(crate) nargs: u32,
    pub(crate) nlocals: u32,
    pub(crate) line: u32,
    /// Callee, arguments, then locals.
    pub(crate) elems: Vec<Desc>,
}

#[derive(Debug)]
pub struct SubsVar {
    /// The variable holding the whole string.
    pub(crate) var: Desc,
    /// 1-based start position.
    pub(crate) pos: i64,
    pub(crate) len: i64,
}

#[derive(Debug)]
pub struct TableVar {
    pub(crate) table: BlockRef,
    pub(crate) key: Desc,
    pub(crate) hash: i64,
}

impl Block {
    pub(crate) fn slot(&self, index: u32) -> Option<&Desc> {
        match self {
            Block::Record(r) => r.fields.get(index as usize),
            Block::ListElem(e) => e.slots.get(index as usize),
            Block::Elem(e) => Some(&e.value),
            _ => None,
        }
    }

    pub(crate) fn slot_mut(&mut self, index: u32) -> Option<&mut Desc> {
        match self {
            Block::Record(r) => r.fields.get_mut(index as usize),
            Block::ListElem(e) => e.slots.get_mut(index as usize),
            Block::Elem(e) => Some(&mut e.value),
            _ => None,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Block::Cset(_) => "cset",
            Block::File(_) => "file",
            Block::List(_) => "list",
            Block::ListElem(_) => "list element",
            Block::Table(_) => "table",
            Block::Set(_) => "set",
            Block::Elem(_) => "element",
            Block::Record(_) => "record",
            Block::Coexpr(_) => "co-expression",
            Block::Refresh(_) => "refresh",
            Block::Subs(_) => "substring",
            Block::TableVar(_) => "table element",
        }
    }
}

pub(crate) fn list_elem_size(nslots: usize) -> usize {
    HEADER_BYTES + 24 + nslots * DESC_BYTES
}

pub(crate) fn file_size(name_len: usize) -> usize {
    HEADER_BYTES + 8 + name_len
}

pub(crate) fn record_size(nfields: usize) -> usize {
    HEADER_BYTES + nfields * DESC_BYTES
}

pub(crate) fn refresh_size(nelems: usize) -> usize {
    HEADER_BYTES + 16 + nelems * DESC_BYTES
}

pub(crate) const CSET_SIZE: usize = HEADER_BYTES + 32;
pub(crate) const LIST_SIZE: usize = HEADER_BYTES + 16;
pub(crate) const HASH_SIZE: usize = HEADER_BYTES + DESC_BYTES + TABLE_SLOTS * 4;
pub(crate) const ELEM_SIZE: usize = HEADER_BYTES + 8 + 2 * DESC_BYTES;
pub(crate) const COEXPR_SIZE: usize = HEADER_BYTES + 80;
pub(crate) const SUBS_SIZE: usize = HEADER_BYTES + DESC_BYTES + 16;
pub(crate) const TABLE_VAR_SIZE: usize = HEADER_BYTES + DESC_BYTES + 16;

impl iconx_gc::Block for Block {
    fn size(&self) -> usize {
        match self {
            Block::Cset(_) => CSET_SIZE,
            Block::File(f) => file_size(f.name.len()),
            Block::List(_) => LIST_SIZE,
            Block::ListElem(e) => list_elem_size(e.slots.len()),
            Block::Table(_) | Block::Set(_) => HASH_SIZE,
            Block::Elem(_) => ELEM_SIZE,
            Block::Record(r) => record_size(r.fields.len()),
            Block::Coexpr(_) => COEXPR_SIZE,
            Block::Refresh(r) => refresh_size(r.elems.len()),
            Block::Subs(_) => SUBS_SIZE,
            Block::TableVar(_) => TABLE_VAR_SIZE,
        }
    }

    fn static_size(&self) -> usize {
        match self {
            Block::Coexpr(c) => c.stack_bytes,
            _ => 0,
        }
    }
}

fn mark_opt(r: Option<BlockRef>, tracer: &mut dyn Tracer) {
    if let Some(r) = r {
        tracer.mark_block(r);
    }
}

fn relocate_opt(r: &mut Option<BlockRef>, map: &Relocation) {
    if let Some(r) = r {
        *r = map.block(*r);
    }
}

impl Trace for Block {
    fn trace(&self, tracer: &mut dyn Tracer) {
        match self {
            Block::Cset(_) | Block::File(_) => {}
            Block::List(l) => {
                mark_opt(l.head, tracer);
                mark_opt(l.tail, tracer);
            }
            Block::ListElem(e) => {
                for d in &e.slots {
                    d.trace(tracer);
                }
                mark_opt(e.prev, tracer);
                mark_opt(e.next, tracer);
            }
            Block::Table(h) | Block::Set(h) => {
                h.default.trace(tracer);
                for b in h.buckets {
                    mark_opt(b, tracer);
                }
            }
            Block::Elem(e) => {
                e.key.trace(tracer);
                e.value.trace(tracer);
                mark_opt(e.next, tracer);
            }
            Block::Record(r) => {
                for d in &r.fields {
                    d.trace(tracer);
                }
            }
            Block::Coexpr(c) => {
                for slot in &c.stack {
                    slot.trace(tracer);
                }
                mark_opt(c.activator, tracer);
                mark_opt(c.refresh, tracer);
            }
            Block::Refresh(r) => {
                for d in &r.elems {
                    d.trace(tracer);
                }
            }
            Block::Subs(s) => s.var.trace(tracer),
            Block::TableVar(t) => {
                tracer.mark_block(t.table);
                t.key.trace(tracer);
            }
        }
    }
}

impl Relocate for Block {
    fn relocate(&mut self, map: &Relocation) {
        match self {
            Block::Cset(_) | Block::File(_) => {}
            Block::List(l) => {
                relocate_opt(&mut l.head, map);
                relocate_opt(&mut l.tail, map);
            }
            Block::ListElem(e) => {
                for d in &mut e.slots {
                    d.relocate(map);
                }
                relocate_opt(&mut e.prev, map);
                relocate_opt(&mut e.next, map);
            }
            Block::Table(h) | Block::Set(h) => {
                h.default.relocate(map);
                for b in &mut h.buckets {
                    relocate_opt(b, map);
                }
            }
            Block::Elem(e) => {
                e.key.relocate(map);
                e.value.relocate(map);
                relocate_opt(&mut e.next, map);
            }
            Block::Record(r) => {
                for d in &mut r.fields {
                    d.relocate(map);
                }
            }
            Block::Coexpr(c) => {
                for slot in &mut c.stack {
                    slot.relocate(map);
                }
                relocate_opt(&mut c.activator, map);
                relocate_opt(&mut c.refresh, map);
            }
            Block::Refresh(r) => {
                for d in &mut r.elems {
                    d.relocate(map);
                }
            }
            Block::Subs(s) => s.var.relocate(map),
            Block::TableVar(t) => {
                t.table = map.block(t.table);
                t.key.relocate(map);
            }
        }
    }
}
