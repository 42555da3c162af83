#![forbid(unsafe_code)]

//! Memory regions and the compacting collector.
//!
//! Three independent regions back the runtime: a block region of tagged records, an append-only
//! string arena, and a static region budget for co-expression stacks. Collection is
//! stop-the-world and runs in three phases: mark (trace from roots, recording every live string
//! qualifier), relocate (compute post-compaction addresses and rewrite every live reference),
//! and compact (slide survivors down, reclaiming dead blocks, bytes and stacks).

mod collect;
mod region;

pub use collect::{CollectReport, GcStats, Heap, Need, Relocation};
pub use region::{BlockRegion, GrowthPolicy, RegionKind, RegionUsage, StaticRegion, StringArena};

/// A handle to a block in the block region.
///
/// The wrapped index is the block's address: blocks are laid out in allocation order and
/// compaction preserves that order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef(pub(crate) u32);

impl BlockRef {
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// A slice of the string arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct StrRef {
    pub off: u32,
    pub len: u32,
}

impl StrRef {
    pub const EMPTY: StrRef = StrRef { off: 0, len: 0 };

    pub fn range(self) -> core::ops::Range<usize> {
        self.off as usize..self.off as usize + self.len as usize
    }

    /// The substring `[start, start + len)` of this string (bounds are the caller's contract).
    pub fn slice(self, start: u32, len: u32) -> StrRef {
        StrRef {
            off: self.off + start,
            len,
        }
    }
}

/// A value that can be traced by the collector.
pub trait Trace {
    fn trace(&self, tracer: &mut dyn Tracer);
}

/// A tracer used by [`Trace`] implementations to report live references.
///
/// Neither method can allocate, so tracing can never re-enter the collector.
pub trait Tracer {
    fn mark_block(&mut self, block: BlockRef);
    fn mark_str(&mut self, s: StrRef);
}

/// A value whose heap references are rewritten after compaction.
pub trait Relocate {
    fn relocate(&mut self, map: &Relocation);
}

/// A block stored in the block region.
pub trait Block: Trace + Relocate {
    /// Size charged against the block region, in bytes.
    fn size(&self) -> usize;

    /// Bytes of the static region owned by this block and released when it dies.
    fn static_size(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GcError {
    #[error("unable to expand {region} region (requested {requested} bytes, limit {limit})")]
    Exhausted {
        region: RegionKind,
        requested: usize,
        limit: usize,
    },
}
