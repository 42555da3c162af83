use crate::region::{BlockRegion, GrowthPolicy, RegionKind, RegionUsage, StaticRegion, StringArena};
use crate::{Block, BlockRef, GcError, Relocate, StrRef, Trace, Tracer};

const DEAD: u32 = u32::MAX;

/// Space the next operation will need, stated before it allocates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Need {
    pub blocks: usize,
    pub strings: usize,
    pub statics: usize,
}

impl Need {
    pub fn blocks(n: usize) -> Self {
        Self {
            blocks: n,
            ..Self::default()
        }
    }

    pub fn strings(n: usize) -> Self {
        Self {
            strings: n,
            ..Self::default()
        }
    }
}

/// Cumulative collector counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    pub collections: u64,
    pub blocks_reclaimed: u64,
    pub block_bytes_reclaimed: u64,
    pub string_bytes_reclaimed: u64,
    pub static_bytes_reclaimed: u64,
    pub growths: u64,
}

/// What a single collection did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub live_blocks: usize,
    pub blocks_reclaimed: usize,
    pub block_bytes_reclaimed: usize,
    pub string_bytes_reclaimed: usize,
    pub static_bytes_reclaimed: usize,
    pub grown: Vec<RegionKind>,
}

#[derive(Clone, Copy, Debug)]
struct Clump {
    start: u32,
    end: u32,
    new_start: u32,
}

/// The address map produced by the relocation phase.
///
/// Every live reference is rewritten through this map exactly once, by the [`Relocate`]
/// implementation that owns it.
#[derive(Debug)]
pub struct Relocation {
    forward: Vec<u32>,
    clumps: Vec<Clump>,
}

impl Relocation {
    pub fn block(&self, b: BlockRef) -> BlockRef {
        match self.forward.get(b.0 as usize) {
            Some(&new) if new != DEAD => BlockRef(new),
            _ => {
                debug_assert!(false, "relocating unmarked block {}", b.0);
                b
            }
        }
    }

    pub fn string(&self, s: StrRef) -> StrRef {
        if s.len == 0 {
            return StrRef::EMPTY;
        }
        let idx = self.clumps.partition_point(|c| c.start <= s.off);
        let Some(clump) = idx.checked_sub(1).and_then(|i| self.clumps.get(i)) else {
            debug_assert!(false, "relocating unmarked string at {}", s.off);
            return s;
        };
        debug_assert!(s.off + s.len <= clump.end, "string straddles clump end");
        StrRef {
            off: clump.new_start + (s.off - clump.start),
            len: s.len,
        }
    }
}

struct Marker {
    limit: usize,
    marked: Vec<bool>,
    worklist: Vec<BlockRef>,
    quals: Vec<StrRef>,
}

impl Tracer for Marker {
    fn mark_block(&mut self, block: BlockRef) {
        let i = block.0 as usize;
        if i >= self.limit || self.marked[i] {
            return;
        }
        self.marked[i] = true;
        self.worklist.push(block);
    }

    fn mark_str(&mut self, s: StrRef) {
        if s.len > 0 {
            self.quals.push(s);
        }
    }
}

/// The three regions plus the collector that manages them.
#[derive(Debug)]
pub struct Heap<T> {
    blocks: BlockRegion<T>,
    strings: StringArena,
    statics: StaticRegion,
    policy: GrowthPolicy,
    need: Need,
    stats: GcStats,
}

impl<T: Block> Heap<T> {
    pub fn new(
        block_capacity: usize,
        string_capacity: usize,
        static_capacity: usize,
        policy: GrowthPolicy,
    ) -> Self {
        Self {
            blocks: BlockRegion::with_capacity(block_capacity),
            strings: StringArena::with_capacity(string_capacity),
            statics: StaticRegion::with_capacity(static_capacity),
            policy,
            need: Need::default(),
            stats: GcStats::default(),
        }
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn blocks(&self) -> &BlockRegion<T> {
        &self.blocks
    }

    pub fn usage(&self, kind: RegionKind) -> RegionUsage {
        match kind {
            RegionKind::Block => self.blocks.usage(),
            RegionKind::String => self.strings.usage(),
            RegionKind::Static => self.statics.usage(),
        }
    }

    pub fn fits(&self, need: Need) -> bool {
        need.blocks <= self.blocks.usage().free()
            && need.strings <= self.strings.usage().free()
            && need.statics <= self.statics.usage().free()
    }

    /// Records what the next operation needs; returns `true` if a collection must run first.
    pub fn request(&mut self, need: Need) -> bool {
        self.need = need;
        !self.fits(need)
    }

    pub fn alloc(&mut self, block: T) -> Result<BlockRef, GcError> {
        let size = block.size();
        if size > self.blocks.usage().free() {
            log::debug!("block allocation of {size} bytes outran its request");
            self.grow(RegionKind::Block, size)?;
        }
        self.blocks.push(block, size)
    }

    pub fn get(&self, r: BlockRef) -> Option<&T> {
        self.blocks.get(r)
    }

    pub fn get_mut(&mut self, r: BlockRef) -> Option<&mut T> {
        self.blocks.get_mut(r)
    }

    /// Copies `bytes` into the string arena.
    pub fn alloc_str(&mut self, bytes: &[u8]) -> Result<StrRef, GcError> {
        self.ensure_string_room(bytes.len())?;
        self.strings.append(Some(bytes), bytes.len())
    }

    /// Reserves `len` zeroed bytes for the caller to fill in with [`Heap::str_bytes_mut`].
    pub fn reserve_str(&mut self, len: usize) -> Result<StrRef, GcError> {
        self.ensure_string_room(len)?;
        self.strings.append(None, len)
    }

    /// Returns `s` followed by `more`, extending in place when `s` is the newest string.
    pub fn extend_str(&mut self, s: StrRef, more: &[u8]) -> Result<StrRef, GcError> {
        if more.is_empty() {
            return Ok(s);
        }
        if s.len > 0 && self.strings.is_tail(s) {
            self.ensure_string_room(more.len())?;
            self.strings.append(Some(more), more.len())?;
            return Ok(StrRef {
                off: s.off,
                len: s.len + more.len() as u32,
            });
        }
        let total = s.len as usize + more.len();
        self.ensure_string_room(total)?;
        let head = self.strings.bytes(s).to_vec();
        let out = self.strings.append(Some(&head), head.len())?;
        self.strings.append(Some(more), more.len())?;
        Ok(StrRef {
            off: out.off,
            len: total as u32,
        })
    }

    pub fn str_bytes(&self, s: StrRef) -> &[u8] {
        self.strings.bytes(s)
    }

    pub fn str_bytes_mut(&mut self, s: StrRef) -> &mut [u8] {
        self.strings.bytes_mut(s)
    }

    /// Charges `n` bytes to the static region.
    pub fn reserve_static(&mut self, n: usize) -> Result<(), GcError> {
        if n > self.statics.usage().free() {
            self.grow(RegionKind::Static, n)?;
        }
        self.statics.used += n;
        Ok(())
    }

    fn ensure_string_room(&mut self, len: usize) -> Result<(), GcError> {
        if len > self.strings.usage().free() {
            log::debug!("string allocation of {len} bytes outran its request");
            self.grow(RegionKind::String, len)?;
        }
        Ok(())
    }

    fn grow(&mut self, kind: RegionKind, need: usize) -> Result<(), GcError> {
        let usage = self.usage(kind);
        let extra = match kind {
            RegionKind::Static => self.policy.round_up(
                need.saturating_sub(usage.free())
                    .max(self.policy.static_increment),
            ),
            _ => self.policy.extra_for(usage.capacity, usage.free(), need),
        };
        let new_capacity = usage
            .capacity
            .checked_add(extra)
            .filter(|c| *c <= self.policy.max_region)
            .ok_or(GcError::Exhausted {
                region: kind,
                requested: need,
                limit: self.policy.max_region,
            })?;
        match kind {
            RegionKind::Block => self.blocks.capacity = new_capacity,
            RegionKind::String => self.strings.capacity = new_capacity,
            RegionKind::Static => self.statics.capacity = new_capacity,
        }
        self.stats.growths += 1;
        log::debug!(
            "grew {kind} region from {} to {new_capacity} bytes",
            usage.capacity
        );
        Ok(())
    }

    /// Runs a full collection with `roots` as the root set, then grows any region that still
    /// cannot satisfy the outstanding request.
    ///
    /// Either the collection completes and the request fits, or the returned error reports
    /// which region could not be expanded.
    pub fn collect<R: Trace + Relocate + ?Sized>(
        &mut self,
        roots: &mut R,
    ) -> Result<CollectReport, GcError> {
        let n = self.blocks.blocks.len();
        let string_before = self.strings.bytes.len();
        let block_before = self.blocks.used;
        let static_before = self.statics.used;

        // Mark.
        let mut marker = Marker {
            limit: n,
            marked: vec![false; n],
            worklist: Vec::new(),
            quals: Vec::new(),
        };
        roots.trace(&mut marker);
        while let Some(b) = marker.worklist.pop() {
            if let Some(block) = self.blocks.blocks.get(b.0 as usize) {
                block.trace(&mut marker);
            }
        }
        let Marker {
            marked, mut quals, ..
        } = marker;

        // Relocate: block addresses in address order, strings by clump.
        let mut forward = Vec::with_capacity(n);
        let mut next = 0u32;
        for &live in &marked {
            if live {
                forward.push(next);
                next += 1;
            } else {
                forward.push(DEAD);
            }
        }

        quals.sort_unstable_by_key(|q| q.off);
        let mut clumps: Vec<Clump> = Vec::new();
        let mut new_end = 0u32;
        for q in &quals {
            let q_end = q.off + q.len;
            match clumps.last_mut() {
                Some(c) if q.off <= c.end => {
                    if q_end > c.end {
                        new_end += q_end - c.end;
                        c.end = q_end;
                    }
                }
                _ => {
                    clumps.push(Clump {
                        start: q.off,
                        end: q_end,
                        new_start: new_end,
                    });
                    new_end += q.len;
                }
            }
        }

        let map = Relocation { forward, clumps };
        roots.relocate(&map);
        for (block, _) in self
            .blocks
            .blocks
            .iter_mut()
            .zip(&marked)
            .filter(|(_, live)| **live)
        {
            block.relocate(&map);
        }

        // Compact blocks.
        let old_blocks = std::mem::take(&mut self.blocks.blocks);
        let old_sizes = std::mem::take(&mut self.blocks.sizes);
        let mut used = 0usize;
        let mut static_released = 0usize;
        let mut reclaimed = 0usize;
        for ((block, size), live) in old_blocks.into_iter().zip(old_sizes).zip(&marked) {
            if *live {
                used += size as usize;
                self.blocks.blocks.push(block);
                self.blocks.sizes.push(size);
            } else {
                static_released += block.static_size();
                reclaimed += 1;
            }
        }
        self.blocks.used = used;
        self.statics.release(static_released);

        // Compact strings.
        for c in &map.clumps {
            self.strings
                .bytes
                .copy_within(c.start as usize..c.end as usize, c.new_start as usize);
        }
        self.strings.bytes.truncate(new_end as usize);

        let mut report = CollectReport {
            live_blocks: self.blocks.blocks.len(),
            blocks_reclaimed: reclaimed,
            block_bytes_reclaimed: block_before - used,
            string_bytes_reclaimed: string_before - new_end as usize,
            static_bytes_reclaimed: static_before - self.statics.used,
            grown: Vec::new(),
        };

        // Grow whatever is still short of the stated need.
        let need = std::mem::take(&mut self.need);
        for (kind, want) in [
            (RegionKind::Block, need.blocks),
            (RegionKind::String, need.strings),
            (RegionKind::Static, need.statics),
        ] {
            if want > self.usage(kind).free() {
                self.grow(kind, want)?;
                report.grown.push(kind);
            }
        }

        self.stats.collections += 1;
        self.stats.blocks_reclaimed += report.blocks_reclaimed as u64;
        self.stats.block_bytes_reclaimed += report.block_bytes_reclaimed as u64;
        self.stats.string_bytes_reclaimed += report.string_bytes_reclaimed as u64;
        self.stats.static_bytes_reclaimed += report.static_bytes_reclaimed as u64;
        log::debug!(
            "collection {}: {} live blocks, reclaimed {} blocks / {} block bytes / {} string bytes / {} static bytes",
            self.stats.collections,
            report.live_blocks,
            report.blocks_reclaimed,
            report.block_bytes_reclaimed,
            report.string_bytes_reclaimed,
            report.static_bytes_reclaimed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Node {
        id: i64,
        child: Option<BlockRef>,
        name: StrRef,
        stack_bytes: usize,
    }

    impl Node {
        fn leaf(id: i64) -> Self {
            Self {
                id,
                child: None,
                name: StrRef::EMPTY,
                stack_bytes: 0,
            }
        }
    }

    impl Trace for Node {
        fn trace(&self, tracer: &mut dyn Tracer) {
            if let Some(child) = self.child {
                tracer.mark_block(child);
            }
            tracer.mark_str(self.name);
        }
    }

    impl Relocate for Node {
        fn relocate(&mut self, map: &Relocation) {
            if let Some(child) = &mut self.child {
                *child = map.block(*child);
            }
            self.name = map.string(self.name);
        }
    }

    impl Block for Node {
        fn size(&self) -> usize {
            32
        }

        fn static_size(&self) -> usize {
            self.stack_bytes
        }
    }

    #[derive(Debug, Default)]
    struct Roots {
        blocks: Vec<BlockRef>,
        strings: Vec<StrRef>,
    }

    impl Trace for Roots {
        fn trace(&self, tracer: &mut dyn Tracer) {
            for b in &self.blocks {
                tracer.mark_block(*b);
            }
            for s in &self.strings {
                tracer.mark_str(*s);
            }
        }
    }

    impl Relocate for Roots {
        fn relocate(&mut self, map: &Relocation) {
            for b in &mut self.blocks {
                *b = map.block(*b);
            }
            for s in &mut self.strings {
                *s = map.string(*s);
            }
        }
    }

    fn heap() -> Heap<Node> {
        Heap::new(1024, 1024, 1024, GrowthPolicy::default())
    }

    #[test]
    fn handles_are_rewritten_across_gc_cycles() {
        let mut heap = heap();
        let _dead = heap.alloc(Node::leaf(0)).unwrap();
        let live = heap.alloc(Node::leaf(1)).unwrap();
        let mut roots = Roots {
            blocks: vec![live],
            ..Roots::default()
        };

        let report = heap.collect(&mut roots).unwrap();
        assert_eq!(report.live_blocks, 1);
        assert_eq!(report.blocks_reclaimed, 1);
        assert_eq!(roots.blocks[0].index(), 0, "survivor slides down");
        assert_eq!(heap.get(roots.blocks[0]).unwrap().id, 1);

        heap.collect(&mut roots).unwrap();
        assert_eq!(heap.get(roots.blocks[0]).unwrap().id, 1);
    }

    #[test]
    fn traces_through_nested_block_graphs() {
        let mut heap = heap();
        let _pad = heap.alloc(Node::leaf(9)).unwrap();
        let child = heap.alloc(Node::leaf(2)).unwrap();
        let parent = heap
            .alloc(Node {
                child: Some(child),
                ..Node::leaf(1)
            })
            .unwrap();
        let mut roots = Roots {
            blocks: vec![parent],
            ..Roots::default()
        };

        heap.collect(&mut roots).unwrap();
        let parent = heap.get(roots.blocks[0]).unwrap();
        assert_eq!(parent.id, 1);
        let child = heap.get(parent.child.unwrap()).unwrap();
        assert_eq!(child.id, 2);

        roots.blocks.clear();
        heap.collect(&mut roots).unwrap();
        assert!(heap.blocks().is_empty());
        assert_eq!(heap.usage(RegionKind::Block).used, 0);
    }

    #[test]
    fn string_clumps_keep_overlapping_substrings_intact() {
        let mut heap = heap();
        let garbage = heap.alloc_str(b"garbage").unwrap();
        let whole = heap.alloc_str(b"hello world").unwrap();
        let _more_garbage = heap.alloc_str(b"xxxx").unwrap();
        let tail = heap.alloc_str(b"tail").unwrap();
        let mut roots = Roots {
            strings: vec![whole.slice(6, 5), whole.slice(0, 5), whole.slice(3, 4), tail],
            ..Roots::default()
        };
        assert_ne!(garbage, whole);

        let report = heap.collect(&mut roots).unwrap();
        assert_eq!(heap.str_bytes(roots.strings[0]), b"world");
        assert_eq!(heap.str_bytes(roots.strings[1]), b"hello");
        assert_eq!(heap.str_bytes(roots.strings[2]), b"lo w");
        assert_eq!(heap.str_bytes(roots.strings[3]), b"tail");
        // "hello world" minus the unreferenced space, plus "tail".
        assert_eq!(heap.usage(RegionKind::String).used, 11 + 4);
        assert_eq!(report.string_bytes_reclaimed, 7 + 4);
    }

    #[test]
    fn strings_reachable_only_through_blocks_survive() {
        let mut heap = heap();
        heap.alloc_str(b"junk").unwrap();
        let name = heap.alloc_str(b"kept").unwrap();
        let node = heap
            .alloc(Node {
                name,
                ..Node::leaf(3)
            })
            .unwrap();
        let mut roots = Roots {
            blocks: vec![node],
            ..Roots::default()
        };
        heap.collect(&mut roots).unwrap();
        let node = heap.get(roots.blocks[0]).unwrap();
        assert_eq!(heap.str_bytes(node.name), b"kept");
        assert_eq!(node.name.off, 0);
    }

    #[test]
    fn dead_blocks_release_their_static_space() {
        let mut heap = heap();
        heap.reserve_static(600).unwrap();
        heap.alloc(Node {
            stack_bytes: 600,
            ..Node::leaf(1)
        })
        .unwrap();
        assert_eq!(heap.usage(RegionKind::Static).used, 600);

        let report = heap.collect(&mut Roots::default()).unwrap();
        assert_eq!(report.static_bytes_reclaimed, 600);
        assert_eq!(heap.usage(RegionKind::Static).used, 0);
    }

    #[test]
    fn collection_grows_regions_that_stay_short() {
        let mut heap = heap();
        let keep: Vec<_> = (0..30).map(|i| heap.alloc(Node::leaf(i)).unwrap()).collect();
        let mut roots = Roots {
            blocks: keep,
            ..Roots::default()
        };
        assert!(heap.request(Need::blocks(512)));
        let report = heap.collect(&mut roots).unwrap();
        assert_eq!(report.grown, vec![RegionKind::Block]);
        assert!(heap.fits(Need::blocks(512)));
        assert_eq!(heap.stats().growths, 1);
        assert_eq!(heap.usage(RegionKind::Block).capacity % 1024, 0);
    }

    #[test]
    fn growth_past_the_ceiling_is_exhaustion() {
        let mut heap: Heap<Node> = Heap::new(
            64,
            64,
            64,
            GrowthPolicy {
                granule: 64,
                max_region: 128,
                static_increment: 64,
            },
        );
        heap.request(Need::strings(4096));
        let err = heap.collect(&mut Roots::default()).unwrap_err();
        assert_eq!(
            err,
            GcError::Exhausted {
                region: RegionKind::String,
                requested: 4096,
                limit: 128
            }
        );
    }

    #[test]
    fn extending_the_newest_string_appends_in_place() {
        let mut heap = heap();
        let a = heap.alloc_str(b"abc").unwrap();
        let ab = heap.extend_str(a, b"def").unwrap();
        assert_eq!(ab.off, a.off);
        assert_eq!(heap.str_bytes(ab), b"abcdef");

        let b = heap.alloc_str(b"zz").unwrap();
        let copied = heap.extend_str(a, b"!").unwrap();
        assert_ne!(copied.off, a.off);
        assert_eq!(heap.str_bytes(copied), b"abc!");
        assert_eq!(heap.str_bytes(b), b"zz");
    }
}
