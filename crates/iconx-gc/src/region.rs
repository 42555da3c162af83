use core::fmt;

use crate::{BlockRef, GcError, StrRef};

/// Identifies one of the three memory regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Block,
    String,
    Static,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::Block => write!(f, "block"),
            RegionKind::String => write!(f, "string"),
            RegionKind::Static => write!(f, "static"),
        }
    }
}

/// How regions grow when a collection does not free enough space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrowthPolicy {
    /// Every growth is rounded up to a multiple of this many bytes.
    pub granule: usize,
    /// Hard ceiling on the size of any one region.
    pub max_region: usize,
    /// Minimum growth step for the static region.
    pub static_increment: usize,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            granule: 1024,
            max_region: 1 << 30,
            static_increment: 5120,
        }
    }
}

impl GrowthPolicy {
    pub fn round_up(&self, n: usize) -> usize {
        let g = self.granule.max(1);
        n.div_ceil(g).saturating_mul(g)
    }

    /// Extra bytes to add to a region of `capacity` bytes with `free` bytes free so that a
    /// request of `need` bytes fits.
    ///
    /// The region grows by twice the need or a quarter of its size, whichever is larger,
    /// minus what is already free.
    pub fn extra_for(&self, capacity: usize, free: usize, need: usize) -> usize {
        let want = need.saturating_mul(2).max(capacity / 4);
        self.round_up(want.saturating_sub(free).max(need.saturating_sub(free)))
    }
}

/// Bytes used and available in one region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionUsage {
    pub used: usize,
    pub capacity: usize,
}

impl RegionUsage {
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.used)
    }
}

/// The block region: a bump allocator of variable-sized blocks addressed by [`BlockRef`].
///
/// A block's address is its position in allocation order, so compaction (which keeps
/// survivors in order) is a stable slide.
#[derive(Debug)]
pub struct BlockRegion<T> {
    pub(crate) blocks: Vec<T>,
    pub(crate) sizes: Vec<u32>,
    pub(crate) used: usize,
    pub(crate) capacity: usize,
}

impl<T> BlockRegion<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: Vec::new(),
            sizes: Vec::new(),
            used: 0,
            capacity,
        }
    }

    pub fn usage(&self) -> RegionUsage {
        RegionUsage {
            used: self.used,
            capacity: self.capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub(crate) fn push(&mut self, block: T, size: usize) -> Result<BlockRef, GcError> {
        let index: u32 = self.blocks.len().try_into().map_err(|_| GcError::Exhausted {
            region: RegionKind::Block,
            requested: size,
            limit: self.capacity,
        })?;
        self.blocks.push(block);
        self.sizes.push(size.min(u32::MAX as usize) as u32);
        self.used += size;
        Ok(BlockRef(index))
    }

    pub fn get(&self, r: BlockRef) -> Option<&T> {
        self.blocks.get(r.0 as usize)
    }

    pub fn get_mut(&mut self, r: BlockRef) -> Option<&mut T> {
        self.blocks.get_mut(r.0 as usize)
    }

    /// Iterates live blocks in address order.
    pub fn iter(&self) -> impl Iterator<Item = (BlockRef, &T)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (BlockRef(i as u32), b))
    }
}

/// The string arena: one contiguous append-only byte buffer.
#[derive(Debug, Default)]
pub struct StringArena {
    pub(crate) bytes: Vec<u8>,
    pub(crate) capacity: usize,
}

impl StringArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            capacity,
        }
    }

    pub fn usage(&self) -> RegionUsage {
        RegionUsage {
            used: self.bytes.len(),
            capacity: self.capacity,
        }
    }

    pub(crate) fn append(&mut self, src: Option<&[u8]>, len: usize) -> Result<StrRef, GcError> {
        let off: u32 = self.bytes.len().try_into().map_err(|_| GcError::Exhausted {
            region: RegionKind::String,
            requested: len,
            limit: self.capacity,
        })?;
        let len_u32: u32 = len.try_into().map_err(|_| GcError::Exhausted {
            region: RegionKind::String,
            requested: len,
            limit: self.capacity,
        })?;
        match src {
            Some(bytes) => self.bytes.extend_from_slice(&bytes[..len]),
            None => self.bytes.resize(self.bytes.len() + len, 0),
        }
        Ok(StrRef { off, len: len_u32 })
    }

    pub fn bytes(&self, s: StrRef) -> &[u8] {
        self.bytes.get(s.range()).unwrap_or(&[])
    }

    pub fn bytes_mut(&mut self, s: StrRef) -> &mut [u8] {
        self.bytes.get_mut(s.range()).unwrap_or(&mut [])
    }

    /// True when `s` ends exactly at the arena's free pointer, so it can be extended in place.
    pub fn is_tail(&self, s: StrRef) -> bool {
        s.range().end == self.bytes.len()
    }
}

/// The static region: a byte budget for co-expression stacks.
///
/// Globals and statics live for the whole run and are sized by the image, so only the stack
/// reservations are accounted here.
#[derive(Debug, Default)]
pub struct StaticRegion {
    pub(crate) used: usize,
    pub(crate) capacity: usize,
}

impl StaticRegion {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { used: 0, capacity }
    }

    pub fn usage(&self) -> RegionUsage {
        RegionUsage {
            used: self.used,
            capacity: self.capacity,
        }
    }

    pub(crate) fn release(&mut self, n: usize) {
        self.used = self.used.saturating_sub(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_is_rounded_to_granule() {
        let policy = GrowthPolicy {
            granule: 1024,
            max_region: 1 << 20,
            static_increment: 512,
        };
        // Quarter of the region dominates.
        assert_eq!(policy.extra_for(40_000, 100, 300), 10_240);
        // Twice the need dominates.
        assert_eq!(policy.extra_for(4_000, 0, 3_000), 6_144);
        assert_eq!(policy.round_up(1), 1024);
        assert_eq!(policy.round_up(2048), 2048);
    }

    #[test]
    fn reserved_strings_are_zero_filled() {
        let mut arena = StringArena::with_capacity(64);
        let a = arena.append(Some(b"abc"), 3).unwrap();
        let b = arena.append(None, 2).unwrap();
        assert_eq!(arena.bytes(a), b"abc");
        assert_eq!(arena.bytes(b), &[0, 0]);
        assert!(arena.is_tail(b));
        assert!(!arena.is_tail(a));
    }
}
