//! Lists, tables, sets and records.
//!
//! The `alc_*` functions and the mutators here never collect: callers reserve the space they
//! need first (see [`Vm::reserve_with`]) and only then read the descriptors they store.

use iconx_gc::{BlockRef, Need};

use crate::block::{
    Block, ELEM_SIZE, HASH_SIZE, HashElem, HashHeader, LIST_SIZE, ListElem, ListHeader,
    MIN_LIST_SLOTS, RecordBlock, list_elem_size, record_size,
};
use crate::compare::bucket_of;
use crate::error::{Fault, syserr};
use crate::vm::Vm;
use crate::{Desc, Loc};

/// Block bytes a list of `n` elements needs.
pub(crate) fn list_need(n: usize) -> Need {
    Need::blocks(LIST_SIZE + list_elem_size(n.max(MIN_LIST_SLOTS)))
}

/// Block bytes one more element may need.
pub(crate) fn list_grow_need(size: u32) -> Need {
    Need::blocks(list_elem_size((size as usize / 2).max(MIN_LIST_SLOTS)))
}

pub(crate) fn hash_need() -> Need {
    Need::blocks(HASH_SIZE)
}

pub(crate) fn elem_need() -> Need {
    Need::blocks(ELEM_SIZE)
}

pub(crate) fn record_need(nfields: usize) -> Need {
    Need::blocks(record_size(nfields))
}

impl Vm {
    fn list_header(&self, list: BlockRef) -> Result<(u32, Option<BlockRef>, Option<BlockRef>), Fault> {
        match self.heap.get(list) {
            Some(Block::List(h)) => Ok((h.size, h.head, h.tail)),
            other => syserr(format!("expected a list header, found {other:?}")),
        }
    }

    fn list_header_mut(&mut self, list: BlockRef) -> Result<&mut ListHeader, Fault> {
        match self.heap.get_mut(list) {
            Some(Block::List(h)) => Ok(h),
            _ => syserr("expected a list header"),
        }
    }

    fn list_elem(&self, r: BlockRef) -> Result<&ListElem, Fault> {
        match self.heap.get(r) {
            Some(Block::ListElem(e)) => Ok(e),
            other => syserr(format!("expected a list element block, found {other:?}")),
        }
    }

    fn list_elem_mut(&mut self, r: BlockRef) -> Result<&mut ListElem, Fault> {
        match self.heap.get_mut(r) {
            Some(Block::ListElem(e)) => Ok(e),
            _ => syserr("expected a list element block"),
        }
    }

    /// Allocates a list holding `values`.
    pub(crate) fn alc_list(&mut self, values: &[Desc]) -> Result<BlockRef, Fault> {
        let mut elem = ListElem::with_capacity(values.len());
        elem.slots[..values.len()].copy_from_slice(values);
        elem.nused = values.len() as u32;
        let elem = self.heap.alloc(Block::ListElem(elem))?;
        let list = self.heap.alloc(Block::List(ListHeader {
            size: values.len() as u32,
            head: Some(elem),
            tail: Some(elem),
        }))?;
        Ok(list)
    }

    pub(crate) fn list_size(&self, list: BlockRef) -> Result<u32, Fault> {
        Ok(self.list_header(list)?.0)
    }

    /// All elements in order.
    pub(crate) fn list_values(&self, list: BlockRef) -> Vec<Desc> {
        let mut out = Vec::new();
        let Ok((_, mut cur, _)) = self.list_header(list) else {
            return out;
        };
        while let Some(r) = cur {
            let Ok(e) = self.list_elem(r) else { break };
            for i in 0..e.nused {
                out.push(e.slots[e.slot_of(i) as usize]);
            }
            cur = e.next;
        }
        out
    }

    /// Variable for the `i`th (1-based, already range-checked) element.
    pub(crate) fn list_elem_var(&self, list: BlockRef, i: u32) -> Result<Option<Loc>, Fault> {
        let (size, mut cur, _) = self.list_header(list)?;
        if i == 0 || i > size {
            return Ok(None);
        }
        let mut skip = i - 1;
        while let Some(r) = cur {
            let e = self.list_elem(r)?;
            if skip < e.nused {
                return Ok(Some(Loc::Block {
                    block: r,
                    index: e.slot_of(skip),
                }));
            }
            skip -= e.nused;
            cur = e.next;
        }
        syserr("list size disagrees with its element blocks")
    }

    /// Appends `v`; space for [`list_grow_need`] must have been reserved.
    pub(crate) fn list_put(&mut self, list: BlockRef, v: Desc) -> Result<(), Fault> {
        let (size, _, tail) = self.list_header(list)?;
        let Some(tail) = tail else {
            return syserr("list without element blocks");
        };
        let e = self.list_elem_mut(tail)?;
        if (e.nused as usize) < e.slots.len() {
            let at = e.slot_of(e.nused) as usize;
            e.slots[at] = v;
            e.nused += 1;
        } else {
            let mut fresh = ListElem::with_capacity(size as usize / 2);
            fresh.slots[0] = v;
            fresh.nused = 1;
            fresh.prev = Some(tail);
            let fresh = self.heap.alloc(Block::ListElem(fresh))?;
            self.list_elem_mut(tail)?.next = Some(fresh);
            self.list_header_mut(list)?.tail = Some(fresh);
        }
        self.list_header_mut(list)?.size += 1;
        Ok(())
    }

    /// Prepends `v`; space for [`list_grow_need`] must have been reserved.
    pub(crate) fn list_push(&mut self, list: BlockRef, v: Desc) -> Result<(), Fault> {
        let (size, head, _) = self.list_header(list)?;
        let Some(head) = head else {
            return syserr("list without element blocks");
        };
        let e = self.list_elem_mut(head)?;
        let n = e.slots.len() as u32;
        if e.nused < n {
            e.first = if e.first == 0 { n - 1 } else { e.first - 1 };
            e.slots[e.first as usize] = v;
            e.nused += 1;
        } else {
            let mut fresh = ListElem::with_capacity(size as usize / 2);
            let last = fresh.slots.len() - 1;
            fresh.first = last as u32;
            fresh.slots[last] = v;
            fresh.nused = 1;
            fresh.next = Some(head);
            let fresh = self.heap.alloc(Block::ListElem(fresh))?;
            self.list_elem_mut(head)?.prev = Some(fresh);
            self.list_header_mut(list)?.head = Some(fresh);
        }
        self.list_header_mut(list)?.size += 1;
        Ok(())
    }

    /// Removes and returns the first element.
    pub(crate) fn list_get(&mut self, list: BlockRef) -> Result<Option<Desc>, Fault> {
        let (size, mut head, _) = self.list_header(list)?;
        if size == 0 {
            return Ok(None);
        }
        loop {
            let Some(r) = head else {
                return syserr("list size disagrees with its element blocks");
            };
            let e = self.list_elem(r)?;
            if e.nused > 0 {
                break;
            }
            let next = e.next;
            if let Some(n) = next {
                self.list_elem_mut(n)?.prev = None;
                self.list_header_mut(list)?.head = Some(n);
            }
            head = next;
        }
        let Some(r) = head else {
            return syserr("list without element blocks");
        };
        let e = self.list_elem_mut(r)?;
        let v = e.slots[e.first as usize];
        e.first = (e.first + 1) % e.slots.len() as u32;
        e.nused -= 1;
        self.list_header_mut(list)?.size -= 1;
        Ok(Some(v))
    }

    /// Removes and returns the last element.
    pub(crate) fn list_pull(&mut self, list: BlockRef) -> Result<Option<Desc>, Fault> {
        let (size, _, mut tail) = self.list_header(list)?;
        if size == 0 {
            return Ok(None);
        }
        loop {
            let Some(r) = tail else {
                return syserr("list size disagrees with its element blocks");
            };
            let e = self.list_elem(r)?;
            if e.nused > 0 {
                break;
            }
            let prev = e.prev;
            if let Some(p) = prev {
                self.list_elem_mut(p)?.next = None;
                self.list_header_mut(list)?.tail = Some(p);
            }
            tail = prev;
        }
        let Some(r) = tail else {
            return syserr("list without element blocks");
        };
        let e = self.list_elem_mut(r)?;
        let at = e.slot_of(e.nused - 1) as usize;
        let v = e.slots[at];
        e.nused -= 1;
        self.list_header_mut(list)?.size -= 1;
        Ok(Some(v))
    }

    pub(crate) fn alc_table(&mut self, default: Desc) -> Result<BlockRef, Fault> {
        Ok(self.heap.alloc(Block::Table(HashHeader::new(default)))?)
    }

    pub(crate) fn alc_set(&mut self) -> Result<BlockRef, Fault> {
        Ok(self.heap.alloc(Block::Set(HashHeader::new(Desc::Null)))?)
    }

    pub(crate) fn alc_record(&mut self, decl: iconx_image::RecordId, fields: Vec<Desc>) -> Result<BlockRef, Fault> {
        Ok(self.heap.alloc(Block::Record(RecordBlock { decl, fields }))?)
    }

    fn hash_header(&self, h: BlockRef) -> Result<&HashHeader, Fault> {
        match self.heap.get(h) {
            Some(Block::Table(hdr) | Block::Set(hdr)) => Ok(hdr),
            other => syserr(format!("expected a table or set, found {other:?}")),
        }
    }

    fn hash_header_mut(&mut self, h: BlockRef) -> Result<&mut HashHeader, Fault> {
        match self.heap.get_mut(h) {
            Some(Block::Table(hdr) | Block::Set(hdr)) => Ok(hdr),
            _ => syserr("expected a table or set"),
        }
    }

    fn hash_elem(&self, r: BlockRef) -> Result<&HashElem, Fault> {
        match self.heap.get(r) {
            Some(Block::Elem(e)) => Ok(e),
            other => syserr(format!("expected a table element, found {other:?}")),
        }
    }

    pub(crate) fn hash_size(&self, h: BlockRef) -> Result<u32, Fault> {
        Ok(self.hash_header(h)?.size)
    }

    pub(crate) fn table_default(&self, h: BlockRef) -> Result<Desc, Fault> {
        Ok(self.hash_header(h)?.default)
    }

    /// The element holding `key`, if any.
    pub(crate) fn hash_lookup(&self, h: BlockRef, key: Desc, hash: i64) -> Result<Option<BlockRef>, Fault> {
        let mut cur = self.hash_header(h)?.buckets[bucket_of(hash)];
        while let Some(r) = cur {
            let e = self.hash_elem(r)?;
            if e.hash > hash {
                break;
            }
            if e.hash == hash && self.equiv(e.key, key) {
                return Ok(Some(r));
            }
            cur = e.next;
        }
        Ok(None)
    }

    /// Inserts `key` (or, for a table, overwrites its value); returns the element.
    ///
    /// Space for [`elem_need`] must have been reserved.
    pub(crate) fn hash_insert(
        &mut self,
        h: BlockRef,
        key: Desc,
        value: Desc,
        hash: i64,
    ) -> Result<BlockRef, Fault> {
        if let Some(found) = self.hash_lookup(h, key, hash)? {
            if let Some(Block::Elem(e)) = self.heap.get_mut(found) {
                e.value = value;
            }
            return Ok(found);
        }

        let bucket = bucket_of(hash);
        let mut prev: Option<BlockRef> = None;
        let mut cur = self.hash_header(h)?.buckets[bucket];
        while let Some(r) = cur {
            let e = self.hash_elem(r)?;
            if e.hash > hash {
                break;
            }
            prev = Some(r);
            cur = e.next;
        }

        let elem = self.heap.alloc(Block::Elem(HashElem {
            hash,
            key,
            value,
            next: cur,
        }))?;
        match prev {
            Some(p) => match self.heap.get_mut(p) {
                Some(Block::Elem(e)) => e.next = Some(elem),
                _ => return syserr("corrupt element chain"),
            },
            None => self.hash_header_mut(h)?.buckets[bucket] = Some(elem),
        }
        self.hash_header_mut(h)?.size += 1;
        Ok(elem)
    }

    /// Removes `key`; returns whether it was present.
    pub(crate) fn hash_delete(&mut self, h: BlockRef, key: Desc, hash: i64) -> Result<bool, Fault> {
        let bucket = bucket_of(hash);
        let mut prev: Option<BlockRef> = None;
        let mut cur = self.hash_header(h)?.buckets[bucket];
        while let Some(r) = cur {
            let e = self.hash_elem(r)?;
            if e.hash > hash {
                break;
            }
            let next = e.next;
            if e.hash == hash && self.equiv(e.key, key) {
                match prev {
                    Some(p) => match self.heap.get_mut(p) {
                        Some(Block::Elem(pe)) => pe.next = next,
                        _ => return syserr("corrupt element chain"),
                    },
                    None => self.hash_header_mut(h)?.buckets[bucket] = next,
                }
                self.hash_header_mut(h)?.size -= 1;
                return Ok(true);
            }
            prev = Some(r);
            cur = next;
        }
        Ok(false)
    }

    /// Every element block, in bucket order.
    pub(crate) fn hash_elems(&self, h: BlockRef) -> Result<Vec<BlockRef>, Fault> {
        let mut out = Vec::new();
        for bucket in self.hash_header(h)?.buckets {
            let mut cur = bucket;
            while let Some(r) = cur {
                out.push(r);
                cur = self.hash_elem(r)?.next;
            }
        }
        Ok(out)
    }

    pub(crate) fn elem_key_value(&self, r: BlockRef) -> Result<(Desc, Desc), Fault> {
        let e = self.hash_elem(r)?;
        Ok((e.key, e.value))
    }

    /// A shallow copy of a structure; other values are returned unchanged.
    pub(crate) fn copy_value(&mut self, cargp: u32) -> Result<Desc, Fault> {
        let d = self.desc(cargp + 1)?;
        match d {
            Desc::List(b) => {
                let n = self.list_size(b)? as usize;
                self.reserve(list_need(n))?;
                let Desc::List(b) = self.desc(cargp + 1)? else {
                    return syserr("argument changed type");
                };
                let values = self.list_values(b);
                Ok(Desc::List(self.alc_list(&values)?))
            }
            Desc::Table(b) | Desc::Set(b) => {
                let n = self.hash_size(b)? as usize;
                self.reserve(Need::blocks(HASH_SIZE + n * ELEM_SIZE))?;
                let src = self.desc(cargp + 1)?;
                let (Desc::Table(b) | Desc::Set(b)) = src else {
                    return syserr("argument changed type");
                };
                let is_table = matches!(src, Desc::Table(_));
                let copy = if is_table {
                    let default = self.table_default(b)?;
                    self.alc_table(default)?
                } else {
                    self.alc_set()?
                };
                for r in self.hash_elems(b)? {
                    let (key, value) = self.elem_key_value(r)?;
                    let hash = self.hash(key);
                    self.hash_insert(copy, key, value, hash)?;
                }
                Ok(if is_table { Desc::Table(copy) } else { Desc::Set(copy) })
            }
            Desc::Record(b) => {
                let n = match self.heap.get(b) {
                    Some(Block::Record(r)) => r.fields.len(),
                    _ => 0,
                };
                self.reserve(record_need(n))?;
                let Desc::Record(b) = self.desc(cargp + 1)? else {
                    return syserr("argument changed type");
                };
                let Some(Block::Record(r)) = self.heap.get(b) else {
                    return syserr("record descriptor without a record block");
                };
                let (decl, fields) = (r.decl, r.fields.clone());
                Ok(Desc::Record(self.alc_record(decl, fields)?))
            }
            other => Ok(other),
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

    #[test]
    fn list_ends_grow_across_element_blocks() {
        let mut vm = vm();
        let list = vm.alc_list(&[]).unwrap();
        for i in 0..20 {
            vm.list_put(list, Desc::Int(i)).unwrap();
        }
        for i in 1..=5 {
            vm.list_push(list, Desc::Int(-i)).unwrap();
        }
        assert_eq!(vm.list_size(list).unwrap(), 25);
        let values = vm.list_values(list);
        assert_eq!(values[0], Desc::Int(-5));
        assert_eq!(values[5], Desc::Int(0));
        assert_eq!(values[24], Desc::Int(19));

        assert_eq!(vm.list_get(list).unwrap(), Some(Desc::Int(-5)));
        assert_eq!(vm.list_pull(list).unwrap(), Some(Desc::Int(19)));
        assert_eq!(vm.list_size(list).unwrap(), 23);

        let Some(Loc::Block { block, index }) = vm.list_elem_var(list, 5).unwrap() else {
            panic!("expected an element variable");
        };
        assert_eq!(vm.read_loc(Loc::Block { block, index }).unwrap(), Desc::Int(0));
    }

    #[test]
    fn draining_a_list_empties_every_block() {
        let mut vm = vm();
        let list = vm.alc_list(&[Desc::Int(1), Desc::Int(2)]).unwrap();
        vm.list_push(list, Desc::Int(0)).unwrap();
        assert_eq!(vm.list_pull(list).unwrap(), Some(Desc::Int(2)));
        assert_eq!(vm.list_pull(list).unwrap(), Some(Desc::Int(1)));
        assert_eq!(vm.list_pull(list).unwrap(), Some(Desc::Int(0)));
        assert_eq!(vm.list_pull(list).unwrap(), None);
        assert_eq!(vm.list_get(list).unwrap(), None);
    }

    #[test]
    fn chains_stay_ordered_and_reject_duplicates() {
        let mut vm = vm();
        let t = vm.alc_table(Desc::Int(0)).unwrap();
        for k in [74, 0, 37, 3] {
            let h = vm.hash(Desc::Int(k));
            vm.hash_insert(t, Desc::Int(k), Desc::Int(k * 10), h).unwrap();
        }
        let h = vm.hash(Desc::Int(37));
        vm.hash_insert(t, Desc::Int(37), Desc::Int(1), h).unwrap();
        assert_eq!(vm.hash_size(t).unwrap(), 4);

        let keys: Vec<Desc> = vm
            .hash_elems(t)
            .unwrap()
            .into_iter()
            .map(|r| vm.elem_key_value(r).unwrap().0)
            .collect();
        assert_eq!(keys, vec![Desc::Int(0), Desc::Int(37), Desc::Int(74), Desc::Int(3)]);

        let found = vm.hash_lookup(t, Desc::Int(37), h).unwrap().unwrap();
        assert_eq!(vm.elem_key_value(found).unwrap().1, Desc::Int(1));
        assert!(vm.hash_delete(t, Desc::Int(37), h).unwrap());
        assert!(!vm.hash_delete(t, Desc::Int(37), h).unwrap());
        assert_eq!(vm.hash_size(t).unwrap(), 3);
    }
}
