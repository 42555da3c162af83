use std::cmp::Ordering;

use crate::block::{Block, TABLE_SLOTS};
use crate::vm::Vm;
use crate::{Desc, ProcRef};

impl Vm {
    /// Value equivalence (`===`): equal scalars, equal strings, or the same structure.
    pub(crate) fn equiv(&self, a: Desc, b: Desc) -> bool {
        match (a, b) {
            (Desc::Null, Desc::Null) => true,
            (Desc::Int(x), Desc::Int(y)) => x == y,
            (Desc::Real(x), Desc::Real(y)) => x == y,
            (Desc::Str(x), Desc::Str(y)) => {
                x.len() == y.len() && self.qual_bytes(x) == self.qual_bytes(y)
            }
            (Desc::Cset(x), Desc::Cset(y)) => {
                x == y || self.cset_bits(a) == self.cset_bits(b)
            }
            (Desc::Proc(x), Desc::Proc(y)) => x == y,
            (Desc::File(x), Desc::File(y))
            | (Desc::List(x), Desc::List(y))
            | (Desc::Set(x), Desc::Set(y))
            | (Desc::Table(x), Desc::Table(y))
            | (Desc::Record(x), Desc::Record(y))
            | (Desc::Coexpr(x), Desc::Coexpr(y)) => x == y,
            _ => false,
        }
    }

    /// Total order over all values: by type first, then within the type.
    pub(crate) fn anycmp(&self, a: Desc, b: Desc) -> Ordering {
        let by_type = a.order().cmp(&b.order());
        if by_type != Ordering::Equal {
            return by_type;
        }
        match (a, b) {
            (Desc::Int(x), Desc::Int(y)) => x.cmp(&y),
            (Desc::Real(x), Desc::Real(y)) => x.total_cmp(&y),
            (Desc::Str(x), Desc::Str(y)) => self.qual_bytes(x).cmp(self.qual_bytes(y)),
            (Desc::Cset(_), Desc::Cset(_)) => self.cvstr(a).cmp(&self.cvstr(b)),
            (Desc::Proc(x), Desc::Proc(y)) => self.proc_name(x).cmp(self.proc_name(y)),
            (Desc::File(x), Desc::File(y)) => match (self.heap.get(x), self.heap.get(y)) {
                (Some(Block::File(f)), Some(Block::File(g))) => f.name.cmp(&g.name),
                _ => x.cmp(&y),
            },
            (Desc::List(x), Desc::List(y))
            | (Desc::Set(x), Desc::Set(y))
            | (Desc::Table(x), Desc::Table(y))
            | (Desc::Record(x), Desc::Record(y))
            | (Desc::Coexpr(x), Desc::Coexpr(y)) => x.cmp(&y),
            _ => Ordering::Equal,
        }
    }

    /// Hash number used to place a key in a table or set.
    pub(crate) fn hash(&self, d: Desc) -> i64 {
        match d {
            Desc::Str(q) => {
                let bytes = self.qual_bytes(q);
                let head: i64 = bytes.iter().take(10).map(|&b| b as i64).sum();
                head + (bytes.len() as i64 & 0xff)
            }
            Desc::Int(i) => i,
            Desc::Real(r) => r as i64,
            Desc::Cset(_) => match self.cset_bits(d) {
                Some(bits) => bits.0.iter().fold(0u64, |acc, w| acc ^ w) as i64,
                None => 0,
            },
            other => other.order() as i64,
        }
    }

    pub(crate) fn proc_name(&self, p: ProcRef) -> &str {
        match p {
            ProcRef::Icon(id) => self.image.proc(id).map(|p| p.name.as_str()).unwrap_or(""),
            ProcRef::Builtin(i) => crate::builtins::FUNCTIONS
                .get(i as usize)
                .map(|f| f.name)
                .unwrap_or(""),
            ProcRef::Record(id) => self.image.record(id).map(|r| r.name.as_str()).unwrap_or(""),
        }
    }
}

/// Bucket index of a hash number.
pub(crate) fn bucket_of(hash: i64) -> usize {
    ((hash & i64::MAX) as u64 % TABLE_SLOTS as u64) as usize
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
    fn strings_hash_on_their_first_ten_bytes_and_length() {
        let mut vm = vm();
        let a = vm.mkstr(b"abcdefghijXXX").unwrap();
        let b = vm.mkstr(b"abcdefghijYYY").unwrap();
        assert_eq!(vm.hash(a), vm.hash(b));
        let c = vm.mkstr(b"ab").unwrap();
        assert_eq!(vm.hash(c), 97 + 98 + 2);
    }

    #[test]
    fn mixed_types_order_by_collating_number() {
        let mut vm = vm();
        let s = vm.mkstr(b"a").unwrap();
        assert_eq!(vm.anycmp(Desc::Null, Desc::Int(0)), Ordering::Less);
        assert_eq!(vm.anycmp(Desc::Int(5), Desc::Real(0.5)), Ordering::Less);
        assert_eq!(vm.anycmp(Desc::Real(9.0), s), Ordering::Less);
        assert_eq!(vm.anycmp(Desc::Int(3), Desc::Int(2)), Ordering::Greater);
    }

    #[test]
    fn equivalence_is_by_value_for_strings() {
        let mut vm = vm();
        let a = vm.mkstr(b"xyz").unwrap();
        let b = vm.mkstr(b"xyz").unwrap();
        assert!(vm.equiv(a, b));
        assert!(!vm.equiv(Desc::Int(1), Desc::Real(1.0)));
        assert_eq!(bucket_of(-1), (i64::MAX as u64 % 37) as usize);
    }
}
