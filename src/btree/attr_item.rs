use bit_vec::BitVec;

use crate::{
    compress::{decompress, try_compress},
    io::{read_exact, ByteWriter, Decodeable, Encodeable},
    storage::{ColumnType, Datum},
    tid::Tid,
    types::EngineResult,
};

use super::page::ArrayItem;

/// `flags` bits of an attribute item.
pub const ATTR_ITEM_COMPRESSED: u8 = 0x01;
pub const ATTR_ITEM_HAS_NULLS: u8 = 0x02;

const ITEM_HEADER_SIZE: usize = 8 + 8 + 4 + 1 + 4 + 4;

/// On-disk form: `num_elements` (tid, datum, isnull) triples over
/// `[first_tid, end_tid)`, with the payload possibly compressed.
#[derive(Debug, Clone)]
pub struct PackedAttrItem {
    pub first_tid: Tid,
    pub end_tid: Tid,
    pub num_elements: u32,
    pub flags: u8,

    /// Plain payload size; differs from `payload.len()` only when the
    /// compressed bit is set.
    pub uncompressed_size: u32,
    pub payload: Vec<u8>,
}

impl PackedAttrItem {
    pub fn is_compressed(&self) -> bool {
        self.flags & ATTR_ITEM_COMPRESSED != 0
    }

    pub fn has_nulls(&self) -> bool {
        self.flags & ATTR_ITEM_HAS_NULLS != 0
    }

    pub fn disk_size(&self) -> usize {
        ITEM_HEADER_SIZE + self.payload.len()
    }

    /// Back to arrays. Needs the column type because datum encoding is
    /// untagged.
    pub fn explode(&self, ctype: ColumnType) -> EngineResult<ExplodedAttrItem> {
        let raw;
        let plain = if self.is_compressed() {
            raw = decompress(&self.payload, self.uncompressed_size as usize)?;
            raw.as_slice()
        } else {
            self.payload.as_slice()
        };

        let n = self.num_elements as usize;
        let mut reader = plain;

        let mut tids = Vec::with_capacity(n);
        for _ in 0..n {
            tids.push(Tid::decode_from(&mut reader));
        }

        let isnulls: Vec<bool> = if self.has_nulls() {
            let bytes = read_exact(&mut reader, (n + 7) / 8);
            let bv = BitVec::from_bytes(&bytes);
            (0..n).map(|i| bv.get(i).unwrap_or(false)).collect()
        } else {
            vec![false; n]
        };

        let mut datums = Vec::with_capacity(n);
        for i in 0..n {
            if isnulls[i] {
                datums.push(Datum::null_placeholder(ctype));
            } else {
                datums.push(Datum::decode_from(&mut reader, ctype));
            }
        }

        Ok(ExplodedAttrItem {
            tids,
            datums,
            isnulls,
        })
    }
}

/// In-memory only: parallel arrays, one entry per tid. Exists while the
/// repacker or the overlap merge is rearranging values; never written
/// to a page as-is.
#[derive(Debug, Clone)]
pub struct ExplodedAttrItem {
    pub tids: Vec<Tid>,
    pub datums: Vec<Datum>,
    pub isnulls: Vec<bool>,
}

impl ExplodedAttrItem {
    pub fn new(tids: Vec<Tid>, datums: Vec<Datum>, isnulls: Vec<bool>) -> Self {
        debug_assert!(!tids.is_empty());
        debug_assert!(tids.len() == datums.len() && tids.len() == isnulls.len());
        debug_assert!(tids.windows(2).all(|w| w[0] < w[1]));
        Self {
            tids,
            datums,
            isnulls,
        }
    }

    pub fn len(&self) -> usize {
        self.tids.len()
    }

    pub fn first_tid(&self) -> Tid {
        self.tids[0]
    }

    pub fn end_tid(&self) -> Tid {
        self.tids[self.tids.len() - 1].next()
    }

    fn plain_payload(&self) -> (Vec<u8>, bool) {
        let n = self.tids.len();
        let has_nulls = self.isnulls.iter().any(|b| *b);

        let mut w = ByteWriter::new();
        for t in &self.tids {
            w.write(t);
        }
        if has_nulls {
            let mut bv = BitVec::from_elem(n, false);
            for (i, isnull) in self.isnulls.iter().enumerate() {
                if *isnull {
                    bv.set(i, true);
                }
            }
            w.write_bytes(&bv.to_bytes());
        }
        for (i, d) in self.datums.iter().enumerate() {
            if !self.isnulls[i] {
                w.write(d);
            }
        }

        (w.to_bytes(), has_nulls)
    }

    /// Pack into the on-disk form, compressing when the compressor
    /// manages to shrink the payload.
    pub fn pack(&self) -> PackedAttrItem {
        let (plain, has_nulls) = self.plain_payload();

        let mut flags = 0u8;
        if has_nulls {
            flags |= ATTR_ITEM_HAS_NULLS;
        }

        let uncompressed_size = plain.len() as u32;
        let payload = match try_compress(&plain, plain.len().saturating_sub(1)) {
            Some(packed) => {
                flags |= ATTR_ITEM_COMPRESSED;
                packed
            }
            None => plain,
        };

        PackedAttrItem {
            first_tid: self.first_tid(),
            end_tid: self.end_tid(),
            num_elements: self.tids.len() as u32,
            flags,
            uncompressed_size,
            payload,
        }
    }

    /// The size pack() cannot exceed, used for page-fit decisions
    /// before committing to a pack.
    pub fn plain_disk_size(&self) -> usize {
        let n = self.tids.len();
        let has_nulls = self.isnulls.iter().any(|b| *b);
        let mut size = ITEM_HEADER_SIZE + n * 8;
        if has_nulls {
            size += (n + 7) / 8;
        }
        for (i, d) in self.datums.iter().enumerate() {
            if !self.isnulls[i] {
                size += d.disk_size();
            }
        }
        size
    }

    /// Split at `cut`: entries below it and entries at or above it.
    pub fn split_at(&self, cut: Tid) -> (Option<ExplodedAttrItem>, Option<ExplodedAttrItem>) {
        let split = self.tids.iter().position(|t| *t >= cut).unwrap_or(self.len());

        let left = if split > 0 {
            Some(ExplodedAttrItem::new(
                self.tids[..split].to_vec(),
                self.datums[..split].to_vec(),
                self.isnulls[..split].to_vec(),
            ))
        } else {
            None
        };
        let right = if split < self.len() {
            Some(ExplodedAttrItem::new(
                self.tids[split..].to_vec(),
                self.datums[split..].to_vec(),
                self.isnulls[split..].to_vec(),
            ))
        } else {
            None
        };

        (left, right)
    }

    /// Drop every entry whose tid is in the sorted set `tids`.
    pub fn remove_tids(&self, tids: &[Tid]) -> Option<ExplodedAttrItem> {
        let mut out_tids = Vec::new();
        let mut out_datums = Vec::new();
        let mut out_isnulls = Vec::new();

        for i in 0..self.len() {
            if tids.binary_search(&self.tids[i]).is_err() {
                out_tids.push(self.tids[i]);
                out_datums.push(self.datums[i].clone());
                out_isnulls.push(self.isnulls[i]);
            }
        }

        if out_tids.is_empty() {
            None
        } else {
            Some(ExplodedAttrItem::new(out_tids, out_datums, out_isnulls))
        }
    }

    /// Binary search for `tid`; the caller reads the aligned arrays.
    pub fn position_of(&self, tid: Tid) -> Option<usize> {
        self.tids.binary_search(&tid).ok()
    }

    pub fn append(&mut self, other: &ExplodedAttrItem) {
        debug_assert!(self.end_tid() <= other.first_tid());
        self.tids.extend_from_slice(&other.tids);
        self.datums.extend_from_slice(&other.datums);
        self.isnulls.extend_from_slice(&other.isnulls);
    }
}

/// An attribute tree item. Pages only ever hold the packed variant; the
/// exploded one exists between explode() and pack() while values are
/// rearranged.
#[derive(Debug, Clone)]
pub enum AttrItem {
    Packed(PackedAttrItem),
    Exploded(ExplodedAttrItem),
}

impl AttrItem {
    pub fn explode(&self, ctype: ColumnType) -> EngineResult<ExplodedAttrItem> {
        match self {
            AttrItem::Packed(p) => p.explode(ctype),
            AttrItem::Exploded(e) => Ok(e.clone()),
        }
    }

    pub fn to_packed(&self) -> AttrItem {
        match self {
            AttrItem::Packed(_) => self.clone(),
            AttrItem::Exploded(e) => AttrItem::Packed(e.pack()),
        }
    }

    pub fn num_elements(&self) -> usize {
        match self {
            AttrItem::Packed(p) => p.num_elements as usize,
            AttrItem::Exploded(e) => e.len(),
        }
    }

    pub fn covers(&self, tid: Tid) -> bool {
        self.first_tid() <= tid && tid < self.end_tid()
    }

    pub fn first_tid(&self) -> Tid {
        match self {
            AttrItem::Packed(p) => p.first_tid,
            AttrItem::Exploded(e) => e.first_tid(),
        }
    }

    pub fn end_tid(&self) -> Tid {
        match self {
            AttrItem::Packed(p) => p.end_tid,
            AttrItem::Exploded(e) => e.end_tid(),
        }
    }
}

impl ArrayItem for AttrItem {
    fn first_tid(&self) -> Tid {
        AttrItem::first_tid(self)
    }

    fn end_tid(&self) -> Tid {
        AttrItem::end_tid(self)
    }

    fn disk_size(&self) -> usize {
        match self {
            AttrItem::Packed(p) => p.disk_size(),
            AttrItem::Exploded(e) => e.plain_disk_size(),
        }
    }
}

impl Encodeable for AttrItem {
    fn encode(&self) -> Vec<u8> {
        let packed = match self {
            AttrItem::Packed(p) => p.clone(),
            AttrItem::Exploded(e) => e.pack(),
        };

        let mut w = ByteWriter::new();
        w.write(&packed.first_tid);
        w.write(&packed.end_tid);
        w.write(&packed.num_elements);
        w.write(&packed.flags);
        w.write(&packed.uncompressed_size);
        w.write(&(packed.payload.len() as u32));
        w.write_bytes(&packed.payload);
        w.to_bytes()
    }
}

impl Decodeable for AttrItem {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let first_tid = Tid::decode_from(reader);
        let end_tid = Tid::decode_from(reader);
        let num_elements = u32::decode_from(reader);
        let flags = u8::decode_from(reader);
        let uncompressed_size = u32::decode_from(reader);
        let payload_size = u32::decode_from(reader);
        let payload = read_exact(reader, payload_size as usize);

        AttrItem::Packed(PackedAttrItem {
            first_tid,
            end_tid,
            num_elements,
            flags,
            uncompressed_size,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exploded(range: std::ops::Range<u64>) -> ExplodedAttrItem {
        let tids: Vec<Tid> = range.clone().map(|v| Tid::new(v).unwrap()).collect();
        let datums: Vec<Datum> = range.map(|v| Datum::Int(v as i64 * 10)).collect();
        let isnulls = vec![false; tids.len()];
        ExplodedAttrItem::new(tids, datums, isnulls)
    }

    #[test]
    fn pack_explode_round_trip() {
        let e = exploded(100..200);
        let p = e.pack();
        assert_eq!(p.num_elements, 100);
        assert_eq!(p.first_tid.raw(), 100);
        assert_eq!(p.end_tid.raw(), 200);

        let back = p.explode(ColumnType::Int).unwrap();
        assert_eq!(back.tids, e.tids);
        assert_eq!(back.datums, e.datums);
    }

    #[test]
    fn nulls_survive_packing() {
        let tids = vec![Tid::new(1).unwrap(), Tid::new(2).unwrap(), Tid::new(3).unwrap()];
        let datums = vec![Datum::Int(7), Datum::Int(0), Datum::Int(9)];
        let isnulls = vec![false, true, false];
        let e = ExplodedAttrItem::new(tids, datums, isnulls.clone());

        let p = e.pack();
        assert!(p.has_nulls());

        let back = p.explode(ColumnType::Int).unwrap();
        assert_eq!(back.isnulls, isnulls);
        assert_eq!(back.datums[0], Datum::Int(7));
        assert_eq!(back.datums[2], Datum::Int(9));
    }

    #[test]
    fn repetitive_payload_compresses() {
        let tids: Vec<Tid> = (1000..1400).map(|v| Tid::new(v).unwrap()).collect();
        let datums: Vec<Datum> = (0..400).map(|_| Datum::Int(0)).collect();
        let e = ExplodedAttrItem::new(tids, datums, vec![false; 400]);

        let p = e.pack();
        assert!(p.is_compressed());
        assert!((p.payload.len() as u32) < p.uncompressed_size);

        let back = p.explode(ColumnType::Int).unwrap();
        assert_eq!(back.len(), 400);
        assert_eq!(back.datums[399], Datum::Int(0));
    }

    #[test]
    fn split_at_cuts_arrays() {
        let e = exploded(10..20);
        let (l, r) = e.split_at(Tid::new(15).unwrap());
        let l = l.unwrap();
        let r = r.unwrap();
        assert_eq!(l.end_tid().raw(), 15);
        assert_eq!(r.first_tid().raw(), 15);
        assert_eq!(l.len() + r.len(), 10);

        let (none, all) = e.split_at(Tid::new(5).unwrap());
        assert!(none.is_none());
        assert_eq!(all.unwrap().len(), 10);
    }

    #[test]
    fn item_encode_round_trip() {
        let item = AttrItem::Exploded(exploded(50..80));
        let bytes = item.encode();
        let back = AttrItem::decode_from(&mut bytes.as_slice());
        let e = back.explode(ColumnType::Int).unwrap();
        assert_eq!(e.len(), 30);
        assert_eq!(e.tids[0].raw(), 50);
        assert_eq!(e.datums[29], Datum::Int(79 * 10));
    }
}
