use crate::{
    io::{ByteWriter, Decodeable, Encodeable},
    mvcc::UndoPtr,
    tid::Tid,
};

use super::page::ArrayItem;

/// `flags` bit: the run is dead and waiting for vacuum. Dead runs never
/// satisfy visibility.
pub const TID_ITEM_DEAD: u8 = 0x01;

/// A dense run of tids `[first_tid, first_tid + nelements)` sharing one
/// undo pointer. The TID tree stores nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TidRunItem {
    pub first_tid: Tid,
    pub nelements: u32,
    pub undo_ptr: UndoPtr,
    pub flags: u8,
}

impl TidRunItem {
    pub const DISK_SIZE: usize = 8 + 4 + 8 + 1;

    pub fn new(first_tid: Tid, nelements: u32, undo_ptr: UndoPtr, flags: u8) -> Self {
        debug_assert!(nelements >= 1);
        Self {
            first_tid,
            nelements,
            undo_ptr,
            flags,
        }
    }

    /// A single dead tid, the shape vacuum looks for.
    pub fn dead(tid: Tid) -> Self {
        Self::new(tid, 1, UndoPtr::INVALID, TID_ITEM_DEAD)
    }

    pub fn is_dead(&self) -> bool {
        self.flags & TID_ITEM_DEAD != 0
    }

    pub fn covers(&self, tid: Tid) -> bool {
        self.first_tid <= tid && tid < self.end_tid()
    }

    /// Slice this run around `tid`: the part before, an optional
    /// replacement for `tid` itself, and the part after. Used by
    /// delete/lock/mark-dead, which all rewrite exactly one tid.
    pub fn slice_around(&self, tid: Tid, replacement: Option<TidRunItem>) -> Vec<TidRunItem> {
        debug_assert!(self.covers(tid));

        let mut out = Vec::with_capacity(3);

        let before = tid.raw() - self.first_tid.raw();
        if before > 0 {
            out.push(TidRunItem::new(
                self.first_tid,
                before as u32,
                self.undo_ptr,
                self.flags,
            ));
        }

        if let Some(r) = replacement {
            debug_assert!(r.first_tid == tid && r.nelements == 1);
            out.push(r);
        }

        let after = self.end_tid().raw() - tid.raw() - 1;
        if after > 0 {
            out.push(TidRunItem::new(
                tid.next(),
                after as u32,
                self.undo_ptr,
                self.flags,
            ));
        }

        out
    }

    /// Remove a sorted set of tids from the run, returning the
    /// surviving sub-runs.
    pub fn remove_tids(&self, tids: &[Tid]) -> Vec<TidRunItem> {
        let mut out = Vec::new();
        let mut run_start: Option<Tid> = None;

        let mut t = self.first_tid;
        while t < self.end_tid() {
            let removed = tids.binary_search(&t).is_ok();
            if removed {
                if let Some(start) = run_start.take() {
                    out.push(TidRunItem::new(
                        start,
                        (t.raw() - start.raw()) as u32,
                        self.undo_ptr,
                        self.flags,
                    ));
                }
            } else if run_start.is_none() {
                run_start = Some(t);
            }
            t = t.next();
        }

        if let Some(start) = run_start {
            out.push(TidRunItem::new(
                start,
                (self.end_tid().raw() - start.raw()) as u32,
                self.undo_ptr,
                self.flags,
            ));
        }

        out
    }

    /// Whether `other` continues this run with identical metadata, so
    /// the repacker may fuse them.
    pub fn can_merge(&self, other: &TidRunItem) -> bool {
        self.end_tid() == other.first_tid
            && self.undo_ptr == other.undo_ptr
            && self.flags == other.flags
    }
}

impl ArrayItem for TidRunItem {
    fn first_tid(&self) -> Tid {
        self.first_tid
    }

    fn end_tid(&self) -> Tid {
        self.first_tid.advance(self.nelements as u64)
    }

    fn disk_size(&self) -> usize {
        Self::DISK_SIZE
    }
}

impl TidRunItem {
    pub fn end_tid(&self) -> Tid {
        self.first_tid.advance(self.nelements as u64)
    }
}

impl Encodeable for TidRunItem {
    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write(&self.first_tid);
        w.write(&self.nelements);
        w.write(&self.undo_ptr.raw());
        w.write(&self.flags);
        w.to_bytes()
    }
}

impl Decodeable for TidRunItem {
    fn decode_from<R: std::io::Read>(reader: &mut R) -> Self {
        let first_tid = Tid::decode_from(reader);
        let nelements = u32::decode_from(reader);
        let undo_ptr = UndoPtr::from_raw(u64::decode_from(reader));
        let flags = u8::decode_from(reader);
        Self {
            first_tid,
            nelements,
            undo_ptr,
            flags,
        }
    }
}
