//! Page buffers
//!
//! A closed set of backings behind one interface. Buffers are never written
//! after the page holding them is published; a write produces a new buffer.

use crate::config::PageBacking;
use crate::file::FileWithRecords;
use crate::Result;
use bytes::{Bytes, BytesMut};
use memmap2::MmapMut;

/// Bytes of one resident page
#[derive(Debug)]
pub enum PageBuffer {
    /// Mapping of the file region
    Mapped(MmapMut),
    /// Private heap copy
    Heap(Box<[u8]>),
    /// Shared immutable snapshot
    Direct(Bytes),
}

impl PageBuffer {
    /// Load `records` records starting at `first_record`
    ///
    /// Mapped loads of a read-only file that would run past its end come
    /// back as heap buffers.
    pub fn load(
        file: &FileWithRecords,
        backing: PageBacking,
        first_record: u64,
        records: usize,
    ) -> Result<Self> {
        let len = records * file.record_size();
        let offset = first_record * file.record_size() as u64;
        match backing {
            PageBacking::Mapped
                if !file.is_read_only() || offset + len as u64 <= file.size()? =>
            {
                Ok(Self::Mapped(file.map(first_record, records)?))
            }
            PageBacking::Mapped | PageBacking::Heap => {
                Ok(Self::Heap(read_region(file, offset, len)?.into_boxed_slice()))
            }
            PageBacking::Direct => Ok(Self::Direct(Bytes::from(read_region(file, offset, len)?))),
        }
    }

    /// Readable view of the whole buffer
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => &map[..],
            Self::Heap(heap) => &heap[..],
            Self::Direct(bytes) => &bytes[..],
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of this buffer with `bytes` written at `offset`
    ///
    /// Mapped buffers copy into the heap; the mapping itself is never touched.
    pub fn with_write(&self, offset: usize, bytes: &[u8]) -> Self {
        match self {
            Self::Mapped(map) => {
                let mut copy: Box<[u8]> = map[..].into();
                copy[offset..offset + bytes.len()].copy_from_slice(bytes);
                Self::Heap(copy)
            }
            Self::Heap(heap) => {
                let mut copy = heap.clone();
                copy[offset..offset + bytes.len()].copy_from_slice(bytes);
                Self::Heap(copy)
            }
            Self::Direct(shared) => {
                let mut copy = BytesMut::from(&shared[..]);
                copy[offset..offset + bytes.len()].copy_from_slice(bytes);
                Self::Direct(copy.freeze())
            }
        }
    }

    /// Push the buffer to the file region it was loaded from
    pub fn force(&self, file: &FileWithRecords, offset: u64) -> Result<()> {
        match self {
            Self::Mapped(map) => map.flush()?,
            Self::Heap(_) | Self::Direct(_) => file.write_bytes_at(offset, self.as_slice())?,
        }
        Ok(())
    }

    /// Short name of the backing
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mapped(_) => "mapped",
            Self::Heap(_) => "heap",
            Self::Direct(_) => "direct",
        }
    }
}

fn read_region(file: &FileWithRecords, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    // the tail page may extend past the end of the file
    file.read_bytes_at(offset, &mut buf)?;
    Ok(buf)
}
