use crate::null::RhiBufferNull;
use crate::{RhiBufferDef, RhiMapType, RhiObjectId, RhiResult};

/// A buffer is a piece of memory that can be accessed by the GPU. CPU access goes through
/// `map_buffer`/`unmap_buffer`.
///
/// Buffers must not be dropped or mapped while they are in use by the GPU.
#[derive(Debug)]
pub enum RhiBuffer {
    Null(RhiBufferNull),
}

impl RhiBuffer {
    pub fn object_id(&self) -> RhiObjectId {
        match self {
            RhiBuffer::Null(inner) => inner.object_id(),
        }
    }

    pub fn buffer_def(&self) -> &RhiBufferDef {
        match self {
            RhiBuffer::Null(inner) => inner.buffer_def(),
        }
    }

    pub fn map_buffer(
        &self,
        map_type: RhiMapType,
    ) -> RhiResult<()> {
        match self {
            RhiBuffer::Null(inner) => inner.map_buffer(map_type),
        }
    }

    pub fn unmap_buffer(&self) -> RhiResult<()> {
        match self {
            RhiBuffer::Null(inner) => inner.unmap_buffer(),
        }
    }

    pub fn is_mapped(&self) -> bool {
        match self {
            RhiBuffer::Null(inner) => inner.is_mapped(),
        }
    }

    /// Copy into the mapped memory. Fails if the buffer isn't mapped for writing or the range is
    /// out of bounds.
    pub fn write_mapped(
        &self,
        buffer_byte_offset: u64,
        data: &[u8],
    ) -> RhiResult<()> {
        match self {
            RhiBuffer::Null(inner) => inner.write_mapped(buffer_byte_offset, data),
        }
    }

    pub fn read_mapped(
        &self,
        buffer_byte_offset: u64,
        size: u64,
    ) -> RhiResult<Vec<u8>> {
        match self {
            RhiBuffer::Null(inner) => inner.read_mapped(buffer_byte_offset, size),
        }
    }

    pub fn null_buffer(&self) -> Option<&RhiBufferNull> {
        match self {
            RhiBuffer::Null(inner) => Some(inner),
        }
    }
}
