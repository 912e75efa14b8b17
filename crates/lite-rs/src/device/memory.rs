//! Memory blocks handed out by contexts.

use super::error::{DeviceError, DeviceResult};

#[derive(Debug)]
enum BlockStorage {
    Host { buffer: Vec<u8>, offset: usize },
    Opaque { handle: u64 },
}

/// An allocation owned by the caller until returned through `Context::free`.
#[derive(Debug)]
pub struct MemoryBlock {
    storage: BlockStorage,
    len: usize,
    alignment: usize,
}

impl MemoryBlock {
    /// Allocates a zeroed host block whose first byte is `alignment`-aligned.
    pub fn host(len: usize, alignment: usize) -> DeviceResult<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(DeviceError::InvalidParameter(format!(
                "alignment {alignment} is not a power of two"
            )));
        }
        let padded = len
            .checked_add(alignment - 1)
            .ok_or(DeviceError::OutOfMemory {
                requested: len,
                available: usize::MAX - alignment,
            })?;
        let buffer = vec![0u8; padded];
        let offset = buffer.as_ptr().align_offset(alignment);
        Ok(MemoryBlock {
            storage: BlockStorage::Host { buffer, offset },
            len,
            alignment,
        })
    }

    /// Wraps a backend-native handle for non-host memory.
    pub fn opaque(handle: u64, len: usize, alignment: usize) -> Self {
        MemoryBlock {
            storage: BlockStorage::Opaque { handle },
            len,
            alignment,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Bytes reserved by the allocation, including alignment padding.
    pub fn reserved(&self) -> usize {
        match &self.storage {
            BlockStorage::Host { buffer, .. } => buffer.len(),
            BlockStorage::Opaque { .. } => self.len,
        }
    }

    /// Address of the first usable byte, or the opaque handle value.
    pub fn addr(&self) -> usize {
        match &self.storage {
            BlockStorage::Host { buffer, offset } => buffer.as_ptr() as usize + offset,
            BlockStorage::Opaque { handle } => *handle as usize,
        }
    }

    pub fn as_host_slice(&self) -> Option<&[u8]> {
        match &self.storage {
            BlockStorage::Host { buffer, offset } => Some(&buffer[*offset..*offset + self.len]),
            BlockStorage::Opaque { .. } => None,
        }
    }

    pub fn as_host_mut(&mut self) -> Option<&mut [u8]> {
        let len = self.len;
        match &mut self.storage {
            BlockStorage::Host { buffer, offset } => Some(&mut buffer[*offset..*offset + len]),
            BlockStorage::Opaque { .. } => None,
        }
    }
}
