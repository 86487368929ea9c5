//! Shared linear memory.
//!
//! The byte region both sides of the boundary address by pointer. Strings
//! cross it as `(ptr, len)` pairs; the module allocates destination buffers
//! here before asking the host to fill them.

use std::collections::BTreeMap;

use crate::config::PAGE_SIZE;
use crate::error::{Result, RuntimeError};

/// Pointers below this are never handed out, so 0 stays a null pointer.
const HEAP_BASE: u32 = 8;

/// Growable byte region with a first-fit allocator.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    /// Live allocations: pointer -> length.
    allocations: BTreeMap<u32, u32>,
    /// Free blocks: pointer -> length.
    free: BTreeMap<u32, u32>,
    top: u32,
}

impl LinearMemory {
    pub fn new(pages: usize) -> Self {
        Self {
            bytes: vec![0; pages.max(1) * PAGE_SIZE],
            allocations: BTreeMap::new(),
            free: BTreeMap::new(),
            top: HEAP_BASE,
        }
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn allocated(&self) -> usize {
        self.allocations.len()
    }

    /// Reserve `len` bytes and return the pointer.
    ///
    /// Zero-length requests still get a distinct pointer.
    pub fn alloc(&mut self, len: u32) -> Result<u32> {
        let len = len.max(1);
        let reused = self.free.iter().find(|(_, size)| **size >= len).map(|(ptr, size)| (*ptr, *size));

        let ptr = match reused {
            Some((ptr, size)) => {
                self.free.remove(&ptr);
                if size > len {
                    self.free.insert(ptr + len, size - len);
                }
                ptr
            }
            None => {
                let ptr = self.top;
                let end = ptr
                    .checked_add(len)
                    .ok_or(RuntimeError::MemoryOutOfBounds { ptr, len })?;
                self.grow_to(end as usize);
                self.top = end;
                ptr
            }
        };
        self.allocations.insert(ptr, len);
        Ok(ptr)
    }

    /// Return an allocation to the free list.
    pub fn free(&mut self, ptr: u32) -> Result<()> {
        let len = self
            .allocations
            .remove(&ptr)
            .ok_or(RuntimeError::MemoryOutOfBounds { ptr, len: 0 })?;
        self.free.insert(ptr, len);
        Ok(())
    }

    fn grow_to(&mut self, end: usize) {
        if end > self.bytes.len() {
            let pages = end.div_ceil(PAGE_SIZE);
            self.bytes.resize(pages * PAGE_SIZE, 0);
            tracing::debug!(pages, "linear memory grown");
        }
    }

    fn range(&self, ptr: u32, len: u32) -> Result<std::ops::Range<usize>> {
        let start = ptr as usize;
        let end = start + len as usize;
        if end > self.bytes.len() {
            return Err(RuntimeError::MemoryOutOfBounds { ptr, len });
        }
        Ok(start..end)
    }

    pub fn read(&self, ptr: u32, len: u32) -> Result<&[u8]> {
        let range = self.range(ptr, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write(&mut self, ptr: u32, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| RuntimeError::MemoryOutOfBounds { ptr, len: u32::MAX })?;
        let range = self.range(ptr, len)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Decode `len` bytes at `ptr` as UTF-8. A zero length reads nothing.
    pub fn read_str(&self, ptr: u32, len: u32) -> Result<String> {
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.read(ptr, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| RuntimeError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_write_read() {
        let mut memory = LinearMemory::new(1);
        let ptr = memory.alloc(5).unwrap();
        assert!(ptr >= HEAP_BASE);
        memory.write(ptr, b"hello").unwrap();
        assert_eq!(memory.read_str(ptr, 5).unwrap(), "hello");
    }

    #[test]
    fn test_freed_block_is_reused() {
        let mut memory = LinearMemory::new(1);
        let a = memory.alloc(16).unwrap();
        let _b = memory.alloc(16).unwrap();
        memory.free(a).unwrap();
        assert_eq!(memory.alloc(8).unwrap(), a);
        assert_eq!(memory.alloc(8).unwrap(), a + 8);
        assert!(memory.free(a + 1).is_err());
    }

    #[test]
    fn test_grows_on_demand() {
        let mut memory = LinearMemory::new(1);
        let ptr = memory.alloc(PAGE_SIZE as u32).unwrap();
        assert_eq!(memory.size(), 2 * PAGE_SIZE);
        memory.write(ptr + PAGE_SIZE as u32 - 1, &[7]).unwrap();
    }

    #[test]
    fn test_out_of_bounds_and_bad_utf8() {
        let mut memory = LinearMemory::new(1);
        assert!(memory.read(PAGE_SIZE as u32 - 2, 4).is_err());
        let ptr = memory.alloc(2).unwrap();
        memory.write(ptr, &[0xff, 0xfe]).unwrap();
        assert_eq!(memory.read_str(ptr, 2), Err(RuntimeError::InvalidUtf8));
    }
}
