//! Virtual memory subsystem: scoped address spaces of
//! independently allocated buffers, addressed by a 64-bit virtual address
//! whose top 16 bits select the buffer and whose low 48 bits are the
//! byte offset within it.
use std::sync::Mutex;

use log::warn;

use crate::device::Device;
use crate::error::Error;

const ID_SHIFT: u32 = 48;
const OFFSET_MASK: u64 = (1u64 << ID_SHIFT) - 1;

pub fn encode_addr(id: u32, offset: u64) -> u64 {
    ((id as u64) << ID_SHIFT) | (offset & OFFSET_MASK)
}
pub fn decode_addr(addr: u64) -> (u32, u64) {
    ((addr >> ID_SHIFT) as u32, addr & OFFSET_MASK)
}

/// Which scope a `Memory` instance serves. Purely descriptive — used by
/// `Device`'s notification hooks and error messages, not by the addressing
/// scheme itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Device,
    Workgroup,
    Invocation,
}

enum Buffer {
    Released,
    Live(Vec<u8>),
}

struct Buffers {
    slots: Vec<Buffer>,
    free_list: Vec<u32>,
}

/// A scoped address space: a dense vector of buffers (id 0 reserved so a
/// null/zero address is never a valid allocation), plus a free list so
/// released ids get reused. `allocate`/`release` take the mutex;
/// `load`/`store`/`map` do not — the caller is responsible for
/// not overlapping a `release` with concurrent accesses to that buffer,
/// which the dispatch executor guarantees by construction (allocations
/// created during a dispatch are group- or invocation-local and freed only
/// after that owner finishes).
pub struct Memory {
    scope: MemoryScope,
    buffers: Mutex<Buffers>,
}
impl Memory {
    pub fn new(scope: MemoryScope) -> Memory {
        Memory {
            scope,
            buffers: Mutex::new(Buffers { slots: vec![Buffer::Released], free_list: Vec::new() }),
        }
    }
    pub fn scope(&self) -> MemoryScope { self.scope }

    /// Count of currently-live (not released) buffers, for tests that
    /// assert allocations are fully released (e.g. private memory after a
    /// function call returns).
    pub fn live_count(&self) -> usize {
        let buffers = self.buffers.lock().unwrap();
        buffers.slots.iter().filter(|s| matches!(s, Buffer::Live(_))).count()
    }

    /// Reserve a fresh buffer id (reusing a released one first) and
    /// allocate `size` bytes of indeterminate content.
    pub fn allocate(&self, size: usize) -> u64 {
        let mut buffers = self.buffers.lock().unwrap();
        let data = vec![0xCDu8; size];
        let id = if let Some(id) = buffers.free_list.pop() {
            buffers.slots[id as usize] = Buffer::Live(data);
            id
        } else {
            let id = buffers.slots.len() as u32;
            buffers.slots.push(Buffer::Live(data));
            id
        };
        encode_addr(id, 0)
    }
    /// Allocate pre-zeroed storage (used for workgroup-scope variables and
    /// built-in inputs, which must have defined initial content).
    pub fn allocate_zeroed(&self, size: usize) -> u64 {
        let mut buffers = self.buffers.lock().unwrap();
        let data = vec![0u8; size];
        let id = if let Some(id) = buffers.free_list.pop() {
            buffers.slots[id as usize] = Buffer::Live(data);
            id
        } else {
            let id = buffers.slots.len() as u32;
            buffers.slots.push(Buffer::Live(data));
            id
        };
        encode_addr(id, 0)
    }
    pub fn release(&self, addr: u64) {
        let (id, _) = decode_addr(addr);
        let mut buffers = self.buffers.lock().unwrap();
        if let Some(slot) = buffers.slots.get_mut(id as usize) {
            if !matches!(slot, Buffer::Released) {
                *slot = Buffer::Released;
                buffers.free_list.push(id);
            }
        }
    }

    fn with_buffer<R>(&self, id: u32, offset: u64, n: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R, Error> {
        let buffers = self.buffers.lock().unwrap();
        match buffers.slots.get(id as usize) {
            Some(Buffer::Live(data)) => {
                let start = offset as usize;
                let end = start.checked_add(n).ok_or_else(|| invalid(id, offset, n, "offset overflow"))?;
                if end > data.len() {
                    return Err(invalid(id, offset, n, "out of bounds"));
                }
                Ok(f(&data[start..end]))
            }
            Some(Buffer::Released) => Err(invalid(id, offset, n, "buffer released")),
            None => Err(invalid(id, offset, n, "no such buffer")),
        }
    }

    /// Bounds-checked load. On failure, zero-fills `dst` and returns the
    /// error for the caller to route to `Device::report_error` — robust
    /// buffer access semantics.
    pub fn try_load(&self, dst: &mut [u8], addr: u64, n: usize) -> Result<(), Error> {
        let (id, offset) = decode_addr(addr);
        match self.with_buffer(id, offset, n, |src| dst[..n].copy_from_slice(src)) {
            Ok(()) => Ok(()),
            Err(e) => {
                for b in dst[..n].iter_mut() { *b = 0; }
                Err(e)
            }
        }
    }
    pub fn load(&self, dst: &mut [u8], addr: u64, n: usize) {
        let _ = self.try_load(dst, addr, n);
    }
    /// Bounds-checked store. On failure, becomes a no-op.
    pub fn try_store(&self, addr: u64, n: usize, src: &[u8]) -> Result<(), Error> {
        let (id, offset) = decode_addr(addr);
        let mut buffers = self.buffers.lock().unwrap();
        match buffers.slots.get_mut(id as usize) {
            Some(Buffer::Live(data)) => {
                let start = offset as usize;
                let end = start.checked_add(n).ok_or_else(|| invalid(id, offset, n, "offset overflow"))?;
                if end > data.len() {
                    return Err(invalid(id, offset, n, "out of bounds"));
                }
                data[start..end].copy_from_slice(&src[..n]);
                Ok(())
            }
            Some(Buffer::Released) => Err(invalid(id, offset, n, "buffer released")),
            None => Err(invalid(id, offset, n, "no such buffer")),
        }
    }
    pub fn store(&self, addr: u64, n: usize, src: &[u8]) {
        let _ = self.try_store(addr, n, src);
    }

    /// Returns a raw, null-on-failure pointer into the buffer's storage,
    /// valid until the next `allocate`/`release` on this `Memory` (they may
    /// reallocate the backing `Vec`).
    pub fn map(&self, addr: u64, offset_extra: u64, n: usize) -> *mut u8 {
        let (id, offset) = decode_addr(addr);
        let offset = offset + offset_extra;
        let mut buffers = self.buffers.lock().unwrap();
        match buffers.slots.get_mut(id as usize) {
            Some(Buffer::Live(data)) => {
                let start = offset as usize;
                match start.checked_add(n) {
                    Some(end) if end <= data.len() => unsafe { data.as_mut_ptr().add(start) },
                    _ => std::ptr::null_mut(),
                }
            }
            _ => std::ptr::null_mut(),
        }
    }

    /// Equivalent to a load from `src_mem` followed by a store into this
    /// memory; the two may be the same `Memory` (self-copy).
    pub fn copy(&self, dst_addr: u64, src_mem: &Memory, src_addr: u64, n: usize) {
        let mut buf = vec![0u8; n];
        src_mem.load(&mut buf, src_addr, n);
        self.store(dst_addr, n, &buf);
    }

    /// Human-readable hex listing, for debugging (`--dump` in the CLI).
    pub fn dump(&self) -> String {
        let buffers = self.buffers.lock().unwrap();
        let mut out = String::new();
        for (id, slot) in buffers.slots.iter().enumerate() {
            match slot {
                Buffer::Released => out.push_str(&format!("buffer {}: released\n", id)),
                Buffer::Live(data) => {
                    out.push_str(&format!("buffer {} ({} bytes):\n", id, data.len()));
                    for chunk in data.chunks(16) {
                        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                        out.push_str("  ");
                        out.push_str(&hex.join(" "));
                        out.push('\n');
                    }
                }
            }
        }
        out
    }

    pub fn report_invalid(&self, device: &Device, err: Error) {
        warn!("{}", err);
        device.report_error(err, false);
    }
}

fn invalid(id: u32, offset: u64, n: usize, reason: &'static str) -> Error {
    Error::InvalidAccess { addr: encode_addr(id, offset), len: n, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_roundtrip() {
        let addr = encode_addr(7, 123);
        assert_eq!(decode_addr(addr), (7, 123));
    }

    #[test]
    fn allocate_then_load_store() {
        let mem = Memory::new(MemoryScope::Device);
        let addr = mem.allocate_zeroed(16);
        mem.store(addr, 4, &42u32.to_ne_bytes());
        let mut dst = [0u8; 4];
        mem.load(&mut dst, addr, 4);
        assert_eq!(u32::from_ne_bytes(dst), 42);
    }

    #[test]
    fn release_then_access_is_invalid() {
        let mem = Memory::new(MemoryScope::Device);
        let addr = mem.allocate(16);
        mem.release(addr);
        let mut dst = [0xFFu8; 4];
        let err = mem.try_load(&mut dst, addr, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidAccess { .. }));
        assert_eq!(dst, [0u8; 4]); // robust access: zero-filled on failure
    }

    #[test]
    fn out_of_bounds_store_is_noop() {
        let mem = Memory::new(MemoryScope::Device);
        let addr = mem.allocate_zeroed(4);
        let err = mem.try_store(addr + 1, 8, &[1u8; 8]).unwrap_err();
        assert!(matches!(err, Error::InvalidAccess { .. }));
    }

    #[test]
    fn released_id_is_reused() {
        let mem = Memory::new(MemoryScope::Device);
        let a = mem.allocate(8);
        mem.release(a);
        let b = mem.allocate(8);
        assert_eq!(decode_addr(a).0, decode_addr(b).0);
    }

    #[test]
    fn copy_between_same_or_different_memory() {
        let src = Memory::new(MemoryScope::Device);
        let dst = Memory::new(MemoryScope::Workgroup);
        let a = src.allocate_zeroed(4);
        src.store(a, 4, &7u32.to_ne_bytes());
        let b = dst.allocate_zeroed(4);
        dst.copy(b, &src, a, 4);
        let mut out = [0u8; 4];
        dst.load(&mut out, b, 4);
        assert_eq!(u32::from_ne_bytes(out), 7);
    }
}
