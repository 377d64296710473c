//! Memory owned by an instance: the data segment and the profiling counters.
//!
//! Both live in raw heap allocations rather than `Vec`s because compiled code writes to them
//! through pointers in the `VmCtx` while the owning `Instance` may be reborrowed by a re-entrant
//! host call.

use crate::error::Error;
use byteorder::{ByteOrder, LittleEndian};
use qvm_module::Module;
use std::alloc::{self, Layout};
use std::ffi::CStr;
use std::ptr::NonNull;

struct RawRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawRegion {
    fn zeroed(size: usize, align: usize) -> Result<RawRegion, Error> {
        let layout = Layout::from_size_align(size.max(1), align)
            .map_err(|e| qvm_format_err!("bad layout for {} bytes: {}", size, e))?;
        // safety: the layout has a non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        qvm_ensure!(!ptr.is_null(), "failed to allocate {} bytes", layout.size());
        // safety: checked for null above
        let ptr = unsafe { NonNull::new_unchecked(ptr) };
        Ok(RawRegion { ptr, layout })
    }
}

impl Drop for RawRegion {
    fn drop(&mut self) {
        // safety: allocated in `zeroed` with the same layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

// raw pointers require unsafe impl
unsafe impl Send for RawRegion {}

/// The flat, power-of-two sized memory a module addresses.
///
/// Module addresses are masked before use, so every access stays inside the segment; 2- and
/// 4-byte accesses are additionally aligned down. Values are little-endian.
pub struct DataSegment {
    region: RawRegion,
    size: u32,
}

impl DataSegment {
    pub fn new(size: u32) -> Result<DataSegment, Error> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidArgument(
                "data segment size must be a power of two",
            ));
        }
        Ok(DataSegment {
            region: RawRegion::zeroed(size as usize, 16)?,
            size,
        })
    }

    /// A fresh segment for `module`: zeroed, then the data words and literals copied in.
    pub fn for_module(module: &Module) -> Result<DataSegment, Error> {
        let mut segment = DataSegment::new(module.segment_size())?;
        let init = module.data_image();
        segment.as_mut_slice()[..init.len()].copy_from_slice(init);
        Ok(segment)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn mask(&self) -> u32 {
        self.size - 1
    }

    pub fn as_slice(&self) -> &[u8] {
        // safety: the region holds `size` initialized bytes
        unsafe { std::slice::from_raw_parts(self.region.ptr.as_ptr(), self.size as usize) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // safety: the region holds `size` initialized bytes and `&mut self` is unique
        unsafe { std::slice::from_raw_parts_mut(self.region.ptr.as_ptr(), self.size as usize) }
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.region.ptr.as_ptr()
    }

    /// The effective address of a module address.
    #[inline]
    pub fn mask_addr(&self, addr: i32) -> usize {
        (addr as u32 & self.mask()) as usize
    }

    #[inline]
    pub fn load1(&self, addr: i32) -> i32 {
        self.as_slice()[self.mask_addr(addr)] as i32
    }

    #[inline]
    pub fn load2(&self, addr: i32) -> i32 {
        let a = self.mask_addr(addr) & !1;
        LittleEndian::read_u16(&self.as_slice()[a..a + 2]) as i32
    }

    #[inline]
    pub fn load4(&self, addr: i32) -> i32 {
        let a = self.mask_addr(addr) & !3;
        LittleEndian::read_i32(&self.as_slice()[a..a + 4])
    }

    #[inline]
    pub fn store1(&mut self, addr: i32, value: i32) {
        let a = self.mask_addr(addr);
        self.as_mut_slice()[a] = value as u8;
    }

    #[inline]
    pub fn store2(&mut self, addr: i32, value: i32) {
        let a = self.mask_addr(addr) & !1;
        LittleEndian::write_u16(&mut self.as_mut_slice()[a..a + 2], value as u16);
    }

    #[inline]
    pub fn store4(&mut self, addr: i32, value: i32) {
        let a = self.mask_addr(addr) & !3;
        LittleEndian::write_i32(&mut self.as_mut_slice()[a..a + 4], value);
    }

    pub fn block_copy(&mut self, dest: i32, src: i32, count: i32) {
        block_copy(self.as_mut_slice(), dest, src, count)
    }

    fn checked_range(&self, addr: i32, len: usize) -> Result<std::ops::Range<usize>, Error> {
        let start = self.mask_addr(addr);
        match start.checked_add(len) {
            Some(end) if end <= self.size as usize => Ok(start..end),
            _ => Err(Error::InvalidArgument("memory range outside the data segment")),
        }
    }

    /// `len` bytes at a module address, which must not run past the end of the segment.
    pub fn slice(&self, addr: i32, len: usize) -> Result<&[u8], Error> {
        let range = self.checked_range(addr, len)?;
        Ok(&self.as_slice()[range])
    }

    pub fn slice_mut(&mut self, addr: i32, len: usize) -> Result<&mut [u8], Error> {
        let range = self.checked_range(addr, len)?;
        Ok(&mut self.as_mut_slice()[range])
    }

    /// A NUL-terminated string at a module address.
    pub fn cstr(&self, addr: i32) -> Result<&CStr, Error> {
        let start = self.mask_addr(addr);
        let bytes = &self.as_slice()[start..];
        let nul = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::InvalidArgument("string runs past the data segment"))?;
        CStr::from_bytes_with_nul(&bytes[..=nul])
            .map_err(|e| qvm_format_err!("malformed module string: {}", e))
    }
}

/// Copies `count` bytes inside `memory` with `memmove` semantics.
///
/// Both addresses are masked and the count is clamped so neither range leaves the segment.
/// `memory.len()` must be a power of two.
pub fn block_copy(memory: &mut [u8], dest: i32, src: i32, count: i32) {
    let size = memory.len();
    let mask = size as u32 - 1;
    let dest = (dest as u32 & mask) as usize;
    let src = (src as u32 & mask) as usize;
    let count = (count.max(0) as usize).min(size - dest).min(size - src);
    memory.copy_within(src..src + count, dest);
}

/// Per-function call counters followed by the breakpoint hit counter.
pub struct Counters {
    region: RawRegion,
    functions: usize,
}

impl Counters {
    pub fn new(functions: usize) -> Result<Counters, Error> {
        let bytes = (functions + 1) * std::mem::size_of::<u32>();
        Ok(Counters {
            region: RawRegion::zeroed(bytes, std::mem::align_of::<u32>())?,
            functions,
        })
    }

    fn slot(&self, index: usize) -> *mut u32 {
        assert!(index <= self.functions);
        // safety: in bounds of the region per the assertion
        unsafe { (self.region.ptr.as_ptr() as *mut u32).add(index) }
    }

    pub fn bump_call(&self, ordinal: usize) {
        let p = self.slot(ordinal);
        // safety: no references into the region are ever handed out
        unsafe { p.write(p.read().wrapping_add(1)) }
    }

    pub fn bump_break(&self) {
        let p = self.slot(self.functions);
        unsafe { p.write(p.read().wrapping_add(1)) }
    }

    pub fn calls(&self, ordinal: usize) -> u32 {
        unsafe { self.slot(ordinal).read() }
    }

    pub fn break_count(&self) -> u32 {
        unsafe { self.slot(self.functions).read() }
    }

    pub fn clear(&self) {
        for i in 0..=self.functions {
            unsafe { self.slot(i).write(0) }
        }
    }

    pub(crate) fn call_counts_ptr(&self) -> *mut u32 {
        self.slot(0)
    }

    pub(crate) fn break_count_ptr(&self) -> *mut u32 {
        self.slot(self.functions)
    }
}
