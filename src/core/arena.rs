//! Byte arena ber-backing anonymous mmap
//!
//! Satu region tetap per ring buffer, dialokasikan sekali saat pipe dibuat:
//! - Tidak ada realloc setelah init
//! - Kegagalan mmap muncul sebagai `io::Error` (jadi OutOfMemory di atas)
//! - Akses lewat offset, bukan alamat mentah

use memmap2::{MmapMut, MmapOptions};
use std::io;

/// Region byte berukuran tetap yang dipakai bersama oleh writer dan reader.
///
/// Arena sendiri tidak tahu siapa boleh menyentuh byte mana; ring buffer
/// yang menjamin range yang ditulis dan dibaca tidak pernah overlap.
pub struct ByteArena {
    // Harus dimiliki supaya Drop melakukan munmap; pointer di bawah menunjuk ke sini
    #[allow(dead_code)]
    mmap: MmapMut,
    base: *mut u8,
    len: usize,
}

// SAFETY: ByteArena hanya memberikan akses lewat slice_mut/copy_out yang unsafe;
// caller (RingBuffer) menjamin range disjoint antar thread.
unsafe impl Send for ByteArena {}
unsafe impl Sync for ByteArena {}

impl ByteArena {
    /// Alokasi arena `len` bytes, sudah ter-zero oleh kernel
    pub fn new(len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "arena length must be non-zero",
            ));
        }

        let mut mmap = MmapOptions::new().len(len).map_anon()?;
        let base = mmap.as_mut_ptr();

        Ok(Self { mmap, base, len })
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slice mutable ke range `[offset, offset + len)`.
    ///
    /// # Safety
    /// `offset + len <= len arena`, dan caller memegang range ini secara
    /// eksklusif (sudah direservasi) sampai slice di-drop.
    #[inline(always)]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.base.add(offset), len)
    }

    /// Copy dari arena mulai `offset` ke `dst`.
    ///
    /// # Safety
    /// `offset + dst.len() <= len`, dan range tersebut sudah di-commit
    /// (tidak ada writer aktif di sana).
    #[inline(always)]
    pub unsafe fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() <= self.len);
        std::ptr::copy_nonoverlapping(self.base.add(offset), dst.as_mut_ptr(), dst.len());
    }
}

impl std::fmt::Debug for ByteArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteArena")
            .field("base", &format_args!("{:p}", self.base))
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_copy_roundtrip() {
        let arena = ByteArena::new(64).unwrap();
        assert_eq!(arena.len(), 64);

        let mut out = [0u8; 5];
        unsafe {
            arena.slice_mut(10, 5).copy_from_slice(b"hello");
            arena.copy_out(10, &mut out);
        }
        assert_eq!(&out, b"hello");
    }

    #[test]
    fn test_arena_starts_zeroed() {
        let arena = ByteArena::new(16).unwrap();
        let mut out = [0xffu8; 16];
        unsafe { arena.copy_out(0, &mut out) };
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(ByteArena::new(0).is_err());
    }
}
