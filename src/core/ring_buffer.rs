//! Lock-Free Byte Ring Buffer (single- atau multi-producer, single-consumer)
//!
//! Cursor disimpan sebagai offset fisik ke dalam arena, bukan pointer.
//! Satu byte selalu dikosongkan (usable = capacity - 1) supaya "kosong"
//! dan "penuh" bisa dibedakan hanya dari dua cursor.
//!
//! Jalur write:
//! - Single: cek ruang, copy, publish wp
//! - Multi: CAS di reserve cursor, copy ke range eksklusif, CAS di commit word
//!
//! Jalur read: snapshot wp sekali per call, copy maksimal sampai snapshot.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(debug_assertions)]
use std::sync::atomic::AtomicBool;

use super::arena::ByteArena;
use super::commit::{distance, AtomicCommit, PendingChunk};
use super::wait::WaitCondition;
use crate::config::{WriteMode, MAX_CAPACITY};
use crate::error::{Error, Result};

/// Berapa kali CAS reservasi boleh kalah sebelum menyerah dengan WouldBlock
const RESERVE_RETRIES: usize = 1024;

/// Padding untuk cache line isolation (64 bytes pada x86-64)
#[repr(C, align(64))]
#[derive(Debug)]
struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

/// Penanda writer aktif di mode single. Dua writer bersamaan akan mendapat
/// range arena yang overlap; build debug menangkapnya di sini.
#[cfg(debug_assertions)]
struct SingleWriterGuard<'a>(&'a AtomicBool);

#[cfg(debug_assertions)]
impl<'a> SingleWriterGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        assert!(
            !flag.swap(true, Ordering::Acquire),
            "concurrent writers on a single-writer ring"
        );
        Self(flag)
    }
}

#[cfg(debug_assertions)]
impl Drop for SingleWriterGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Snapshot semua cursor, untuk test dan logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub read: usize,
    pub commit: usize,
    pub reserve: usize,
    pub pending: PendingChunk,
}

/// Ring buffer byte-stream dengan kapasitas tetap
pub struct RingBuffer {
    // Consumer side
    rp: CacheLinePadded<AtomicUsize>,
    // Commit cursor + pending chunk, satu word
    commit: CacheLinePadded<AtomicCommit>,
    // Reserve cursor (wp_tmp); di mode single selalu sama dengan wp
    reserve: CacheLinePadded<AtomicUsize>,
    // Hanya satu consumer dalam satu waktu
    consumer: Mutex<()>,
    nonempty: Option<WaitCondition>,
    arena: ByteArena,
    capacity: usize,
    mode: WriteMode,
    #[cfg(debug_assertions)]
    writer_active: AtomicBool,
}

impl RingBuffer {
    /// Membuat ring buffer. Alokasi hanya terjadi di sini.
    ///
    /// `blocking` menentukan apakah reader boleh tidur saat buffer kosong.
    pub fn new(capacity: usize, mode: WriteMode, blocking: bool) -> Result<Self> {
        if !(2..=MAX_CAPACITY).contains(&capacity) {
            return Err(Error::InvalidConfig(format!(
                "ring capacity {} outside 2..={}",
                capacity, MAX_CAPACITY
            )));
        }

        let arena = ByteArena::new(capacity).map_err(Error::OutOfMemory)?;

        Ok(Self {
            rp: CacheLinePadded::new(AtomicUsize::new(0)),
            commit: CacheLinePadded::new(AtomicCommit::new()),
            reserve: CacheLinePadded::new(AtomicUsize::new(0)),
            consumer: Mutex::new(()),
            nonempty: blocking.then(WaitCondition::new),
            arena,
            capacity,
            mode,
            #[cfg(debug_assertions)]
            writer_active: AtomicBool::new(false),
        })
    }

    /// Baca maksimal `max_len` byte ke `buf`.
    ///
    /// - Kosong + `may_block == false`: langsung `Ok(0)`, tidak pernah tidur
    /// - Kosong + `may_block == true`: tidur sampai ada commit atau interrupt;
    ///   buffer yang tidak dikonfigurasi blocking mengembalikan `WouldBlock`
    /// - `max_len > buf.len()`: `Fault`, cursor tidak bergerak
    pub fn read(&self, buf: &mut [u8], max_len: usize, may_block: bool) -> Result<usize> {
        if max_len > buf.len() {
            return Err(Error::Fault {
                requested: max_len,
                available: buf.len(),
            });
        }
        if max_len == 0 {
            return Ok(0);
        }

        // Polling consumer tidak boleh tidur, termasuk di lock consumer
        let _consumer = if may_block {
            self.consumer.lock()
        } else {
            match self.consumer.try_lock() {
                Some(guard) => guard,
                None => return Ok(0),
            }
        };

        let cap = self.capacity;
        let mut rp = self.rp.value.load(Ordering::Relaxed);

        if self.commit.value.load(Ordering::Acquire).wp == rp {
            if !may_block {
                return Ok(0);
            }
            match &self.nonempty {
                Some(cond) => {
                    tracing::trace!(rp, "ring empty, sleeping");
                    cond.wait_until(|| self.commit.value.load(Ordering::Acquire).wp != rp)?;
                }
                None => return Err(Error::WouldBlock),
            }
        }

        // Snapshot wp: writer boleh terus maju, tapi call ini berhenti di sini
        let snapshot = self.commit.value.load(Ordering::Acquire).wp;
        let mut bytes_read;

        if snapshot > rp {
            // Tidak ada wraparound
            bytes_read = max_len.min(snapshot - rp);
            unsafe { self.arena.copy_out(rp, &mut buf[..bytes_read]) };
            rp += bytes_read;
        } else {
            // Wraparound: baca dulu dari rp sampai ujung fisik
            bytes_read = max_len.min(cap - rp);
            unsafe { self.arena.copy_out(rp, &mut buf[..bytes_read]) };
            rp += bytes_read;

            if rp == cap {
                rp = 0;
                tracing::trace!("read cursor wrapped");
                if bytes_read < max_len {
                    // rp lama belum di-publish, jadi writer belum bisa melewati
                    // titik itu; region [0, snapshot baru) aman dibaca
                    let resampled = self.commit.value.load(Ordering::Acquire).wp;
                    if resampled > rp {
                        let more = (max_len - bytes_read).min(resampled - rp);
                        unsafe {
                            self.arena
                                .copy_out(rp, &mut buf[bytes_read..bytes_read + more])
                        };
                        bytes_read += more;
                        rp += more;
                    }
                }
            }
        }

        // Release: writer baru boleh memakai ruang ini setelah copy selesai
        self.rp.value.store(rp, Ordering::Release);
        tracing::trace!(bytes_read, rp, "ring read");

        Ok(bytes_read)
    }

    /// Tulis `len` byte pertama dari `buf` sesuai mode writer.
    ///
    /// Tidak pernah blocking: ruang kurang berarti `WouldBlock` dan tidak
    /// ada cursor yang berubah.
    ///
    /// # Concurrency
    /// Di `WriteMode::Single` caller wajib menjamin paling banyak satu writer
    /// dalam satu waktu; range yang ditulis tidak direservasi. Build debug
    /// panic kalau kontrak ini dilanggar. Banyak writer butuh `WriteMode::Multi`.
    pub fn write(&self, buf: &[u8], len: usize) -> Result<usize> {
        if len > buf.len() {
            return Err(Error::Fault {
                requested: len,
                available: buf.len(),
            });
        }
        let src = &buf[..len];

        self.write_with(len, |head, tail| {
            let split = head.len();
            head.copy_from_slice(&src[..split]);
            tail.copy_from_slice(&src[split..]);
        })
    }

    /// Reservasi `len` byte, isi lewat `fill`, lalu commit.
    ///
    /// `fill` menerima range yang direservasi sebagai dua slice (bagian
    /// sebelum dan sesudah ujung fisik; yang kedua kosong kalau tidak wrap).
    /// Selama `fill` berjalan, data belum visible ke reader. `fill` tidak
    /// boleh panic: range yang sudah direservasi tidak pernah dikembalikan.
    pub fn write_with<F>(&self, len: usize, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8], &mut [u8]),
    {
        if len == 0 {
            return Ok(0);
        }
        match self.mode {
            WriteMode::Single => self.write_single(len, fill),
            WriteMode::Multi => self.write_multi(len, fill),
        }
    }

    fn write_single<F>(&self, len: usize, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8], &mut [u8]),
    {
        #[cfg(debug_assertions)]
        let _writer = SingleWriterGuard::enter(&self.writer_active);

        let cap = self.capacity;
        let rp = self.rp.value.load(Ordering::Acquire);
        // Single writer: wp hanya kita yang mengubah
        let wp = self.commit.value.load(Ordering::Relaxed).wp;

        let available = cap - 1 - distance(rp, wp, cap);
        if len > available {
            tracing::debug!(rp, wp, len, available, "not enough space in ring, not waiting");
            return Err(Error::WouldBlock);
        }

        self.fill_range(wp, len, fill);

        let new_wp = (wp + len) % cap;
        self.reserve.value.store(new_wp, Ordering::Relaxed);
        self.commit.value.store_wp(new_wp, Ordering::Release);
        tracing::trace!(from = wp, to = new_wp, "single writer committed");

        self.signal();
        Ok(len)
    }

    fn write_multi<F>(&self, len: usize, fill: F) -> Result<usize>
    where
        F: FnOnce(&mut [u8], &mut [u8]),
    {
        let cap = self.capacity;

        // 1. Reserve [begin, end) dengan CAS di reserve cursor.
        //    Invariant: reserve - rp <= cap - 1 sebelum dan sesudah swap.
        let mut retries = 0;
        let (begin, end) = loop {
            // rp dibaca sebelum reserve, jadi rp <= reserve secara logis
            let rp = self.rp.value.load(Ordering::Acquire);
            let old = self.reserve.value.load(Ordering::Acquire);
            let available = (cap - 1).saturating_sub(distance(rp, old, cap));
            if len > available {
                tracing::debug!(rp, reserve = old, len, available, "not enough space in ring");
                return Err(Error::WouldBlock);
            }

            let new = (old + len) % cap;
            if self
                .reserve
                .value
                .compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break (old, new);
            }

            retries += 1;
            if retries >= RESERVE_RETRIES {
                tracing::debug!(len, "reservation contended, giving up");
                return Err(Error::WouldBlock);
            }
            std::hint::spin_loop();
        };
        tracing::trace!(begin, end, "acquired chunk");

        // 2. Copy: range eksklusif, tidak perlu sinkronisasi antar writer
        self.fill_range(begin, len, fill);

        // 3. Commit. Tidak dibatasi: commit yang sudah dimulai tidak boleh hilang.
        //    Invariant: setiap byte di [wp, reserve) in-flight atau ada di chunk.
        let mut current = self.commit.value.load(Ordering::Acquire);
        let published = loop {
            let next = current.complete(begin, end, len, cap);
            match self.commit.value.compare_exchange_weak(current, next) {
                Ok(_) => break next.wp != current.wp,
                Err(actual) => current = actual,
            }
            std::hint::spin_loop();
        };

        if published {
            tracing::trace!(begin, end, "multi writer committed");
            self.signal();
        } else {
            tracing::trace!(begin, end, "commit deferred to pending chunk");
        }

        Ok(len)
    }

    /// Panggil `fill` dengan range `[offset, offset + len)` yang sudah direservasi
    #[inline(always)]
    fn fill_range<F>(&self, offset: usize, len: usize, fill: F)
    where
        F: FnOnce(&mut [u8], &mut [u8]),
    {
        let first = len.min(self.capacity - offset);
        // SAFETY: range sudah direservasi eksklusif untuk writer ini dan
        // tidak overlap dengan region yang belum dibaca
        unsafe {
            let head = self.arena.slice_mut(offset, first);
            let tail = self.arena.slice_mut(0, len - first);
            fill(head, tail);
        }
    }

    #[inline(always)]
    fn signal(&self) {
        if let Some(cond) = &self.nonempty {
            cond.notify();
        }
    }

    /// Bangunkan reader yang sedang tidur dengan `Interrupted`
    pub fn interrupt(&self) {
        if let Some(cond) = &self.nonempty {
            cond.interrupt();
        }
    }

    /// Jumlah byte yang visible ke reader
    #[inline]
    pub fn len(&self) -> usize {
        let rp = self.rp.value.load(Ordering::Acquire);
        let wp = self.commit.value.load(Ordering::Acquire).wp;
        distance(rp, wp, self.capacity)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ruang yang masih bisa direservasi sekarang
    #[inline]
    pub fn available(&self) -> usize {
        let rp = self.rp.value.load(Ordering::Acquire);
        let reserve = self.reserve.value.load(Ordering::Acquire);
        (self.capacity - 1).saturating_sub(distance(rp, reserve, self.capacity))
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.nonempty.is_some()
    }

    #[inline]
    pub fn write_mode(&self) -> WriteMode {
        self.mode
    }

    pub fn cursors(&self) -> Cursors {
        let commit = self.commit.value.load(Ordering::Acquire);
        Cursors {
            read: self.rp.value.load(Ordering::Acquire),
            commit: commit.wp,
            reserve: self.reserve.value.load(Ordering::Acquire),
            pending: commit.chunk,
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("mode", &self.mode)
            .field("blocking", &self.is_blocking())
            .field("cursors", &self.cursors())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn ring(cap: usize, mode: WriteMode) -> RingBuffer {
        RingBuffer::new(cap, mode, true).unwrap()
    }

    #[test]
    fn test_oversized_write_fails() {
        let rb = ring(4000, WriteMode::Single);
        let data = vec![7u8; 4100];

        assert!(matches!(rb.write(&data, 4100), Err(Error::WouldBlock)));
        assert!(rb.is_empty());
        assert_eq!(rb.cursors().commit, 0);
        assert_eq!(rb.cursors().reserve, 0);
    }

    #[test]
    fn test_partial_read_across_writes() {
        let rb = ring(4000, WriteMode::Single);
        let a: Vec<u8> = (0..10).collect();
        let b: Vec<u8> = (100..110).collect();

        assert_eq!(rb.write(&a, 10).unwrap(), 10);
        assert_eq!(rb.write(&b, 10).unwrap(), 10);

        let mut out = [0u8; 15];
        assert_eq!(rb.read(&mut out, 15, false).unwrap(), 15);
        assert_eq!(&out[..10], &a[..]);
        assert_eq!(&out[10..], &b[..5]);

        let mut rest = [0u8; 32];
        assert_eq!(rb.read(&mut rest, 32, false).unwrap(), 5);
        assert_eq!(&rest[..5], &b[5..]);
    }

    #[test]
    fn test_usable_capacity_is_one_less() {
        let rb = ring(16, WriteMode::Single);
        assert_eq!(rb.available(), 15);
        assert_eq!(rb.write(&[1u8; 15], 15).unwrap(), 15);
        assert!(matches!(rb.write(&[1u8], 1), Err(Error::WouldBlock)));
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn test_wraparound_single_and_multi() {
        for mode in [WriteMode::Single, WriteMode::Multi] {
            let rb = ring(10, mode);
            let mut out = [0u8; 16];

            // Majukan cursor ke dekat ujung
            rb.write(b"abcdefg", 7).unwrap();
            assert_eq!(rb.read(&mut out, 7, false).unwrap(), 7);

            // 6 byte: 3 sebelum ujung, 3 setelah wrap
            rb.write(b"UVWXYZ", 6).unwrap();
            assert_eq!(rb.cursors().commit, 3);
            assert_eq!(rb.read(&mut out, 16, false).unwrap(), 6);
            assert_eq!(&out[..6], b"UVWXYZ");
            assert_eq!(rb.cursors().read, 3);
        }
    }

    #[test]
    fn test_read_stops_at_physical_end_when_short() {
        let rb = ring(10, WriteMode::Single);
        let mut out = [0u8; 10];
        rb.write(b"12345678", 8).unwrap();
        rb.read(&mut out, 8, false).unwrap();
        rb.write(b"abcd", 4).unwrap();

        // max_len 2 dari rp=8: berhenti tepat di ujung, rp wrap ke 0
        assert_eq!(rb.read(&mut out, 2, false).unwrap(), 2);
        assert_eq!(&out[..2], b"ab");
        assert_eq!(rb.cursors().read, 0);
        assert_eq!(rb.read(&mut out, 10, false).unwrap(), 2);
        assert_eq!(&out[..2], b"cd");
    }

    #[test]
    fn test_nonblocking_empty_read_returns_zero() {
        let rb = ring(64, WriteMode::Single);
        let mut out = [0u8; 8];
        assert_eq!(rb.read(&mut out, 8, false).unwrap(), 0);
    }

    #[test]
    fn test_blocking_read_on_nonblocking_ring() {
        let rb = RingBuffer::new(64, WriteMode::Single, false).unwrap();
        let mut out = [0u8; 8];
        assert!(matches!(rb.read(&mut out, 8, true), Err(Error::WouldBlock)));
    }

    #[test]
    fn test_fault_leaves_cursors() {
        let rb = ring(64, WriteMode::Single);
        rb.write(b"data", 4).unwrap();
        let before = rb.cursors();

        let mut small = [0u8; 2];
        assert!(matches!(
            rb.read(&mut small, 4, false),
            Err(Error::Fault { .. })
        ));
        assert!(matches!(rb.write(b"xy", 3), Err(Error::Fault { .. })));
        assert_eq!(rb.cursors(), before);
    }

    #[test]
    fn test_blocking_read_wakes_on_write() {
        let rb = Arc::new(ring(64, WriteMode::Single));
        let reader = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut out = [0u8; 32];
                let n = rb.read(&mut out, 32, true).unwrap();
                out[..n].to_vec()
            })
        };

        thread::sleep(Duration::from_millis(20));
        rb.write(b"wake up", 7).unwrap();
        assert_eq!(reader.join().unwrap(), b"wake up");
    }

    #[test]
    fn test_interrupt_blocked_reader() {
        let rb = Arc::new(ring(64, WriteMode::Single));
        let reader = {
            let rb = rb.clone();
            thread::spawn(move || {
                let mut out = [0u8; 8];
                rb.read(&mut out, 8, true)
            })
        };

        thread::sleep(Duration::from_millis(20));
        rb.interrupt();
        assert!(matches!(reader.join().unwrap(), Err(Error::Interrupted)));
        assert_eq!(rb.cursors().read, 0);
    }

    #[test]
    fn test_multi_backpressure_no_leak() {
        let rb = ring(8, WriteMode::Multi);
        rb.write(b"12345", 5).unwrap();
        let before = rb.cursors();
        assert!(matches!(rb.write(b"abc", 3), Err(Error::WouldBlock)));
        assert_eq!(rb.cursors(), before);
        assert_eq!(rb.write(b"ab", 2).unwrap(), 2);
    }

    #[test]
    fn test_staggered_completion_commits_in_reservation_order() {
        let rb = Arc::new(ring(128, WriteMode::Multi));
        let a_reserved = Arc::new(Barrier::new(2));
        let b_done = Arc::new(Barrier::new(2));

        let a = {
            let (rb, a_reserved, b_done) = (rb.clone(), a_reserved.clone(), b_done.clone());
            thread::spawn(move || {
                rb.write_with(4, |head, tail| {
                    // A sudah punya range, tunggu B selesai dulu
                    a_reserved.wait();
                    b_done.wait();
                    head.copy_from_slice(&b"AAAA"[..head.len()]);
                    tail.copy_from_slice(&b"AAAA"[head.len()..]);
                })
            })
        };

        a_reserved.wait();
        rb.write(b"BBBB", 4).unwrap();

        // B sudah di buffer tapi belum visible
        let mut out = [0u8; 16];
        assert_eq!(rb.read(&mut out, 16, false).unwrap(), 0);
        assert_eq!(rb.cursors().pending.size, 4);

        b_done.wait();
        assert_eq!(a.join().unwrap().unwrap(), 4);

        assert_eq!(rb.read(&mut out, 16, false).unwrap(), 8);
        assert_eq!(&out[..8], b"AAAABBBB");
        assert!(rb.cursors().pending.is_empty());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "concurrent writers")]
    fn test_overlapping_single_writers_detected() {
        let rb = ring(64, WriteMode::Single);
        rb.write_with(4, |head, _tail| {
            // Writer kedua masuk sebelum yang pertama commit
            let _ = rb.write(b"x", 1);
            head.fill(b'a');
        })
        .unwrap();
    }

    #[test]
    fn test_sequential_single_writers_allowed() {
        let rb = ring(64, WriteMode::Single);
        for _ in 0..100 {
            rb.write(b"ab", 2).unwrap();
            let mut out = [0u8; 2];
            assert_eq!(rb.read(&mut out, 2, false).unwrap(), 2);
        }
    }
}
