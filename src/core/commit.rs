//! Commit word untuk multi-writer ring buffer
//!
//! Commit cursor dan pending chunk disimpan dalam SATU `AtomicU64`,
//! jadi satu compare-and-swap meng-update keduanya sekaligus:
//!
//! ```text
//! bit  0..16  commit cursor (wp)
//! bit 16..32  chunk.begin
//! bit 32..48  chunk.end
//! bit 48..64  chunk.size
//! ```
//!
//! Semua offset adalah offset fisik `< capacity <= u16::MAX`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Jarak maju dari `from` ke `to` dalam ring berkapasitas `cap`
#[inline(always)]
pub(crate) fn distance(from: usize, to: usize, cap: usize) -> usize {
    (to + cap - from) % cap
}

/// Range yang sudah di-copy tapi belum visible ke reader, karena ada writer
/// sebelumnya yang belum selesai. `size` adalah jumlah byte yang benar-benar
/// sudah masuk; kalau `size < end - begin`, masih ada lubang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingChunk {
    pub begin: usize,
    pub end: usize,
    pub size: usize,
}

impl PendingChunk {
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Tidak ada lubang di antara begin dan end
    #[inline(always)]
    fn is_contiguous(&self, cap: usize) -> bool {
        distance(self.begin, self.end, cap) == self.size
    }
}

/// Snapshot commit word yang sudah di-unpack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitState {
    pub wp: usize,
    pub chunk: PendingChunk,
}

impl CommitState {
    #[inline(always)]
    pub(crate) fn at(wp: usize) -> Self {
        Self {
            wp,
            chunk: PendingChunk {
                begin: wp,
                end: wp,
                size: 0,
            },
        }
    }

    #[inline(always)]
    fn pack(self) -> u64 {
        (self.wp as u64 & 0xffff)
            | ((self.chunk.begin as u64 & 0xffff) << 16)
            | ((self.chunk.end as u64 & 0xffff) << 32)
            | ((self.chunk.size as u64 & 0xffff) << 48)
    }

    #[inline(always)]
    fn unpack(word: u64) -> Self {
        Self {
            wp: (word & 0xffff) as usize,
            chunk: PendingChunk {
                begin: ((word >> 16) & 0xffff) as usize,
                end: ((word >> 32) & 0xffff) as usize,
                size: ((word >> 48) & 0xffff) as usize,
            },
        }
    }

    /// State berikutnya setelah writer dengan range `[begin, end)` (len byte)
    /// selesai copy.
    ///
    /// Invariant sebelum: semua byte di `[wp, reserve)` sedang in-flight atau
    /// sudah tercatat di chunk; range writer ini disjoint dari keduanya.
    /// Invariant sesudah: sama, dengan range writer pindah ke `wp` atau chunk.
    pub(crate) fn complete(self, begin: usize, end: usize, len: usize, cap: usize) -> Self {
        let mut next = self;

        if begin == self.wp {
            // Writer tepat di commit cursor: boleh langsung publish
            next.wp = end;
        } else if self.chunk.is_empty() {
            next.chunk = PendingChunk {
                begin,
                end,
                size: len,
            };
        } else {
            // Gabung ke chunk: begin paling dekat wp, end paling jauh
            let chunk = self.chunk;
            if distance(self.wp, begin, cap) < distance(self.wp, chunk.begin, cap) {
                next.chunk.begin = begin;
            }
            if distance(self.wp, end, cap) > distance(self.wp, chunk.end, cap) {
                next.chunk.end = end;
            }
            next.chunk.size = chunk.size + len;
        }

        next.absorb(cap)
    }

    /// Normalisasi: chunk tanpa lubang yang mulai tepat di wp ikut di-commit,
    /// dan chunk kosong selalu diletakkan di wp.
    #[inline(always)]
    fn absorb(self, cap: usize) -> Self {
        if self.chunk.is_empty() {
            return Self::at(self.wp);
        }
        if self.chunk.begin == self.wp && self.chunk.is_contiguous(cap) {
            return Self::at(self.chunk.end);
        }
        self
    }
}

/// Commit word atomik
#[derive(Debug)]
pub struct AtomicCommit {
    word: AtomicU64,
}

impl AtomicCommit {
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(CommitState::at(0).pack()),
        }
    }

    #[inline(always)]
    pub fn load(&self, order: Ordering) -> CommitState {
        CommitState::unpack(self.word.load(order))
    }

    /// Publish wp baru tanpa CAS (jalur single-writer, chunk selalu kosong)
    #[inline(always)]
    pub fn store_wp(&self, wp: usize, order: Ordering) {
        self.word.store(CommitState::at(wp).pack(), order);
    }

    #[inline(always)]
    pub fn compare_exchange_weak(
        &self,
        current: CommitState,
        new: CommitState,
    ) -> Result<CommitState, CommitState> {
        self.word
            .compare_exchange_weak(
                current.pack(),
                new.pack(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(CommitState::unpack)
            .map_err(CommitState::unpack)
    }
}

impl Default for AtomicCommit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 100;

    #[test]
    fn test_pack_unpack() {
        let s = CommitState {
            wp: 65000,
            chunk: PendingChunk {
                begin: 1,
                end: 40000,
                size: 123,
            },
        };
        assert_eq!(CommitState::unpack(s.pack()), s);
    }

    #[test]
    fn test_in_order_completion() {
        let s = CommitState::at(0);
        let s = s.complete(0, 10, 10, CAP);
        assert_eq!(s, CommitState::at(10));
        let s = s.complete(10, 25, 15, CAP);
        assert_eq!(s, CommitState::at(25));
    }

    #[test]
    fn test_late_first_writer_absorbs_chunk() {
        // A = [0,10), B = [10,20); B selesai duluan
        let s = CommitState::at(0);
        let s = s.complete(10, 20, 10, CAP);
        assert_eq!(s.wp, 0);
        assert_eq!(
            s.chunk,
            PendingChunk {
                begin: 10,
                end: 20,
                size: 10
            }
        );

        let s = s.complete(0, 10, 10, CAP);
        assert_eq!(s, CommitState::at(20));
    }

    #[test]
    fn test_hole_filled_last_publishes_everything() {
        // A=[0,10) B=[10,20) C=[20,30) D=[30,40)
        // urutan selesai: B, D, A, C
        let s = CommitState::at(0);
        let s = s.complete(10, 20, 10, CAP);
        let s = s.complete(30, 40, 10, CAP);
        assert_eq!(s.chunk.size, 20);
        assert_eq!((s.chunk.begin, s.chunk.end), (10, 40));

        // A maju ke 10, tapi chunk masih berlubang di [20,30)
        let s = s.complete(0, 10, 10, CAP);
        assert_eq!(s.wp, 10);
        assert!(!s.chunk.is_empty());

        // C mengisi lubang -> semua langsung visible
        let s = s.complete(20, 30, 10, CAP);
        assert_eq!(s, CommitState::at(40));
    }

    #[test]
    fn test_wraparound_ranges() {
        // wp di 90, A=[90,5) melewati ujung, B=[5,15)
        let s = CommitState::at(90);
        let s = s.complete(5, 15, 10, CAP);
        assert_eq!(s.wp, 90);
        let s = s.complete(90, 5, 15, CAP);
        assert_eq!(s, CommitState::at(15));
    }

    #[test]
    fn test_merge_ordering_is_relative_to_wp() {
        // wp=95; pending [98,3) dan [3,8); begin harus 98 walau 98 > 3 secara angka
        let s = CommitState::at(95);
        let s = s.complete(3, 8, 5, CAP);
        let s = s.complete(98, 3, 5, CAP);
        assert_eq!((s.chunk.begin, s.chunk.end, s.chunk.size), (98, 8, 10));
        let s = s.complete(95, 98, 3, CAP);
        assert_eq!(s, CommitState::at(8));
    }

    #[test]
    fn test_every_completion_order_commits_all() {
        // 4 writer berurutan, semua permutasi urutan selesai
        let ranges = [(0usize, 7usize), (7, 20), (20, 21), (21, 40)];
        let mut orders = Vec::new();
        permute(&mut vec![0, 1, 2, 3], 0, &mut orders);
        assert_eq!(orders.len(), 24);

        for order in orders {
            let mut s = CommitState::at(0);
            for &i in &order {
                let (b, e) = ranges[i];
                s = s.complete(b, e, e - b, CAP);
            }
            assert_eq!(s, CommitState::at(40), "order {:?}", order);
        }
    }

    fn permute(v: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
        if k == v.len() {
            out.push(v.clone());
            return;
        }
        for i in k..v.len() {
            v.swap(k, i);
            permute(v, k + 1, out);
            v.swap(k, i);
        }
    }

    #[test]
    fn test_empty_chunk_follows_wp() {
        // B selesai duluan, A menutup lubang, lalu C publish langsung di wp
        let s = CommitState::at(0);
        let s = s.complete(1, 2, 1, CAP);
        let s = s.complete(0, 1, 1, CAP);
        let s = s.complete(2, 81, 79, CAP);
        assert_eq!(s.wp, 81);
        assert_eq!(
            s.chunk,
            PendingChunk {
                begin: 81,
                end: 81,
                size: 0
            }
        );
    }

    #[test]
    fn test_atomic_cas() {
        let c = AtomicCommit::new();
        let cur = c.load(Ordering::Acquire);
        let next = cur.complete(0, 4, 4, CAP);
        let mut res = c.compare_exchange_weak(cur, next);
        while res.is_err() {
            res = c.compare_exchange_weak(cur, next);
        }
        assert_eq!(c.load(Ordering::Acquire).wp, 4);

        c.store_wp(9, Ordering::Release);
        assert_eq!(c.load(Ordering::Acquire), CommitState::at(9));
    }
}
