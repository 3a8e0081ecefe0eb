//! Wait condition "buffer tidak kosong", satu per ring buffer
//!
//! Reader tidur di sini; writer membangunkan setelah commit. Writer hanya
//! menyentuh mutex kalau memang ada reader yang tidur (`sleepers > 0`),
//! jadi jalur write biasa tetap tanpa lock.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub struct WaitCondition {
    lock: Mutex<()>,
    cond: Condvar,
    sleepers: AtomicUsize,
    interrupted: AtomicBool,
}

impl WaitCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tidur sampai `ready()` true atau ada interrupt.
    ///
    /// Interrupt yang datang saat tidak ada yang menunggu tetap pending dan
    /// dikonsumsi oleh wait berikutnya yang benar-benar harus tidur.
    pub fn wait_until<F: Fn() -> bool>(&self, ready: F) -> Result<()> {
        if ready() {
            return Ok(());
        }

        let mut guard = self.lock.lock();
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        // Pasangan fence di notify(): salah satu pihak pasti melihat yang lain
        fence(Ordering::SeqCst);

        let res = loop {
            if ready() {
                break Ok(());
            }
            if self.interrupted.swap(false, Ordering::SeqCst) {
                break Err(Error::Interrupted);
            }
            self.cond.wait(&mut guard);
        };

        self.sleepers.fetch_sub(1, Ordering::SeqCst);
        res
    }

    /// Bangunkan reader yang tidur. Dipanggil writer SETELAH commit cursor maju.
    #[inline]
    pub fn notify(&self) {
        fence(Ordering::SeqCst);
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        // Lock memastikan reader sudah ada di dalam cond.wait
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Kirim "signal" ke reader yang tidur (atau reader berikutnya)
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Jumlah reader yang sedang tidur
    #[inline]
    pub fn sleepers(&self) -> usize {
        self.sleepers.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ready_returns_immediately() {
        let w = WaitCondition::new();
        assert!(w.wait_until(|| true).is_ok());
        assert_eq!(w.sleepers(), 0);
    }

    #[test]
    fn test_notify_wakes_sleeper() {
        let w = Arc::new(WaitCondition::new());
        let flag = Arc::new(AtomicBool::new(false));

        let (w2, f2) = (w.clone(), flag.clone());
        let t = thread::spawn(move || w2.wait_until(|| f2.load(Ordering::Acquire)));

        while w.sleepers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        flag.store(true, Ordering::Release);
        w.notify();

        assert!(t.join().unwrap().is_ok());
    }

    #[test]
    fn test_interrupt_aborts_wait() {
        let w = Arc::new(WaitCondition::new());
        let w2 = w.clone();
        let t = thread::spawn(move || w2.wait_until(|| false));

        while w.sleepers() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        w.interrupt();

        assert!(matches!(t.join().unwrap(), Err(Error::Interrupted)));
        assert_eq!(w.sleepers(), 0);
    }

    #[test]
    fn test_pending_interrupt_consumed_once() {
        let w = WaitCondition::new();
        w.interrupt();
        assert!(matches!(w.wait_until(|| false), Err(Error::Interrupted)));
        // Sudah dikonsumsi: wait yang ready tetap sukses
        assert!(w.wait_until(|| true).is_ok());
    }
}
