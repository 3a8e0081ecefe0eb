//! Registry: tabel slot pipe berukuran tetap
//!
//! Satu lock kasar untuk bookkeeping slot saja. I/O buffer tidak pernah
//! terjadi di bawah lock ini, jadi read/write di pipe mana pun tidak
//! pernah berebut dengan open/close.

use parking_lot::{Mutex, MutexGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::duplex::{Pipe, PipeId};
use crate::config::PipeConfig;
use crate::error::{Error, Result};

/// Interval cek interrupt saat menunggu lock registry
const LOCK_SLICE: Duration = Duration::from_millis(5);

struct Slot {
    pipe: Option<Arc<Pipe>>,
    generation: u32,
}

pub(crate) struct Slots {
    slots: Vec<Slot>,
    count: usize,
}

/// Handle ke pipe yang sedang terbuka. Kepemilikan buffer kembali ke
/// registry saat `release`; buffer benar-benar dibebaskan ketika handle
/// terakhir di-drop.
#[derive(Clone)]
pub struct PipeHandle {
    pipe: Arc<Pipe>,
}

impl PipeHandle {
    #[inline]
    pub fn id(&self) -> PipeId {
        self.pipe.id()
    }
}

impl Deref for PipeHandle {
    type Target = Pipe;

    fn deref(&self) -> &Pipe {
        &self.pipe
    }
}

impl std::fmt::Debug for PipeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PipeHandle").field(&self.id()).finish()
    }
}

/// Tabel maksimal `max_pipes` pipe
pub struct Registry {
    config: PipeConfig,
    slots: Mutex<Slots>,
    interrupted: AtomicBool,
}

impl Registry {
    pub fn new(config: PipeConfig) -> Result<Self> {
        config.validate()?;

        let slots = (0..config.max_pipes)
            .map(|_| Slot {
                pipe: None,
                generation: 0,
            })
            .collect();

        Ok(Self {
            config,
            slots: Mutex::new(Slots { slots, count: 0 }),
            interrupted: AtomicBool::new(false),
        })
    }

    /// Lock slot table. Menunggu bisa di-interrupt lewat [`Registry::interrupt`].
    fn lock_slots(&self) -> Result<MutexGuard<'_, Slots>> {
        loop {
            if let Some(guard) = self.slots.try_lock_for(LOCK_SLICE) {
                // Interrupt hanya berlaku untuk wait yang sedang berjalan
                self.interrupted.store(false, Ordering::Release);
                return Ok(guard);
            }
            if self.interrupted.swap(false, Ordering::AcqRel) {
                tracing::debug!("registry lock wait interrupted");
                return Err(Error::Interrupted);
            }
        }
    }

    /// Batalkan wait lock registry yang sedang berjalan dengan `Interrupted`
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    /// Ambil slot kosong dengan index terkecil dan alokasikan pipe baru.
    pub fn acquire(&self) -> Result<PipeHandle> {
        let mut table = self.lock_slots()?;

        let index = match table.slots.iter().position(|s| s.pipe.is_none()) {
            Some(index) => index,
            None => {
                tracing::warn!(max = self.config.max_pipes, "max pipes registered");
                return Err(Error::OutOfSlots {
                    max: self.config.max_pipes,
                });
            }
        };

        let id = PipeId {
            index,
            generation: table.slots[index].generation,
        };
        // Gagal alokasi: slot belum disentuh, tidak ada yang perlu di-rollback
        let pipe = Arc::new(Pipe::new(id, &self.config)?);

        table.slots[index].pipe = Some(Arc::clone(&pipe));
        table.count += 1;
        let count = table.count;
        drop(table);

        tracing::info!(%id, count, "pipe opened");
        Ok(PipeHandle { pipe })
    }

    /// Kosongkan slot `id`. Buffer dibebaskan di luar lock.
    pub fn release(&self, id: PipeId) -> Result<()> {
        let table = self.lock_slots()?;
        self.remove(table, id)
    }

    /// Seperti `release`, tapi menunggu lock tanpa bisa di-interrupt.
    /// Dipakai dari Drop, di mana tidak ada caller yang bisa retry.
    pub(crate) fn release_uninterruptible(&self, id: PipeId) -> Result<()> {
        let table = self.slots.lock();
        self.remove(table, id)
    }

    fn remove(&self, mut table: MutexGuard<'_, Slots>, id: PipeId) -> Result<()> {
        let slot = match table.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation && slot.pipe.is_some() => slot,
            _ => return Err(Error::StaleHandle(id)),
        };

        let pipe = slot.pipe.take();
        if let Some(pipe) = &pipe {
            pipe.mark_closed();
        }
        slot.generation = slot.generation.wrapping_add(1);
        table.count -= 1;
        let count = table.count;
        drop(table);

        // Drop Arc di luar lock
        drop(pipe);
        tracing::info!(%id, count, "pipe closed");
        Ok(())
    }

    /// Cari pipe yang masih terbuka. Id basi ditolak dengan `StaleHandle`.
    pub fn lookup(&self, id: PipeId) -> Result<PipeHandle> {
        let table = self.slots.lock();
        match table.slots.get(id.index) {
            Some(Slot {
                pipe: Some(pipe),
                generation,
            }) if *generation == id.generation => Ok(PipeHandle {
                pipe: Arc::clone(pipe),
            }),
            _ => Err(Error::StaleHandle(id)),
        }
    }

    /// Id semua pipe yang sedang terbuka, urut index
    pub fn open_ids(&self) -> Vec<PipeId> {
        let table = self.slots.lock();
        table
            .slots
            .iter()
            .filter_map(|s| s.pipe.as_ref().map(|p| p.id()))
            .collect()
    }

    /// Release semua pipe dan bangunkan reader yang masih tidur.
    /// Returns jumlah pipe yang ditutup.
    pub fn release_all(&self) -> usize {
        let mut table = self.slots.lock();
        let mut closed = Vec::with_capacity(table.count);
        for slot in table.slots.iter_mut() {
            if let Some(pipe) = slot.pipe.take() {
                pipe.mark_closed();
                slot.generation = slot.generation.wrapping_add(1);
                closed.push(pipe);
            }
        }
        table.count = 0;
        drop(table);

        for pipe in &closed {
            pipe.interrupt();
        }
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "released all pipes");
        }
        closed.len()
    }

    /// Pegang lock slot table sampai guard di-drop
    #[cfg(test)]
    pub(crate) fn hold_lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock()
    }

    /// Jumlah pipe terbuka
    pub fn len(&self) -> usize {
        self.slots.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jumlah slot total
    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.max_pipes
    }

    #[inline]
    pub fn config(&self) -> &PipeConfig {
        &self.config
    }
}
