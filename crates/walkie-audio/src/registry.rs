use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AddDeviceError;
use crate::ring_buffer::SampleRingBuffer;

/// Default upper bound on simultaneously active devices.
pub const MAX_DEVICES: usize = 8;

/// Marks a slot with no device in it.
const VACANT: u64 = u64::MAX;

/// Identity of a device while it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw integer id.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for DeviceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registry slot. The id is readable without locking so lookups from the
/// audio thread never contend with each other; the buffer lock is held only
/// for the duration of a single copy.
struct Slot {
    id: AtomicU64,
    buffer: Mutex<SampleRingBuffer>,
}

impl Slot {
    fn holds(&self, id: DeviceId) -> bool {
        self.id.load(Ordering::Acquire) == u64::from(id.0)
    }

    fn occupant(&self) -> Option<DeviceId> {
        match self.id.load(Ordering::Acquire) {
            VACANT => None,
            // Stored values always come from a u32.
            raw => u32::try_from(raw).ok().map(DeviceId),
        }
    }
}

/// Bounded set of active devices, each owning one [`SampleRingBuffer`].
///
/// Every slot's buffer is allocated up front, so adding a device only zeroes
/// and activates a slot. Writers and readers synchronise per device; the
/// membership lock serialises add/remove/clear and is never taken on the
/// audio path.
pub struct DeviceRegistry {
    slots: Box<[Slot]>,
    membership: Mutex<()>,
    active: AtomicUsize,
    buffer_capacity: usize,
}

impl DeviceRegistry {
    /// Allocate `max_devices` slots with buffers of `buffer_capacity` samples
    /// (rounded up to a power of two).
    pub fn new(max_devices: usize, buffer_capacity: usize) -> Self {
        let slots: Box<[Slot]> = (0..max_devices)
            .map(|_| Slot {
                id: AtomicU64::new(VACANT),
                buffer: Mutex::new(SampleRingBuffer::new(buffer_capacity)),
            })
            .collect();
        let buffer_capacity = slots
            .first()
            .map_or(buffer_capacity, |s| s.buffer.lock().capacity());

        tracing::debug!(max_devices, buffer_capacity, "device registry allocated");
        Self {
            slots,
            membership: Mutex::new(()),
            active: AtomicUsize::new(0),
            buffer_capacity,
        }
    }

    /// Register a device. Returns `false` without mutating anything if the id
    /// is already present or the registry is full.
    pub fn add_device(&self, id: DeviceId) -> bool {
        self.try_add_device(id).is_ok()
    }

    /// Like [`add_device`](Self::add_device) but reports why a device was refused.
    pub fn try_add_device(&self, id: DeviceId) -> Result<(), AddDeviceError> {
        let _guard = self.membership.lock();

        if self.find(id).is_some() {
            tracing::debug!(device = %id, "device already registered");
            return Err(AddDeviceError::AlreadyPresent);
        }
        let Some(slot) = self.slots.iter().find(|s| s.occupant().is_none()) else {
            tracing::info!(device = %id, max = self.slots.len(), "maximum devices reached");
            return Err(AddDeviceError::RegistryFull(self.slots.len()));
        };

        let mut buffer = slot.buffer.lock();
        buffer.clear();
        slot.id.store(u64::from(id.0), Ordering::Release);
        drop(buffer);

        self.active.fetch_add(1, Ordering::AcqRel);
        tracing::info!(device = %id, "device added to mixer");
        Ok(())
    }

    /// Deactivate a device and wipe its buffer. No-op if the id is absent;
    /// returns whether a device was actually removed.
    pub fn remove_device(&self, id: DeviceId) -> bool {
        let _guard = self.membership.lock();

        let Some(slot) = self.find(id) else {
            return false;
        };
        Self::vacate(slot);
        self.active.fetch_sub(1, Ordering::AcqRel);
        tracing::info!(device = %id, "device removed from mixer");
        true
    }

    /// Write samples into a device's buffer. Silently ignores unknown ids,
    /// including ids removed concurrently with this call.
    pub fn update_device_audio(&self, id: DeviceId, samples: &[i16]) {
        let Some(slot) = self.find(id) else {
            return;
        };
        let mut buffer = slot.buffer.lock();
        // Re-check under the lock: the device may have been removed meanwhile.
        if slot.holds(id) {
            buffer.write(samples);
        }
    }

    /// Deactivate and wipe every device.
    pub fn clear(&self) {
        let _guard = self.membership.lock();

        for slot in self.slots.iter().filter(|s| s.occupant().is_some()) {
            Self::vacate(slot);
        }
        self.active.store(0, Ordering::Release);
        tracing::info!("mixer cleared");
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.find(id).is_some()
    }

    /// Snapshot of the currently active ids, in slot order.
    pub fn active_ids(&self) -> Vec<DeviceId> {
        self.slots.iter().filter_map(Slot::occupant).collect()
    }

    /// Number of active devices.
    pub fn len(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_devices(&self) -> usize {
        self.slots.len()
    }

    /// Per-device buffer capacity in samples.
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Visit every active device's buffer except `exclude`, holding each
    /// device's lock only while `f` runs for it.
    pub(crate) fn for_each_other(&self, exclude: DeviceId, mut f: impl FnMut(&SampleRingBuffer)) {
        for slot in &*self.slots {
            let Some(id) = slot.occupant() else {
                continue;
            };
            if id == exclude {
                continue;
            }
            let buffer = slot.buffer.lock();
            if slot.holds(id) {
                f(&buffer);
            }
        }
    }

    fn find(&self, id: DeviceId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.holds(id))
    }

    fn vacate(slot: &Slot) {
        let mut buffer = slot.buffer.lock();
        slot.id.store(VACANT, Ordering::Release);
        buffer.clear();
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(MAX_DEVICES, crate::config::EngineConfig::default().ring_capacity())
    }
}
