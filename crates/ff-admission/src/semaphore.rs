//! Fail-fast per-class concurrency gate.
//!
//! Every [`ResourceClass`] has an independent `active` counter bounded by its
//! configured limit. [`AdmissionControl::acquire`] is an atomic
//! check-and-increment that either hands out an [`AdmissionPermit`] or returns
//! `None`; there is no waiting and no fairness among callers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use ff_core::config::ConcurrencyConfig;
use ff_core::ResourceClass;

struct Slot {
    active: AtomicUsize,
    limit: usize,
}

struct SlotTable {
    slots: [Slot; ResourceClass::COUNT],
}

impl SlotTable {
    fn slot(&self, class: ResourceClass) -> &Slot {
        &self.slots[class.index()]
    }

    fn try_acquire(&self, class: ResourceClass) -> bool {
        let slot = self.slot(class);
        slot.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < slot.limit).then_some(active + 1)
            })
            .is_ok()
    }

    fn release(&self, class: ResourceClass) {
        let released = self
            .slot(class)
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                active.checked_sub(1)
            })
            .is_ok();
        if !released {
            tracing::warn!(class = %class, "Release on an empty admission slot ignored");
        }
    }
}

/// Point-in-time view of one class counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SlotSnapshot {
    pub class: ResourceClass,
    pub active: usize,
    pub limit: usize,
}

/// Process-wide admission counters, one per resource class.
#[derive(Clone)]
pub struct AdmissionControl {
    table: Arc<SlotTable>,
}

impl AdmissionControl {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        let slots = ResourceClass::ALL.map(|class| Slot {
            active: AtomicUsize::new(0),
            limit: config.limit_for(class),
        });
        Self {
            table: Arc::new(SlotTable { slots }),
        }
    }

    /// Try to take a slot for `class`. Returns `None` when the class is full.
    pub fn acquire(&self, class: ResourceClass) -> Option<AdmissionPermit> {
        if self.table.try_acquire(class) {
            metrics::gauge!("fileforge_admission_active", "class" => class.as_str())
                .set(self.active(class) as f64);
            Some(AdmissionPermit {
                table: self.table.clone(),
                class,
                released: false,
            })
        } else {
            tracing::debug!(class = %class, limit = self.limit(class), "Admission slot unavailable");
            None
        }
    }

    /// Give back one slot for `class`.
    ///
    /// Prefer dropping the [`AdmissionPermit`]. A release with no active slot
    /// is a caller bug; it is logged and the counter stays at zero.
    pub fn release(&self, class: ResourceClass) {
        self.table.release(class);
        metrics::gauge!("fileforge_admission_active", "class" => class.as_str())
            .set(self.active(class) as f64);
    }

    pub fn active(&self, class: ResourceClass) -> usize {
        self.table.slot(class).active.load(Ordering::Acquire)
    }

    pub fn limit(&self, class: ResourceClass) -> usize {
        self.table.slot(class).limit
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        ResourceClass::ALL
            .into_iter()
            .map(|class| SlotSnapshot {
                class,
                active: self.active(class),
                limit: self.limit(class),
            })
            .collect()
    }
}

/// Proof of a held slot. Releases the slot when dropped.
pub struct AdmissionPermit {
    table: Arc<SlotTable>,
    class: ResourceClass,
    released: bool,
}

impl AdmissionPermit {
    pub fn class(&self) -> ResourceClass {
        self.class
    }

    /// Release now instead of at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.table.release(self.class);
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for AdmissionPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPermit")
            .field("class", &self.class)
            .field("released", &self.released)
            .finish()
    }
}
