use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use crate::error::FatalError;

static PROCESS_SLOT: LazyLock<RuntimeSlot> = LazyLock::new(RuntimeSlot::new);

/// Authority over "at most one active runtime".
///
/// Only [`enter`](Self::enter) can occupy the slot, and only dropping the returned guard frees
/// it. The binary uses [`RuntimeSlot::process`]; tests build private slots.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSlot {
    occupied: Arc<AtomicBool>,
}

impl RuntimeSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide slot.
    #[must_use]
    pub fn process() -> Self {
        PROCESS_SLOT.clone()
    }

    /// Occupy the slot.
    ///
    /// # Errors
    /// `FatalError::AlreadyActive` while another guard from this slot is alive; the holder of
    /// that guard is unaffected.
    pub fn enter(&self) -> Result<ContextGuard, FatalError> {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FatalError::AlreadyActive)?;
        Ok(ContextGuard {
            occupied: Arc::clone(&self.occupied),
        })
    }

    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }
}

/// Proof that the holder is the active runtime. Frees the slot on drop.
#[derive(Debug)]
pub struct ContextGuard {
    occupied: Arc<AtomicBool>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.occupied.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn second_enter_fails_until_guard_drops() {
        let slot = RuntimeSlot::new();
        let guard = slot.enter().unwrap();
        assert!(matches!(slot.enter(), Err(FatalError::AlreadyActive)));
        assert!(slot.is_occupied());
        drop(guard);
        assert!(!slot.is_occupied());
        let _again = slot.enter().unwrap();
    }

    #[test]
    fn private_slots_are_independent() {
        let a = RuntimeSlot::new();
        let b = RuntimeSlot::new();
        let _ga = a.enter().unwrap();
        let _gb = b.enter().unwrap();
    }
}
