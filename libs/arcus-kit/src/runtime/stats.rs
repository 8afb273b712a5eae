use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters exposed on the web surface and by the heartbeat task.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    messages_parsed: AtomicU64,
    webhooks_called: AtomicU64,
    handler_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_parsed: u64,
    pub webhooks_called: u64,
    pub handler_errors: u64,
}

impl RuntimeStats {
    pub fn record_event(&self, webhook: bool) {
        self.messages_parsed.fetch_add(1, Ordering::Relaxed);
        if webhook {
            self.webhooks_called.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_parsed: self.messages_parsed.load(Ordering::Relaxed),
            webhooks_called: self.webhooks_called.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}
