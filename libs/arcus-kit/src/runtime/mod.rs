//! The per-unit runtime: lifecycle manager, dispatcher and the context modules run with.

pub mod context;
pub mod dispatch;
pub mod manager;
pub mod slot;
pub mod stats;

pub use context::{ModuleCtx, NamedEngine, RuntimeShared};
pub use dispatch::{ERROR_HINT, ERROR_REPLY, ServiceHandle, dispatch, run_service};
pub use manager::{RuntimeState, ServiceManager};
pub use slot::{ContextGuard, RuntimeSlot};
pub use stats::{RuntimeStats, StatsSnapshot};
