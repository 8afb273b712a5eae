//! `agent` service module.

pub mod config;
pub mod module;

pub use config::AgentConfig;
pub use module::AgentService;

arcus_kit::submit_module!(arcus_kit::ModuleRegistration::service("agent", module::build));
