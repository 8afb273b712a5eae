//! `operator` service module.
//!
//! On setup the unit rolls out the platform manifest in the background. The `status` webhook
//! answers with the last rollout report.

pub mod module;

pub use module::OperatorService;

arcus_kit::submit_module!(arcus_kit::ModuleRegistration::service("operator", module::build));
