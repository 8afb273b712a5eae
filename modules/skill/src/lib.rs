//! `skill` service module.
//!
//! Webhooks `parse`, `next_step` and `generic_action` forward their JSON body to the unit's
//! language engine and answer with the engine's result. Messages addressed to the skill id get
//! the engine's next response as text.

pub mod config;
pub mod module;

pub use config::SkillConfig;
pub use module::SkillService;

arcus_kit::submit_module!(arcus_kit::ModuleRegistration::service("skill", module::build));
