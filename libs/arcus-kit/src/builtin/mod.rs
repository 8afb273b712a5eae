//! Modules shipped with the runtime. External registrations of the same name take precedence.

pub mod dummy;
pub mod fs_db;
pub mod keyword;
pub mod memory_db;
pub mod shell;
pub mod websocket;

use crate::registry::ModuleRegistration;

pub static REGISTRATIONS: &[ModuleRegistration] = &[
    ModuleRegistration::service("dummy", dummy::build),
    ModuleRegistration::connector("shell", shell::build),
    ModuleRegistration::connector("websocket", websocket::build),
    ModuleRegistration::database("memory", memory_db::build),
    ModuleRegistration::database("fs", fs_db::build),
    ModuleRegistration::language_engine("keyword", keyword::build),
];
