//! Two-level environment resolution for infrastructure units.
//!
//! `envvars` declares defaults that the operator's own environment may override. `env` is what
//! the container receives: each value is either a literal or `envvar:<KEY>`, which takes the
//! resolved `envvars` value of `KEY`.

use std::collections::BTreeMap;

use crate::error::EnvError;
use crate::manifest::ExternalService;

/// Marks an `env` value as a reference into the resolved `envvars`.
pub const ENVVAR_PREFIX: &str = "envvar:";

/// Reads the operator's process environment.
#[must_use]
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolve the environment passed to the container of `service`.
///
/// Only `env` entries end up in the result.
///
/// # Errors
/// `EnvError::Unresolved` when an `envvar:` reference names a key no `envvars` entry declares.
pub fn resolve_env<F>(service: &ExternalService, lookup: F) -> Result<BTreeMap<String, String>, EnvError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut defaults = BTreeMap::new();
    for (key, default) in service.envvars.iter().flatten() {
        let value = lookup(key).unwrap_or_else(|| default.as_str().to_owned());
        defaults.insert(key.as_str(), value);
    }

    let mut env = BTreeMap::new();
    for (key, value) in service.env.iter().flatten() {
        let resolved = match value.as_str().strip_prefix(ENVVAR_PREFIX) {
            Some(reference) => defaults
                .get(reference)
                .cloned()
                .ok_or_else(|| EnvError::Unresolved {
                    unit: service.name.clone(),
                    key: key.clone(),
                    reference: reference.to_owned(),
                })?,
            None => value.as_str().to_owned(),
        };
        env.insert(key.clone(), resolved);
    }
    Ok(env)
}
