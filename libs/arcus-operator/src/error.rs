use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse manifest '{origin}'")]
    Parse {
        origin: String,
        #[source]
        source: serde_saphyr::Error,
    },
    #[error("manifest '{origin}' has an invalid structure")]
    Structure {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Environment resolution failure for one unit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    #[error("unit '{unit}': env '{key}' references '{reference}', which no envvars entry declares")]
    Unresolved {
        unit: String,
        key: String,
        reference: String,
    },
}

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("failed to read skill definition '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse skill definition '{origin}'")]
    Parse {
        origin: String,
        #[source]
        source: serde_saphyr::Error,
    },
    #[error("skill definition '{origin}' has an invalid structure")]
    Structure {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to store intents of skill '{skill}'")]
    Store {
        skill: String,
        #[source]
        source: arcus_kit::MemoryError,
    },
}
