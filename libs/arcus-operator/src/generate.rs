//! Unit configurations and container specs the operator generates for Arcus units.

use arcus_kit::{AppConfig, ModuleEntry, UnitConfig};
use arcus_spawner::{DeploySpec, VolumeBinding};

use crate::manifest::AgentSpec;
use crate::settings::{DATA_MOUNT, OperatorSettings};

/// Unit name of the operator itself.
pub const OPERATOR_UNIT: &str = "operator";

/// Unit name of the skill `skill`.
#[must_use]
pub fn skill_unit(skill: &str) -> String {
    format!("skill-{skill}")
}

#[must_use]
pub fn operator_config(settings: &OperatorSettings) -> UnitConfig {
    UnitConfig {
        services: vec![ModuleEntry::new("operator")],
        databases: vec![settings.database.clone()],
        connectors: settings.connectors.clone(),
        nlp: Vec::new(),
    }
}

/// The agent unit runs the `agent` service over its own connectors, or a websocket connector
/// posting as the agent when the manifest names none.
#[must_use]
pub fn agent_config(agent: &AgentSpec) -> UnitConfig {
    let connectors = agent
        .connectors
        .clone()
        .unwrap_or_else(|| vec![ModuleEntry::new("websocket").with("bot-name", agent.name.as_str())]);
    UnitConfig {
        services: vec![
            ModuleEntry::new("agent")
                .with("agent-name", agent.name.as_str())
                .with("skills", agent.skills.clone()),
        ],
        databases: Vec::new(),
        connectors,
        nlp: Vec::new(),
    }
}

#[must_use]
pub fn skill_config(settings: &OperatorSettings, skill: &str, language: &str) -> UnitConfig {
    UnitConfig {
        services: vec![
            ModuleEntry::new("skill")
                .with("skill-id", skill)
                .with("language", language),
        ],
        databases: vec![settings.database.clone()],
        connectors: settings.connectors.clone(),
        nlp: vec![ModuleEntry::new("keyword").with("skill-id", skill)],
    }
}

/// Container spec of an Arcus unit, before the distributor attaches its configuration.
///
/// Credentials of the operator's own process configuration are forwarded so units reach the
/// same database, blob store and transport.
#[must_use]
pub fn unit_container(settings: &OperatorSettings, app: &AppConfig, unit: &str) -> DeploySpec {
    let credentials = &app.credentials;
    DeploySpec::new(unit, settings.unit_image.as_str())
        .env("ARCUS_SERVICE", unit)
        .env("ARANGO_ROOT_PASSWORD", credentials.database_password.expose())
        .env("MINIO_ACCESS_KEY", credentials.blob_access_key.expose())
        .env("MINIO_SECRET_KEY", credentials.blob_secret_key.expose())
        .env("MQTT_HOST", app.transport.host.as_str())
        .env("MQTT_USER", app.transport.user.as_str())
        .env("MQTT_PASSWORD", app.transport.password.expose())
        .volume(VolumeBinding::new(settings.data_volume.as_str(), DATA_MOUNT))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use arcus_kit::Secret;
    use serde_json::json;

    #[test]
    fn agent_config_names_skills_and_default_connector() {
        let agent = AgentSpec::new("abot").with_skills(["billing"]);
        let cfg = agent_config(&agent);
        assert_eq!(cfg.services[0].name, "agent");
        assert_eq!(cfg.services[0].get("skills"), Some(&json!(["billing"])));
        assert_eq!(cfg.services[0].get("agent-name"), Some(&json!("abot")));
        assert_eq!(cfg.connectors, vec![ModuleEntry::new("websocket").with("bot-name", "abot")]);
        assert!(cfg.databases.is_empty());
    }

    #[test]
    fn agent_connectors_come_from_manifest() {
        let mut agent = AgentSpec::new("abot");
        agent.connectors = Some(vec![ModuleEntry::new("shell")]);
        assert_eq!(agent_config(&agent).connectors, vec![ModuleEntry::new("shell")]);
    }

    #[test]
    fn skill_config_trains_keyword_engine() {
        let settings = OperatorSettings::default();
        let cfg = skill_config(&settings, "billing", "en");
        assert_eq!(cfg.services[0].get("skill-id"), Some(&json!("billing")));
        assert_eq!(cfg.services[0].get("language"), Some(&json!("en")));
        assert_eq!(cfg.databases, vec![settings.database.clone()]);
        assert_eq!(cfg.nlp, vec![ModuleEntry::new("keyword").with("skill-id", "billing")]);
        assert_eq!(skill_unit("billing"), "skill-billing");
    }

    #[test]
    fn generated_configs_survive_yaml() {
        let settings = OperatorSettings::default();
        for cfg in [
            operator_config(&settings),
            agent_config(&AgentSpec::new("abot").with_skills(["billing", "weather"])),
            skill_config(&settings, "billing", "en"),
        ] {
            let yaml = cfg.to_yaml().unwrap();
            assert_eq!(UnitConfig::from_yaml(&yaml, "generated").unwrap(), cfg);
        }
    }

    #[test]
    fn unit_container_forwards_credentials() {
        let mut app = AppConfig::default();
        app.credentials.database_password = Secret::new("s3cret");
        let spec = unit_container(&OperatorSettings::default(), &app, "skill-billing");
        assert_eq!(spec.image, "eternius/arcusservice:latest");
        assert_eq!(spec.env["ARCUS_SERVICE"], "skill-billing");
        assert_eq!(spec.env["ARANGO_ROOT_PASSWORD"], "s3cret");
        assert_eq!(spec.env["MQTT_HOST"], "mqtt");
        assert_eq!(spec.volumes, vec![VolumeBinding::new("arcus-data", DATA_MOUNT)]);
    }
}
