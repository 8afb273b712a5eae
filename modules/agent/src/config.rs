use serde::Deserialize;

/// Settings of the `agent` service entry, as the operator generates them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AgentConfig {
    pub agent_name: String,
    pub skills: Vec<String>,
    /// Answer when no language engine can produce one.
    pub fallback: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "agent".to_owned(),
            skills: Vec::new(),
            fallback: "I can't help with that yet.".to_owned(),
        }
    }
}
