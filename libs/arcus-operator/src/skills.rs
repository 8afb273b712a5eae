//! Skill definitions and their import into the shared memory.
//!
//! ```yaml
//! intents:
//!   - name: pay_bill
//!     examples: ["I want to pay my bill", "pay the invoice"]
//!     function: pay
//!     responses: ["Sure, let's pay it."]
//!     form:
//!       - name: amount
//!         required: true
//!         type: number
//!         question: How much?
//! ```

use arcus_kit::Memory;
use arcus_kit::builtin::keyword::intents_collection;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

use crate::error::SkillError;

/// One slot of an intent's form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormSlot {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub validation_function: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub response_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntentDefinition {
    pub name: String,
    #[serde(default)]
    pub examples: Vec<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub form: Vec<FormSlot>,
}

impl IntentDefinition {
    /// The memory record of this intent.
    #[must_use]
    pub fn record(&self) -> Value {
        json!({
            "examples": self.examples,
            "function": self.function.clone().unwrap_or_default(),
            "slot": self.form,
            "responses": { "default": self.responses },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SkillDefinition {
    pub intents: Vec<IntentDefinition>,
}

impl SkillDefinition {
    /// Definition file of `skill` inside `data_dir`.
    #[must_use]
    pub fn path(data_dir: &Path, skill: &str) -> PathBuf {
        data_dir.join(format!("{skill}.yml"))
    }

    /// # Errors
    /// `SkillError::Parse` for malformed YAML, `SkillError::Structure` for a wrong shape.
    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, SkillError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: Value = serde_saphyr::from_str(content).map_err(|source| SkillError::Parse {
            origin: origin.to_owned(),
            source,
        })?;
        if raw.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(raw).map_err(|source| SkillError::Structure {
            origin: origin.to_owned(),
            source,
        })
    }

    /// Load the definition of `skill`; `Ok(None)` when no file exists.
    ///
    /// # Errors
    /// Read errors other than a missing file, and the parse errors of [`Self::from_yaml`].
    pub async fn load(data_dir: &Path, skill: &str) -> Result<Option<Self>, SkillError> {
        let path = Self::path(data_dir, skill);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SkillError::Read { path, source }),
        };
        Self::from_yaml(&content, &path.display().to_string()).map(Some)
    }
}

/// Write one `<skill>_intents` record per intent. Returns the number of intents stored.
///
/// # Errors
/// `SkillError::Store` when a backend rejects a write.
pub async fn import_skill(memory: &Memory, skill: &str, definition: &SkillDefinition) -> Result<usize, SkillError> {
    let collection = intents_collection(skill);
    for intent in &definition.intents {
        memory
            .put(&collection, &intent.name, &intent.record())
            .await
            .map_err(|source| SkillError::Store {
                skill: skill.to_owned(),
                source,
            })?;
    }
    tracing::info!(skill, intents = definition.intents.len(), "Skill definition imported");
    Ok(definition.intents.len())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use arcus_kit::builtin::memory_db::MemoryDatabase;
    use arcus_kit::builtin::keyword::KeywordEngine;
    use arcus_kit::{DatabaseInstance, LanguageEngine};
    use std::sync::Arc;

    const BILLING: &str = r#"
intents:
  - name: pay_bill
    examples: ["I want to pay my bill", "pay the invoice"]
    function: pay
    responses: ["Sure, let's pay it."]
    form:
      - name: amount
        required: true
        type: number
        question: How much?
  - name: balance
    examples: ["what is my balance"]
    responses: ["Your balance is on its way."]
"#;

    async fn memory() -> Memory {
        let memory = Memory::new();
        let db = DatabaseInstance::new("memory", Arc::new(MemoryDatabase::default()));
        db.connect().await.unwrap();
        memory.add(db);
        memory
    }

    #[test]
    fn parses_intents_and_forms() {
        let def = SkillDefinition::from_yaml(BILLING, "billing.yml").unwrap();
        assert_eq!(def.intents.len(), 2);
        assert_eq!(def.intents[0].form[0].kind.as_deref(), Some("number"));
        assert!(def.intents[0].form[0].required);
        assert_eq!(def.intents[1].function, None);
        assert!(SkillDefinition::from_yaml("intents:\n  - name: a\n    colour: red\n", "bad").is_err());
    }

    #[tokio::test]
    async fn imported_skill_trains_keyword_engine() {
        let memory = memory().await;
        let def = SkillDefinition::from_yaml(BILLING, "billing.yml").unwrap();
        assert_eq!(import_skill(&memory, "billing", &def).await.unwrap(), 2);

        let record = memory.get("billing_intents", "pay_bill").await.unwrap();
        assert_eq!(record["function"], "pay");
        assert_eq!(record["slot"][0]["name"], "amount");
        assert_eq!(record["responses"]["default"][0], "Sure, let's pay it.");
        assert_eq!(memory.get("billing_intents", "balance").await.unwrap()["function"], "");

        let engine = KeywordEngine::new("billing");
        engine.train(&memory).await.unwrap();
        let parsed = engine.parse_text("pay my bill").await.unwrap();
        assert_eq!(parsed["intent"], "pay_bill");
    }

    #[tokio::test]
    async fn missing_definition_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(SkillDefinition::load(dir.path(), "billing").await.unwrap(), None);

        tokio::fs::write(dir.path().join("billing.yml"), BILLING).await.unwrap();
        let def = SkillDefinition::load(dir.path(), "billing").await.unwrap().unwrap();
        assert_eq!(def.intents[0].name, "pay_bill");
    }
}
