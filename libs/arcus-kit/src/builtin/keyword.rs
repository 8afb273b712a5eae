//! Token-overlap intent classifier trained from intent records kept in memory.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::ModuleEntry;
use crate::contracts::LanguageEngine;
use crate::memory::Memory;
use crate::registry::BuildContext;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KeywordConfig {
    pub skill_id: String,
}

/// Memory collection holding the intent records of `skill`.
#[must_use]
pub fn intents_collection(skill: &str) -> String {
    format!("{skill}_intents")
}

#[derive(Debug, Default, Deserialize)]
struct IntentRecord {
    #[serde(default)]
    examples: Vec<String>,
    #[serde(default)]
    function: Option<String>,
    #[serde(default)]
    responses: Responses,
}

#[derive(Debug, Default, Deserialize)]
struct Responses {
    #[serde(default)]
    default: Vec<String>,
}

#[derive(Debug)]
struct Intent {
    examples: Vec<BTreeSet<String>>,
    function: Option<String>,
    default_response: Option<String>,
}

#[derive(Debug)]
pub struct KeywordEngine {
    skill_id: String,
    intents: RwLock<BTreeMap<String, Intent>>,
}

/// # Errors
/// Fails when `skill-id` is missing.
pub fn build(entry: &ModuleEntry, _ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn LanguageEngine>> {
    let cfg: KeywordConfig = entry.settings()?;
    Ok(Arc::new(KeywordEngine::new(cfg.skill_id)))
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

impl KeywordEngine {
    pub fn new(skill_id: impl Into<String>) -> Self {
        Self {
            skill_id: skill_id.into(),
            intents: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn skill_id(&self) -> &str {
        &self.skill_id
    }

    #[must_use]
    pub fn intent_count(&self) -> usize {
        self.intents.read().len()
    }

    fn classify(&self, text: &str) -> Value {
        let words = tokens(text);
        let intents = self.intents.read();
        let best = intents
            .iter()
            .map(|(name, intent)| {
                let score = intent
                    .examples
                    .iter()
                    .map(|example| overlap(&words, example))
                    .fold(0.0, f64::max);
                (name, intent, score)
            })
            .filter(|(_, _, score)| *score > 0.0)
            .max_by(|a, b| a.2.total_cmp(&b.2));

        match best {
            Some((name, intent, score)) => json!({
                "text": text,
                "intent": name,
                "confidence": score,
                "function": intent.function,
            }),
            None => json!({
                "text": text,
                "intent": Value::Null,
                "confidence": 0.0,
                "function": Value::Null,
            }),
        }
    }
}

#[async_trait]
impl LanguageEngine for KeywordEngine {
    async fn train(&self, memory: &Memory) -> anyhow::Result<()> {
        let collection = intents_collection(&self.skill_id);
        let mut trained = BTreeMap::new();
        for key in memory.get_keys(&collection).await {
            let Some(raw) = memory.get(&collection, &key).await else {
                continue;
            };
            let record: IntentRecord = match serde_json::from_value(raw) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(intent = %key, error = %e, "Skipping malformed intent record");
                    continue;
                }
            };
            trained.insert(
                key,
                Intent {
                    examples: record.examples.iter().map(String::as_str).map(tokens).collect(),
                    function: record.function.filter(|f| !f.is_empty()),
                    default_response: record.responses.default.into_iter().next(),
                },
            );
        }
        if trained.is_empty() {
            anyhow::bail!("no intents stored for skill '{}'", self.skill_id);
        }
        tracing::info!(skill = %self.skill_id, intents = trained.len(), "Keyword engine trained");
        *self.intents.write() = trained;
        Ok(())
    }

    async fn parse_text(&self, text: &str) -> anyhow::Result<Value> {
        Ok(self.classify(text))
    }

    /// Accepts `{intent}` or `{text}` and answers with the intent's first default response.
    async fn get_response(&self, request: &Value) -> anyhow::Result<Value> {
        let intent = match request.get("intent").and_then(Value::as_str) {
            Some(intent) => intent.to_owned(),
            None => {
                let text = request
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("request needs an 'intent' or a 'text'"))?;
                match self.classify(text).get("intent").and_then(Value::as_str) {
                    Some(intent) => intent.to_owned(),
                    None => return Ok(json!({ "intent": Value::Null, "text": Value::Null })),
                }
            }
        };
        let intents = self.intents.read();
        let Some(found) = intents.get(&intent) else {
            anyhow::bail!("unknown intent '{intent}' for skill '{}'", self.skill_id);
        };
        Ok(json!({ "intent": intent, "text": found.default_response }))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::builtin::memory_db::MemoryDatabase;
    use crate::memory::DatabaseInstance;

    async fn billing_memory() -> Memory {
        let memory = Memory::new();
        let db = DatabaseInstance::new("memory", Arc::new(MemoryDatabase::default()));
        db.connect().await.unwrap();
        memory.add(db);
        memory
            .put(
                "billing_intents",
                "pay_bill",
                &json!({
                    "examples": ["I want to pay my bill", "pay the invoice"],
                    "function": "pay",
                    "slot": [],
                    "responses": {"default": ["Sure, let's pay it.", "Paying."]},
                }),
            )
            .await
            .unwrap();
        memory
            .put(
                "billing_intents",
                "balance",
                &json!({
                    "examples": ["what is my balance", "how much do I owe"],
                    "function": "",
                    "slot": [],
                    "responses": {"default": ["Your balance is on its way."]},
                }),
            )
            .await
            .unwrap();
        memory
    }

    #[tokio::test]
    async fn classifies_by_token_overlap() {
        let engine = KeywordEngine::new("billing");
        engine.train(&billing_memory().await).await.unwrap();
        assert_eq!(engine.intent_count(), 2);

        let parsed = engine.parse_text("Pay my bill please").await.unwrap();
        assert_eq!(parsed["intent"], "pay_bill");
        assert_eq!(parsed["function"], "pay");
        assert!(parsed["confidence"].as_f64().unwrap() > 0.0);

        let balance = engine.parse_text("how much do i owe?").await.unwrap();
        assert_eq!(balance["intent"], "balance");
        assert_eq!(balance["function"], Value::Null);

        let unknown = engine.parse_text("zebra").await.unwrap();
        assert_eq!(unknown["intent"], Value::Null);
    }

    #[tokio::test]
    async fn responds_with_first_default() {
        let engine = KeywordEngine::new("billing");
        engine.train(&billing_memory().await).await.unwrap();

        let by_intent = engine.get_response(&json!({"intent": "pay_bill"})).await.unwrap();
        assert_eq!(by_intent["text"], "Sure, let's pay it.");

        let by_text = engine.get_response(&json!({"text": "what is my balance"})).await.unwrap();
        assert_eq!(by_text["intent"], "balance");

        assert!(engine.get_response(&json!({"intent": "nope"})).await.is_err());
        assert!(engine.get_response(&json!({})).await.is_err());
    }

    #[tokio::test]
    async fn training_without_intents_fails() {
        let engine = KeywordEngine::new("weather");
        assert!(engine.train(&billing_memory().await).await.is_err());
    }
}
