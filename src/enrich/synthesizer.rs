use serde_json::Value;
use std::sync::Arc;

use crate::analyzers::Dossier;
use crate::graph::Entity;
use crate::llm::TextGenerator;
use crate::models::CoreDescription;

/// Static part of the synthesis prompt. `{entity_type}`, `{entity_name}` and
/// `{evidence}` are substituted per entity.
pub const PROMPT_TEMPLATE: &str = r#"You are a data architect documenting a relational database for machines.
Turn the evidence below into one structured JSON description. Be dense and factual;
the text will be embedded for similarity search.

### ENTITY
- Entity Type: {entity_type}
- Entity Name: {entity_name}

### EVIDENCE
{evidence}

### OUTPUT
Return exactly one JSON object with these keys and nothing else:
{
  "core_description": "What the entity is for, in English, combining every relevant clue.",
  "inferred_logic": "Business rules implied by the evidence (for example by distinct values), or null.",
  "stereotype": "One of: Master, Transaction, Junction, Config, Log, Detail, Unknown.",
  "confidence": "A number between 0.0 and 1.0."
}
"#;

/// Entity header as it appears in the prompt.
pub fn entity_header(entity: &Entity) -> String {
    format!("- Entity Type: {}\n- Entity Name: {}", entity.label, entity.name)
}

pub fn build_prompt(entity: &Entity, dossier: &Dossier) -> String {
    PROMPT_TEMPLATE
        .replace("{entity_type}", entity.label.as_str())
        .replace("{entity_name}", &entity.name)
        .replace("{evidence}", &dossier.render())
}

/// First well-formed JSON object embedded in `text`, ignoring surrounding prose.
pub fn extract_json_object(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '{')
        .find_map(|(start, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value @ Value::Object(_))) => Some(value),
                _ => None,
            }
        })
}

/// Turns an evidence dossier into a validated [`CoreDescription`].
pub struct DescriptionSynthesizer {
    generator: Arc<dyn TextGenerator>,
    temperature: f32,
}

impl DescriptionSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    /// Every failure (provider error, empty response, no JSON, invalid shape) is `None`.
    pub async fn synthesize(&self, entity: &Entity, dossier: &Dossier) -> Option<CoreDescription> {
        let prompt = build_prompt(entity, dossier);
        log::debug!("Calling {} for {}", self.generator.model(), entity);

        let completion = match self.generator.generate(&prompt, true, self.temperature).await {
            Ok(completion) => completion,
            Err(e) => {
                log::warn!("Synthesis call failed for {}: {}", entity, e);
                return None;
            }
        };

        if completion.text.trim().is_empty() {
            log::warn!("Model returned an empty response for {}", entity);
            return None;
        }

        let Some(value) = extract_json_object(&completion.text) else {
            log::warn!("No JSON object in the response for {}", entity);
            return None;
        };

        match CoreDescription::from_json(value) {
            Ok(description) => {
                log::debug!("Description for {} parsed and validated", entity);
                Some(description)
            }
            Err(e) => {
                log::warn!("Invalid description for {}: {}", entity, e);
                None
            }
        }
    }
}
