//! Structured model outputs: entity descriptions and relation judgments.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{GenesisError, Result};

/// Entity classification returned by the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stereotype {
    Master,
    Transaction,
    Junction,
    Config,
    Log,
    Detail,
    Unknown,
}

impl Stereotype {
    pub const ALL: [Stereotype; 7] = [
        Stereotype::Master,
        Stereotype::Transaction,
        Stereotype::Junction,
        Stereotype::Config,
        Stereotype::Log,
        Stereotype::Detail,
        Stereotype::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stereotype::Master => "Master",
            Stereotype::Transaction => "Transaction",
            Stereotype::Junction => "Junction",
            Stereotype::Config => "Config",
            Stereotype::Log => "Log",
            Stereotype::Detail => "Detail",
            Stereotype::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Stereotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-focused description of one Table or Column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreDescription {
    pub core_description: String,
    #[serde(default)]
    pub inferred_logic: Option<String>,
    pub stereotype: Stereotype,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: f64,
}

impl CoreDescription {
    /// Parse and validate a JSON object; any shape or range violation is an error.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let description: CoreDescription = serde_json::from_value(value)
            .map_err(|e| GenesisError::Parse(format!("invalid description shape: {}", e)))?;
        description.validate()?;
        Ok(description)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_description.trim().is_empty() {
            return Err(GenesisError::Parse("core_description is empty".to_string()));
        }
        check_unit_interval("confidence", self.confidence)
    }
}

/// Verdict on one candidate implicit relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitRelation {
    pub relationship_exists: bool,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence_score: f64,
    #[serde(default)]
    pub relationship_type: Option<String>,
    pub justification: String,
}

impl ImplicitRelation {
    pub const FALLBACK_TYPE: &'static str = "RELATED_TO";

    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let relation: ImplicitRelation = serde_json::from_value(value)
            .map_err(|e| GenesisError::Parse(format!("invalid relation judgment shape: {}", e)))?;
        check_unit_interval("confidence_score", relation.confidence_score)?;
        Ok(relation)
    }

    /// Relation type to persist, falling back to the generic type.
    pub fn effective_type(&self) -> &str {
        self.relationship_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(Self::FALLBACK_TYPE)
    }

    pub fn is_accepted(&self, min_confidence: f64) -> bool {
        self.relationship_exists && self.confidence_score >= min_confidence
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GenesisError::Parse(format!("{} {} is outside [0, 1]", field, value)))
    }
}

/// Accepts `0.9` as well as `"0.9"`; models quote numbers surprisingly often.
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_core_description_valid() {
        let desc = CoreDescription::from_json(json!({
            "core_description": "Customer master record.",
            "inferred_logic": null,
            "stereotype": "Master",
            "confidence": "0.9"
        }))
        .unwrap();
        assert_eq!(desc.stereotype, Stereotype::Master);
        assert!((desc.confidence - 0.9).abs() < 1e-9);
        assert!(desc.inferred_logic.is_none());
    }

    #[test]
    fn test_core_description_rejects_unknown_stereotype() {
        let result = CoreDescription::from_json(json!({
            "core_description": "x",
            "stereotype": "Entity",
            "confidence": 0.5
        }));
        assert!(matches!(result, Err(GenesisError::Parse(_))));
    }

    #[test]
    fn test_core_description_rejects_out_of_range_confidence() {
        let result = CoreDescription::from_json(json!({
            "core_description": "x",
            "stereotype": "Log",
            "confidence": 1.5
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_core_description_rejects_missing_fields() {
        assert!(CoreDescription::from_json(json!({"stereotype": "Log", "confidence": 0.5})).is_err());
        assert!(CoreDescription::from_json(json!({
            "core_description": "  ",
            "stereotype": "Log",
            "confidence": 0.5
        }))
        .is_err());
    }

    #[test]
    fn test_implicit_relation_fallback_type_and_acceptance() {
        let relation = ImplicitRelation::from_json(json!({
            "relationship_exists": true,
            "confidence_score": 0.9,
            "relationship_type": "",
            "justification": "shared partner ids"
        }))
        .unwrap();
        assert_eq!(relation.effective_type(), "RELATED_TO");
        assert!(relation.is_accepted(0.85));
        assert!(!relation.is_accepted(0.95));
    }
}
