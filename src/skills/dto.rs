use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::coerce::parse_full_number;
use crate::images::ImageUpload;

/// A level's headline value: numeric strings become numbers, other text is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LevelValue {
    Number(f64),
    Text(String),
}

impl LevelValue {
    pub fn from_value(v: &Value) -> Option<Self> {
        if let Some(n) = parse_full_number(v) {
            return Some(LevelValue::Number(n));
        }
        match v {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(LevelValue::Text(s.trim().to_string())),
            other => Some(LevelValue::Text(other.to_string())),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            LevelValue::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            LevelValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for LevelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelValue::Number(n) => write!(f, "{}", n),
            LevelValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSkillLevel {
    pub level: u32,
    pub value: Option<LevelValue>,
    /// Free-form; see `effects::interpret`.
    #[serde(default)]
    pub extra_effects: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSkill {
    pub id: u32,
    pub name: String,
    pub localized_name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub levels: Vec<MainSkillLevel>,
}

#[derive(Debug, Clone, Default)]
pub struct MainSkillDraft {
    pub name: String,
    pub localized_name: Option<String>,
    pub description: Option<String>,
    pub image: Option<ImageUpload>,
    pub levels: Vec<MainSkillLevel>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Created(MainSkill),
    Updated(MainSkill),
}

impl SaveOutcome {
    pub fn skill(&self) -> &MainSkill {
        match self {
            SaveOutcome::Created(s) | SaveOutcome::Updated(s) => s,
        }
    }
}
