use serde::{Deserialize, Serialize};

use crate::gateway::Resource;
use crate::images::ImageUpload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Berries,
    Ingredients,
    MainSkills,
    SubSkills,
}

impl CatalogKind {
    pub const ALL: [CatalogKind; 4] = [
        CatalogKind::Berries,
        CatalogKind::Ingredients,
        CatalogKind::MainSkills,
        CatalogKind::SubSkills,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::Berries => "berries",
            CatalogKind::Ingredients => "ingredients",
            CatalogKind::MainSkills => "main_skills",
            CatalogKind::SubSkills => "sub_skills",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn resource(self) -> Resource {
        match self {
            CatalogKind::Berries => Resource::Berries,
            CatalogKind::Ingredients => Resource::Ingredients,
            CatalogKind::MainSkills => Resource::MainSkills,
            CatalogKind::SubSkills => Resource::SubSkills,
        }
    }
}

/// Sub-skill tier colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectType {
    Gold,
    White,
    Blue,
    #[default]
    Unknown,
}

impl EffectType {
    pub fn from_text(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "gold" => EffectType::Gold,
            "white" => EffectType::White,
            "blue" => EffectType::Blue,
            _ => EffectType::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EffectType::Gold => "gold",
            EffectType::White => "white",
            EffectType::Blue => "blue",
            EffectType::Unknown => "unknown",
        }
    }
}

/// One card of a berry / ingredient / main-skill / sub-skill catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: u32,
    pub kind: CatalogKind,
    pub name: String,
    pub localized_name: Option<String>,
    pub description: Option<String>,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    pub price: Option<f64>,
    pub effect_type: Option<EffectType>,
    pub image_url: Option<String>,
}

impl CatalogEntry {
    pub fn display_name(&self) -> &str {
        self.localized_name.as_deref().unwrap_or(&self.name)
    }
}

/// Admin form contents for creating or editing a catalog entry.
#[derive(Debug, Clone, Default)]
pub struct CatalogDraft {
    pub name: String,
    pub localized_name: Option<String>,
    pub description: Option<String>,
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    pub price: Option<f64>,
    pub effect_type: Option<EffectType>,
    pub image: Option<ImageUpload>,
}
