use serde::{Deserialize, Serialize};

use crate::images::ImageUpload;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MainSkillRef {
    pub id: u32,
    pub name: String,
    pub image_url: Option<String>,
}

/// A catalog item with a quantity attached (berries, recipe ingredients).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientItem {
    pub id: u32,
    pub name: String,
    pub image_url: Option<String>,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientLevel {
    /// Unlock level.
    pub level: u32,
    pub items: Vec<IngredientItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatureCard {
    /// Internal row id; only for list diffing.
    pub id: String,
    /// Public identifier used for navigation.
    pub dex_no: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub talent: Option<String>,
    pub image_url: Option<String>,
    pub shiny_image_url: Option<String>,
    pub main_skill: Option<MainSkillRef>,
    pub berries: Vec<IngredientItem>,
    pub ingredient_levels: Vec<IngredientLevel>,
}

impl CreatureCard {
    pub fn padded_dex(&self) -> String {
        format!("{:03}", self.dex_no)
    }

    /// Shiny art, or the normal image when there is none.
    pub fn shiny_or_normal(&self) -> Option<&str> {
        self.shiny_image_url.as_deref().or(self.image_url.as_deref())
    }
}

/// `(catalog id, quantity)`
pub type Quantified = (u32, u32);

#[derive(Debug, Clone, Default)]
pub struct IngredientLevelDraft {
    pub level: u32,
    pub items: Vec<Quantified>,
}

#[derive(Debug, Clone, Default)]
pub struct CreatureDraft {
    pub name: String,
    pub type_name: Option<String>,
    pub talent: Option<String>,
    pub main_skill_id: Option<u32>,
    pub image: Option<ImageUpload>,
    pub shiny_image: Option<ImageUpload>,
    pub berries: Vec<Quantified>,
    pub ingredient_levels: Vec<IngredientLevelDraft>,
}
