pub mod dto;
pub mod repo;
pub mod services;

pub use dto::{CreatureCard, CreatureDraft, IngredientItem, IngredientLevel, IngredientLevelDraft, MainSkillRef};
