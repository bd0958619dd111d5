pub mod detect;
pub mod dto;
pub mod effects;
pub mod repo;
pub mod services;

pub use detect::{Detection, IdDetector};
pub use dto::{LevelValue, MainSkill, MainSkillDraft, MainSkillLevel, SaveOutcome};
pub use effects::{interpret, EffectTable};
