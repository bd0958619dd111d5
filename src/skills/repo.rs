use serde_json::{json, Map, Value};
use tracing::{debug, instrument, warn};

use super::dto::{LevelValue, MainSkill, MainSkillDraft, MainSkillLevel};
use crate::catalog::repo::IMAGE;
use crate::error::{Error, Result};
use crate::gateway::coerce::{pick_id, pick_str};
use crate::gateway::resolve::is_schema_miss;
use crate::gateway::{Locator, Query, Resource, RestClient};

const NAME: &[&str] = &["name", "name_en"];
const LOCALIZED: &[&str] = &["localized_name", "name_ja", "display_name"];
const DESCRIPTION: &[&str] = &["description", "effect", "desc"];
const LEVEL: &[&str] = &["level", "lv", "skill_level"];
const VALUE: &[&str] = &["value", "effect_value", "amount"];
const EXTRA: &[&str] = &["extra_effects", "extra", "effects"];

pub fn map_level(row: &Value) -> Option<MainSkillLevel> {
    let level = pick_id(row, LEVEL)?;
    let value = VALUE
        .iter()
        .filter_map(|k| row.get(*k))
        .find_map(LevelValue::from_value);
    let extra_effects = EXTRA
        .iter()
        .filter_map(|k| row.get(*k))
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null);
    Some(MainSkillLevel {
        level,
        value,
        extra_effects,
    })
}

pub fn map_levels(rows: &[Value]) -> Vec<MainSkillLevel> {
    let mut levels: Vec<MainSkillLevel> = rows.iter().filter_map(map_level).collect();
    levels.sort_by_key(|l| l.level);
    levels
}

pub fn map_skill(row: &Value, levels: Vec<MainSkillLevel>) -> Option<MainSkill> {
    let id = pick_id(row, &["id"])?;
    let localized_name = pick_str(row, LOCALIZED);
    Some(MainSkill {
        id,
        name: pick_str(row, NAME)
            .or_else(|| localized_name.clone())
            .unwrap_or_else(|| format!("#{}", id)),
        localized_name,
        description: pick_str(row, DESCRIPTION),
        image_url: pick_str(row, IMAGE),
        levels,
    })
}

pub fn draft_to_row(draft: &MainSkillDraft, image_url: Option<&str>) -> Value {
    let mut row = Map::new();
    row.insert("name".into(), json!(draft.name.trim()));
    if let Some(v) = &draft.localized_name {
        row.insert("localized_name".into(), json!(v));
    }
    if let Some(v) = &draft.description {
        row.insert("description".into(), json!(v));
    }
    if let Some(url) = image_url {
        row.insert("image_url".into(), json!(url));
    }
    Value::Object(row)
}

fn level_rows(locator: &Locator, skill_id: u32, levels: &[MainSkillLevel]) -> Vec<Value> {
    levels
        .iter()
        .map(|l| {
            let mut row = Map::new();
            row.insert(locator.key.into(), json!(skill_id));
            row.insert("level".into(), json!(l.level));
            row.insert("value".into(), l.value.as_ref().map(LevelValue::to_json).unwrap_or(Value::Null));
            row.insert("extra_effects".into(), l.extra_effects.clone());
            Value::Object(row)
        })
        .collect()
}

pub async fn fetch_skill_row(rest: &RestClient, id: u32) -> Result<Option<Value>> {
    let (_, mut rows) = rest
        .fetch_resolved(Resource::MainSkills, |l| Query::all().eq(l.key, id).limit(1))
        .await?;
    Ok(rows.pop())
}

/// Level rows; no level table at all reads as no levels.
#[instrument(skip(rest))]
pub async fn fetch_levels(rest: &RestClient, skill_id: u32) -> Result<Vec<MainSkillLevel>> {
    match rest
        .fetch_resolved(Resource::SkillLevels, |l| Query::all().eq(l.key, skill_id).order_asc("level"))
        .await
    {
        Ok((_, rows)) => Ok(map_levels(&rows)),
        Err(e @ Error::Backend { .. }) => {
            warn!(error = %e, "level rows unavailable");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Full replace: delete every level of `skill_id`, then insert `levels`, on the
/// first level table/key pair that accepts the delete.
#[instrument(skip(rest, levels, token), fields(count = levels.len()))]
pub async fn replace_levels(rest: &RestClient, skill_id: u32, levels: &[MainSkillLevel], token: &str) -> Result<Locator> {
    let mut last_err = None;
    for locator in Resource::SkillLevels.locators() {
        let filter = Query::new().eq(locator.key, skill_id);
        match rest.delete(locator.table, &filter, token).await {
            Ok(()) => {}
            Err(e) if is_schema_miss(&e) => {
                debug!(table = locator.table, key = locator.key, error = %e, "level table rejected");
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(e),
        }
        if !levels.is_empty() {
            rest.insert(locator.table, Value::Array(level_rows(locator, skill_id, levels)), token)
                .await?;
        }
        return Ok(*locator);
    }
    Err(last_err.unwrap_or_else(|| Error::NotFound("main skill level table".into())))
}
