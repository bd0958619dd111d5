use serde_json::{json, Map, Value};
use tracing::{instrument, warn};

use super::dto::{CatalogDraft, CatalogEntry, CatalogKind, EffectType};
use crate::error::Result;
use crate::gateway::coerce::{pick_id, pick_number, pick_str};
use crate::gateway::{Locator, Query, RestClient};

const NAME: &[&str] = &["name", "name_en", "english_name"];
const LOCALIZED: &[&str] = &["localized_name", "name_ja", "display_name"];
const DESCRIPTION: &[&str] = &["description", "effect", "value", "desc"];
const MIN_ENERGY: &[&str] = &["min_energy", "energy_min", "base_energy", "energy"];
const MAX_ENERGY: &[&str] = &["max_energy", "energy_max"];
const PRICE: &[&str] = &["price", "sell_price"];
const EFFECT_TYPE: &[&str] = &["effect_type", "effectType", "rarity"];
pub(crate) const IMAGE: &[&str] = &["image_url", "imageUrl", "image", "icon_url"];

pub fn map_row(kind: CatalogKind, row: &Value) -> Option<CatalogEntry> {
    let id = pick_id(row, &["id"])?;
    let localized_name = pick_str(row, LOCALIZED);
    let name = pick_str(row, NAME)
        .or_else(|| localized_name.clone())
        .unwrap_or_else(|| format!("#{}", id));

    Some(CatalogEntry {
        id,
        kind,
        name,
        localized_name,
        description: pick_str(row, DESCRIPTION),
        min_energy: pick_number(row, MIN_ENERGY),
        max_energy: pick_number(row, MAX_ENERGY),
        price: pick_number(row, PRICE),
        effect_type: (kind == CatalogKind::SubSkills)
            .then(|| pick_str(row, EFFECT_TYPE).map(|s| EffectType::from_text(&s)).unwrap_or_default()),
        image_url: pick_str(row, IMAGE),
    })
}

pub fn map_rows(kind: CatalogKind, rows: &[Value]) -> Vec<CatalogEntry> {
    let mut out: Vec<CatalogEntry> = rows
        .iter()
        .filter_map(|row| {
            let entry = map_row(kind, row);
            if entry.is_none() {
                warn!(kind = kind.as_str(), "skipping catalog row without a positive id");
            }
            entry
        })
        .collect();
    out.sort_by_key(|e| e.id);
    out
}

/// Column payload for an insert/patch. Only fields the kind uses are written.
pub fn draft_to_row(kind: CatalogKind, draft: &CatalogDraft, image_url: Option<&str>) -> Value {
    let mut row = Map::new();
    row.insert("name".into(), json!(draft.name.trim()));
    if let Some(v) = &draft.localized_name {
        row.insert("localized_name".into(), json!(v));
    }
    if let Some(v) = &draft.description {
        row.insert("description".into(), json!(v));
    }
    match kind {
        CatalogKind::Berries => {
            row.insert("min_energy".into(), json!(draft.min_energy));
            row.insert("max_energy".into(), json!(draft.max_energy));
        }
        CatalogKind::Ingredients => {
            row.insert("min_energy".into(), json!(draft.min_energy));
            row.insert("price".into(), json!(draft.price));
        }
        CatalogKind::SubSkills => {
            let effect = draft.effect_type.unwrap_or_default();
            row.insert("effect_type".into(), json!(effect.as_str()));
        }
        CatalogKind::MainSkills => {}
    }
    if let Some(url) = image_url {
        row.insert("image_url".into(), json!(url));
    }
    Value::Object(row)
}

#[instrument(skip(rest), fields(kind = kind.as_str()))]
pub async fn fetch_catalog(rest: &RestClient, kind: CatalogKind) -> Result<Vec<CatalogEntry>> {
    let (_, rows) = rest
        .fetch_resolved(kind.resource(), |l| Query::all().order_asc(l.key))
        .await?;
    Ok(map_rows(kind, &rows))
}

/// Raw row plus the table it came from.
pub async fn fetch_entry_row(rest: &RestClient, kind: CatalogKind, id: u32) -> Result<Option<(Locator, Value)>> {
    let (locator, mut rows) = rest
        .fetch_resolved(kind.resource(), |l| Query::all().eq(l.key, id).limit(1))
        .await?;
    Ok(rows.pop().map(|row| (locator, row)))
}
