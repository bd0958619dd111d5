use std::collections::{BTreeMap, HashMap};

use serde_json::{json, Map, Value};
use tracing::{instrument, warn};

use super::dto::{CreatureCard, CreatureDraft, IngredientItem, IngredientLevel, MainSkillRef};
use crate::catalog::CatalogEntry;
use crate::error::{Error, Result};
use crate::gateway::coerce::{pick_id, pick_number, pick_str, value_text};
use crate::gateway::{Query, Resource, RestClient};

const DEX: &[&str] = &["dex_no", "dex_number", "pokedex_no", "number"];
const NAME: &[&str] = &["name", "name_en", "localized_name"];
const TYPE: &[&str] = &["type", "type_name", "pokemon_type"];
const TALENT: &[&str] = &["talent", "specialty", "speciality"];
pub(crate) const IMAGE: &[&str] = &["image_url", "imageUrl", "image"];
pub(crate) const SHINY_IMAGE: &[&str] = &["shiny_image_url", "image_shiny_url", "shinyImageUrl"];
const MAIN_SKILL: &[&str] = &["main_skill_id", "skill_id"];
const QUANTITY: &[&str] = &["quantity", "qty", "amount"];

pub const BERRY_LINKS: &str = "pokemon_berries";
pub const INGREDIENT_LINKS: &str = "pokemon_ingredients";

/// Catalog data a card refers to.
pub struct CardRefs<'a> {
    pub berries: &'a [CatalogEntry],
    pub ingredients: &'a [CatalogEntry],
    pub main_skills: &'a [CatalogEntry],
}

fn index(entries: &[CatalogEntry]) -> HashMap<u32, &CatalogEntry> {
    entries.iter().map(|e| (e.id, e)).collect()
}

fn item(catalog: &HashMap<u32, &CatalogEntry>, id: u32, quantity: u32) -> IngredientItem {
    match catalog.get(&id) {
        Some(e) => IngredientItem {
            id,
            name: e.display_name().to_string(),
            image_url: e.image_url.clone(),
            quantity,
        },
        None => IngredientItem {
            id,
            name: format!("#{}", id),
            image_url: None,
            quantity,
        },
    }
}

fn quantity(row: &Value) -> u32 {
    pick_number(row, QUANTITY)
        .filter(|q| *q >= 0.0)
        .map(|q| q.round() as u32)
        .unwrap_or(1)
}

fn owner(row: &Value) -> Option<String> {
    row.get("pokemon_id").and_then(value_text)
}

/// Joins creature rows with their link rows and the catalogs; sorted by dex number.
pub fn assemble_cards(
    creatures: &[Value],
    berry_links: &[Value],
    ingredient_links: &[Value],
    refs: &CardRefs<'_>,
) -> Vec<CreatureCard> {
    let berries = index(refs.berries);
    let ingredients = index(refs.ingredients);
    let skills = index(refs.main_skills);

    let mut berries_by_owner: HashMap<String, Vec<IngredientItem>> = HashMap::new();
    for link in berry_links {
        let (Some(owner), Some(berry_id)) = (owner(link), pick_id(link, &["berry_id"])) else {
            continue;
        };
        berries_by_owner
            .entry(owner)
            .or_default()
            .push(item(&berries, berry_id, quantity(link)));
    }

    let mut levels_by_owner: HashMap<String, BTreeMap<u32, Vec<IngredientItem>>> = HashMap::new();
    for link in ingredient_links {
        let (Some(owner), Some(ingredient_id)) = (owner(link), pick_id(link, &["ingredient_id"])) else {
            continue;
        };
        let level = pick_id(link, &["level", "unlock_level"]).unwrap_or(1);
        levels_by_owner
            .entry(owner)
            .or_default()
            .entry(level)
            .or_default()
            .push(item(&ingredients, ingredient_id, quantity(link)));
    }

    let mut cards: Vec<CreatureCard> = creatures
        .iter()
        .filter_map(|row| {
            let id = row.get("id").and_then(value_text)?;
            let Some(dex_no) = pick_id(row, DEX) else {
                warn!(%id, "skipping creature row without a dex number");
                return None;
            };
            let main_skill = pick_id(row, MAIN_SKILL).map(|sid| match skills.get(&sid) {
                Some(s) => MainSkillRef {
                    id: sid,
                    name: s.display_name().to_string(),
                    image_url: s.image_url.clone(),
                },
                None => MainSkillRef {
                    id: sid,
                    name: format!("#{}", sid),
                    image_url: None,
                },
            });
            let ingredient_levels = levels_by_owner
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .map(|(level, items)| IngredientLevel { level, items })
                .collect();

            Some(CreatureCard {
                berries: berries_by_owner.remove(&id).unwrap_or_default(),
                dex_no,
                name: pick_str(row, NAME).unwrap_or_else(|| format!("#{:03}", dex_no)),
                type_name: pick_str(row, TYPE),
                talent: pick_str(row, TALENT),
                image_url: pick_str(row, IMAGE),
                shiny_image_url: pick_str(row, SHINY_IMAGE),
                main_skill,
                ingredient_levels,
                id,
            })
        })
        .collect();
    cards.sort_by_key(|c| c.dex_no);
    cards
}

/// Optional link table; a missing table reads as no links.
async fn fetch_links(rest: &RestClient, resource: Resource) -> Result<Vec<Value>> {
    match rest.fetch_resolved(resource, |l| Query::all().order_asc(l.key)).await {
        Ok((_, rows)) => Ok(rows),
        Err(e @ Error::Backend { .. }) => {
            warn!(?resource, error = %e, "link rows unavailable");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip(rest, refs))]
pub async fn fetch_cards(rest: &RestClient, refs: &CardRefs<'_>) -> Result<Vec<CreatureCard>> {
    let (_, creatures) = rest
        .fetch_resolved(Resource::Creatures, |l| Query::all().order_asc(l.key))
        .await?;
    let berry_links = fetch_links(rest, Resource::CreatureBerries).await?;
    let ingredient_links = fetch_links(rest, Resource::CreatureIngredients).await?;
    Ok(assemble_cards(&creatures, &berry_links, &ingredient_links, refs))
}

pub async fn fetch_row(rest: &RestClient, id: &str) -> Result<Option<Value>> {
    let (_, mut rows) = rest
        .fetch_resolved(Resource::Creatures, |l| Query::all().eq(l.key, id).limit(1))
        .await?;
    Ok(rows.pop())
}

/// Numeric ids go back as numbers, anything else as text.
pub fn id_value(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(id))
}

pub fn draft_to_row(draft: &CreatureDraft, image_url: Option<&str>, shiny_image_url: Option<&str>) -> Value {
    let mut row = Map::new();
    row.insert("name".into(), json!(draft.name.trim()));
    row.insert("type".into(), json!(draft.type_name));
    row.insert("talent".into(), json!(draft.talent));
    row.insert("main_skill_id".into(), json!(draft.main_skill_id));
    row.insert("image_url".into(), json!(image_url));
    row.insert("shiny_image_url".into(), json!(shiny_image_url));
    Value::Object(row)
}

pub fn berry_link_rows(owner: &str, draft: &CreatureDraft) -> Vec<Value> {
    draft
        .berries
        .iter()
        .map(|(berry_id, quantity)| json!({ "pokemon_id": id_value(owner), "berry_id": berry_id, "quantity": quantity }))
        .collect()
}

pub fn ingredient_link_rows(owner: &str, draft: &CreatureDraft) -> Vec<Value> {
    draft
        .ingredient_levels
        .iter()
        .flat_map(|lvl| {
            lvl.items.iter().map(move |(ingredient_id, quantity)| {
                json!({
                    "pokemon_id": id_value(owner),
                    "level": lvl.level,
                    "ingredient_id": ingredient_id,
                    "quantity": quantity,
                })
            })
        })
        .collect()
}

/// Delete-then-insert of every link row for `owner`.
pub async fn replace_links(rest: &RestClient, table: &str, owner: &str, rows: Vec<Value>, token: &str) -> Result<()> {
    rest.delete(table, &Query::new().eq("pokemon_id", owner), token).await?;
    if !rows.is_empty() {
        rest.insert(table, Value::Array(rows), token).await?;
    }
    Ok(())
}
