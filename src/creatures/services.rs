use std::collections::HashSet;

use tracing::{info, instrument, warn};

use super::dto::{CreatureCard, CreatureDraft};
use super::repo::{self, CardRefs};
use crate::auth::dto::AuthContext;
use crate::cache::{Loaded, CREATURES_TTL_MS};
use crate::catalog::services::catalog_entries;
use crate::catalog::CatalogKind;
use crate::error::{Error, Result};
use crate::gateway::coerce::pick_str;
use crate::gateway::Resource;
use crate::images::services::{cleanup_replaced_image, discard_image, upload_optional};
use crate::state::AppState;

pub const CREATURES_KEY: &str = "all";

pub fn invalidate_creatures(st: &AppState) {
    st.caches.creatures.invalidate(CREATURES_KEY);
}

async fn fetch_all(st: &AppState) -> Result<Vec<CreatureCard>> {
    let berries = catalog_entries(st, CatalogKind::Berries).await?;
    let ingredients = catalog_entries(st, CatalogKind::Ingredients).await?;
    let main_skills = catalog_entries(st, CatalogKind::MainSkills).await?;
    let refs = CardRefs {
        berries: &berries,
        ingredients: &ingredients,
        main_skills: &main_skills,
    };
    repo::fetch_cards(&st.rest, &refs).await
}

#[instrument(skip(st))]
pub async fn load_creatures(st: &AppState) -> Loaded<CreatureCard> {
    Loaded::from_result(
        st.caches
            .creatures
            .get_or_fetch(CREATURES_KEY, |_| CREATURES_TTL_MS, || fetch_all(st))
            .await,
    )
}

pub async fn creature_cards(st: &AppState) -> Result<Vec<CreatureCard>> {
    st.caches
        .creatures
        .get_or_fetch(CREATURES_KEY, |_| CREATURES_TTL_MS, || fetch_all(st))
        .await
        .map(|hit| hit.data)
}

pub async fn find_by_dex(st: &AppState, dex_no: u32) -> Result<Option<CreatureCard>> {
    Ok(creature_cards(st).await?.into_iter().find(|c| c.dex_no == dex_no))
}

fn validate_draft(draft: &CreatureDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(Error::validation("name is required"));
    }
    if draft.main_skill_id == Some(0) {
        return Err(Error::validation("main skill id must be a positive integer"));
    }

    let mut seen = HashSet::new();
    for (id, qty) in &draft.berries {
        if *id == 0 || *qty == 0 {
            return Err(Error::validation("berry ids and quantities must be positive"));
        }
        if !seen.insert(*id) {
            return Err(Error::validation(format!("berry #{} is selected twice", id)));
        }
    }

    let mut levels = HashSet::new();
    for lvl in &draft.ingredient_levels {
        if lvl.level == 0 {
            return Err(Error::validation("ingredient level must be a positive integer"));
        }
        if !levels.insert(lvl.level) {
            return Err(Error::validation(format!("level {} is listed twice", lvl.level)));
        }
        let mut seen = HashSet::new();
        for (id, qty) in &lvl.items {
            if *id == 0 || *qty == 0 {
                return Err(Error::validation("ingredient ids and quantities must be positive"));
            }
            if !seen.insert(*id) {
                return Err(Error::validation(format!(
                    "ingredient #{} is selected twice at level {}",
                    id, lvl.level
                )));
            }
        }
    }
    Ok(())
}

async fn discard_all(st: &AppState, ctx: &AuthContext, urls: &[Option<String>]) {
    for url in urls.iter().flatten() {
        discard_image(st, ctx, url).await;
    }
}

/// Replaces fields, images and link rows of the creature with `dex_no`.
#[instrument(skip(st, draft))]
pub async fn update_creature(st: &AppState, dex_no: u32, draft: CreatureDraft) -> Result<CreatureCard> {
    validate_draft(&draft)?;
    let ctx = st.session.admin_context()?;

    let card = find_by_dex(st, dex_no)
        .await?
        .ok_or_else(|| Error::NotFound(format!("creature #{:03}", dex_no)))?;
    let row = repo::fetch_row(&st.rest, &card.id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("creature #{:03}", dex_no)))?;
    let previous = pick_str(&row, repo::IMAGE);
    let previous_shiny = pick_str(&row, repo::SHINY_IMAGE);

    let mut draft = draft;
    let (image_url, uploaded) = upload_optional(st, &ctx, draft.image.take(), previous.clone()).await?;
    let fresh = |url: &Option<String>, uploaded: bool| if uploaded { url.clone() } else { None };
    let (shiny_url, shiny_uploaded) = match upload_optional(st, &ctx, draft.shiny_image.take(), previous_shiny.clone()).await {
        Ok(v) => v,
        Err(e) => {
            discard_all(st, &ctx, &[fresh(&image_url, uploaded)]).await;
            return Err(e);
        }
    };
    let uploads = [fresh(&image_url, uploaded), fresh(&shiny_url, shiny_uploaded)];

    let fields = repo::draft_to_row(&draft, image_url.as_deref(), shiny_url.as_deref());
    if let Err(e) = st
        .rest
        .patch_resolved(Resource::Creatures, &card.id, fields, &ctx.access_token)
        .await
    {
        discard_all(st, &ctx, &uploads).await;
        return Err(e);
    }

    let links = async {
        repo::replace_links(
            &st.rest,
            repo::BERRY_LINKS,
            &card.id,
            repo::berry_link_rows(&card.id, &draft),
            &ctx.access_token,
        )
        .await?;
        repo::replace_links(
            &st.rest,
            repo::INGREDIENT_LINKS,
            &card.id,
            repo::ingredient_link_rows(&card.id, &draft),
            &ctx.access_token,
        )
        .await
    };
    if let Err(e) = links.await {
        invalidate_creatures(st);
        warn!(dex_no, error = %e, "creature saved without its berry/ingredient rows");
        return Err(Error::PartialWrite {
            rolled_back: false,
            message: format!("creature #{:03} was saved but its berry/ingredient rows were not: {}", dex_no, e),
        });
    }

    cleanup_replaced_image(st, &ctx, previous.as_deref(), image_url.as_deref()).await;
    cleanup_replaced_image(st, &ctx, previous_shiny.as_deref(), shiny_url.as_deref()).await;
    invalidate_creatures(st);
    info!(dex_no, "creature updated");

    find_by_dex(st, dex_no)
        .await?
        .ok_or_else(|| Error::NotFound(format!("creature #{:03}", dex_no)))
}
