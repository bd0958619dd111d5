use std::collections::HashSet;

use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::dto::{MainSkill, MainSkillDraft, SaveOutcome};
use super::repo;
use crate::catalog::repo::IMAGE;
use crate::catalog::services::invalidate_catalog;
use crate::catalog::CatalogKind;
use crate::error::{Error, Result};
use crate::gateway::coerce::pick_str;
use crate::gateway::Resource;
use crate::images::services::{cleanup_replaced_image, discard_image, upload_optional};
use crate::state::AppState;

/// Main skill with its levels, read live.
#[instrument(skip(st))]
pub async fn load_main_skill(st: &AppState, id: u32) -> Result<Option<MainSkill>> {
    let Some(row) = repo::fetch_skill_row(&st.rest, id).await? else {
        return Ok(None);
    };
    let levels = repo::fetch_levels(&st.rest, id).await?;
    Ok(repo::map_skill(&row, levels))
}

fn validate_draft(id: u32, draft: &MainSkillDraft) -> Result<()> {
    if id == 0 {
        return Err(Error::validation("id must be a positive integer"));
    }
    if draft.name.trim().is_empty() {
        return Err(Error::validation("name is required"));
    }
    let mut seen = HashSet::new();
    for lvl in &draft.levels {
        if lvl.level == 0 {
            return Err(Error::validation("level must be a positive integer"));
        }
        if !seen.insert(lvl.level) {
            return Err(Error::validation(format!("level {} is listed twice", lvl.level)));
        }
    }
    Ok(())
}

/// Creates or updates main skill `id` together with its level rows.
///
/// An existing row is patched and its levels fully replaced. A new row is
/// inserted first; if its levels cannot be written the row is deleted again
/// and the error says whether that rollback worked.
#[instrument(skip(st, draft), fields(levels = draft.levels.len()))]
pub async fn save_main_skill(st: &AppState, id: u32, draft: MainSkillDraft) -> Result<SaveOutcome> {
    validate_draft(id, &draft)?;
    let ctx = st.session.admin_context()?;

    let existing = repo::fetch_skill_row(&st.rest, id).await?;
    let previous = existing.as_ref().and_then(|row| pick_str(row, IMAGE));

    let mut draft = draft;
    let (image_url, uploaded) = upload_optional(st, &ctx, draft.image.take(), previous.clone()).await?;
    let fresh_upload = image_url.clone().filter(|_| uploaded);
    let mut fields = repo::draft_to_row(&draft, image_url.as_deref());

    let created = existing.is_none();
    if created {
        fields["id"] = json!(id);
        if let Err(e) = st
            .rest
            .insert_resolved(Resource::MainSkills, &ctx.access_token, |_| fields.clone())
            .await
        {
            if let Some(url) = &fresh_upload {
                discard_image(st, &ctx, url).await;
            }
            return Err(e);
        }

        if let Err(e) = repo::replace_levels(&st.rest, id, &draft.levels, &ctx.access_token).await {
            let rollback = st
                .rest
                .delete_resolved(Resource::MainSkills, &id.to_string(), &ctx.access_token)
                .await;
            invalidate_catalog(st, CatalogKind::MainSkills);
            return Err(match rollback {
                Ok(_) => {
                    warn!(id, error = %e, "levels failed; new main skill rolled back");
                    if let Some(url) = &fresh_upload {
                        discard_image(st, &ctx, url).await;
                    }
                    Error::PartialWrite {
                        rolled_back: true,
                        message: format!("levels could not be saved ({}); main skill #{} was not created", e, id),
                    }
                }
                Err(rb) => {
                    error!(id, error = %e, rollback_error = %rb, "rollback failed");
                    Error::PartialWrite {
                        rolled_back: false,
                        message: format!(
                            "levels could not be saved ({}) and removing main skill #{} failed ({}); manual cleanup required",
                            e, id, rb
                        ),
                    }
                }
            });
        }
    } else {
        if let Err(e) = st
            .rest
            .patch_resolved(Resource::MainSkills, &id.to_string(), fields, &ctx.access_token)
            .await
        {
            if let Some(url) = &fresh_upload {
                discard_image(st, &ctx, url).await;
            }
            return Err(e);
        }
        if let Err(e) = repo::replace_levels(&st.rest, id, &draft.levels, &ctx.access_token).await {
            invalidate_catalog(st, CatalogKind::MainSkills);
            return Err(Error::PartialWrite {
                rolled_back: false,
                message: format!("main skill #{} was updated but its levels were not ({})", id, e),
            });
        }
        cleanup_replaced_image(st, &ctx, previous.as_deref(), image_url.as_deref()).await;
    }

    invalidate_catalog(st, CatalogKind::MainSkills);
    let skill = load_main_skill(st, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("main skill #{}", id)))?;
    info!(id, created, "main skill saved");
    Ok(if created {
        SaveOutcome::Created(skill)
    } else {
        SaveOutcome::Updated(skill)
    })
}

/// Levels first (best effort, every table/key spelling), then the skill row.
/// A failed parent delete fails the call even though levels are gone.
#[instrument(skip(st))]
pub async fn delete_main_skill(st: &AppState, id: u32) -> Result<()> {
    let ctx = st.session.admin_context()?;
    let image = repo::fetch_skill_row(&st.rest, id)
        .await?
        .and_then(|row| pick_str(&row, IMAGE));

    let cleared = st
        .rest
        .delete_every_candidate(Resource::SkillLevels, &id.to_string(), &ctx.access_token)
        .await;
    st.rest
        .delete_resolved(Resource::MainSkills, &id.to_string(), &ctx.access_token)
        .await?;

    if let Some(url) = image {
        discard_image(st, &ctx, &url).await;
    }
    invalidate_catalog(st, CatalogKind::MainSkills);
    info!(id, level_tables = cleared, "main skill deleted");
    Ok(())
}
