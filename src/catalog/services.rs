use serde_json::json;
use tracing::{info, instrument};

use super::dto::{CatalogDraft, CatalogEntry, CatalogKind};
use super::repo;
use crate::cache::{Loaded, CATALOG_TTL_MS};
use crate::creatures::services::invalidate_creatures;
use crate::error::{Error, Result};
use crate::gateway::coerce::pick_str;
use crate::images::services::{cleanup_replaced_image, discard_image, upload_optional};
use crate::state::AppState;

/// Cached catalog read; failures become a `Fallback`.
#[instrument(skip(st), fields(kind = kind.as_str()))]
pub async fn load_catalog(st: &AppState, kind: CatalogKind) -> Loaded<CatalogEntry> {
    Loaded::from_result(
        st.caches
            .catalogs
            .get_or_fetch(kind.as_str(), |_| CATALOG_TTL_MS, || repo::fetch_catalog(&st.rest, kind))
            .await,
    )
}

/// Same as `load_catalog` but propagates failures.
pub async fn catalog_entries(st: &AppState, kind: CatalogKind) -> Result<Vec<CatalogEntry>> {
    st.caches
        .catalogs
        .get_or_fetch(kind.as_str(), |_| CATALOG_TTL_MS, || repo::fetch_catalog(&st.rest, kind))
        .await
        .map(|hit| hit.data)
}

pub async fn find_entry(st: &AppState, kind: CatalogKind, id: u32) -> Result<Option<CatalogEntry>> {
    Ok(catalog_entries(st, kind).await?.into_iter().find(|e| e.id == id))
}

pub fn invalidate_catalog(st: &AppState, kind: CatalogKind) {
    st.caches.catalogs.invalidate(kind.as_str());
    // Creature cards embed catalog names and images.
    invalidate_creatures(st);
}

fn validate_draft(kind: CatalogKind, draft: &CatalogDraft) -> Result<()> {
    if draft.name.trim().is_empty() {
        return Err(Error::validation("name is required"));
    }
    for (label, v) in [
        ("min energy", draft.min_energy),
        ("max energy", draft.max_energy),
        ("price", draft.price),
    ] {
        if let Some(v) = v {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::validation(format!("{} must be a non-negative number", label)));
            }
        }
    }
    if kind == CatalogKind::Berries {
        if let (Some(min), Some(max)) = (draft.min_energy, draft.max_energy) {
            if min > max {
                return Err(Error::validation("min energy cannot exceed max energy"));
            }
        }
    }
    Ok(())
}

#[instrument(skip(st, draft), fields(kind = kind.as_str()))]
pub async fn create_entry(st: &AppState, kind: CatalogKind, id: Option<u32>, draft: CatalogDraft) -> Result<CatalogEntry> {
    validate_draft(kind, &draft)?;
    if id == Some(0) {
        return Err(Error::validation("id must be a positive integer"));
    }
    let ctx = st.session.admin_context()?;

    let mut draft = draft;
    let (image_url, uploaded) = upload_optional(st, &ctx, draft.image.take(), None).await?;
    let mut row = repo::draft_to_row(kind, &draft, image_url.as_deref());
    if let Some(id) = id {
        row["id"] = json!(id);
    }

    let inserted = st
        .rest
        .insert_resolved(kind.resource(), &ctx.access_token, |_| row.clone())
        .await;
    let rows = match inserted {
        Ok((_, rows)) => rows,
        Err(e) => {
            if uploaded {
                if let Some(url) = &image_url {
                    discard_image(st, &ctx, url).await;
                }
            }
            return Err(e);
        }
    };

    invalidate_catalog(st, kind);
    let entry = rows
        .first()
        .and_then(|r| repo::map_row(kind, r))
        .ok_or_else(|| Error::NotFound(format!("created {} row", kind.as_str())))?;
    info!(id = entry.id, "catalog entry created");
    Ok(entry)
}

#[instrument(skip(st, draft), fields(kind = kind.as_str()))]
pub async fn update_entry(st: &AppState, kind: CatalogKind, id: u32, draft: CatalogDraft) -> Result<CatalogEntry> {
    validate_draft(kind, &draft)?;
    let ctx = st.session.admin_context()?;

    let (_, existing) = repo::fetch_entry_row(&st.rest, kind, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{} #{}", kind.as_str(), id)))?;
    let previous = pick_str(&existing, repo::IMAGE);

    let mut draft = draft;
    let (image_url, uploaded) = upload_optional(st, &ctx, draft.image.take(), previous.clone()).await?;
    let fields = repo::draft_to_row(kind, &draft, image_url.as_deref());

    let patched = st
        .rest
        .patch_resolved(kind.resource(), &id.to_string(), fields, &ctx.access_token)
        .await;
    let rows = match patched {
        Ok((_, rows)) => rows,
        Err(e) => {
            if uploaded {
                if let Some(url) = &image_url {
                    discard_image(st, &ctx, url).await;
                }
            }
            return Err(e);
        }
    };

    cleanup_replaced_image(st, &ctx, previous.as_deref(), image_url.as_deref()).await;
    invalidate_catalog(st, kind);

    rows.first()
        .and_then(|r| repo::map_row(kind, r))
        .ok_or_else(|| Error::NotFound(format!("{} #{}", kind.as_str(), id)))
}

#[instrument(skip(st), fields(kind = kind.as_str()))]
pub async fn delete_entry(st: &AppState, kind: CatalogKind, id: u32) -> Result<()> {
    let ctx = st.session.admin_context()?;
    let image = repo::fetch_entry_row(&st.rest, kind, id)
        .await?
        .and_then(|(_, row)| pick_str(&row, repo::IMAGE));

    st.rest
        .delete_resolved(kind.resource(), &id.to_string(), &ctx.access_token)
        .await?;
    if let Some(url) = image {
        discard_image(st, &ctx, &url).await;
    }
    invalidate_catalog(st, kind);
    info!(id, "catalog entry deleted");
    Ok(())
}
