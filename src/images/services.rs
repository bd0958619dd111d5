use bytes::Bytes;
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::dto::AuthContext;
use crate::error::{Error, Result};
use crate::state::AppState;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^a-z0-9._-]+").unwrap();
}

/// A local file picked for upload.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub body: Bytes,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).to_lowercase();
    let cleaned = UNSAFE_CHARS.replace_all(&base, "-");
    let cleaned = cleaned.trim_matches(|c| c == '-' || c == '.');
    let cleaned: String = cleaned.chars().take(64).collect();
    if cleaned.is_empty() {
        "image".into()
    } else {
        cleaned
    }
}

/// `<user>/<epoch-ms>-<suffix>-<sanitized name>`; adds an extension from the mime type if missing.
pub fn object_key(user_id: Uuid, file_name: &str, content_type: &str, now_ms: i64, suffix: &str) -> String {
    let mut name = sanitize_file_name(file_name);
    if !name.contains('.') {
        if let Some(ext) = ext_from_mime(content_type) {
            name = format!("{}.{}", name, ext);
        }
    }
    format!("{}/{}-{}-{}", user_id, now_ms, suffix, name)
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Uploads into the caller's folder and returns the public URL.
#[instrument(skip(st, ctx, upload), fields(file = %upload.file_name, size = upload.body.len()))]
pub async fn upload_image(st: &AppState, ctx: &AuthContext, upload: ImageUpload) -> Result<String> {
    if !upload.content_type.starts_with("image/") {
        return Err(Error::validation(format!(
            "{} is not an image ({})",
            upload.file_name, upload.content_type
        )));
    }
    if upload.body.is_empty() {
        return Err(Error::validation(format!("{} is empty", upload.file_name)));
    }

    let key = object_key(
        ctx.user_id,
        &upload.file_name,
        &upload.content_type,
        st.clock.now_ms(),
        &random_suffix(),
    );
    st.storage
        .put_object(&key, upload.body, &upload.content_type, &ctx.access_token)
        .await?;
    info!(%key, "image uploaded");
    st.storage.public_url(&key)
}

/// Removes a blob we own. Failures are logged, never returned.
pub async fn discard_image(st: &AppState, ctx: &AuthContext, url: &str) {
    let Some(key) = st.storage.key_from_public_url(url) else {
        return;
    };
    match st.storage.delete_object(&key, &ctx.access_token).await {
        Ok(()) => info!(%key, "orphaned image removed"),
        Err(e) => warn!(%key, error = %e, "orphaned image cleanup failed"),
    }
}

/// Deletes `previous` when a write replaced it with something else.
pub async fn cleanup_replaced_image(st: &AppState, ctx: &AuthContext, previous: Option<&str>, current: Option<&str>) {
    if let Some(prev) = previous.filter(|p| !p.is_empty()) {
        if Some(prev) != current {
            discard_image(st, ctx, prev).await;
        }
    }
}

/// Uploads `upload` if present; otherwise keeps `existing`.
pub async fn upload_optional(
    st: &AppState,
    ctx: &AuthContext,
    upload: Option<ImageUpload>,
    existing: Option<String>,
) -> Result<(Option<String>, bool)> {
    match upload {
        Some(upload) => Ok((Some(upload_image(st, ctx, upload).await?), true)),
        None => Ok((existing, false)),
    }
}

#[cfg(test)]
mod image_tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::fake::FakeBackend;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("C:\\Users\\me\\Oran Berry (1).PNG"), "oran-berry-1-.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("???"), "image");
    }

    #[test]
    fn object_key_has_user_folder_timestamp_and_suffix() {
        let user = Uuid::nil();
        let key = object_key(user, "icon", "image/webp", 1_700_000_000_000, "ab12cd34");
        assert_eq!(
            key,
            "00000000-0000-0000-0000-000000000000/1700000000000-ab12cd34-icon.webp"
        );
    }

    #[test]
    fn suffix_is_random_lowercase() {
        let a = random_suffix();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| !c.is_ascii_uppercase()));
    }

    #[tokio::test]
    async fn upload_then_cleanup_only_removes_changed_image() {
        let backend = Arc::new(FakeBackend::new().with_object("images/u/old.png"));
        let (st, _clock) = AppState::fake(backend.clone());
        let ctx = AuthContext::test_admin();

        let url = upload_image(&st, &ctx, ImageUpload::new("new.png", "image/png", &b"png"[..]))
            .await
            .unwrap();
        assert!(url.starts_with("https://db.test/storage/object/public/images/"));

        let old = "https://db.test/storage/object/public/images/u/old.png";
        cleanup_replaced_image(&st, &ctx, Some(old), Some(old)).await;
        assert!(backend.has_object("images/u/old.png"));
        cleanup_replaced_image(&st, &ctx, Some(old), Some(&url)).await;
        assert!(!backend.has_object("images/u/old.png"));
        assert_eq!(backend.object_keys().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_failure_is_swallowed() {
        let backend = Arc::new(FakeBackend::new());
        let (st, _clock) = AppState::fake(backend);
        let ctx = AuthContext::test_admin();
        cleanup_replaced_image(
            &st,
            &ctx,
            Some("https://db.test/storage/object/public/images/u/missing.png"),
            None,
        )
        .await;
    }

    #[tokio::test]
    async fn non_images_are_rejected_before_upload() {
        let backend = Arc::new(FakeBackend::new());
        let (st, _clock) = AppState::fake(backend.clone());
        let err = upload_image(
            &st,
            &AuthContext::test_admin(),
            ImageUpload::new("notes.txt", "text/plain", &b"hi"[..]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(backend.requests().is_empty());
    }
}
