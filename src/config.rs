use std::path::PathBuf;

use serde::Deserialize;

pub const DEFAULT_BUCKET: &str = "images";

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub anon_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` when the URL or the anonymous key is absent.
    pub api: Option<ApiConfig>,
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let base_url = non_empty_var("SLEEPDEX_API_URL");
        let anon_key = non_empty_var("SLEEPDEX_ANON_KEY");
        let bucket = non_empty_var("SLEEPDEX_STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into());

        let api = match (base_url, anon_key) {
            (Some(base_url), Some(anon_key)) => Some(ApiConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                anon_key,
                bucket,
            }),
            _ => {
                tracing::warn!("SLEEPDEX_API_URL / SLEEPDEX_ANON_KEY missing; data operations disabled");
                None
            }
        };

        let data_dir = non_empty_var("SLEEPDEX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".sleepdex"));

        Self { api, data_dir }
    }

    pub fn with_api(base_url: &str, anon_key: &str) -> Self {
        Self {
            api: Some(ApiConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                anon_key: anon_key.to_string(),
                bucket: DEFAULT_BUCKET.into(),
            }),
            data_dir: PathBuf::from(".sleepdex"),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_api_strips_trailing_slash_and_defaults_bucket() {
        let cfg = AppConfig::with_api("https://example.test/", "anon");
        let api = cfg.api.unwrap();
        assert_eq!(api.base_url, "https://example.test");
        assert_eq!(api.bucket, DEFAULT_BUCKET);
    }
}
