use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const DEFAULT_CATEGORY: &str = "Uncategorized";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub category: String,
    pub cover_image_url: Option<String>,
    /// Parsed publication time, when the stored text could be read.
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    /// The stored text as-is.
    pub published_label: Option<String>,
    /// Markdown, or pretty JSON when the row held structured content.
    pub content: String,
}
