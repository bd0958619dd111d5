use std::cmp::Ordering;

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};
use tracing::{instrument, warn};

use super::dto::{NewsItem, DEFAULT_CATEGORY};
use crate::error::Result;
use crate::gateway::coerce::{pick_str, value_text};
use crate::gateway::{Query, Resource, RestClient};

const TITLE: &[&str] = &["title", "headline", "name"];
const CATEGORY: &[&str] = &["category", "tag", "kind"];
const COVER: &[&str] = &["cover_image_url", "cover_url", "image_url", "thumbnail_url"];
const PUBLISHED: &[&str] = &["published_at", "publish_date", "date", "created_at"];
const CONTENT: &[&str] = &["content", "body", "markdown"];

/// Whitespace collapsed, consecutive repeated words dropped.
pub fn normalize_category(raw: Option<&str>) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    for tok in raw.unwrap_or_default().split_whitespace() {
        if tokens.last().is_some_and(|prev| prev.eq_ignore_ascii_case(tok)) {
            continue;
        }
        tokens.push(tok);
    }
    if tokens.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        tokens.join(" ")
    }
}

/// RFC 3339, Postgres `YYYY-MM-DD HH:MM:SS+TZ`, or a bare date (midnight UTC).
pub fn parse_published(raw: &str) -> Option<OffsetDateTime> {
    let s = raw.trim();
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(t);
    }

    if s.len() > 10 {
        let mut iso = s.replacen(' ', "T", 1);
        let tail = iso.get(19..).unwrap_or_default();
        let has_offset = iso.ends_with('Z') || tail.contains('+') || tail.contains('-');
        if !has_offset {
            iso.push('Z');
        } else if let Some(pos) = iso.rfind(['+', '-']) {
            if iso.len() - pos == 3 {
                iso.push_str(":00");
            }
        }
        if let Ok(t) = OffsetDateTime::parse(&iso, &Rfc3339) {
            return Some(t);
        }
    }

    Date::parse(s.get(..10)?, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|d| d.midnight().assume_utc())
}

fn content_of(row: &Value) -> String {
    if let Some(text) = pick_str(row, CONTENT) {
        return text;
    }
    CONTENT
        .iter()
        .filter_map(|k| row.get(*k))
        .find(|v| v.is_object() || v.is_array())
        .and_then(|v| serde_json::to_string_pretty(v).ok())
        .unwrap_or_default()
}

pub fn map_row(row: &Value) -> Option<NewsItem> {
    let id = row.get("id").and_then(value_text)?;
    let published_label = pick_str(row, PUBLISHED);
    Some(NewsItem {
        title: pick_str(row, TITLE).unwrap_or_else(|| format!("News #{}", id)),
        category: normalize_category(pick_str(row, CATEGORY).as_deref()),
        cover_image_url: pick_str(row, COVER),
        published_at: published_label.as_deref().and_then(parse_published),
        published_label,
        content: content_of(row),
        id,
    })
}

/// Numeric ids compare as numbers, anything else as text.
fn cmp_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Newest (highest id) first.
pub fn map_rows(rows: &[Value]) -> Vec<NewsItem> {
    let mut items: Vec<NewsItem> = rows
        .iter()
        .filter_map(|row| {
            let item = map_row(row);
            if item.is_none() {
                warn!("skipping news row without an id");
            }
            item
        })
        .collect();
    items.sort_by(|a, b| cmp_ids(&b.id, &a.id));
    items
}

#[instrument(skip(rest))]
pub async fn fetch_news(rest: &RestClient) -> Result<Vec<NewsItem>> {
    let (_, rows) = rest
        .fetch_resolved(Resource::News, |l| Query::all().order_desc(l.key))
        .await?;
    Ok(map_rows(&rows))
}

pub async fn fetch_news_item(rest: &RestClient, id: &str) -> Result<Option<NewsItem>> {
    let (_, rows) = rest
        .fetch_resolved(Resource::News, |l| Query::all().eq(l.key, id).limit(1))
        .await?;
    Ok(rows.first().and_then(map_row))
}
