use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use super::dto::NewsItem;
use super::repo;
use crate::cache::{DataSource, Loaded, EMPTY_NEWS_TTL_MS, NEWS_TTL_MS};
use crate::error::Result;
use crate::state::AppState;

pub const NEWS_KEY: &str = "latest";

fn news_ttl(items: &[NewsItem]) -> i64 {
    if items.is_empty() {
        EMPTY_NEWS_TTL_MS
    } else {
        NEWS_TTL_MS
    }
}

pub struct NewsLoad {
    pub loaded: Loaded<NewsItem>,
    /// Background refetch started because the list came from the persisted tier.
    pub revalidation: Option<JoinHandle<()>>,
}

/// Cached news list. A hit from the persisted tier is returned at once and
/// refreshed in the background.
#[instrument(skip(st))]
pub async fn load_news(st: &AppState) -> NewsLoad {
    if let Some(hit) = st.caches.news.read(NEWS_KEY) {
        let revalidation = if hit.source == DataSource::Persisted {
            revalidate_news(st)
        } else {
            None
        };
        return NewsLoad {
            loaded: Loaded::Ready {
                items: hit.data,
                source: hit.source,
            },
            revalidation,
        };
    }
    let fetched = st
        .caches
        .news
        .refresh(NEWS_KEY, news_ttl, || repo::fetch_news(&st.rest))
        .await;
    NewsLoad {
        loaded: Loaded::from_result(fetched),
        revalidation: None,
    }
}

/// Forced background refetch. `None` if one is already running.
pub fn revalidate_news(st: &AppState) -> Option<JoinHandle<()>> {
    let Some(guard) = st.caches.news.try_begin_revalidation(NEWS_KEY) else {
        debug!("news revalidation already in flight");
        return None;
    };
    let st = st.clone();
    Some(tokio::spawn(async move {
        let _guard = guard;
        match st
            .caches
            .news
            .refresh(NEWS_KEY, news_ttl, || repo::fetch_news(&st.rest))
            .await
        {
            Ok(hit) => debug!(count = hit.data.len(), "news revalidated"),
            Err(e) => warn!(error = %e, "news revalidation failed"),
        }
    }))
}

/// From the cached list when it has the item, otherwise read directly.
#[instrument(skip(st))]
pub async fn find_news(st: &AppState, id: &str) -> Result<Option<NewsItem>> {
    if let Some(hit) = st.caches.news.read(NEWS_KEY) {
        if let Some(item) = hit.data.into_iter().find(|n| n.id == id) {
            return Ok(Some(item));
        }
    }
    repo::fetch_news_item(&st.rest, id).await
}
