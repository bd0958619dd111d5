use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use tracing::instrument;

use crate::error::Result;
use crate::gateway::{ApiBody, RestClient};

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str, token: &str) -> Result<()>;
    async fn delete_object(&self, key: &str, token: &str) -> Result<()>;
    fn public_url(&self, key: &str) -> Result<String>;
    /// Object key behind a public URL of this bucket; `None` for foreign URLs.
    fn key_from_public_url(&self, url: &str) -> Option<String>;
}

/// Path-addressed object endpoint of the hosted backend.
#[derive(Clone)]
pub struct RestBlobStore {
    rest: RestClient,
}

impl RestBlobStore {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    fn object_path(&self, key: &str) -> Result<String> {
        let api = self.rest.api()?;
        Ok(format!("/storage/object/{}/{}", api.bucket, key.trim_start_matches('/')))
    }
}

#[async_trait]
impl BlobStore for RestBlobStore {
    #[instrument(skip(self, body, token), fields(size = body.len()))]
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str, token: &str) -> Result<()> {
        let path = self.object_path(key)?;
        let mut req = self.rest.request(Method::POST, &path, Some(token))?;
        req.body = ApiBody::Raw {
            data: body,
            content_type: content_type.to_string(),
        };
        let resp = self.rest.send(req).await?;
        if !resp.is_success() {
            return Err(self.rest.failure(&resp, true));
        }
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn delete_object(&self, key: &str, token: &str) -> Result<()> {
        let path = self.object_path(key)?;
        let req = self.rest.request(Method::DELETE, &path, Some(token))?;
        let resp = self.rest.send(req).await?;
        if !resp.is_success() {
            // only orphan cleanup deletes blobs; it must not sign anyone out
            return Err(self.rest.failure(&resp, false));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> Result<String> {
        let api = self.rest.api()?;
        Ok(format!(
            "{}/storage/object/public/{}/{}",
            api.base_url,
            api.bucket,
            key.trim_start_matches('/')
        ))
    }

    fn key_from_public_url(&self, url: &str) -> Option<String> {
        let api = self.rest.api().ok()?;
        let prefix = format!("{}/storage/object/public/{}/", api.base_url, api.bucket);
        let key = url.strip_prefix(&prefix)?;
        let key = key.split(['?', '#']).next().unwrap_or(key);
        (!key.is_empty()).then(|| key.to_string())
    }
}

#[cfg(test)]
mod storage_tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::gateway::fake::FakeBackend;
    use crate::gateway::ExpiryNotifier;

    fn store(backend: Arc<FakeBackend>) -> RestBlobStore {
        RestBlobStore::new(RestClient::new(
            AppConfig::with_api("https://db.test", "anon").api,
            backend,
            ExpiryNotifier::new(Arc::new(ManualClock::new(0))),
        ))
    }

    #[test]
    fn public_url_round_trips_to_key() {
        let store = store(Arc::new(FakeBackend::new()));
        let url = store.public_url("u1/1700000000000-abc123-oran.png").unwrap();
        assert_eq!(
            url,
            "https://db.test/storage/object/public/images/u1/1700000000000-abc123-oran.png"
        );
        assert_eq!(
            store.key_from_public_url(&format!("{}?v=2", url)).as_deref(),
            Some("u1/1700000000000-abc123-oran.png")
        );
        assert_eq!(store.key_from_public_url("https://cdn.elsewhere/x.png"), None);
    }

    #[tokio::test]
    async fn put_and_delete_hit_bucket_paths() {
        let backend = Arc::new(FakeBackend::new());
        let store = store(backend.clone());
        store
            .put_object("u1/a.png", Bytes::from_static(b"png"), "image/png", "tok")
            .await
            .unwrap();
        assert!(backend.has_object("images/u1/a.png"));
        store.delete_object("u1/a.png", "tok").await.unwrap();
        assert!(!backend.has_object("images/u1/a.png"));
        assert!(store.delete_object("u1/a.png", "tok").await.is_err());
    }

    #[tokio::test]
    async fn rejected_delete_does_not_broadcast_expiry() {
        let backend = Arc::new(FakeBackend::new().with_object("images/u1/a.png"));
        let store = store(backend.clone());
        let mut rx = store.rest.expiry().subscribe();
        backend.fail(Method::DELETE, "/storage/object/images/u1/a.png", 401, "JWT expired");

        let err = store.delete_object("u1/a.png", "tok").await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Backend { status: 401, .. }));
        assert!(rx.try_recv().is_err());
        assert!(backend.has_object("images/u1/a.png"));
    }
}
