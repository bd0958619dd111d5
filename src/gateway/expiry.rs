use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::clock::Clock;

pub const EXPIRY_DEBOUNCE_MS: i64 = 2_500;

lazy_static! {
    static ref EXPIRED_MESSAGE: Regex = Regex::new(
        r"(?i)(jwt expired|token is expired|token has expired|expired token|session expired|session_not_found)"
    )
    .unwrap();
}

/// Status 401 or a known expiry phrase; either one is enough.
pub fn is_expired_response(status: u16, message: Option<&str>) -> bool {
    status == 401 || message.is_some_and(|m| EXPIRED_MESSAGE.is_match(m))
}

/// Error text from a backend error payload, if it carries one.
pub fn extract_message(body: &Value) -> Option<String> {
    ["message", "error_description", "msg", "error"]
        .iter()
        .filter_map(|k| body.get(*k))
        .find_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()))
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpired {
    pub at_ms: i64,
    pub message: String,
}

struct NotifierInner {
    tx: broadcast::Sender<SessionExpired>,
    last_fired: Mutex<Option<i64>>,
    clock: Arc<dyn Clock>,
}

/// Broadcasts "your session is gone" at most once per debounce window.
#[derive(Clone)]
pub struct ExpiryNotifier {
    inner: Arc<NotifierInner>,
}

impl ExpiryNotifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(8);
        Self {
            inner: Arc::new(NotifierInner {
                tx,
                last_fired: Mutex::new(None),
                clock,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.inner.tx.subscribe()
    }

    /// Returns whether a notification actually went out.
    pub fn notify(&self, message: &str) -> bool {
        let now = self.inner.clock.now_ms();
        let Ok(mut last) = self.inner.last_fired.lock() else {
            warn!("expiry notifier lock poisoned");
            return false;
        };
        if let Some(prev) = *last {
            if now - prev < EXPIRY_DEBOUNCE_MS {
                return false;
            }
        }
        *last = Some(now);
        drop(last);

        info!(%message, "session expiry detected");
        // No receivers is fine.
        let _ = self.inner.tx.send(SessionExpired {
            at_ms: now,
            message: message.to_string(),
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    #[test]
    fn status_401_without_message_is_expired() {
        assert!(is_expired_response(401, None));
    }

    #[test]
    fn message_pattern_is_enough_even_on_success_status() {
        assert!(is_expired_response(200, Some("Token is expired")));
        assert!(is_expired_response(400, Some("JWT expired")));
        assert!(!is_expired_response(400, Some("duplicate key value")));
        assert!(!is_expired_response(500, None));
    }

    #[test]
    fn message_is_extracted_from_known_fields() {
        assert_eq!(
            extract_message(&json!({ "message": "jwt expired" })).as_deref(),
            Some("jwt expired")
        );
        assert_eq!(
            extract_message(&json!({ "error": "invalid_grant", "error_description": "bad" }))
                .as_deref(),
            Some("bad")
        );
        assert_eq!(extract_message(&json!([])), None);
    }

    #[tokio::test]
    async fn notifications_are_debounced() {
        let clock = Arc::new(ManualClock::new(10_000));
        let notifier = ExpiryNotifier::new(clock.clone());
        let mut rx = notifier.subscribe();

        assert!(notifier.notify("jwt expired"));
        clock.advance(1_000);
        assert!(!notifier.notify("jwt expired"));
        clock.advance(1_500);
        assert!(notifier.notify("jwt expired"));

        assert_eq!(rx.recv().await.unwrap().at_ms, 10_000);
        assert_eq!(rx.recv().await.unwrap().at_ms, 12_500);
        assert!(rx.try_recv().is_err());
    }
}
