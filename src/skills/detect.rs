//! Debounced "does this id already exist?" lookup for the create form.
//!
//! Every call takes a ticket from a shared counter. After the debounce and
//! again after the lookup, a call whose ticket is no longer the latest
//! returns `Stale` and its result is dropped.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};

pub const DETECT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum Detection<T> {
    /// Existing record; the form switches to editing it.
    Found(T),
    /// Nothing at that id and nothing was loaded before.
    NotFound,
    /// A previously loaded record no longer matches; back to a blank draft.
    Reset,
    /// Input is not a positive integer.
    Invalid,
    /// A newer call superseded this one.
    Stale,
    Failed(Error),
}

pub struct IdDetector<F> {
    lookup: F,
    debounce: Duration,
    seq: AtomicU64,
    loaded: AtomicBool,
}

impl<F> IdDetector<F> {
    pub fn new(lookup: F) -> Self {
        Self::with_debounce(lookup, DETECT_DEBOUNCE)
    }

    pub fn with_debounce(lookup: F, debounce: Duration) -> Self {
        Self {
            lookup,
            debounce,
            seq: AtomicU64::new(0),
            loaded: AtomicBool::new(false),
        }
    }

    /// True while the form shows an existing record.
    pub fn is_editing(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn is_latest(&self, ticket: u64) -> bool {
        self.seq.load(Ordering::SeqCst) == ticket
    }

    fn miss<T>(&self) -> Detection<T> {
        if self.loaded.swap(false, Ordering::SeqCst) {
            Detection::Reset
        } else {
            Detection::NotFound
        }
    }

    pub async fn detect<T, Fut>(&self, input: &str) -> Detection<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let ticket = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.debounce).await;
        if !self.is_latest(ticket) {
            return Detection::Stale;
        }

        let id = match input.trim().parse::<u32>() {
            Ok(id) if id > 0 => id,
            _ => {
                return if self.loaded.swap(false, Ordering::SeqCst) {
                    Detection::Reset
                } else {
                    Detection::Invalid
                };
            }
        };

        let result = (self.lookup)(id).await;
        if !self.is_latest(ticket) {
            debug!(id, "discarding superseded lookup");
            return Detection::Stale;
        }
        match result {
            Ok(Some(found)) => {
                self.loaded.store(true, Ordering::SeqCst);
                Detection::Found(found)
            }
            Ok(None) => self.miss(),
            Err(e) => {
                warn!(id, error = %e, "id lookup failed");
                Detection::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::gateway::fake::FakeBackend;
    use crate::skills::services::load_main_skill;
    use crate::state::AppState;
    use serde_json::json;

    fn known(id: u32) -> std::future::Ready<Result<Option<u32>>> {
        std::future::ready(Ok((id == 7).then_some(id)))
    }

    #[tokio::test(start_paused = true)]
    async fn found_then_miss_resets() {
        let d = IdDetector::new(known);
        assert!(matches!(d.detect("12").await, Detection::NotFound));
        assert!(matches!(d.detect("7").await, Detection::Found(7)));
        assert!(d.is_editing());
        assert!(matches!(d.detect("70").await, Detection::Reset));
        assert!(!d.is_editing());
        assert!(matches!(d.detect("abc").await, Detection::Invalid));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_input_after_found_also_resets() {
        let d = IdDetector::new(known);
        assert!(matches!(d.detect("7").await, Detection::Found(7)));
        assert!(matches!(d.detect("0").await, Detection::Reset));
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_latest_keystroke_is_applied() {
        let d = IdDetector::new(known);
        let (first, second) = tokio::join!(d.detect("1"), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            d.detect("7").await
        });
        assert!(matches!(first, Detection::Stale));
        assert!(matches!(second, Detection::Found(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_superseded_mid_flight_is_stale() {
        let slow = |id: u32| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<_, Error>(Some(id))
        };
        let d = IdDetector::new(slow);
        let (first, second) = tokio::join!(d.detect("3"), async {
            tokio::time::sleep(Duration::from_millis(900)).await;
            d.detect("4").await
        });
        assert!(matches!(first, Detection::Stale));
        assert!(matches!(second, Detection::Found(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn detects_existing_main_skill() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_table("main_skills", vec![json!({ "id": 2, "name": "Energizing Cheer S" })])
                .with_table("main_skill_levels", vec![]),
        );
        let (st, _clock) = AppState::fake(backend);
        let d = IdDetector::new(|id| {
            let st = st.clone();
            async move { load_main_skill(&st, id).await }
        });
        match d.detect("2").await {
            Detection::Found(skill) => assert_eq!(skill.name, "Energizing Cheer S"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(d.detect("3").await, Detection::Reset));
    }
}
