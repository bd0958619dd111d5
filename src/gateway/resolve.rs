//! Prioritised table/column candidates per logical resource.
//!
//! The backend has carried both a legacy singular and a current table name for
//! some entities. Callers name the resource; the resolver walks the candidates
//! in order and stops at the first one that answers.

use serde_json::Value;
use tracing::{debug, warn};

use super::rest::{Query, RestClient};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub table: &'static str,
    /// Column the resource is addressed by (primary key, or parent key for child rows).
    pub key: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Berries,
    Ingredients,
    MainSkills,
    SubSkills,
    /// Child rows of a main skill, keyed by the parent id.
    SkillLevels,
    Creatures,
    CreatureBerries,
    CreatureIngredients,
    News,
    Profiles,
}

impl Resource {
    pub fn locators(self) -> &'static [Locator] {
        match self {
            Resource::Berries => &[Locator { table: "berries", key: "id" }],
            Resource::Ingredients => &[Locator { table: "ingredients", key: "id" }],
            Resource::MainSkills => &[
                Locator { table: "main_skills", key: "id" },
                Locator { table: "main_skill", key: "id" },
            ],
            Resource::SubSkills => &[
                Locator { table: "sub_skills", key: "id" },
                Locator { table: "sub_skill", key: "id" },
            ],
            Resource::SkillLevels => &[
                Locator { table: "main_skill_levels", key: "main_skill_id" },
                Locator { table: "main_skill_levels", key: "skill_id" },
                Locator { table: "main_skill_level", key: "main_skill_id" },
                Locator { table: "main_skill_level", key: "skill_id" },
            ],
            Resource::Creatures => &[Locator { table: "pokemon", key: "id" }],
            Resource::CreatureBerries => &[Locator { table: "pokemon_berries", key: "pokemon_id" }],
            Resource::CreatureIngredients => &[Locator { table: "pokemon_ingredients", key: "pokemon_id" }],
            Resource::News => &[Locator { table: "news", key: "id" }],
            Resource::Profiles => &[Locator { table: "profiles", key: "id" }],
        }
    }
}

/// Errors that mean "try the next candidate" on a read.
fn falls_through(err: &Error) -> bool {
    matches!(err, Error::Backend { .. })
}

/// The candidate table or column does not exist. Writes only move on for this;
/// constraint and permission failures belong to the table that answered.
pub(crate) fn is_schema_miss(err: &Error) -> bool {
    match err {
        Error::Backend { status: 404, .. } => true,
        Error::Backend { status: 400, message } => {
            let m = message.to_lowercase();
            m.contains("does not exist") || m.contains("could not find the")
        }
        _ => false,
    }
}

impl RestClient {
    /// Reads from the first candidate that answers successfully.
    pub async fn fetch_resolved<F>(&self, resource: Resource, build: F) -> Result<(Locator, Vec<Value>)>
    where
        F: Fn(&Locator) -> Query,
    {
        let mut last_err = None;
        for locator in resource.locators() {
            match self.fetch_rows(locator.table, &build(locator)).await {
                Ok(rows) => return Ok((*locator, rows)),
                Err(e) if falls_through(&e) => {
                    debug!(table = locator.table, key = locator.key, error = %e, "candidate rejected");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NotFound(format!("{:?} table", resource))))
    }

    pub async fn insert_resolved<F>(&self, resource: Resource, token: &str, build: F) -> Result<(Locator, Vec<Value>)>
    where
        F: Fn(&Locator) -> Value,
    {
        let mut last_err = None;
        for locator in resource.locators() {
            match self.insert(locator.table, build(locator), token).await {
                Ok(rows) => return Ok((*locator, rows)),
                Err(e) if is_schema_miss(&e) => {
                    debug!(table = locator.table, key = locator.key, error = %e, "candidate missing");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NotFound(format!("{:?} table", resource))))
    }

    /// Patches rows whose locator key equals `id`.
    pub async fn patch_resolved(
        &self,
        resource: Resource,
        id: &str,
        fields: Value,
        token: &str,
    ) -> Result<(Locator, Vec<Value>)> {
        let mut last_err = None;
        for locator in resource.locators() {
            let filter = Query::new().eq(locator.key, id);
            match self.patch(locator.table, &filter, fields.clone(), token).await {
                Ok(rows) => return Ok((*locator, rows)),
                Err(e) if is_schema_miss(&e) => {
                    debug!(table = locator.table, key = locator.key, error = %e, "candidate missing");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NotFound(format!("{:?} table", resource))))
    }

    pub async fn delete_resolved(&self, resource: Resource, id: &str, token: &str) -> Result<Locator> {
        let mut last_err = None;
        for locator in resource.locators() {
            let filter = Query::new().eq(locator.key, id);
            match self.delete(locator.table, &filter, token).await {
                Ok(()) => return Ok(*locator),
                Err(e) if is_schema_miss(&e) => {
                    debug!(table = locator.table, key = locator.key, error = %e, "candidate missing");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::NotFound(format!("{:?} table", resource))))
    }

    /// Deletes from every candidate, ignoring failures. Returns how many answered.
    pub async fn delete_every_candidate(&self, resource: Resource, id: &str, token: &str) -> usize {
        let mut ok = 0;
        for locator in resource.locators() {
            let filter = Query::new().eq(locator.key, id);
            match self.delete(locator.table, &filter, token).await {
                Ok(()) => ok += 1,
                Err(e) => warn!(table = locator.table, key = locator.key, error = %e, "best-effort delete failed"),
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reqwest::Method;
    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AppConfig;
    use crate::gateway::expiry::ExpiryNotifier;
    use crate::gateway::fake::FakeBackend;

    fn client(backend: Arc<FakeBackend>) -> RestClient {
        RestClient::new(
            AppConfig::with_api("https://db.test", "anon").api,
            backend,
            ExpiryNotifier::new(Arc::new(ManualClock::new(0))),
        )
    }

    #[tokio::test]
    async fn legacy_table_is_used_when_current_is_missing() {
        let backend = Arc::new(
            FakeBackend::new().with_table("main_skill", vec![json!({ "id": 1, "name": "Charge Strength S" })]),
        );
        let (locator, rows) = client(backend.clone())
            .fetch_resolved(Resource::MainSkills, |l| Query::all().order_asc(l.key))
            .await
            .unwrap();
        assert_eq!(locator.table, "main_skill");
        assert_eq!(rows.len(), 1);
        assert_eq!(backend.count(&Method::GET, "/rest/main_skills"), 1);
        assert_eq!(backend.count(&Method::GET, "/rest/main_skill"), 1);
    }

    #[tokio::test]
    async fn lower_priority_candidate_is_not_queried_after_success() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_table("main_skills", vec![json!({ "id": 1 })])
                .with_table("main_skill", vec![json!({ "id": 2 })]),
        );
        let (locator, rows) = client(backend.clone())
            .fetch_resolved(Resource::MainSkills, |_| Query::all())
            .await
            .unwrap();
        assert_eq!(locator.table, "main_skills");
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(backend.count(&Method::GET, "/rest/main_skill"), 0);
    }

    #[tokio::test]
    async fn child_rows_fall_through_foreign_key_spellings() {
        let backend = Arc::new(FakeBackend::new().with_table(
            "main_skill_levels",
            vec![json!({ "skill_id": 4, "level": 1, "value": 400 })],
        ));
        let (locator, rows) = client(backend)
            .fetch_resolved(Resource::SkillLevels, |l| Query::all().eq(l.key, 4))
            .await
            .unwrap();
        assert_eq!(locator, Locator { table: "main_skill_levels", key: "skill_id" });
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn all_candidates_failing_returns_last_error() {
        let backend = Arc::new(FakeBackend::new());
        let err = client(backend)
            .fetch_resolved(Resource::SubSkills, |_| Query::all())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sub_skill"));
    }

    #[test]
    fn only_missing_tables_and_columns_count_as_schema_misses() {
        assert!(is_schema_miss(&Error::backend(404, "relation \"public.sub_skills\" does not exist")));
        assert!(is_schema_miss(&Error::backend(400, "column sub_skill.effect_type does not exist")));
        assert!(is_schema_miss(&Error::backend(400, "Could not find the 'rarity' column of 'sub_skills'")));
        assert!(!is_schema_miss(&Error::backend(409, "duplicate key value violates unique constraint")));
        assert!(!is_schema_miss(&Error::backend(403, "permission denied for table sub_skills")));
        assert!(!is_schema_miss(&Error::backend(400, "invalid input syntax for type integer")));
    }

    #[tokio::test]
    async fn constraint_violation_does_not_spill_into_legacy_table() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_table("sub_skills", vec![json!({ "id": 1, "name": "Helping Bonus" })])
                .with_table("sub_skill", vec![]),
        );
        let err = client(backend.clone())
            .insert_resolved(Resource::SubSkills, "tok", |_| json!({ "id": 1, "name": "Helping Bonus" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend { status: 409, .. }));
        assert!(backend.rows("sub_skill").is_empty());
        assert_eq!(backend.count(&Method::POST, "/rest/sub_skill"), 0);
    }

    #[tokio::test]
    async fn writes_move_on_when_the_current_table_is_missing() {
        let backend = Arc::new(FakeBackend::new().with_table("sub_skill", vec![json!({ "id": 1, "name": "x" })]));
        let (locator, _) = client(backend.clone())
            .patch_resolved(Resource::SubSkills, "1", json!({ "name": "Helping Bonus" }), "tok")
            .await
            .unwrap();
        assert_eq!(locator.table, "sub_skill");
        assert_eq!(backend.rows("sub_skill")[0]["name"], "Helping Bonus");
    }
}
