use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::auth::dto::{AuthUser, UserProfile};
use crate::error::{Error, Result};
use crate::gateway::coerce::pick_str;
use crate::gateway::{Query, RestClient};

pub const PROFILES: &str = "profiles";

fn timestamp(row: &Value, key: &str) -> Option<OffsetDateTime> {
    row.get(key)
        .and_then(Value::as_str)
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

/// Epoch milliseconds as an RFC 3339 timestamp.
pub fn rfc3339_ms(now_ms: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(now_ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
}

pub fn map_profile(row: &Value) -> Option<UserProfile> {
    let id = row.get("id")?.as_str()?.parse::<Uuid>().ok()?;
    Some(UserProfile {
        id,
        display_name: pick_str(row, &["display_name", "username"]),
        avatar_url: pick_str(row, &["avatar_url"]),
        is_admin: row.get("is_admin").and_then(Value::as_bool).unwrap_or(false),
        created_at: timestamp(row, "created_at"),
        updated_at: timestamp(row, "updated_at"),
    })
}

/// Local part of the email, used until the user picks a name.
pub fn default_display_name(user: &AuthUser) -> Option<String> {
    user.email
        .as_deref()
        .and_then(|e| e.split('@').next())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl UserProfile {
    /// Profile row for `user`, read with the user's own token.
    #[instrument(skip(rest, token), fields(user_id = %user_id))]
    pub async fn find(rest: &RestClient, user_id: Uuid, token: &str) -> Result<Option<UserProfile>> {
        let rows = rest
            .fetch_rows_as(PROFILES, &Query::all().eq("id", user_id).limit(1), Some(token))
            .await?;
        Ok(rows.first().and_then(map_profile))
    }

    /// Creates the default row if missing; never overwrites existing fields.
    #[instrument(skip(rest, user, token), fields(user_id = %user.id))]
    pub async fn ensure(rest: &RestClient, user: &AuthUser, token: &str, now_ms: i64) -> Result<UserProfile> {
        if let Some(profile) = Self::find(rest, user.id, token).await? {
            return Ok(profile);
        }
        let now = rfc3339_ms(now_ms);
        let row = json!({
            "id": user.id,
            "display_name": default_display_name(user),
            "avatar_url": null,
            "is_admin": false,
            "created_at": now,
            "updated_at": now,
        });
        let rows = rest.upsert(PROFILES, row, token).await?;
        debug!("profile row created");
        rows.first()
            .and_then(map_profile)
            .ok_or_else(|| Error::NotFound("profile".into()))
    }

    pub async fn update(rest: &RestClient, user_id: Uuid, fields: Value, token: &str) -> Result<UserProfile> {
        let rows = rest
            .patch(PROFILES, &Query::new().eq("id", user_id), fields, token)
            .await?;
        rows.first()
            .and_then(map_profile)
            .ok_or_else(|| Error::NotFound("profile".into()))
    }
}
