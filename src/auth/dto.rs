use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::gateway::coerce::{coerce_number, pick_str};
use crate::images::ImageUpload;

/// Request body for login and registration.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for token refresh.
#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

impl AuthUser {
    pub(crate) fn from_value(v: &Value) -> Option<Self> {
        let id = v.get("id")?.as_str()?.parse().ok()?;
        Some(Self {
            id,
            email: pick_str(v, &["email"]),
        })
    }
}

/// Persisted bearer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds.
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    /// Reads the backend's token envelope. `expires_at` is in seconds there,
    /// `expires_in` is relative seconds.
    pub(crate) fn from_token_response(body: &Value, now_ms: i64) -> Option<Self> {
        let access_token = body.get("access_token")?.as_str()?.to_string();
        if access_token.is_empty() {
            return None;
        }
        let refresh_token = pick_str(body, &["refresh_token"]).unwrap_or_default();
        let expires_at = body
            .get("expires_at")
            .and_then(coerce_number)
            .map(|secs| (secs * 1000.0) as i64)
            .or_else(|| {
                body.get("expires_in")
                    .and_then(coerce_number)
                    .map(|secs| now_ms + (secs * 1000.0) as i64)
            });
        let user = AuthUser::from_value(body.get("user")?)?;
        Some(Self {
            access_token,
            refresh_token,
            expires_at,
            user,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Credentials for an authenticated call.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub access_token: String,
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[cfg(test)]
impl AuthContext {
    pub fn test_admin() -> Self {
        Self {
            access_token: "admin-token".into(),
            user_id: Uuid::nil(),
            is_admin: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Uninitialized,
    Anonymous,
    Authenticated {
        session: AuthSession,
        profile: Option<UserProfile>,
    },
}

impl SessionState {
    pub fn is_admin(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticated {
                profile: Some(UserProfile { is_admin: true, .. }),
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    SignedIn(AuthSession),
    /// The account exists but the email must be confirmed before signing in.
    ConfirmationRequired { email: String },
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub avatar: Option<ImageUpload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_envelope_with_relative_expiry() {
        let body = json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": { "id": "6f0c2d4e-8f6b-4d1e-9d7a-3c2b1a0f9e8d", "email": "a@b.co" }
        });
        let s = AuthSession::from_token_response(&body, 1_000).unwrap();
        assert_eq!(s.expires_at, Some(3_601_000));
        assert_eq!(s.user.email.as_deref(), Some("a@b.co"));
        assert!(!s.is_expired_at(3_600_999));
        assert!(s.is_expired_at(3_601_000));
    }

    #[test]
    fn absolute_expiry_wins_and_missing_token_rejects() {
        let body = json!({
            "access_token": "a",
            "expires_at": 1700000000,
            "expires_in": 10,
            "user": { "id": "6f0c2d4e-8f6b-4d1e-9d7a-3c2b1a0f9e8d" }
        });
        let s = AuthSession::from_token_response(&body, 0).unwrap();
        assert_eq!(s.expires_at, Some(1_700_000_000_000));
        assert_eq!(s.refresh_token, "");

        let no_token = json!({ "user": { "id": "6f0c2d4e-8f6b-4d1e-9d7a-3c2b1a0f9e8d" } });
        assert!(AuthSession::from_token_response(&no_token, 0).is_none());
    }

    #[test]
    fn session_serializes_camel_case() {
        let s = AuthSession {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: None,
            user: AuthUser {
                id: Uuid::nil(),
                email: None,
            },
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("accessToken"));
        assert!(json.contains("expiresAt"));
    }
}
