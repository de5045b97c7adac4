//! Token Types
//!
//! The persisted credential record, its legacy single-value predecessor and
//! the token endpoint response.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ProtocolError, StorageError};

/// Token response from the Fleet API token endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expires in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, present when the server issued or rotated one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
    /// ID token (OIDC).
    #[serde(default)]
    pub id_token: Option<String>,
    /// Additional fields.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// The single persisted credential.
///
/// Always replaced as a whole; the four fields are never updated
/// independently.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Bearer credential for Fleet API calls.
    pub access_token: String,
    /// Credential used to obtain new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Instant after which `access_token` must not be used.
    pub expires_at: DateTime<Utc>,
    /// When the refresh token was last issued.
    #[serde(default = "unix_epoch")]
    pub refresh_token_created_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Build a record from a token response received at `issued_at`.
    ///
    /// `expires_at` is only ever derived from the server-declared
    /// `expires_in`; a response without it is rejected.
    pub fn from_response(
        response: &TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, ProtocolError> {
        if response.access_token.is_empty() {
            return Err(ProtocolError::MissingField {
                field: "access_token".to_string(),
            });
        }
        let expires_in = response.expires_in.ok_or_else(|| ProtocolError::MissingField {
            field: "expires_in".to_string(),
        })?;
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .ok_or_else(|| ProtocolError::InvalidResponse {
                message: format!("expires_in out of range: {}", expires_in),
            })?;

        Ok(Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone().filter(|t| !t.is_empty()),
            expires_at,
            refresh_token_created_at: issued_at,
        })
    }

    /// Wrap a legacy bare refresh token. The result is already expired so the
    /// next validity check forces a refresh.
    pub fn from_legacy(legacy: LegacyTokenRecord, migrated_at: DateTime<Utc>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: Some(legacy.refresh_token),
            expires_at: unix_epoch(),
            refresh_token_created_at: migrated_at,
        }
    }

    /// Check whether the access token can be handed out at `now`, keeping
    /// `safety_margin` in reserve.
    pub fn is_usable_at(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        !self.access_token.is_empty() && now < self.expires_at - safety_margin
    }

    /// Check whether the access token can be handed out right now.
    pub fn is_usable(&self, safety_margin: Duration) -> bool {
        self.is_usable_at(Utc::now(), safety_margin)
    }

    /// Check if has refresh token.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Carry over the previous refresh token when the server did not rotate it.
    pub fn inherit_refresh_token(mut self, previous: &TokenRecord) -> Self {
        if self.refresh_token.is_none() || self.refresh_token == previous.refresh_token {
            self.refresh_token = previous.refresh_token.clone();
            self.refresh_token_created_at = previous.refresh_token_created_at;
        }
        self
    }

    /// Reject records that must never reach a store.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.access_token.is_empty() {
            return Err(StorageError::InvalidRecord {
                message: "access_token is empty".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string_pretty(self).map_err(|e| StorageError::Corrupted {
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("refresh_token_created_at", &self.refresh_token_created_at)
            .finish()
    }
}

/// Deprecated single-value format: a bare refresh token with no metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct LegacyTokenRecord {
    pub refresh_token: String,
}

impl std::fmt::Debug for LegacyTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyTokenRecord")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// A stored value, decoded by shape at the storage boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredCredential {
    Current(TokenRecord),
    Legacy(LegacyTokenRecord),
}

impl StoredCredential {
    /// Decode a stored payload.
    ///
    /// A JSON object carrying both `access_token` and `expires_at` is a
    /// current record. An object with only `refresh_token`, a JSON string or
    /// a bare token text is legacy.
    pub fn decode(raw: &str) -> Result<Self, StorageError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(StorageError::Corrupted {
                message: "stored value is empty".to_string(),
            });
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(map)) => {
                if map.contains_key("access_token") && map.contains_key("expires_at") {
                    let record: TokenRecord = serde_json::from_value(Value::Object(map))
                        .map_err(|e| StorageError::Corrupted {
                            message: e.to_string(),
                        })?;
                    return Ok(Self::Current(record));
                }
                match map.get("refresh_token") {
                    Some(Value::String(token)) if !token.is_empty() => {
                        Ok(Self::legacy(token.clone()))
                    }
                    _ => Err(StorageError::Corrupted {
                        message: "object carries neither a token record nor a refresh token"
                            .to_string(),
                    }),
                }
            }
            Ok(Value::String(token)) if !token.trim().is_empty() => {
                Ok(Self::legacy(token.trim().to_string()))
            }
            Ok(Value::Number(_)) => Ok(Self::legacy(trimmed.to_string())),
            Ok(_) => Err(StorageError::Corrupted {
                message: "unsupported stored value".to_string(),
            }),
            // Truncated JSON is not a bare token.
            Err(_) if trimmed.starts_with(['{', '[']) => Err(StorageError::Corrupted {
                message: "stored value is truncated JSON".to_string(),
            }),
            Err(_) if !trimmed.contains(char::is_whitespace) => {
                Ok(Self::legacy(trimmed.to_string()))
            }
            Err(e) => Err(StorageError::Corrupted {
                message: e.to_string(),
            }),
        }
    }

    fn legacy(refresh_token: String) -> Self {
        Self::Legacy(LegacyTokenRecord { refresh_token })
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }
}

/// Access token handed to callers.
#[derive(Clone)]
pub struct AccessToken {
    /// Token value (secret).
    value: SecretString,
    /// Expiration time.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Create new access token.
    pub fn new(value: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: SecretString::new(value),
            expires_at,
        }
    }

    /// Get token value (for Authorization header).
    pub fn secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// Get time until expiration.
    pub fn expires_in(&self) -> Option<std::time::Duration> {
        (self.expires_at - Utc::now()).to_std().ok()
    }

    /// Format as Authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.value.expose_secret())
    }
}

impl From<&TokenRecord> for AccessToken {
    fn from(record: &TokenRecord) -> Self {
        Self::new(record.access_token.clone(), record.expires_at)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
