use chrono::{
    serde::{ts_milliseconds, ts_seconds},
    DateTime, Duration, Utc,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuthError;
use crate::exchange::IssuedTokens;

/// Lifetime assumed when the provider omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Upper bound on a provider-reported lifetime (one year).
pub const MAX_TOKEN_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// Canonical account identifier: trimmed and lower-cased.
///
/// Deserialization goes through [`AccountId::parse`], so a record written with
/// an upper-case id is read back under its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AuthError::InvalidAccountId(
                "account id is empty".to_string(),
            ));
        }

        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(AuthError::InvalidAccountId(format!(
                "unexpected character {:?} in {:?}",
                c, trimmed
            )));
        }

        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host label form used in provider URLs (`_` becomes `-`).
    pub fn domain_label(&self) -> String {
        self.0.replace('_', "-")
    }
}

impl TryFrom<String> for AccountId {
    type Error = AuthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tokens held for one account
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: u64,
    #[serde(with = "ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenSet {
    /// Build a token set from a fresh provider response.
    pub fn issued(tokens: IssuedTokens, now: DateTime<Utc>) -> Self {
        let mut expires_in = tokens
            .expires_in
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
            .min(MAX_TOKEN_LIFETIME_SECS);
        let expires_at = i64::try_from(expires_in)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or_else(|| {
                expires_in = DEFAULT_TOKEN_LIFETIME_SECS;
                now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS as i64)
            });
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: tokens.token_type,
            expires_in,
            expires_at,
        }
    }

    /// Apply a refresh response, keeping the current refresh token when the
    /// provider does not rotate it.
    pub fn refreshed(self, tokens: IssuedTokens, now: DateTime<Utc>) -> Self {
        let previous = self.refresh_token;
        let mut next = Self::issued(tokens, now);
        if next.refresh_token.is_none() {
            next.refresh_token = previous;
        }
        next
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now >= self.expires_at - margin
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persisted credential for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub account_id: AccountId,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub tokens: TokenSet,
    pub authenticated: bool,
    #[serde(rename = "timestamp", with = "ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(refresh: Option<&str>, expires_in: Option<u64>) -> IssuedTokens {
        IssuedTokens {
            access_token: "access".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            expires_in,
            scope: None,
        }
    }

    #[test]
    fn account_id_is_normalized() {
        assert_eq!(AccountId::parse("ACME").unwrap().as_str(), "acme");
        assert_eq!(AccountId::parse("  1234567_SB1 ").unwrap().as_str(), "1234567_sb1");
        assert_eq!(
            AccountId::parse("1234567_SB1").unwrap().domain_label(),
            "1234567-sb1"
        );
    }

    #[test]
    fn account_id_rejects_path_characters() {
        assert!(AccountId::parse("").is_err());
        assert!(AccountId::parse("   ").is_err());
        assert!(AccountId::parse("../acme").is_err());
        assert!(AccountId::parse("acme/other").is_err());
    }

    #[test]
    fn account_id_deserializes_to_canonical_form() {
        let id: AccountId = serde_json::from_str("\"ACME\"").unwrap();
        assert_eq!(id, AccountId::parse("acme").unwrap());
        assert!(serde_json::from_str::<AccountId>("\"a b\"").is_err());
    }

    #[test]
    fn issued_defaults_lifetime_when_missing() {
        let now = Utc::now();
        let tokens = TokenSet::issued(issued(None, None), now);
        assert_eq!(tokens.expires_in, DEFAULT_TOKEN_LIFETIME_SECS);
        assert_eq!(tokens.expires_at, now + Duration::seconds(3600));
    }

    #[test]
    fn issued_caps_oversized_lifetime() {
        let now = Utc::now();
        let tokens = TokenSet::issued(issued(None, Some(10_000_000_000_000_000)), now);
        assert_eq!(tokens.expires_in, MAX_TOKEN_LIFETIME_SECS);
        assert_eq!(tokens.expires_at, now + Duration::days(365));

        let tokens = TokenSet::issued(issued(None, Some(u64::MAX)), now);
        assert_eq!(tokens.expires_in, MAX_TOKEN_LIFETIME_SECS);
        assert!(!tokens.needs_refresh(now, Duration::minutes(5)));
    }

    #[test]
    fn refreshed_keeps_previous_refresh_token() {
        let now = Utc::now();
        let first_set = TokenSet::issued(issued(Some("first"), Some(60)), now);

        let kept = first_set.clone().refreshed(issued(None, Some(60)), now);
        assert_eq!(kept.refresh_token.as_deref(), Some("first"));

        let rotated = first_set.refreshed(issued(Some("second"), Some(60)), now);
        assert_eq!(rotated.refresh_token.as_deref(), Some("second"));
    }

    #[test]
    fn needs_refresh_respects_margin() {
        let now = Utc::now();
        let tokens = TokenSet::issued(issued(None, Some(600)), now);
        assert!(!tokens.needs_refresh(now, Duration::minutes(5)));
        assert!(tokens.needs_refresh(now + Duration::minutes(5), Duration::minutes(5)));
        assert!(tokens.needs_refresh(now, Duration::minutes(10)));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let tokens = TokenSet::issued(issued(Some("secret-refresh"), Some(60)), Utc::now());
        let rendered = format!("{:?}", tokens);
        assert!(!rendered.contains("secret-refresh"));
        assert!(!rendered.contains("\"access\""));
    }

    #[test]
    fn record_uses_persisted_layout() {
        let now = Utc::now();
        let record = CredentialRecord {
            account_id: AccountId::parse("ACME").unwrap(),
            client_id: "abc".to_string(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            scope: "mcp".to_string(),
            tokens: TokenSet::issued(issued(Some("refresh"), Some(3600)), now),
            authenticated: true,
            updated_at: now,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["accountId"], "acme");
        assert_eq!(value["clientId"], "abc");
        assert_eq!(value["redirectUri"], "http://localhost:3000/callback");
        assert_eq!(value["authenticated"], true);
        assert_eq!(value["timestamp"], now.timestamp_millis());
        assert_eq!(value["tokens"]["access_token"], "access");
        assert_eq!(value["tokens"]["refresh_token"], "refresh");
        assert_eq!(value["tokens"]["token_type"], "Bearer");
        assert_eq!(value["tokens"]["expires_in"], 3600);
    }
}
