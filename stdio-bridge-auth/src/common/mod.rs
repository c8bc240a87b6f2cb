mod models;

pub use models::{AccountId, CredentialRecord, TokenSet, DEFAULT_TOKEN_LIFETIME_SECS, MAX_TOKEN_LIFETIME_SECS};
