use url::Url;

use crate::common::AccountId;
use crate::error::AuthError;

/// Placeholder expanded to the account's host label.
pub const ACCOUNT_PLACEHOLDER: &str = "{account}";

/// Authorization server endpoints, possibly templated per account.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    authorize_template: String,
    token_template: String,
}

impl ProviderEndpoints {
    pub fn new(authorize_template: impl Into<String>, token_template: impl Into<String>) -> Self {
        Self {
            authorize_template: authorize_template.into(),
            token_template: token_template.into(),
        }
    }

    pub fn authorize_url(&self, account_id: &AccountId) -> Result<Url, AuthError> {
        expand(&self.authorize_template, account_id)
    }

    pub fn token_url(&self, account_id: &AccountId) -> Result<Url, AuthError> {
        expand(&self.token_template, account_id)
    }

    /// Check both templates against a sample account.
    pub fn validate(&self) -> Result<(), AuthError> {
        let sample = AccountId::parse("sample")?;
        self.authorize_url(&sample)?;
        self.token_url(&sample)?;
        Ok(())
    }
}

fn expand(template: &str, account_id: &AccountId) -> Result<Url, AuthError> {
    let raw = template.replace(ACCOUNT_PLACEHOLDER, &account_id.domain_label());
    Url::parse(&raw)
        .map_err(|e| AuthError::Config(format!("Invalid endpoint URL {}: {}", template, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_account_host_label() {
        let endpoints = ProviderEndpoints::new(
            "https://{account}.app.example.com/oauth2/authorize",
            "https://{account}.api.example.com/oauth2/token",
        );
        let account = AccountId::parse("1234567_SB1").unwrap();

        assert_eq!(
            endpoints.authorize_url(&account).unwrap().as_str(),
            "https://1234567-sb1.app.example.com/oauth2/authorize"
        );
        assert_eq!(
            endpoints.token_url(&account).unwrap().host_str(),
            Some("1234567-sb1.api.example.com")
        );
    }

    #[test]
    fn rejects_unparseable_template() {
        let endpoints = ProviderEndpoints::new("not a url", "https://example.com/token");
        assert!(matches!(endpoints.validate(), Err(AuthError::Config(_))));
    }
}
