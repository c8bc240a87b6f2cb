use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use stdio_bridge_auth::{AccountId, CredentialRecord};

/// Variables injected into a worker process, keyed by full variable name.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WorkerEnvironment {
    vars: BTreeMap<String, String>,
}

impl WorkerEnvironment {
    /// Variables describing a live credential. `session_file` is the
    /// canonical record location when the store is file-backed.
    pub fn from_credential(
        prefix: &str,
        record: &CredentialRecord,
        session_file: Option<&Path>,
    ) -> Self {
        let mut env = Self::default();
        env.set(prefix, "ACCOUNT_ID", record.account_id.as_str());
        env.set(prefix, "CLIENT_ID", &record.client_id);
        env.set(prefix, "ACCESS_TOKEN", &record.tokens.access_token);
        if let Some(refresh_token) = &record.tokens.refresh_token {
            env.set(prefix, "REFRESH_TOKEN", refresh_token);
        }
        env.set(
            prefix,
            "TOKEN_EXPIRES_AT",
            &record.tokens.expires_at.timestamp().to_string(),
        );
        if let Some(path) = session_file {
            env.set(prefix, "SESSION_FILE", &path.to_string_lossy());
        }
        env
    }

    /// Identifiers only, for a worker started before anyone has logged in.
    pub fn unauthenticated(
        prefix: &str,
        account_id: Option<&AccountId>,
        client_id: Option<&str>,
    ) -> Self {
        let mut env = Self::default();
        if let Some(account_id) = account_id {
            env.set(prefix, "ACCOUNT_ID", account_id.as_str());
        }
        if let Some(client_id) = client_id.filter(|c| !c.trim().is_empty()) {
            env.set(prefix, "CLIENT_ID", client_id);
        }
        env
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn set(&mut self, prefix: &str, suffix: &str, value: &str) {
        let name = if prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}_{}", prefix, suffix)
        };
        self.vars.insert(name, value.to_string());
    }
}

// Values are tokens; only names are printed.
impl fmt::Debug for WorkerEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use stdio_bridge_auth::TokenSet;

    fn record(refresh_token: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            account_id: AccountId::parse("ACME").unwrap(),
            client_id: "abc".to_string(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            scope: "mcp".to_string(),
            tokens: TokenSet {
                access_token: "at".to_string(),
                refresh_token: refresh_token.map(str::to_string),
                token_type: "Bearer".to_string(),
                expires_in: 3600,
                expires_at: Utc.timestamp_opt(1_760_000_000, 0).unwrap(),
            },
            authenticated: true,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn credential_maps_to_prefixed_variables() {
        let env = WorkerEnvironment::from_credential(
            "NETSUITE",
            &record(Some("rt")),
            Some(Path::new("/data/sessions/acme.json")),
        );

        assert_eq!(env.get("NETSUITE_ACCOUNT_ID"), Some("acme"));
        assert_eq!(env.get("NETSUITE_CLIENT_ID"), Some("abc"));
        assert_eq!(env.get("NETSUITE_ACCESS_TOKEN"), Some("at"));
        assert_eq!(env.get("NETSUITE_REFRESH_TOKEN"), Some("rt"));
        assert_eq!(env.get("NETSUITE_TOKEN_EXPIRES_AT"), Some("1760000000"));
        assert_eq!(
            env.get("NETSUITE_SESSION_FILE"),
            Some("/data/sessions/acme.json")
        );
        assert_eq!(env.len(), 6);
    }

    #[test]
    fn optional_values_are_omitted() {
        let env = WorkerEnvironment::from_credential("ERP", &record(None), None);
        assert!(env.get("ERP_REFRESH_TOKEN").is_none());
        assert!(env.get("ERP_SESSION_FILE").is_none());
        assert_eq!(env.len(), 4);
    }

    #[test]
    fn unauthenticated_carries_identifiers_only() {
        let account = AccountId::parse("acme").unwrap();
        let env = WorkerEnvironment::unauthenticated("NETSUITE", Some(&account), Some(" "));
        assert_eq!(env.get("NETSUITE_ACCOUNT_ID"), Some("acme"));
        assert_eq!(env.len(), 1);

        assert!(WorkerEnvironment::unauthenticated("NETSUITE", None, None).is_empty());
    }

    #[test]
    fn debug_hides_values() {
        let env = WorkerEnvironment::from_credential("NETSUITE", &record(Some("rt")), None);
        let rendered = format!("{:?}", env);
        assert!(rendered.contains("NETSUITE_ACCESS_TOKEN"));
        assert!(!rendered.contains("\"at\""));
    }
}
