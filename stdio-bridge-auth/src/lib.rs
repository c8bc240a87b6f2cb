// Types shared by the flow and the stores, and re-exported for the bridge
pub mod common;

pub mod endpoints;
mod error;
pub mod exchange;
pub mod flow;
pub mod pkce;
pub mod store;

pub use common::{AccountId, CredentialRecord, TokenSet};
pub use endpoints::ProviderEndpoints;
pub use error::AuthError;
pub use exchange::{ClientAuth, OAuthExchanger, TokenExchanger};
pub use flow::{
    AuthRequest, AuthorizationStart, CallbackInput, FlowPhase, FlowSettings, OAuthFlowController,
};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
