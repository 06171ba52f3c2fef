//! Remote side of enrichment: the directory search API and credential acquisition.

pub mod credential;
pub mod provider;

pub use credential::{
    CommandAcquirer, EnvAcquirer, acquirer_from_config, credential_from_token, token_expiry,
};
pub use provider::HttpLookupProvider;
