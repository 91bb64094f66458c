//! OAuth2 login through external providers.
//!
//! - `state`: single-use anti-forgery values for the redirect round trip
//! - `provider`: the provider trait, normalized profile and registry
//! - `google`, `github`: concrete adapters
//! - `linking`: maps a provider profile onto a local account

pub mod github;
pub mod google;
pub mod linking;
pub mod provider;
pub mod state;

pub use linking::{AccountLinker, LinkOutcome};
pub use provider::{OAuthProfile, OAuthProvider, Provider, ProviderRegistry, ProviderTokens};
pub use state::OAuthStateGuard;
