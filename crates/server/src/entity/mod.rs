//! SeaORM entities for the authentication tables.

pub mod account;
pub mod credential;
pub mod oauth_account;
pub mod oauth_state;
pub mod session;
