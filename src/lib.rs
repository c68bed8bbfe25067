//! Session and access-control core.
//!
//! [`gateway::AuthGateway`] is the entry point. It authenticates an identity
//! and secret against a [`auth::CredentialStore`], hands out signed
//! device-bound bearer tokens plus a CSRF token, and answers permission
//! checks from a TTL cache of role grants. Failed logins are throttled per
//! identity and source, and repeated failures lock the identity for a while.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod permissions;
pub mod security;
pub mod session;

pub use config::Config;
pub use error::{AuthError, AuthResult};
pub use gateway::{AuthGateway, LoginOutcome, LoginRequest};
