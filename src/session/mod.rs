//! Device-bound sessions and the signed tokens that reference them.

pub mod registry;
pub mod token;

pub use registry::{Session, SessionRegistry};
pub use token::{IssuedToken, Refresh, Subject, TokenClaims, TokenService};
