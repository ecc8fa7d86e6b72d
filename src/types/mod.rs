//! Type definitions for the IAP remote helper
//!
//! Identifiers for type safety and the per-domain settings threaded through
//! every call.

pub mod identifiers;
pub mod settings;

pub use identifiers::Domain;
pub use settings::{DomainSettings, OAuthCredentials};
