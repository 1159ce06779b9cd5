//! Downstream OIDC authorization-code service (C7): acts as an OIDC provider
//! to relying parties configured as `{client_id, client_secret}` pairs.

pub mod crypto;
pub mod service;

pub use crypto::CodeCipher;
pub use service::{DownstreamOidcService, SignedIdToken};
