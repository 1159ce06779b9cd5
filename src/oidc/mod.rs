//! Upstream OIDC verification and authentication: JWKS retrieval (C2),
//! signed ID token verification (C3), and the provider driver that ties
//! them to a configured upstream issuer (C4).

pub mod jwks;
pub mod provider;
pub mod verifier;

pub use jwks::{JwksFetcher, JwksKey};
pub use provider::{OidcProvider, TokenUserInfo};
pub use verifier::{OidcVerifier, VerifiedToken};
