//! `SNWS2` HMAC-SHA256 request signing for the SolarNetwork API.
//!
//! This crate produces the `Authorization` header value SolarNetwork expects
//! on authenticated API calls. The scheme resembles AWS SigV4 with a simpler
//! credential scope: a daily signing key derived from the token secret, a
//! canonical request over method, path, sorted query, signed headers and the
//! body digest, and a final HMAC over that canonical request.
//!
//! # Usage
//!
//! ```rust
//! use http::Method;
//! use solarnet_auth::AuthorizationV2Builder;
//! use solarnet_core::Environment;
//!
//! let mut auth = AuthorizationV2Builder::new("token", Environment::default());
//! auth.save_signing_key("secret");
//!
//! let mut request = auth.request();
//! request.method(Method::GET).path("/solaruser/api/v1/sec/instr/viewPending");
//! request.query_params([("nodeId", "123")]);
//! let header = auth.sign_with_saved_key(&request).unwrap();
//! assert!(header.starts_with("SNWS2 "));
//! ```
//!
//! # Modules
//!
//! - [`builder`] - Stateful builder and per-request descriptor
//! - [`canonical`] - Canonical request construction
//! - [`error`] - Signing error types
//! - [`signing`] - Key derivation and signature computation
//! - [`verify`] - Server-side signature verification

pub mod builder;
pub mod canonical;
pub mod error;
pub mod signing;
pub mod verify;

pub use builder::{AuthorizationV2Builder, RequestDescriptor};
pub use error::{AuthError, AuthResult};
pub use signing::SigningKey;
pub use verify::{ParsedAuthorization, parse_authorization_header, verify_authorization};
