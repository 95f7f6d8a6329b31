//! Authenticated SolarNetwork instruction client and control toggler.
//!
//! - [`client`] - Signed access to the instruction and datum query APIs
//! - [`error`] - Error types
//! - [`toggler`] - The [`ControlToggler`] polling state machine
//! - [`transport`] - HTTP transport seam and its reqwest implementation

pub mod client;
pub mod error;
pub mod toggler;
pub mod transport;

pub use client::SolarNetClient;
pub use error::{ControlError, ControlResult};
pub use toggler::{ControlToggler, PollState, ToggleCallback};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
