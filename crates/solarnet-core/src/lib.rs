//! Core types, configuration, and URL helpers for the SolarNetwork API client.
//!
//! This crate provides the building blocks shared by the signing and control
//! crates: the deployment [`Environment`], client configuration, the
//! instruction and control datum model, the JSON response envelope, and the
//! handful of instruction and datum URL helpers the control tooling needs.

pub mod config;
pub mod datum;
pub mod environment;
pub mod error;
pub mod instruction;
pub mod response;
pub mod timestamp;
pub mod urls;
pub mod value;

pub use config::SolarNetConfig;
pub use datum::{ControlDatum, DatumResults};
pub use environment::Environment;
pub use error::{SolarNetError, SolarNetResult};
pub use instruction::{
    Instruction, InstructionParameter, InstructionState, SET_CONTROL_PARAMETER_TOPIC,
};
pub use response::ApiResponse;
pub use urls::{DatumFilter, SolarQueryApi, SolarUserApi};
pub use value::{ControlValue, values_equal};
