//! Node instructions and their lifecycle states.
//!
//! An [`Instruction`] is a command queued on SolarNetwork for a node to
//! execute. Its state moves through [`InstructionState`]:
//!
//! ```text
//! Queuing -> Queued -> Received -> Executing -> Completed
//!                \-------------\---------------> Declined
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::ControlValue;

/// Topic of the instruction that sets a control value.
pub const SET_CONTROL_PARAMETER_TOPIC: &str = "SetControlParameter";

/// Lifecycle state of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InstructionState {
    /// The state is not recognized.
    #[default]
    Unknown,
    /// The instruction is being queued.
    Queuing,
    /// The instruction is queued, awaiting pickup by the node.
    Queued,
    /// The node has received the instruction.
    Received,
    /// The node is executing the instruction.
    Executing,
    /// The instruction was declined (or cancelled).
    Declined,
    /// The instruction completed.
    Completed,
}

impl InstructionState {
    /// Returns the string value of this enum variant.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Queuing => "Queuing",
            Self::Queued => "Queued",
            Self::Received => "Received",
            Self::Executing => "Executing",
            Self::Declined => "Declined",
            Self::Completed => "Completed",
        }
    }

    /// Whether the instruction is still in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Queuing | Self::Queued | Self::Received | Self::Executing
        )
    }

    /// Whether the instruction reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Declined)
    }
}

impl std::fmt::Display for InstructionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for InstructionState {
    fn from(s: &str) -> Self {
        match s {
            "Queuing" => Self::Queuing,
            "Queued" => Self::Queued,
            "Received" => Self::Received,
            "Executing" => Self::Executing,
            "Declined" => Self::Declined,
            "Completed" => Self::Completed,
            _ => Self::default(),
        }
    }
}

/// A name/value instruction parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionParameter {
    /// Parameter name.
    pub name: String,
    /// Parameter value.
    pub value: String,
}

impl InstructionParameter {
    /// Create a new parameter.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A node instruction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// Unique instruction ID.
    pub id: u64,
    /// The node the instruction targets.
    #[serde(default)]
    pub node_id: u64,
    /// The instruction topic, e.g. `SetControlParameter`.
    #[serde(default)]
    pub topic: String,
    /// When the instruction was created.
    #[serde(default, with = "crate::timestamp::option")]
    pub created: Option<DateTime<Utc>>,
    /// The instruction date.
    #[serde(
        default,
        rename = "instructionDate",
        with = "crate::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<DateTime<Utc>>,
    /// The raw state name as reported by the server.
    #[serde(default)]
    pub state: String,
    /// When the state last changed.
    #[serde(
        default,
        with = "crate::timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_date: Option<DateTime<Utc>>,
    /// The instruction parameters.
    #[serde(default)]
    pub parameters: Vec<InstructionParameter>,
    /// Result parameters reported by the node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_parameters: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Instruction {
    /// The parsed lifecycle state.
    #[must_use]
    pub fn instruction_state(&self) -> InstructionState {
        InstructionState::from(self.state.as_str())
    }

    /// Whether the instruction is still in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.instruction_state().is_active()
    }

    /// Whether the instruction reached a terminal state.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.instruction_state().is_finished()
    }

    /// The first parameter, if any.
    #[must_use]
    pub fn first_parameter(&self) -> Option<&InstructionParameter> {
        self.parameters.first()
    }

    /// The first parameter value as a control value.
    #[must_use]
    pub fn first_parameter_value(&self) -> Option<ControlValue> {
        self.first_parameter()
            .map(|p| ControlValue::Text(p.value.clone()))
    }

    /// Whether this is an active `SetControlParameter` instruction for `control_id`.
    #[must_use]
    pub fn is_active_control_change(&self, control_id: &str) -> bool {
        self.is_active()
            && self.topic == SET_CONTROL_PARAMETER_TOPIC
            && self
                .first_parameter()
                .is_some_and(|p| p.name == control_id)
    }
}
