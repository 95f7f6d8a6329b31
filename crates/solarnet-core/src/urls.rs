//! URL helpers for the SolarUser instruction API and the SolarQuery datum API.
//!
//! Only the endpoints used by the control tooling are covered. Every helper
//! returns an absolute URL string rooted at the helper's [`Environment`].

use crate::environment::Environment;
use crate::instruction::{InstructionParameter, InstructionState};

/// Base path of the authenticated SolarUser API.
pub const SOLAR_USER_PATH: &str = "/solaruser/api/v1/sec";

/// Base path of the authenticated SolarQuery API.
pub const SOLAR_QUERY_PATH: &str = "/solarquery/api/v1/sec";

fn encode_query<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, &v);
    }
    serializer.finish()
}

/// URL helper for the SolarUser instruction endpoints.
///
/// # Examples
///
/// ```
/// use solarnet_core::{Environment, SolarUserApi};
///
/// let api = SolarUserApi::new(Environment::default());
/// assert_eq!(
///     api.view_instruction_url(42),
///     "https://data.solarnetwork.net/solaruser/api/v1/sec/instr/view?id=42"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolarUserApi {
    environment: Environment,
}

impl SolarUserApi {
    /// Create a helper rooted at `environment`.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// The environment URLs are rooted at.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    fn base_url(&self) -> String {
        format!("{}{SOLAR_USER_PATH}", self.environment.base_url())
    }

    /// URL to queue an instruction for a node (POST).
    #[must_use]
    pub fn queue_instruction_url(
        &self,
        topic: &str,
        parameters: &[InstructionParameter],
        node_id: u64,
    ) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer
            .append_pair("nodeId", &node_id.to_string())
            .append_pair("topic", topic);
        for (i, param) in parameters.iter().enumerate() {
            serializer
                .append_pair(&format!("parameters[{i}].name"), &param.name)
                .append_pair(&format!("parameters[{i}].value"), &param.value);
        }
        format!("{}/instr/add?{}", self.base_url(), serializer.finish())
    }

    /// URL to change the state of an instruction (POST).
    #[must_use]
    pub fn update_instruction_state_url(&self, instruction_id: u64, state: InstructionState) -> String {
        format!(
            "{}/instr/updateState?{}",
            self.base_url(),
            encode_query([("id", instruction_id.to_string()), ("state", state.to_string())])
        )
    }

    /// URL to view a single instruction (GET).
    #[must_use]
    pub fn view_instruction_url(&self, instruction_id: u64) -> String {
        format!(
            "{}/instr/view?{}",
            self.base_url(),
            encode_query([("id", instruction_id.to_string())])
        )
    }

    /// URL to list the unfinished instructions of a node (GET).
    #[must_use]
    pub fn view_pending_instructions_url(&self, node_id: u64) -> String {
        format!(
            "{}/instr/viewPending?{}",
            self.base_url(),
            encode_query([("nodeId", node_id.to_string())])
        )
    }
}

/// Criteria for a datum query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatumFilter {
    /// Node IDs to match.
    pub node_ids: Vec<u64>,
    /// Source IDs to match.
    pub source_ids: Vec<String>,
}

impl DatumFilter {
    /// A filter for one node and one source.
    #[must_use]
    pub fn for_source(node_id: u64, source_id: impl Into<String>) -> Self {
        Self {
            node_ids: vec![node_id],
            source_ids: vec![source_id.into()],
        }
    }

    /// Encode as URL query parameters.
    ///
    /// A single node or source uses the singular parameter name; several use
    /// the plural name with comma-joined values.
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut pairs = Vec::new();
        match self.node_ids.as_slice() {
            [] => {}
            [one] => pairs.push(("nodeId", one.to_string())),
            many => pairs.push((
                "nodeIds",
                many.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
            )),
        }
        match self.source_ids.as_slice() {
            [] => {}
            [one] => pairs.push(("sourceId", one.clone())),
            many => pairs.push(("sourceIds", many.join(","))),
        }
        encode_query(pairs)
    }
}

/// URL helper for the SolarQuery datum endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SolarQueryApi {
    environment: Environment,
}

impl SolarQueryApi {
    /// Create a helper rooted at `environment`.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }

    /// The environment URLs are rooted at.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// URL to fetch the most recent datum matching `filter` (GET).
    #[must_use]
    pub fn most_recent_datum_url(&self, filter: &DatumFilter) -> String {
        let query = filter.to_query();
        let base = format!("{}{SOLAR_QUERY_PATH}/datum/mostRecent", self.environment.base_url());
        if query.is_empty() {
            base
        } else {
            format!("{base}?{query}")
        }
    }
}
