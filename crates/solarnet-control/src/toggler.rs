//! Control toggler: reconcile a desired control value against the
//! instruction queue and the most recent control datum.
//!
//! A [`ControlToggler`] watches one control of one node. Setting a value
//! queues a `SetControlParameter` instruction, first cancelling a queued
//! instruction for a different value. Polling reads the most recent datum,
//! the node's pending instructions and, while the last known instruction is
//! unfinished, that instruction itself, then derives the control's current
//! value from whichever is newer.
//!
//! Polling runs on a tokio task. It uses the pending refresh interval while an
//! instruction is in flight and the normal refresh interval otherwise. A
//! failed poll is logged, reported to the callback, and rescheduled.
//!
//! Direct [`ControlToggler::update`] calls may overlap a timer-driven poll.
//! They are not serialized: each applies its own result and the last one to
//! finish wins. Every poll observes the server's current state, so
//! overlapping polls settle on the same values.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use solarnet_core::{
    ControlDatum, ControlValue, DatumFilter, Instruction, InstructionParameter, InstructionState,
    SET_CONTROL_PARAMETER_TOPIC, values_equal,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::SolarNetClient;
use crate::error::{ControlError, ControlResult};

/// Default delay before the first poll after [`ControlToggler::start`].
pub const DEFAULT_START_DELAY: Duration = Duration::from_millis(20);

/// Default polling interval while no change is pending.
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(20_000);

/// Default polling interval while a change is pending.
pub const DEFAULT_PENDING_REFRESH: Duration = Duration::from_millis(5_000);

/// Invoked after every state change, with the error when one occurred.
pub type ToggleCallback = Arc<dyn Fn(Option<&ControlError>) + Send + Sync>;

/// Lifecycle of the polling task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollState {
    /// Not polling.
    #[default]
    Stopped,
    /// Waiting for the next poll.
    Scheduled,
    /// A poll is in flight.
    Polling,
}

#[derive(Debug, Default)]
struct State {
    last_known_datum: Option<ControlDatum>,
    last_known_instruction: Option<Instruction>,
    poll_state: PollState,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the timer is replaced or stopped; a poller whose
    /// generation is stale exits.
    generation: u64,
    refresh: Duration,
    pending_refresh: Duration,
}

impl State {
    fn has_pending_state_change(&self) -> bool {
        self.last_known_instruction
            .as_ref()
            .is_some_and(Instruction::is_active)
    }

    fn next_delay(&self) -> Duration {
        if self.has_pending_state_change() {
            self.pending_refresh
        } else {
            self.refresh
        }
    }
}

struct Inner {
    client: SolarNetClient,
    node_id: u64,
    control_id: String,
    callback: Mutex<Option<ToggleCallback>>,
    state: Mutex<State>,
}

/// Watches and sets the value of one node control.
///
/// Dropping the toggler stops its polling task.
pub struct ControlToggler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ControlToggler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ControlToggler")
            .field("node_id", &self.inner.node_id)
            .field("control_id", &self.inner.control_id)
            .field("poll_state", &state.poll_state)
            .field("value", &state.last_known_datum.as_ref().and_then(|d| d.val.as_ref()))
            .finish_non_exhaustive()
    }
}

impl ControlToggler {
    /// Create a toggler for `control_id` on `node_id`.
    #[must_use]
    pub fn new(client: SolarNetClient, node_id: u64, control_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                node_id,
                control_id: control_id.into(),
                callback: Mutex::new(None),
                state: Mutex::new(State {
                    refresh: DEFAULT_REFRESH,
                    pending_refresh: DEFAULT_PENDING_REFRESH,
                    ..State::default()
                }),
            }),
        }
    }

    /// The node ID.
    #[must_use]
    pub fn node_id(&self) -> u64 {
        self.inner.node_id
    }

    /// The control ID.
    #[must_use]
    pub fn control_id(&self) -> &str {
        &self.inner.control_id
    }

    /// The API client.
    #[must_use]
    pub fn client(&self) -> &SolarNetClient {
        &self.inner.client
    }

    /// Set the callback invoked after every state change.
    ///
    /// A panicking callback is logged and otherwise ignored.
    pub fn set_callback(&self, callback: impl Fn(Option<&ControlError>) + Send + Sync + 'static) {
        *self.inner.callback.lock() = Some(Arc::new(callback));
    }

    /// Remove the callback.
    pub fn clear_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    /// Polling interval while no change is pending.
    #[must_use]
    pub fn refresh(&self) -> Duration {
        self.inner.state.lock().refresh
    }

    /// Set the polling interval used while no change is pending.
    pub fn set_refresh(&self, refresh: Duration) {
        self.inner.state.lock().refresh = refresh;
    }

    /// Polling interval while a change is pending.
    #[must_use]
    pub fn pending_refresh(&self) -> Duration {
        self.inner.state.lock().pending_refresh
    }

    /// Set the polling interval used while a change is pending.
    pub fn set_pending_refresh(&self, pending_refresh: Duration) {
        self.inner.state.lock().pending_refresh = pending_refresh;
    }

    /// Install a refreshed signing key issued for `date`.
    pub fn set_signing_key(&self, key: &[u8], date: &chrono::DateTime<chrono::Utc>) {
        self.inner.client.set_signing_key(key, date);
    }

    /// The last known control value.
    #[must_use]
    pub fn value(&self) -> Option<ControlValue> {
        self.inner
            .state
            .lock()
            .last_known_datum
            .as_ref()
            .and_then(|d| d.val.clone())
    }

    /// The last known control datum.
    #[must_use]
    pub fn last_known_datum(&self) -> Option<ControlDatum> {
        self.inner.state.lock().last_known_datum.clone()
    }

    /// The last known instruction for this control.
    #[must_use]
    pub fn last_known_instruction(&self) -> Option<Instruction> {
        self.inner.state.lock().last_known_instruction.clone()
    }

    /// Whether the last known instruction is still in flight.
    #[must_use]
    pub fn has_pending_state_change(&self) -> bool {
        self.inner.state.lock().has_pending_state_change()
    }

    /// The polling task's state.
    #[must_use]
    pub fn poll_state(&self) -> PollState {
        self.inner.state.lock().poll_state
    }

    /// Request that the control take `desired`.
    ///
    /// A queued instruction for a different value is cancelled first. No
    /// instruction is queued when the current value or the pending value
    /// already equals `desired`; the existing instruction is returned then.
    /// Otherwise the new instruction is returned.
    ///
    /// API failures are logged and reported to the callback, and yield
    /// `Ok(None)`. A failed cancel does not queue the new instruction.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::SigningKeyNotConfigured`] without any request
    /// when no valid signing key is configured.
    pub async fn set_value(
        &self,
        desired: impl Into<ControlValue>,
    ) -> ControlResult<Option<Instruction>> {
        self.inner.set_value(desired.into()).await
    }

    /// Poll the server once and apply the result.
    ///
    /// API failures are logged and reported to the callback. If polling is
    /// scheduled, the timer restarts with the interval the new state calls for.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::SigningKeyNotConfigured`] without any request
    /// when no valid signing key is configured.
    pub async fn update(&self) -> ControlResult<()> {
        self.inner.update().await?;
        let delay = self.inner.state.lock().next_delay();
        self.inner.reschedule(delay);
        Ok(())
    }

    /// Start polling, with the first poll after `when` (default 20ms).
    ///
    /// Does nothing if polling is already running. A signing key that
    /// expires while polling is reported to the callback once. Must be
    /// called from within a tokio runtime.
    pub fn start(&self, when: Option<Duration>) {
        let mut state = self.inner.state.lock();
        if state.poll_state != PollState::Stopped {
            return;
        }
        let delay = when.unwrap_or(DEFAULT_START_DELAY);
        info!(
            node_id = self.inner.node_id,
            control_id = %self.inner.control_id,
            delay = ?delay,
            "Starting control toggler"
        );
        state.poll_state = PollState::Scheduled;
        state.generation += 1;
        state.timer = Some(Inner::spawn_poller(&self.inner, delay, state.generation));
    }

    /// Stop polling. An in-flight poll is cancelled and does not report.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
            info!(
                node_id = self.inner.node_id,
                control_id = %self.inner.control_id,
                "Stopped control toggler"
            );
        }
        state.generation += 1;
        state.poll_state = PollState::Stopped;
    }
}

impl Drop for ControlToggler {
    fn drop(&mut self) {
        if let Some(timer) = self.inner.state.lock().timer.take() {
            timer.abort();
        }
    }
}

impl Inner {
    fn spawn_poller(this: &Arc<Self>, delay: Duration, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            let mut delay = delay;
            let mut key_error_reported = false;
            loop {
                tokio::time::sleep(delay).await;
                {
                    let mut state = inner.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.poll_state = PollState::Polling;
                }
                match inner.update().await {
                    Ok(()) => key_error_reported = false,
                    Err(e) => {
                        warn!(error = %e, control_id = %inner.control_id, "Control poll skipped");
                        if !key_error_reported {
                            key_error_reported = true;
                            inner.notify(Some(&e));
                        }
                    }
                }
                // the callback may have stopped or restarted polling
                let mut state = inner.state.lock();
                if state.generation != generation || state.poll_state != PollState::Polling {
                    return;
                }
                state.poll_state = PollState::Scheduled;
                delay = state.next_delay();
                debug!(delay = ?delay, "Scheduled next control poll");
            }
        })
    }

    /// Restart a scheduled (idle) timer with `delay`. An in-flight poll picks
    /// its own next delay when it finishes, and a stopped toggler stays stopped.
    fn reschedule(self: &Arc<Self>, delay: Duration) {
        let mut state = self.state.lock();
        if state.poll_state != PollState::Scheduled {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.timer = Some(Self::spawn_poller(self, delay, state.generation));
    }

    fn notify(&self, error: Option<&ControlError>) {
        let callback = self.callback.lock().clone();
        let Some(callback) = callback else {
            return;
        };
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(error))) {
            error!(
                control_id = %self.control_id,
                panic = panic_message(payload.as_ref()),
                "Control toggler callback panicked"
            );
        }
    }

    async fn set_value(self: &Arc<Self>, desired: ControlValue) -> ControlResult<Option<Instruction>> {
        if !self.client.signing_key_valid() {
            return Err(ControlError::SigningKeyNotConfigured);
        }

        let (current, pending) = {
            let state = self.state.lock();
            (
                state.last_known_datum.as_ref().and_then(|d| d.val.clone()),
                state
                    .last_known_instruction
                    .clone()
                    .filter(Instruction::is_active),
            )
        };
        let mut pending_value = pending.as_ref().and_then(Instruction::first_parameter_value);

        if let Some(queued) = pending
            .as_ref()
            .filter(|i| i.instruction_state() == InstructionState::Queued)
        {
            if !values_equal(pending_value.as_ref(), Some(&desired)) {
                debug!(
                    instruction_id = queued.id,
                    control_id = %self.control_id,
                    "Cancelling queued control instruction"
                );
                if let Err(e) = self
                    .client
                    .update_instruction_state(queued.id, InstructionState::Declined)
                    .await
                {
                    error!(
                        error = %e,
                        instruction_id = queued.id,
                        "Failed to cancel queued control instruction"
                    );
                    self.notify(Some(&e));
                    return Ok(None);
                }
                let mut state = self.state.lock();
                if state
                    .last_known_instruction
                    .as_ref()
                    .is_some_and(|i| i.id == queued.id)
                {
                    state.last_known_instruction = None;
                }
                pending_value = None;
            }
        }

        if values_equal(current.as_ref(), Some(&desired))
            || values_equal(pending_value.as_ref(), Some(&desired))
        {
            debug!(
                control_id = %self.control_id,
                value = %desired,
                "Control already at or changing to desired value"
            );
            return Ok(self.state.lock().last_known_instruction.clone());
        }

        debug!(
            control_id = %self.control_id,
            value = %desired,
            "Queueing control instruction"
        );
        let parameters = [InstructionParameter::new(
            self.control_id.clone(),
            desired.to_string(),
        )];
        match self
            .client
            .queue_instruction(SET_CONTROL_PARAMETER_TOPIC, &parameters, self.node_id)
            .await
        {
            Ok(instruction) => {
                let delay = {
                    let mut state = self.state.lock();
                    state.last_known_instruction = Some(instruction.clone());
                    state.pending_refresh
                };
                self.notify(None);
                self.reschedule(delay);
                Ok(Some(instruction))
            }
            Err(e) => {
                error!(error = %e, control_id = %self.control_id, "Failed to queue control instruction");
                self.notify(Some(&e));
                Ok(None)
            }
        }
    }

    async fn update(&self) -> ControlResult<()> {
        if !self.client.signing_key_valid() {
            return Err(ControlError::SigningKeyNotConfigured);
        }

        let exec_id = self
            .state
            .lock()
            .last_known_instruction
            .as_ref()
            .filter(|i| !i.is_finished())
            .map(|i| i.id);

        let filter = DatumFilter::for_source(self.node_id, self.control_id.clone());
        let exec = async {
            match exec_id {
                Some(id) => self.client.view_instruction(id).await.map(Some),
                None => Ok(None),
            }
        };
        let result = futures::try_join!(
            self.client.most_recent_datum(&filter),
            self.client.view_pending_instructions(self.node_id),
            exec,
        );

        let (datums, pending, exec) = match result {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, control_id = %self.control_id, "Failed to poll control state");
                self.notify(Some(&e));
                return Ok(());
            }
        };

        let exec_fetched = exec.is_some();
        let instruction = exec
            .flatten()
            .or_else(|| active_control_instruction(&pending, &self.control_id).cloned());
        let datum = datums.into_iter().next();
        let value = most_recent_value(datum.as_ref(), instruction.as_ref());

        let changed = {
            let mut state = self.state.lock();
            let current = state.last_known_datum.as_ref().and_then(|d| d.val.as_ref());
            if !values_equal(value.as_ref(), current) || exec_fetched {
                state.last_known_datum = datum
                    .map(|d| ControlDatum { val: value.clone(), ..d })
                    .or_else(|| {
                        value.clone().map(|val| ControlDatum {
                            created: instruction.as_ref().and_then(|i| i.created),
                            node_id: self.node_id,
                            source_id: self.control_id.clone(),
                            val: Some(val),
                            ..ControlDatum::default()
                        })
                    });
                state.last_known_instruction = instruction;
                true
            } else {
                false
            }
        };

        debug!(
            control_id = %self.control_id,
            value = ?value,
            changed,
            "Polled control state"
        );
        if changed {
            self.notify(None);
        }
        Ok(())
    }
}

/// The active `SetControlParameter` instruction for `control_id` with the
/// latest creation date. Of equally dated instructions the first wins.
#[must_use]
pub fn active_control_instruction<'a>(
    instructions: &'a [Instruction],
    control_id: &str,
) -> Option<&'a Instruction> {
    let mut best: Option<&Instruction> = None;
    for instruction in instructions
        .iter()
        .filter(|i| i.is_active_control_change(control_id))
    {
        match best {
            Some(b) if b.created >= instruction.created => {}
            _ => best = Some(instruction),
        }
    }
    best
}

/// The authoritative control value given the latest datum and instruction.
///
/// The instruction's first parameter value wins unless the instruction was
/// declined or the datum is strictly newer than the instruction.
#[must_use]
pub fn most_recent_value(
    datum: Option<&ControlDatum>,
    instruction: Option<&Instruction>,
) -> Option<ControlValue> {
    let datum_value = || datum.and_then(|d| d.val.clone());
    let Some(instruction) = instruction else {
        return datum_value();
    };
    if instruction.instruction_state() == InstructionState::Declined {
        return datum_value();
    }
    if let Some(d) = datum {
        if let (Some(datum_created), Some(instruction_created)) = (d.created, instruction.created) {
            if datum_created > instruction_created {
                return datum_value();
            }
        }
    }
    instruction.first_parameter_value().or_else(datum_value)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, TimeZone, Utc};
    use http::StatusCode;
    use serde_json::{Value, json};
    use solarnet_auth::AuthorizationV2Builder;
    use solarnet_core::Environment;

    use super::*;
    use crate::transport::testing::{RecordingTransport, ok_json, split_url};
    use crate::transport::HttpResponse;

    const NODE: u64 = 123;
    const CONTROL: &str = "/power/switch/1";

    #[derive(Debug, Default)]
    struct FakeServer {
        datum: Option<Value>,
        pending: Vec<Value>,
        instruction: Option<Value>,
        fail_cancel: bool,
        fail_queries: bool,
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn instruction_json(id: u64, state: &str, value: &str, created: i64) -> Value {
        json!({
            "id": id,
            "nodeId": NODE,
            "topic": SET_CONTROL_PARAMETER_TOPIC,
            "state": state,
            "created": at(created).to_rfc3339(),
            "parameters": [{ "name": CONTROL, "value": value }],
        })
    }

    fn datum_json(val: Value, created: i64) -> Value {
        json!({
            "created": at(created).to_rfc3339(),
            "nodeId": NODE,
            "sourceId": CONTROL,
            "val": val,
        })
    }

    fn instruction(id: u64, state: InstructionState, value: &str, created: i64) -> Instruction {
        Instruction {
            id,
            node_id: NODE,
            topic: SET_CONTROL_PARAMETER_TOPIC.to_owned(),
            created: Some(at(created)),
            state: state.as_str().to_owned(),
            parameters: vec![InstructionParameter::new(CONTROL, value)],
            ..Instruction::default()
        }
    }

    fn datum(val: impl Into<ControlValue>, created: i64) -> ControlDatum {
        ControlDatum {
            created: Some(at(created)),
            node_id: NODE,
            source_id: CONTROL.to_owned(),
            val: Some(val.into()),
            ..ControlDatum::default()
        }
    }

    fn fake_transport(server: &Arc<Mutex<FakeServer>>) -> RecordingTransport {
        let server = Arc::clone(server);
        RecordingTransport::new(move |request| {
            let server = server.lock();
            let (path, _) = split_url(&request.url);
            if server.fail_queries && request.method == http::Method::GET {
                return HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE, "");
            }
            if path.ends_with("/datum/mostRecent") {
                ok_json(json!({ "results": server.datum.iter().cloned().collect::<Vec<_>>() }))
            } else if path.ends_with("/instr/viewPending") {
                ok_json(Value::Array(server.pending.clone()))
            } else if path.ends_with("/instr/view") {
                ok_json(server.instruction.clone().unwrap_or(Value::Null))
            } else if path.ends_with("/instr/updateState") {
                if server.fail_cancel {
                    HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "")
                } else {
                    ok_json(Value::Null)
                }
            } else if path.ends_with("/instr/add") {
                let body = request.body.clone().unwrap_or_default();
                let value = form_urlencoded::parse(&body)
                    .find(|(k, _)| k == "parameters[0].value")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                ok_json(instruction_json(100, "Queued", &value, 500))
            } else {
                HttpResponse::new(StatusCode::NOT_FOUND, "")
            }
        })
    }

    fn toggler_with(server: &Arc<Mutex<FakeServer>>) -> (ControlToggler, RecordingTransport) {
        let transport = fake_transport(server);
        let auth = AuthorizationV2Builder::new("token", Environment::new("http", "localhost", None));
        let client = SolarNetClient::new(Arc::new(transport.clone()), auth, None);
        client.save_signing_key("secret");
        (ControlToggler::new(client, NODE, CONTROL), transport)
    }

    fn seed(toggler: &ControlToggler, datum: Option<ControlDatum>, instruction: Option<Instruction>) {
        let mut state = toggler.inner.state.lock();
        state.last_known_datum = datum;
        state.last_known_instruction = instruction;
    }

    fn counting_callback(toggler: &ControlToggler) -> Arc<(AtomicUsize, AtomicUsize)> {
        let counts = Arc::new((AtomicUsize::new(0), AtomicUsize::new(0)));
        let c = Arc::clone(&counts);
        toggler.set_callback(move |err| {
            if err.is_some() {
                c.1.fetch_add(1, Ordering::SeqCst);
            } else {
                c.0.fetch_add(1, Ordering::SeqCst);
            }
        });
        counts
    }

    #[test]
    fn test_should_prefer_newer_datum_over_instruction() {
        let d = datum(0, 100);
        let older = instruction(1, InstructionState::Executing, "1", 50);
        assert_eq!(most_recent_value(Some(&d), Some(&older)), Some(ControlValue::Number(0.0)));

        let newer = instruction(1, InstructionState::Executing, "1", 150);
        assert_eq!(
            most_recent_value(Some(&d), Some(&newer)),
            Some(ControlValue::Text("1".to_owned()))
        );

        let declined = instruction(1, InstructionState::Declined, "1", 150);
        assert_eq!(most_recent_value(Some(&d), Some(&declined)), Some(ControlValue::Number(0.0)));
    }

    #[test]
    fn test_should_use_available_side_for_most_recent_value() {
        let i = instruction(1, InstructionState::Queued, "1", 50);
        assert_eq!(most_recent_value(None, Some(&i)), Some(ControlValue::from("1")));
        assert_eq!(most_recent_value(Some(&datum(1, 5)), None), Some(ControlValue::from(1)));
        assert_eq!(most_recent_value(None, None), None);
    }

    #[test]
    fn test_should_select_latest_active_control_instruction() {
        let mut other_topic = instruction(1, InstructionState::Queued, "1", 900);
        other_topic.topic = "Signal".to_owned();
        let mut other_control = instruction(2, InstructionState::Queued, "1", 900);
        other_control.parameters[0].name = "/other".to_owned();
        let finished = instruction(3, InstructionState::Completed, "1", 900);
        let early = instruction(4, InstructionState::Queued, "1", 100);
        let late = instruction(5, InstructionState::Received, "0", 200);
        let late_tie = instruction(6, InstructionState::Executing, "1", 200);

        let list = [other_topic, other_control, finished, early, late, late_tie];
        assert_eq!(active_control_instruction(&list, CONTROL).map(|i| i.id), Some(5));
        assert!(active_control_instruction(&list[..3], CONTROL).is_none());
    }

    #[tokio::test]
    async fn test_should_cancel_queued_instruction_before_requeue() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let (toggler, transport) = toggler_with(&server);
        seed(
            &toggler,
            Some(datum(0, 10)),
            Some(instruction(5, InstructionState::Queued, "0", 20)),
        );
        let counts = counting_callback(&toggler);

        let queued = toggler.set_value(1).await.unwrap().unwrap();
        assert_eq!(queued.id, 100);

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.iter().all(|r| r.method == http::Method::POST));
        assert!(recorded[0].path.ends_with("/instr/updateState"));
        assert_eq!(recorded[0].params, "id=5&state=Declined");
        assert!(recorded[1].path.ends_with("/instr/add"));
        assert!(recorded[1].params.contains("parameters%5B0%5D.value=1"));
        assert!(recorded[1].params.contains("parameters%5B0%5D.name=%2Fpower%2Fswitch%2F1"));

        assert_eq!(toggler.last_known_instruction().map(|i| i.id), Some(100));
        assert!(toggler.has_pending_state_change());
        assert_eq!(counts.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_not_requeue_when_cancel_fails() {
        let server = Arc::new(Mutex::new(FakeServer {
            fail_cancel: true,
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        seed(
            &toggler,
            Some(datum(0, 10)),
            Some(instruction(5, InstructionState::Queued, "0", 20)),
        );
        let counts = counting_callback(&toggler);

        assert!(toggler.set_value(1).await.unwrap().is_none());
        assert_eq!(transport.count("/instr/updateState"), 1);
        assert_eq!(transport.count("/instr/add"), 0);
        assert_eq!(counts.1.load(Ordering::SeqCst), 1);
        assert_eq!(toggler.last_known_instruction().map(|i| i.id), Some(5));
    }

    #[tokio::test]
    async fn test_should_skip_queue_when_value_already_current() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let (toggler, transport) = toggler_with(&server);
        seed(&toggler, Some(datum(1, 10)), None);

        assert!(toggler.set_value("1").await.unwrap().is_none());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_keep_pending_instruction_for_same_value() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let (toggler, transport) = toggler_with(&server);
        seed(
            &toggler,
            Some(datum(0, 10)),
            Some(instruction(5, InstructionState::Queued, "1", 20)),
        );

        let existing = toggler.set_value(true).await.unwrap();
        assert_eq!(existing.map(|i| i.id), Some(5));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_cancel_without_requeue_when_reverting() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let (toggler, transport) = toggler_with(&server);
        seed(
            &toggler,
            Some(datum(0, 10)),
            Some(instruction(5, InstructionState::Queued, "1", 20)),
        );

        assert!(toggler.set_value(0).await.unwrap().is_none());
        assert_eq!(transport.count("/instr/updateState"), 1);
        assert_eq!(transport.count("/instr/add"), 0);
        assert!(!toggler.has_pending_state_change());
    }

    #[tokio::test]
    async fn test_should_reject_without_signing_key() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let transport = fake_transport(&server);
        let auth = AuthorizationV2Builder::new("token", Environment::new("http", "localhost", None));
        let client = SolarNetClient::new(Arc::new(transport.clone()), auth, None);
        let toggler = ControlToggler::new(client, NODE, CONTROL);

        assert!(matches!(
            toggler.set_value(1).await,
            Err(ControlError::SigningKeyNotConfigured)
        ));
        assert!(matches!(
            toggler.update().await,
            Err(ControlError::SigningKeyNotConfigured)
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_should_apply_polled_instruction_value() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(0), 100)),
            pending: vec![instruction_json(7, "Executing", "1", 150)],
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        let counts = counting_callback(&toggler);

        toggler.update().await.unwrap();
        assert!(toggler.value().unwrap().loosely_equals(&ControlValue::from(1)));
        assert!(toggler.has_pending_state_change());
        assert_eq!(counts.0.load(Ordering::SeqCst), 1);
        assert_eq!(transport.count("/instr/view"), 0);

        let recorded = transport.recorded();
        let query = recorded
            .iter()
            .find(|r| r.path.ends_with("/datum/mostRecent"))
            .unwrap();
        assert_eq!(query.params, "nodeId=123&sourceId=%2Fpower%2Fswitch%2F1");
    }

    #[tokio::test]
    async fn test_should_fetch_unfinished_instruction_and_observe_completion() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(1), 200)),
            instruction: Some(instruction_json(7, "Completed", "1", 150)),
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        seed(
            &toggler,
            Some(datum(1, 100)),
            Some(instruction(7, InstructionState::Executing, "1", 150)),
        );
        let counts = counting_callback(&toggler);

        toggler.update().await.unwrap();
        assert_eq!(transport.count("/instr/view"), 1);
        assert_eq!(
            toggler.last_known_instruction().map(|i| i.instruction_state()),
            Some(InstructionState::Completed)
        );
        assert!(!toggler.has_pending_state_change());
        // an explicit fetch always reports, even with an unchanged value
        assert_eq!(counts.0.load(Ordering::SeqCst), 1);

        toggler.update().await.unwrap();
        assert_eq!(transport.count("/instr/view"), 1);
        assert_eq!(counts.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_report_poll_failure_to_callback() {
        let server = Arc::new(Mutex::new(FakeServer {
            fail_queries: true,
            ..FakeServer::default()
        }));
        let (toggler, _transport) = toggler_with(&server);
        let counts = counting_callback(&toggler);

        toggler.update().await.unwrap();
        assert_eq!(counts.1.load(Ordering::SeqCst), 1);
        assert!(toggler.value().is_none());
    }

    #[tokio::test]
    async fn test_should_survive_panicking_callback() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(1), 100)),
            ..FakeServer::default()
        }));
        let (toggler, _transport) = toggler_with(&server);
        toggler.set_callback(|_| panic!("callback failure"));

        toggler.update().await.unwrap();
        assert!(toggler.value().unwrap().loosely_equals(&ControlValue::from(1)));
    }

    #[tokio::test]
    async fn test_should_settle_concurrent_updates() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(0), 100)),
            pending: vec![instruction_json(7, "Queued", "1", 150)],
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);

        let (a, b) = tokio::join!(toggler.update(), toggler.update());
        a.unwrap();
        b.unwrap();
        assert_eq!(transport.count("/datum/mostRecent"), 2);
        assert!(toggler.value().unwrap().loosely_equals(&ControlValue::from(1)));
        assert_eq!(toggler.last_known_instruction().map(|i| i.id), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_poll_faster_while_change_pending() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(0), 100)),
            pending: vec![instruction_json(7, "Queued", "1", 150)],
            instruction: Some(instruction_json(7, "Queued", "1", 150)),
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        toggler.set_refresh(Duration::from_millis(1000));
        toggler.set_pending_refresh(Duration::from_millis(100));

        toggler.start(None);
        assert_eq!(toggler.poll_state(), PollState::Scheduled);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(transport.count("/instr/viewPending"), 1);
        assert!(toggler.has_pending_state_change());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.count("/instr/viewPending"), 2);

        {
            let mut server = server.lock();
            server.pending.clear();
            server.instruction = Some(instruction_json(7, "Completed", "1", 150));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.count("/instr/viewPending"), 3);
        assert!(!toggler.has_pending_state_change());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.count("/instr/viewPending"), 3);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(transport.count("/instr/viewPending"), 4);

        toggler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_keep_polling_after_failed_poll() {
        let server = Arc::new(Mutex::new(FakeServer {
            fail_queries: true,
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        toggler.set_refresh(Duration::from_millis(100));
        let counts = counting_callback(&toggler);

        toggler.start(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(transport.count("/datum/mostRecent"), 3);
        assert_eq!(counts.1.load(Ordering::SeqCst), 3);
        toggler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_restart_timer_with_pending_interval_after_queue() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(0), 100)),
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        toggler.set_pending_refresh(Duration::from_millis(100));
        seed(&toggler, Some(datum(0, 100)), None);

        toggler.start(Some(Duration::from_secs(60)));
        toggler.set_value(1).await.unwrap();
        assert_eq!(transport.count("/instr/add"), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(transport.count("/instr/viewPending"), 1);
        toggler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_stop_idempotently() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let (toggler, transport) = toggler_with(&server);

        toggler.start(Some(Duration::from_millis(10)));
        toggler.start(Some(Duration::from_millis(1)));
        toggler.stop();
        toggler.stop();
        assert_eq!(toggler.poll_state(), PollState::Stopped);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_restart_after_stop_from_callback() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(1), 100)),
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        let toggler = Arc::new(toggler);
        toggler.set_refresh(Duration::from_millis(100));
        let weak = Arc::downgrade(&toggler);
        toggler.set_callback(move |_| {
            if let Some(toggler) = weak.upgrade() {
                toggler.stop();
            }
        });

        toggler.start(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.count("/datum/mostRecent"), 1);
        assert_eq!(toggler.poll_state(), PollState::Stopped);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.count("/datum/mostRecent"), 1);

        toggler.clear_callback();
        toggler.start(Some(Duration::from_millis(10)));
        assert_eq!(toggler.poll_state(), PollState::Scheduled);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(transport.count("/datum/mostRecent"), 4);
        toggler.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_not_reschedule_after_stop() {
        let server = Arc::new(Mutex::new(FakeServer {
            datum: Some(datum_json(json!(0), 100)),
            ..FakeServer::default()
        }));
        let (toggler, transport) = toggler_with(&server);
        seed(&toggler, Some(datum(0, 100)), None);

        toggler.start(Some(Duration::from_millis(10)));
        toggler.stop();
        toggler.set_value(1).await.unwrap();
        assert_eq!(toggler.poll_state(), PollState::Stopped);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.count("/instr/viewPending"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_report_expired_key_once_while_polling() {
        let server = Arc::new(Mutex::new(FakeServer::default()));
        let (toggler, transport) = toggler_with(&server);
        toggler.set_refresh(Duration::from_millis(100));
        toggler.set_signing_key(b"key", &Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        toggler.set_callback(move |err| {
            seen.lock().push(err.map(ToString::to_string));
        });

        toggler.start(Some(Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(transport.requests().is_empty());
        assert_eq!(
            *errors.lock(),
            vec![Some(ControlError::SigningKeyNotConfigured.to_string())]
        );
        assert_eq!(toggler.poll_state(), PollState::Scheduled);
        toggler.stop();
    }
}
