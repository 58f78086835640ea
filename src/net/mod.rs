//! Connectivity state machine and supervisor.
//!
//! The radio stack is an external collaborator: it accepts mode/credential
//! commands and emits typed events. Instead of a callback mutating shared
//! flags, events flow through a channel into one supervisor task that feeds a
//! pure state machine (`Machine::step`) and applies the commands it returns.
//! This keeps every transition deterministic and testable with synthetic
//! event sequences.
//!
//! Startup gating: dependent services must not start until the machine
//! reaches a terminal-for-startup state (`Connected` or `Provisioned`).
//! `ConnectivityHandle::wait_ready` blocks for that, with an optional
//! deadline so tests can bound execution, and the wait observes an
//! operator-triggered provisioning reset as a state change rather than
//! hanging on stale flags.

mod stub;

pub use stub::StubRadio;

use anyhow::{anyhow, Result};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Retry budget for station association before falling back to provisioning.
pub const DEFAULT_MAX_RETRY: u32 = 5;

/// Events emitted by the radio stack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RadioEvent {
    /// Station mode came up; time to associate.
    StationStarted,
    /// Association lost or failed.
    Disconnected,
    /// Address acquired; the network is usable.
    GotIp,
    /// A provisioning client delivered new credentials.
    ProvisioningComplete,
    /// Unrecoverable stack fault.
    Fault(String),
}

/// Connectivity lifecycle. `Connected` and `Provisioned` are the two states
/// that allow dependent services to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    StationConnecting,
    Connected,
    RetryExhausted,
    ProvisioningActive,
    Provisioned,
    Failed,
}

impl ConnectivityState {
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            ConnectivityState::Connected | ConnectivityState::Provisioned
        )
    }
}

/// Commands the state machine asks the supervisor to apply to the radio.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RadioCommand {
    Connect,
    TearDownStation,
    EnterApSta,
    StartProvisioning,
    StopProvisioning,
}

/// Radio stack control seam. On target this wraps the platform Wi-Fi API;
/// `StubRadio` stands in elsewhere.
pub trait RadioControl: Send {
    /// Bring up station mode with the stored credentials. The stack answers
    /// with `RadioEvent::StationStarted`.
    fn start_station(&mut self, ssid: &str, password: &str) -> Result<()>;

    fn connect(&mut self) -> Result<()>;

    fn tear_down_station(&mut self) -> Result<()>;

    fn enter_ap_sta(&mut self) -> Result<()>;

    fn start_provisioning(&mut self, ap_name: &str) -> Result<()>;

    fn stop_provisioning(&mut self) -> Result<()>;
}

/// The connectivity state machine, free of I/O.
///
/// `step` consumes one event and returns the radio commands to apply.
/// Retries are immediate and bounded: the dominant failure is a transient
/// association miss, and a persistently wrong credential is handled by
/// falling through to provisioning, not by retrying forever.
#[derive(Clone, Debug)]
pub struct Machine {
    state: ConnectivityState,
    retry_count: u32,
    max_retry: u32,
}

impl Machine {
    pub fn new(max_retry: u32) -> Self {
        Self {
            state: ConnectivityState::Idle,
            retry_count: 0,
            max_retry,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn step(&mut self, event: &RadioEvent) -> Vec<RadioCommand> {
        use ConnectivityState::*;

        if let RadioEvent::Fault(msg) = event {
            log::error!("radio stack fault: {}", msg);
            self.state = Failed;
            return Vec::new();
        }

        match (self.state, event) {
            (Idle, RadioEvent::StationStarted) => {
                self.state = StationConnecting;
                vec![RadioCommand::Connect]
            }
            (StationConnecting, RadioEvent::Disconnected) => {
                if self.retry_count < self.max_retry {
                    self.retry_count += 1;
                    log::info!(
                        "retrying station connect ({}/{})",
                        self.retry_count,
                        self.max_retry
                    );
                    vec![RadioCommand::Connect]
                } else {
                    log::warn!(
                        "station connect failed after {} retries",
                        self.max_retry
                    );
                    self.state = RetryExhausted;
                    Vec::new()
                }
            }
            (StationConnecting, RadioEvent::GotIp) => {
                self.retry_count = 0;
                self.state = Connected;
                log::info!("station connected, address acquired");
                Vec::new()
            }
            (Connected, RadioEvent::Disconnected) => {
                self.retry_count = 0;
                self.state = StationConnecting;
                vec![RadioCommand::Connect]
            }
            (ProvisioningActive, RadioEvent::ProvisioningComplete) => {
                self.state = Provisioned;
                log::info!("provisioning complete, endpoint torn down");
                vec![RadioCommand::StopProvisioning]
            }
            _ => Vec::new(),
        }
    }

    /// Enter provisioning mode: tear down station, go dual-mode, open the
    /// provisioning endpoint. Used both for the retry-exhausted fallback and
    /// for the explicit operator-triggered reset.
    pub fn begin_provisioning(&mut self) -> Vec<RadioCommand> {
        self.state = ConnectivityState::ProvisioningActive;
        self.retry_count = 0;
        vec![
            RadioCommand::TearDownStation,
            RadioCommand::EnterApSta,
            RadioCommand::StartProvisioning,
        ]
    }
}

/// Messages the supervisor task consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupervisorMsg {
    Radio(RadioEvent),
    /// Operator-triggered re-entry into provisioning mode.
    ProvisionReset,
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct WifiSettings {
    pub ssid: String,
    pub password: String,
    pub max_retry: u32,
    pub provisioning_ap: String,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            max_retry: DEFAULT_MAX_RETRY,
            provisioning_ap: "PROV_ESP32".to_string(),
        }
    }
}

struct SharedState {
    state: Mutex<ConnectivityState>,
    changed: Condvar,
}

/// Handle to the supervisor task.
pub struct ConnectivityHandle {
    shared: Arc<SharedState>,
    tx: Sender<SupervisorMsg>,
    join: Option<JoinHandle<()>>,
}

impl ConnectivityHandle {
    pub fn state(&self) -> Result<ConnectivityState> {
        let state = self
            .shared
            .state
            .lock()
            .map_err(|_| anyhow!("connectivity state lock poisoned"))?;
        Ok(*state)
    }

    /// Block until connectivity reaches a terminal-for-startup state.
    ///
    /// `timeout` of `None` waits forever (the device is not useful until
    /// connectivity exists); tests pass a deadline. `Failed` unblocks with an
    /// error.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> Result<ConnectivityState> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| anyhow!("connectivity state lock poisoned"))?;
        loop {
            if state.is_ready() {
                return Ok(*state);
            }
            if *state == ConnectivityState::Failed {
                return Err(anyhow!("radio stack reported an unrecoverable fault"));
            }
            state = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(anyhow!("timed out waiting for connectivity"));
                    }
                    let (guard, _) = self
                        .shared
                        .changed
                        .wait_timeout(state, remaining)
                        .map_err(|_| anyhow!("connectivity state lock poisoned"))?;
                    guard
                }
                None => self
                    .shared
                    .changed
                    .wait(state)
                    .map_err(|_| anyhow!("connectivity state lock poisoned"))?,
            };
        }
    }

    /// Channel for the radio stack (or tests) to feed events into the
    /// supervisor.
    pub fn event_sender(&self) -> Sender<SupervisorMsg> {
        self.tx.clone()
    }

    /// Explicit external trigger: re-enter provisioning mode regardless of
    /// the current state.
    pub fn reset_to_provisioning(&self) -> Result<()> {
        self.tx
            .send(SupervisorMsg::ProvisionReset)
            .map_err(|_| anyhow!("connectivity supervisor is gone"))
    }

    pub fn shutdown(mut self) -> Result<()> {
        let _ = self.tx.send(SupervisorMsg::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("connectivity supervisor thread panicked"))?;
        }
        Ok(())
    }
}

pub struct Supervisor;

impl Supervisor {
    /// Spawn the supervisor task. The caller builds the channel so the radio
    /// implementation can hold the sender before the task starts.
    pub fn spawn(
        mut radio: Box<dyn RadioControl>,
        events: Receiver<SupervisorMsg>,
        tx: Sender<SupervisorMsg>,
        settings: WifiSettings,
    ) -> Result<ConnectivityHandle> {
        let shared = Arc::new(SharedState {
            state: Mutex::new(ConnectivityState::Idle),
            changed: Condvar::new(),
        });
        let shared_task = shared.clone();

        let join = std::thread::spawn(move || {
            let mut machine = Machine::new(settings.max_retry);
            if let Err(err) = radio.start_station(&settings.ssid, &settings.password) {
                log::error!("failed to start station mode: {:#}", err);
                apply_and_publish(
                    &mut machine,
                    &RadioEvent::Fault(format!("{:#}", err)),
                    radio.as_mut(),
                    &settings,
                    &shared_task,
                );
                return;
            }

            while let Ok(msg) = events.recv() {
                match msg {
                    SupervisorMsg::Radio(event) => {
                        apply_and_publish(
                            &mut machine,
                            &event,
                            radio.as_mut(),
                            &settings,
                            &shared_task,
                        );
                    }
                    SupervisorMsg::ProvisionReset => {
                        log::info!("provisioning reset requested");
                        let commands = machine.begin_provisioning();
                        apply_commands(&mut machine, commands, radio.as_mut(), &settings);
                        publish(&shared_task, machine.state());
                    }
                    SupervisorMsg::Shutdown => break,
                }
                if machine.state() == ConnectivityState::Failed {
                    break;
                }
            }
        });

        Ok(ConnectivityHandle {
            shared,
            tx,
            join: Some(join),
        })
    }
}

fn apply_and_publish(
    machine: &mut Machine,
    event: &RadioEvent,
    radio: &mut dyn RadioControl,
    settings: &WifiSettings,
    shared: &SharedState,
) {
    let commands = machine.step(event);
    apply_commands(machine, commands, radio, settings);
    // Retry exhaustion is not an error: fall through into provisioning.
    if machine.state() == ConnectivityState::RetryExhausted {
        publish(shared, machine.state());
        let commands = machine.begin_provisioning();
        apply_commands(machine, commands, radio, settings);
    }
    publish(shared, machine.state());
}

fn apply_commands(
    machine: &mut Machine,
    commands: Vec<RadioCommand>,
    radio: &mut dyn RadioControl,
    settings: &WifiSettings,
) {
    for command in commands {
        let result = match &command {
            RadioCommand::Connect => radio.connect(),
            RadioCommand::TearDownStation => radio.tear_down_station(),
            RadioCommand::EnterApSta => radio.enter_ap_sta(),
            RadioCommand::StartProvisioning => radio.start_provisioning(&settings.provisioning_ap),
            RadioCommand::StopProvisioning => radio.stop_provisioning(),
        };
        if let Err(err) = result {
            log::error!("radio command {:?} failed: {:#}", command, err);
            machine.step(&RadioEvent::Fault(format!("{:#}", err)));
            return;
        }
    }
}

fn publish(shared: &SharedState, state: ConnectivityState) {
    let mut current = match shared.state.lock() {
        Ok(guard) => guard,
        Err(_) => {
            log::error!("connectivity state lock poisoned, dropping state update");
            return;
        }
    };
    if *current != state {
        *current = state;
        shared.changed.notify_all();
    }
}
