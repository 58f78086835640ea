//! Loopback radio for host development and tests.

use anyhow::Result;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use super::{RadioControl, RadioEvent, SupervisorMsg};

/// Radio stand-in that answers every control call with the event the real
/// stack would emit, synchronously, into the supervisor channel. Failure
/// behavior is scriptable so the retry and provisioning-fallback paths can be
/// driven without hardware.
pub struct StubRadio {
    events: Sender<SupervisorMsg>,
    fail_connects: u32,
    hold_station_start: bool,
    hold_provisioning: bool,
    issued: Arc<Mutex<Vec<String>>>,
}

impl StubRadio {
    pub fn new(events: Sender<SupervisorMsg>) -> Self {
        Self {
            events,
            fail_connects: 0,
            hold_station_start: false,
            hold_provisioning: false,
            issued: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer the next `n` connect attempts with a disconnect event.
    pub fn fail_connects(mut self, n: u32) -> Self {
        self.fail_connects = n;
        self
    }

    /// Do not emit `StationStarted`; the machine stays in `Idle`.
    pub fn hold_station_start(mut self) -> Self {
        self.hold_station_start = true;
        self
    }

    /// Open the provisioning endpoint without a client ever completing it.
    pub fn hold_provisioning(mut self) -> Self {
        self.hold_provisioning = true;
        self
    }

    /// Log of control calls, for assertions.
    pub fn issued(&self) -> Arc<Mutex<Vec<String>>> {
        self.issued.clone()
    }

    fn record(&self, call: &str) {
        if let Ok(mut issued) = self.issued.lock() {
            issued.push(call.to_string());
        }
    }

    fn emit(&self, event: RadioEvent) {
        // A send failure means the supervisor is gone; nothing to do.
        let _ = self.events.send(SupervisorMsg::Radio(event));
    }
}

impl RadioControl for StubRadio {
    fn start_station(&mut self, ssid: &str, _password: &str) -> Result<()> {
        self.record("start_station");
        log::debug!("stub radio: station mode up (ssid '{}')", ssid);
        if !self.hold_station_start {
            self.emit(RadioEvent::StationStarted);
        }
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        self.record("connect");
        if self.fail_connects > 0 {
            self.fail_connects = self.fail_connects.saturating_sub(1);
            self.emit(RadioEvent::Disconnected);
        } else {
            self.emit(RadioEvent::GotIp);
        }
        Ok(())
    }

    fn tear_down_station(&mut self) -> Result<()> {
        self.record("tear_down_station");
        Ok(())
    }

    fn enter_ap_sta(&mut self) -> Result<()> {
        self.record("enter_ap_sta");
        Ok(())
    }

    fn start_provisioning(&mut self, ap_name: &str) -> Result<()> {
        self.record("start_provisioning");
        log::debug!("stub radio: provisioning endpoint '{}' open", ap_name);
        if !self.hold_provisioning {
            self.emit(RadioEvent::ProvisioningComplete);
        }
        Ok(())
    }

    fn stop_provisioning(&mut self) -> Result<()> {
        self.record("stop_provisioning");
        Ok(())
    }
}
