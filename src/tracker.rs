use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::{
    DEFAULT_MANUAL_HOLD_MS, DEFAULT_PENDING_TIMEOUT_MS, DEFAULT_STORAGE_KEY,
    DEFAULT_SWITCH_COOLDOWN_MS,
};
use crate::model::{normalize_callsign, normalize_icao, FlightBatch, FlightRecord};
use crate::resolver::resolve;
use crate::storage::CallsignStore;
use crate::switch::{leg_key, AirportChangeSource, SkipReason, SwitchOutcome, SwitchState};
use crate::view::ViewState;

pub const MSG_AWAITING_UPDATES: &str = "awaiting live updates";
pub const MSG_NO_DESTINATION: &str = "destination ICAO unavailable";
pub const MSG_WAITING_DEPARTURE: &str = "waiting for departure";

pub type SwitchHandler = Box<dyn FnMut(&str) -> SwitchOutcome>;
pub type StateListener = Box<dyn FnMut(&ViewState)>;

#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub storage_key: String,
    pub switch_cooldown: Duration,
    pub manual_hold: Duration,
    /// `None` keeps an unanswered switch request pending forever.
    pub pending_timeout: Option<Duration>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            switch_cooldown: Duration::from_millis(DEFAULT_SWITCH_COOLDOWN_MS),
            manual_hold: Duration::from_millis(DEFAULT_MANUAL_HOLD_MS),
            pending_timeout: Some(Duration::from_millis(DEFAULT_PENDING_TIMEOUT_MS)),
        }
    }
}

#[derive(Debug, Default)]
struct TrackedFlight {
    callsign: String,
    origin: String,
    to: String,
    message: String,
}

/// Keeps the board following one pinned flight.
///
/// The host feeds every snapshot batch through [`FlightTracker::process_flight_data`]
/// together with the airport currently on screen. When the pinned flight is
/// airborne towards another airport the tracker asks the host to switch, at most
/// once per leg and never inside the cooldown or a manual hold.
pub struct FlightTracker {
    config: TrackerConfig,
    store: Box<dyn CallsignStore>,
    on_switch_airport: Option<SwitchHandler>,
    on_state_change: Option<StateListener>,
    flight: TrackedFlight,
    switch: SwitchState,
}

impl FlightTracker {
    pub fn new(config: TrackerConfig, store: Box<dyn CallsignStore>) -> Self {
        Self {
            config,
            store,
            on_switch_airport: None,
            on_state_change: None,
            flight: TrackedFlight::default(),
            switch: SwitchState::default(),
        }
    }

    pub fn with_switch_handler(
        mut self,
        handler: impl FnMut(&str) -> SwitchOutcome + 'static,
    ) -> Self {
        self.on_switch_airport = Some(Box::new(handler));
        self
    }

    pub fn with_state_listener(
        mut self,
        listener: impl FnMut(&ViewState) + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(listener));
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Restores the persisted callsign, if any.
    pub fn init(&mut self) {
        let restored = match self.store.load(&self.config.storage_key) {
            Ok(value) => value.map(|v| normalize_callsign(&v)).unwrap_or_default(),
            Err(err) => {
                warn!("tracked callsign restore failed: {err:#}");
                String::new()
            }
        };
        if !restored.is_empty() {
            info!("restored tracked flight {restored}");
        }
        self.flight = TrackedFlight {
            callsign: restored,
            ..Default::default()
        };
        self.notify();
    }

    pub fn is_tracking(&self) -> bool {
        !self.flight.callsign.is_empty()
    }

    pub fn tracked_callsign(&self) -> Option<&str> {
        if self.is_tracking() {
            Some(&self.flight.callsign)
        } else {
            None
        }
    }

    pub fn is_tracked_callsign(&self, callsign: &str) -> bool {
        let callsign = normalize_callsign(callsign);
        !callsign.is_empty() && callsign == self.flight.callsign
    }

    /// Pins `flight`, or unpins it when it is already the tracked one.
    ///
    /// Returns `true` only when a new flight became tracked.
    pub fn toggle_tracking(&mut self, flight: &FlightRecord) -> bool {
        let callsign = normalize_callsign(&flight.callsign);
        if callsign.is_empty() {
            return false;
        }
        if callsign == self.flight.callsign {
            self.clear_tracking();
            return false;
        }

        info!("tracking {callsign}");
        self.flight = TrackedFlight {
            callsign,
            origin: flight.origin_icao().unwrap_or_default(),
            to: flight.destination_icao().unwrap_or_default(),
            message: String::new(),
        };
        self.switch.reset_flight();
        self.persist();
        self.notify();
        true
    }

    pub fn clear_tracking(&mut self) {
        if self.is_tracking() {
            info!("stopped tracking {}", self.flight.callsign);
        }
        self.flight = TrackedFlight::default();
        self.switch.reset_flight();
        self.switch.last_switch_at = None;
        self.persist();
        self.notify();
    }

    pub fn on_airport_changed(&mut self, source: AirportChangeSource) {
        self.on_airport_changed_at(source, SystemTime::now());
    }

    pub fn on_airport_changed_at(&mut self, source: AirportChangeSource, now: SystemTime) {
        if source == AirportChangeSource::Manual {
            debug!("manual airport change, holding auto-follow for {:?}", self.config.manual_hold);
            self.switch.hold_until(now + self.config.manual_hold);
        }
    }

    pub fn process_flight_data(&mut self, batch: &FlightBatch, current_airport: &str) {
        self.process_flight_data_at(batch, current_airport, SystemTime::now());
    }

    pub fn process_flight_data_at(
        &mut self,
        batch: &FlightBatch,
        current_airport: &str,
        now: SystemTime,
    ) {
        self.settle_pending(now);
        if !self.is_tracking() {
            return;
        }

        let Some(candidate) = resolve(&self.flight.callsign, batch) else {
            self.set_message(MSG_AWAITING_UPDATES);
            return;
        };
        let record = candidate.record;

        if let Some(origin) = record.origin_icao() {
            self.flight.origin = origin;
        }
        let Some(destination) = record.destination_icao() else {
            self.set_message(MSG_NO_DESTINATION);
            return;
        };
        self.flight.to = destination.clone();

        let status = record.flight_status();
        if !status.is_follow_eligible() {
            debug!(
                "{} is {}, not following yet",
                self.flight.callsign,
                status.label()
            );
            self.set_message(MSG_WAITING_DEPARTURE);
            return;
        }

        self.set_message("");

        match self.check_switch(&destination, current_airport, now) {
            Ok(leg) => self.request_switch(&destination, &leg, now),
            Err(reason) => debug!("no switch to {destination}: {}", reason.label()),
        }
    }

    /// Applies switch results that arrived since the last batch.
    pub fn settle_pending(&mut self, now: SystemTime) {
        self.switch.settle_ready(now, self.config.pending_timeout);
    }

    pub fn view_state(&self) -> ViewState {
        if !self.is_tracking() {
            return ViewState::disabled();
        }
        ViewState {
            enabled: true,
            callsign: self.flight.callsign.clone(),
            from: self.flight.origin.clone(),
            to: self.flight.to.clone(),
            message: self.flight.message.clone(),
        }
    }

    pub fn pending_switch_target(&self) -> Option<&str> {
        if self.switch.pending_target.is_empty() {
            None
        } else {
            Some(&self.switch.pending_target)
        }
    }

    pub fn last_switch_at(&self) -> Option<SystemTime> {
        self.switch.last_switch_at
    }

    pub fn last_switched_leg_key(&self) -> Option<&str> {
        if self.switch.last_switched_leg_key.is_empty() {
            None
        } else {
            Some(&self.switch.last_switched_leg_key)
        }
    }

    pub fn manual_hold_until(&self) -> Option<SystemTime> {
        self.switch.manual_hold_until
    }

    pub fn outstanding_switches(&self) -> usize {
        self.switch.in_flight_len()
    }

    fn check_switch(
        &self,
        destination: &str,
        current_airport: &str,
        now: SystemTime,
    ) -> Result<String, SkipReason> {
        match normalize_icao(current_airport) {
            None => return Err(SkipReason::NoCurrentAirport),
            Some(current) if current == destination => return Err(SkipReason::AlreadyShown),
            Some(_) => {}
        }
        if self.on_switch_airport.is_none() {
            return Err(SkipReason::NoHandler);
        }
        let leg = leg_key(&self.flight.callsign, destination);
        self.switch
            .check(destination, &leg, now, self.config.switch_cooldown)?;
        Ok(leg)
    }

    fn request_switch(&mut self, destination: &str, leg: &str, now: SystemTime) {
        let Some(handler) = self.on_switch_airport.as_mut() else {
            return;
        };
        info!("following {} to {destination}", self.flight.callsign);
        self.switch.begin(destination);
        match handler(destination) {
            SwitchOutcome::Done(switched) => self.switch.settle(destination, leg, Ok(switched), now),
            SwitchOutcome::Failed(err) => self.switch.settle(destination, leg, Err(err), now),
            SwitchOutcome::Pending(rx) => self.switch.track_pending(destination, leg, now, rx),
        }
    }

    fn set_message(&mut self, message: &str) {
        self.flight.message = message.to_string();
        self.notify();
    }

    fn persist(&mut self) {
        let key = &self.config.storage_key;
        let result = if self.flight.callsign.is_empty() {
            self.store.remove(key)
        } else {
            self.store.save(key, &self.flight.callsign)
        };
        if let Err(err) = result {
            warn!("tracked callsign persist failed: {err:#}");
        }
    }

    fn notify(&mut self) {
        let view = self.view_state();
        if let Some(listener) = self.on_state_change.as_mut() {
            listener(&view);
        }
    }
}
