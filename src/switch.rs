use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// What the host's switch primitive reports back for one request.
#[derive(Debug)]
pub enum SwitchOutcome {
    /// Settled on the spot; `true` means the board now shows the destination.
    Done(bool),
    Failed(String),
    /// Settles later, when the host sends a result on the channel.
    Pending(Receiver<Result<bool, String>>),
}

impl SwitchOutcome {
    pub fn pending() -> (std::sync::mpsc::Sender<Result<bool, String>>, Self) {
        let (tx, rx) = std::sync::mpsc::channel();
        (tx, SwitchOutcome::Pending(rx))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AirportChangeSource {
    Manual,
    Auto,
}

impl AirportChangeSource {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("manual") {
            AirportChangeSource::Manual
        } else {
            AirportChangeSource::Auto
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoCurrentAirport,
    AlreadyShown,
    NoHandler,
    ManualHold,
    AlreadyPending,
    LegAlreadySwitched,
    Cooldown,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::NoCurrentAirport => "no current airport",
            SkipReason::AlreadyShown => "destination already shown",
            SkipReason::NoHandler => "no switch handler",
            SkipReason::ManualHold => "manual hold active",
            SkipReason::AlreadyPending => "switch already pending",
            SkipReason::LegAlreadySwitched => "leg already switched",
            SkipReason::Cooldown => "cooldown",
        }
    }
}

pub fn leg_key(callsign: &str, destination: &str) -> String {
    format!("{callsign}|{destination}")
}

#[derive(Debug)]
struct InFlightSwitch {
    destination: String,
    leg_key: String,
    issued_at: SystemTime,
    rx: Receiver<Result<bool, String>>,
}

#[derive(Debug, Default)]
pub(crate) struct SwitchState {
    pub(crate) last_switch_at: Option<SystemTime>,
    pub(crate) last_switched_leg_key: String,
    pub(crate) manual_hold_until: Option<SystemTime>,
    pub(crate) pending_target: String,
    in_flight: Vec<InFlightSwitch>,
}

impl SwitchState {
    /// Forget the per-flight history. The manual hold belongs to the board and survives.
    pub(crate) fn reset_flight(&mut self) {
        self.last_switched_leg_key.clear();
        self.pending_target.clear();
        if !self.in_flight.is_empty() {
            debug!("detaching {} outstanding switch request(s)", self.in_flight.len());
        }
        self.in_flight.clear();
    }

    pub(crate) fn hold_until(&mut self, until: SystemTime) {
        self.manual_hold_until = Some(until);
    }

    /// Guards that depend on switch history, evaluated in order.
    pub(crate) fn check(
        &self,
        destination: &str,
        leg_key: &str,
        now: SystemTime,
        cooldown: Duration,
    ) -> Result<(), SkipReason> {
        if self.manual_hold_until.is_some_and(|until| now < until) {
            return Err(SkipReason::ManualHold);
        }
        if self.is_pending(destination) {
            return Err(SkipReason::AlreadyPending);
        }
        if self.last_switched_leg_key == leg_key {
            return Err(SkipReason::LegAlreadySwitched);
        }
        if let Some(last) = self.last_switch_at {
            // A clock that went backwards counts as "just switched".
            let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
            if elapsed < cooldown {
                return Err(SkipReason::Cooldown);
            }
        }
        Ok(())
    }

    /// True while any unsettled request still targets `destination`.
    fn is_pending(&self, destination: &str) -> bool {
        self.pending_target == destination
            || self.in_flight.iter().any(|entry| entry.destination == destination)
    }

    pub(crate) fn begin(&mut self, destination: &str) {
        self.pending_target = destination.to_string();
    }

    pub(crate) fn track_pending(
        &mut self,
        destination: &str,
        leg_key: &str,
        issued_at: SystemTime,
        rx: Receiver<Result<bool, String>>,
    ) {
        self.in_flight.push(InFlightSwitch {
            destination: destination.to_string(),
            leg_key: leg_key.to_string(),
            issued_at,
            rx,
        });
    }

    pub(crate) fn settle(
        &mut self,
        destination: &str,
        leg_key: &str,
        result: Result<bool, String>,
        now: SystemTime,
    ) {
        match result {
            Ok(true) => {
                info!("airport switch to {destination} completed ({leg_key})");
                self.last_switch_at = Some(now);
                self.last_switched_leg_key = leg_key.to_string();
            }
            Ok(false) => debug!("airport switch to {destination} declined"),
            Err(err) => warn!("airport switch to {destination} failed: {err}"),
        }
        if self.pending_target == destination {
            self.pending_target.clear();
        }
    }

    /// Drains results that have arrived and abandons requests older than `timeout`.
    pub(crate) fn settle_ready(&mut self, now: SystemTime, timeout: Option<Duration>) {
        if self.in_flight.is_empty() {
            return;
        }
        let mut waiting = Vec::new();
        for entry in std::mem::take(&mut self.in_flight) {
            match entry.rx.try_recv() {
                Ok(result) => self.settle(&entry.destination, &entry.leg_key, result, now),
                Err(TryRecvError::Disconnected) => self.settle(
                    &entry.destination,
                    &entry.leg_key,
                    Err("switch handler went away".to_string()),
                    now,
                ),
                Err(TryRecvError::Empty) => {
                    let age = now.duration_since(entry.issued_at).unwrap_or(Duration::ZERO);
                    match timeout {
                        Some(limit) if age >= limit => self.settle(
                            &entry.destination,
                            &entry.leg_key,
                            Err(format!("no answer after {}ms", age.as_millis())),
                            now,
                        ),
                        _ => waiting.push(entry),
                    }
                }
            }
        }
        self.in_flight = waiting;
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{leg_key, AirportChangeSource, SkipReason, SwitchOutcome, SwitchState};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn t(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(ms)
    }

    const COOLDOWN: Duration = Duration::from_millis(6000);

    #[test]
    fn guards_fire_in_order() {
        let mut state = SwitchState::default();
        let leg = leg_key("BAW123", "EGLL");
        assert_eq!(state.check("EGLL", &leg, t(0), COOLDOWN), Ok(()));

        state.hold_until(t(1000));
        state.begin("EGLL");
        assert_eq!(
            state.check("EGLL", &leg, t(500), COOLDOWN),
            Err(SkipReason::ManualHold)
        );
        assert_eq!(
            state.check("EGLL", &leg, t(1000), COOLDOWN),
            Err(SkipReason::AlreadyPending)
        );

        state.settle("EGLL", &leg, Ok(true), t(1000));
        assert!(state.pending_target.is_empty());
        assert_eq!(
            state.check("EGLL", &leg, t(60_000), COOLDOWN),
            Err(SkipReason::LegAlreadySwitched)
        );
        let other = leg_key("BAW123", "EGKK");
        assert_eq!(
            state.check("EGKK", &other, t(2000), COOLDOWN),
            Err(SkipReason::Cooldown)
        );
        assert_eq!(state.check("EGKK", &other, t(7000), COOLDOWN), Ok(()));
    }

    #[test]
    fn failure_keeps_history() {
        let mut state = SwitchState::default();
        state.begin("EDDF");
        state.settle("EDDF", "DLH4|EDDF", Err("offline".to_string()), t(0));
        assert!(state.pending_target.is_empty());
        assert!(state.last_switch_at.is_none());
        assert!(state.last_switched_leg_key.is_empty());
    }

    #[test]
    fn settle_only_clears_matching_target() {
        let mut state = SwitchState::default();
        state.begin("EDDM");
        state.settle("EDDF", "DLH4|EDDF", Ok(false), t(0));
        assert_eq!(state.pending_target, "EDDM");
    }

    #[test]
    fn pending_results_drain_and_time_out() {
        let mut state = SwitchState::default();
        let (tx, outcome) = SwitchOutcome::pending();
        let SwitchOutcome::Pending(rx) = outcome else {
            panic!("expected pending outcome");
        };
        state.begin("LSGG");
        state.track_pending("LSGG", "EZS1|LSGG", t(0), rx);

        state.settle_ready(t(100), Some(Duration::from_millis(1000)));
        assert_eq!(state.in_flight_len(), 1);
        assert_eq!(state.pending_target, "LSGG");

        tx.send(Ok(true)).unwrap();
        state.settle_ready(t(200), Some(Duration::from_millis(1000)));
        assert_eq!(state.in_flight_len(), 0);
        assert_eq!(state.last_switch_at, Some(t(200)));
        assert_eq!(state.last_switched_leg_key, "EZS1|LSGG");

        let (_tx, outcome) = SwitchOutcome::pending();
        let SwitchOutcome::Pending(rx) = outcome else {
            panic!("expected pending outcome");
        };
        state.begin("LFSB");
        state.track_pending("LFSB", "EZS1|LFSB", t(300), rx);
        state.settle_ready(t(1300), Some(Duration::from_millis(1000)));
        assert_eq!(state.in_flight_len(), 0);
        assert!(state.pending_target.is_empty());
        assert_eq!(state.last_switched_leg_key, "EZS1|LSGG");
    }

    #[test]
    fn older_request_still_blocks_its_destination() {
        let mut state = SwitchState::default();
        let (_fra_tx, fra) = SwitchOutcome::pending();
        let (_muc_tx, muc) = SwitchOutcome::pending();
        let (SwitchOutcome::Pending(fra_rx), SwitchOutcome::Pending(muc_rx)) = (fra, muc) else {
            panic!("expected pending outcomes");
        };
        state.begin("EDDF");
        state.track_pending("EDDF", "DLH4|EDDF", t(0), fra_rx);
        state.begin("EDDM");
        state.track_pending("EDDM", "DLH4|EDDM", t(100), muc_rx);

        assert_eq!(state.pending_target, "EDDM");
        assert_eq!(
            state.check("EDDF", "DLH4|EDDF", t(200), COOLDOWN),
            Err(SkipReason::AlreadyPending)
        );
        assert_eq!(state.check("EDDL", "DLH4|EDDL", t(200), COOLDOWN), Ok(()));
    }

    #[test]
    fn dropped_sender_counts_as_failure() {
        let mut state = SwitchState::default();
        let (tx, outcome) = SwitchOutcome::pending();
        let SwitchOutcome::Pending(rx) = outcome else {
            panic!("expected pending outcome");
        };
        drop(tx);
        state.begin("LOWW");
        state.track_pending("LOWW", "AUA1|LOWW", t(0), rx);
        state.settle_ready(t(1), None);
        assert_eq!(state.in_flight_len(), 0);
        assert!(state.pending_target.is_empty());
        assert!(state.last_switch_at.is_none());
    }

    #[test]
    fn change_source_parsing() {
        assert_eq!(AirportChangeSource::parse("manual"), AirportChangeSource::Manual);
        assert_eq!(AirportChangeSource::parse(" MANUAL "), AirportChangeSource::Manual);
        assert_eq!(AirportChangeSource::parse("auto"), AirportChangeSource::Auto);
    }
}
