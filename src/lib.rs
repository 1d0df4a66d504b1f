//! Auto-follow engine for a live departures/arrivals board.
//!
//! [`tracker::FlightTracker`] pins one flight by callsign, re-identifies it in
//! every snapshot batch and asks the host to move the board to the flight's
//! destination once it is on its way there.

pub mod config;
pub mod logging;
pub mod model;
pub mod net;
pub mod resolver;
pub mod runtime;
pub mod storage;
pub mod switch;
pub mod tracker;
pub mod view;

pub use model::{FlightBatch, FlightRecord, FlightStatus};
pub use storage::{CallsignStore, FileStore, MemoryStore};
pub use switch::{AirportChangeSource, SwitchOutcome};
pub use tracker::{FlightTracker, TrackerConfig};
pub use view::ViewState;
