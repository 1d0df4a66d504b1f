use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::cell::Cell;
use std::fs;
use std::io::{self, BufRead};
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{normalize_icao, FlightBatch, FlightRecord};
use crate::net::{spawn_airport_probe, spawn_fetcher, FeedClient, FeedEvent, SwitchRequest};
use crate::storage::{CallsignStore, FileStore, MemoryStore};
use crate::switch::{AirportChangeSource, SwitchOutcome};
use crate::tracker::FlightTracker;
use crate::view::ViewState;

const TICK: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Track(String),
    Clear,
    Airport(String),
    Status,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_ascii_lowercase();
    let arg = parts.next();
    match (verb.as_str(), arg) {
        ("track" | "t", Some(callsign)) => Some(Command::Track(callsign.to_string())),
        ("clear" | "c", None) => Some(Command::Clear),
        ("airport" | "a", Some(icao)) => Some(Command::Airport(icao.to_string())),
        ("status" | "s", None) => Some(Command::Status),
        ("quit" | "q" | "exit", None) => Some(Command::Quit),
        _ => None,
    }
}

/// Reads JSON-lines snapshot batches. Blank lines and `#` comments are skipped.
pub fn load_replay(path: &Path) -> Result<Vec<FlightBatch>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay: {}", path.display()))?;
    let mut batches = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let batch: FlightBatch = serde_json::from_str(line).with_context(|| {
            format!("Failed to parse replay line {}: {}", idx + 1, path.display())
        })?;
        batches.push(batch);
    }
    Ok(batches)
}

fn spawn_replay(batches: Vec<FlightBatch>, refresh: Duration, tx: Sender<FeedEvent>) {
    thread::spawn(move || {
        info!("replaying {} batches", batches.len());
        for (idx, batch) in batches.into_iter().enumerate() {
            if idx > 0 {
                thread::sleep(refresh);
            }
            if tx
                .send(FeedEvent::Batch {
                    airport: None,
                    batch,
                })
                .is_err()
            {
                return;
            }
        }
        let _ = tx.send(FeedEvent::Finished);
    });
}

fn spawn_command_reader(tx: Sender<Command>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    if tx.send(command).is_err() {
                        break;
                    }
                }
                None => eprintln!("unknown command: {}", line.trim()),
            }
        }
    });
}

fn print_view(view: &ViewState) {
    println!("{} {}", Local::now().format("%H:%M:%S"), view.summary());
}

/// Prints a line only when the view actually changed.
fn console_listener() -> impl FnMut(&ViewState) {
    let mut last: Option<ViewState> = None;
    move |view| {
        if last.as_ref() != Some(view) {
            print_view(view);
            last = Some(view.clone());
        }
    }
}

struct Board {
    airport: String,
    airport_tx: Option<Sender<String>>,
    /// Bumped on every manual change; switch requests issued earlier are stale.
    generation: Rc<Cell<u64>>,
}

impl Board {
    fn new(airport: &str) -> Self {
        Self {
            airport: airport.to_string(),
            airport_tx: None,
            generation: Rc::new(Cell::new(0)),
        }
    }
}

pub fn run(config: &Config) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel();
    let tracker_config = config.tracker_config();
    let mut board = Board::new(&config.airport);
    let generation = Rc::clone(&board.generation);

    let tracker = if let Some(path) = config.replay_path() {
        let batches = load_replay(&path)?;
        if batches.is_empty() {
            return Err(anyhow!("Replay has no batches: {}", path.display()));
        }
        spawn_replay(batches, config.refresh, event_tx.clone());
        let store: Box<dyn CallsignStore> = Box::new(MemoryStore::new());
        let events = event_tx.clone();
        FlightTracker::new(tracker_config, store).with_switch_handler(move |icao| {
            let (done, outcome) = SwitchOutcome::pending();
            let request = SwitchRequest {
                icao: icao.to_string(),
                generation: generation.get(),
                batch: None,
                done,
            };
            let _ = events.send(FeedEvent::SwitchReady(request));
            outcome
        })
    } else {
        let api_key = Some(config.api_key.clone());
        let api_key_header = Some(config.api_key_header.clone());
        let feed = FeedClient::new(&config.feed_url, config.insecure, api_key, api_key_header)?;
        let (airport_tx, airport_rx) = mpsc::channel();
        spawn_fetcher(
            feed.clone(),
            config.airport.clone(),
            config.refresh,
            airport_rx,
            event_tx.clone(),
        );
        board.airport_tx = Some(airport_tx);
        let store: Box<dyn CallsignStore> = Box::new(FileStore::new(config.state_dir.trim()));
        let events = event_tx.clone();
        FlightTracker::new(tracker_config, store).with_switch_handler(move |icao| {
            spawn_airport_probe(feed.clone(), icao.to_string(), generation.get(), events.clone())
        })
    };
    drop(event_tx);

    let mut tracker = tracker.with_state_listener(console_listener());
    tracker.init();
    if !config.follow.is_empty() && !tracker.is_tracked_callsign(&config.follow) {
        tracker.toggle_tracking(&FlightRecord::new(&config.follow));
    }

    let (cmd_tx, cmd_rx) = mpsc::channel();
    spawn_command_reader(cmd_tx);
    info!("board started on {}", board.airport);
    println!("{} board {}", Local::now().format("%H:%M:%S"), board.airport);

    run_loop(&mut tracker, &mut board, &event_rx, &cmd_rx)
}

fn run_loop(
    tracker: &mut FlightTracker,
    board: &mut Board,
    event_rx: &Receiver<FeedEvent>,
    cmd_rx: &Receiver<Command>,
) -> Result<()> {
    loop {
        match event_rx.recv_timeout(TICK) {
            Ok(FeedEvent::Batch { airport, batch }) => {
                if airport.as_deref().is_some_and(|a| a != board.airport) {
                    debug!("dropping stale batch for {:?}", airport);
                } else {
                    tracker.process_flight_data(&batch, &board.airport);
                }
            }
            Ok(FeedEvent::Error(err)) => debug!("feed error surfaced: {err}"),
            Ok(FeedEvent::SwitchReady(request)) => apply_switch(tracker, board, request),
            Ok(FeedEvent::Finished) => {
                tracker.settle_pending(SystemTime::now());
                info!("replay finished");
                return Ok(());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("all feed sources stopped");
                return Ok(());
            }
        }

        while let Ok(command) = cmd_rx.try_recv() {
            if !apply_command(tracker, board, command) {
                return Ok(());
            }
        }

        tracker.settle_pending(SystemTime::now());
    }
}

/// Moves the board to a followed destination unless the user picked an airport
/// after the request went out. Declined requests answer `Ok(false)`.
fn apply_switch(tracker: &mut FlightTracker, board: &mut Board, request: SwitchRequest) {
    let SwitchRequest {
        icao,
        generation,
        batch,
        done,
    } = request;
    if generation != board.generation.get() {
        info!("ignoring switch to {icao}, board changed by hand since");
        let _ = done.send(Ok(false));
        return;
    }
    if let Some(tx) = &board.airport_tx {
        if tx.send(icao.clone()).is_err() {
            let _ = done.send(Err(format!("fetcher gone, cannot switch to {icao}")));
            return;
        }
    }
    println!("{} board {} (auto)", Local::now().format("%H:%M:%S"), icao);
    board.airport = icao;
    tracker.on_airport_changed(AirportChangeSource::Auto);
    let _ = done.send(Ok(true));
    if let Some(batch) = batch {
        tracker.process_flight_data(&batch, &board.airport);
    }
}

/// Returns `false` when the runtime should stop.
fn apply_command(tracker: &mut FlightTracker, board: &mut Board, command: Command) -> bool {
    match command {
        Command::Track(callsign) => {
            tracker.toggle_tracking(&FlightRecord::new(&callsign));
        }
        Command::Clear => tracker.clear_tracking(),
        Command::Airport(value) => match normalize_icao(&value) {
            Some(icao) => {
                if let Some(tx) = &board.airport_tx {
                    if tx.send(icao.clone()).is_err() {
                        warn!("fetcher gone, airport change to {icao} ignored");
                        return true;
                    }
                }
                println!("{} board {} (manual)", Local::now().format("%H:%M:%S"), icao);
                board.airport = icao;
                board.generation.set(board.generation.get() + 1);
                tracker.on_airport_changed(AirportChangeSource::Manual);
            }
            None => eprintln!("not an ICAO code: {value}"),
        },
        Command::Status => {
            println!("board {}", board.airport);
            print_view(&tracker.view_state());
        }
        Command::Quit => return false,
    }
    true
}
