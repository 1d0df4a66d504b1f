use anyhow::{Context, Result};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::model::FlightBatch;
use crate::switch::SwitchOutcome;
use tracing::{debug, error, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the runtime hears from background threads.
#[derive(Debug)]
pub enum FeedEvent {
    /// `airport` is the board the batch was fetched for; replays leave it unset.
    Batch {
        airport: Option<String>,
        batch: FlightBatch,
    },
    Error(String),
    /// An auto-follow destination is ready; the runtime decides whether to take it.
    SwitchReady(SwitchRequest),
    Finished,
}

/// One auto-follow switch waiting for the runtime to apply or decline it.
#[derive(Debug)]
pub struct SwitchRequest {
    pub icao: String,
    /// Board generation when the engine asked; a manual change bumps it.
    pub generation: u64,
    /// First board for `icao`, when the probe already fetched one.
    pub batch: Option<FlightBatch>,
    pub done: Sender<Result<bool, String>>,
}

#[derive(Clone, Debug)]
pub struct FeedClient {
    client: reqwest::blocking::Client,
    url_template: String,
    api_key: Option<String>,
    api_key_header: Option<String>,
}

#[derive(Debug)]
pub enum FetchResult {
    Ok(FlightBatch),
    Err {
        message: String,
        retry_after: Option<Duration>,
    },
}

impl FeedClient {
    pub fn new(
        url_template: &str,
        insecure: bool,
        api_key: Option<String>,
        api_key_header: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build feed client")?;
        Ok(Self {
            client,
            url_template: url_template.trim().to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_key_header: api_key_header.filter(|h| !h.trim().is_empty()),
        })
    }

    pub fn url_for(&self, airport: &str) -> String {
        feed_url(&self.url_template, airport)
    }

    pub fn fetch(&self, airport: &str) -> FetchResult {
        let url = self.url_for(airport);
        let mut req = self.client.get(&url);
        if let (Some(key), Some(header)) = (&self.api_key, &self.api_key_header) {
            req = req.header(header.as_str(), key.as_str());
        }
        let resp = match req.send() {
            Ok(resp) => resp,
            Err(err) => {
                return FetchResult::Err {
                    message: err.to_string(),
                    retry_after: None,
                }
            }
        };

        let status = resp.status();
        if !status.is_success() {
            return FetchResult::Err {
                message: format!("HTTP {status} from {url}"),
                retry_after: retry_after_header(resp.headers()),
            };
        }

        match resp.json::<FlightBatch>() {
            Ok(batch) => FetchResult::Ok(batch),
            Err(err) => FetchResult::Err {
                message: err.to_string(),
                retry_after: None,
            },
        }
    }
}

pub fn feed_url(template: &str, airport: &str) -> String {
    template.replace("{airport}", airport)
}

/// Polls the feed for the current airport until the event receiver goes away.
///
/// A new airport arriving on `airport_rx` interrupts the wait and is fetched
/// right away with a clean backoff.
pub fn spawn_fetcher(
    feed: FeedClient,
    airport: String,
    refresh: Duration,
    airport_rx: Receiver<String>,
    tx: Sender<FeedEvent>,
) {
    thread::spawn(move || {
        info!("fetcher started for {airport}");
        let refresh = if refresh.is_zero() {
            Duration::from_millis(200)
        } else {
            refresh
        };
        let mut airport = airport;
        let mut attempts = 0u32;

        loop {
            let wait = match feed.fetch(&airport) {
                FetchResult::Ok(batch) => {
                    attempts = 0;
                    debug!(
                        "{airport}: {} departures, {} arrivals",
                        batch.departures.len(),
                        batch.arrivals.len()
                    );
                    let event = FeedEvent::Batch {
                        airport: Some(airport.clone()),
                        batch,
                    };
                    if tx.send(event).is_err() {
                        debug!("receiver dropped, exiting fetcher");
                        break;
                    }
                    refresh
                }
                FetchResult::Err {
                    message,
                    retry_after,
                } => {
                    attempts = attempts.saturating_add(1);
                    let backoff = retry_after.unwrap_or_else(|| backoff_duration(attempts));
                    warn!("feed error for {airport}: {message} (retry in {backoff:?})");
                    if tx.send(FeedEvent::Error(message)).is_err() {
                        debug!("receiver dropped, exiting fetcher");
                        break;
                    }
                    backoff.max(refresh)
                }
            };

            match airport_rx.recv_timeout(wait) {
                Ok(next) => {
                    let next = airport_rx.try_iter().last().unwrap_or(next);
                    info!("fetcher retargeted {airport} -> {next}");
                    airport = next;
                    attempts = 0;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("airport channel closed, exiting fetcher");
                    break;
                }
            }
        }
    });
}

/// The live switch primitive: checks that `icao` has a board, then hands the
/// request to the runtime. Answers through the returned pending outcome.
pub fn spawn_airport_probe(
    feed: FeedClient,
    icao: String,
    generation: u64,
    events: Sender<FeedEvent>,
) -> SwitchOutcome {
    let (done, outcome) = SwitchOutcome::pending();
    thread::spawn(move || match feed.fetch(&icao) {
        FetchResult::Ok(batch) => {
            let request = SwitchRequest {
                icao: icao.clone(),
                generation,
                batch: Some(batch),
                done,
            };
            if events.send(FeedEvent::SwitchReady(request)).is_err() {
                error!("runtime gone, cannot switch to {icao}");
            }
        }
        FetchResult::Err { message, .. } => {
            let _ = done.send(Err(message));
        }
    });
    outcome
}

fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after_value)
}

fn parse_retry_after_value(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn backoff_duration(attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::from_secs(0);
    }
    let shift = attempts.saturating_sub(1).min(6);
    let base_secs = 1u64 << shift; // 1,2,4,...,64
    let jitter_ms = (u64::from(attempts) * 173) % 1000;
    Duration::from_secs(base_secs.min(60)).saturating_add(Duration::from_millis(jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::{backoff_duration, feed_url, parse_retry_after_value};
    use std::time::Duration;

    #[test]
    fn feed_url_substitutes_airport() {
        assert_eq!(
            feed_url("http://board.local/api/flights/{airport}", "LSGG"),
            "http://board.local/api/flights/LSGG"
        );
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_duration(0), Duration::ZERO);
        assert_eq!(backoff_duration(1), Duration::from_millis(1173));
        assert!(backoff_duration(3) > backoff_duration(2));
        assert!(backoff_duration(40) <= Duration::from_secs(61));
    }

    #[test]
    fn retry_after_seconds_only() {
        assert_eq!(parse_retry_after_value(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_retry_after_value("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
