use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{normalize_callsign, normalize_icao};
use crate::tracker::TrackerConfig;

pub const DEFAULT_FEED_URL: &str = "http://localhost:5000/api/flights/{airport}";
pub const DEFAULT_AIRPORT: &str = "LSZH";
pub const DEFAULT_REFRESH_SECS: u64 = 15;
pub const DEFAULT_STATE_DIR: &str = ".flightboard";
pub const DEFAULT_STORAGE_KEY: &str = "flightboard.tracked_callsign";
pub const DEFAULT_SWITCH_COOLDOWN_MS: u64 = 6000;
pub const DEFAULT_MANUAL_HOLD_MS: u64 = 15000;
pub const DEFAULT_PENDING_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_API_KEY_HEADER: &str = "api-auth";
pub const DEFAULT_ALLOW_HTTP: bool = true;
pub const DEFAULT_CONFIG_FILE: &str = "flightboard-follow.toml";

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: String,
    pub airport: String,
    pub follow: String,
    pub refresh: Duration,
    pub replay_file: String,
    pub state_dir: String,
    pub storage_key: String,
    pub switch_cooldown_ms: u64,
    pub manual_hold_ms: u64,
    /// Zero disables the timeout.
    pub pending_timeout_ms: u64,
    pub api_key: String,
    pub api_key_header: String,
    pub insecure: bool,
    pub allow_http: bool,
    pub allow_insecure: bool,
    pub config_path: PathBuf,
    pub log_enabled: bool,
    pub log_level: String,
    pub log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_url: DEFAULT_FEED_URL.to_string(),
            airport: DEFAULT_AIRPORT.to_string(),
            follow: String::new(),
            refresh: Duration::from_secs(DEFAULT_REFRESH_SECS),
            replay_file: String::new(),
            state_dir: DEFAULT_STATE_DIR.to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            switch_cooldown_ms: DEFAULT_SWITCH_COOLDOWN_MS,
            manual_hold_ms: DEFAULT_MANUAL_HOLD_MS,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
            api_key: String::new(),
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            insecure: false,
            allow_http: DEFAULT_ALLOW_HTTP,
            allow_insecure: false,
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            log_enabled: false,
            log_level: "info".to_string(),
            log_file: "flightboard-follow.log".to_string(),
        }
    }
}

impl Config {
    pub fn tracker_config(&self) -> TrackerConfig {
        let storage_key = if self.storage_key.trim().is_empty() {
            DEFAULT_STORAGE_KEY.to_string()
        } else {
            self.storage_key.trim().to_string()
        };
        TrackerConfig {
            storage_key,
            switch_cooldown: Duration::from_millis(self.switch_cooldown_ms),
            manual_hold: Duration::from_millis(self.manual_hold_ms),
            pending_timeout: if self.pending_timeout_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(self.pending_timeout_ms))
            },
        }
    }

    pub fn replay_path(&self) -> Option<PathBuf> {
        if self.replay_file.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(self.replay_file.trim()))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    feed_url: Option<String>,
    airport: Option<String>,
    follow: Option<String>,
    refresh_secs: Option<u64>,
    replay_file: Option<String>,
    state_dir: Option<String>,
    storage_key: Option<String>,
    switch_cooldown_ms: Option<u64>,
    manual_hold_ms: Option<u64>,
    pending_timeout_ms: Option<u64>,
    api_key: Option<String>,
    api_key_header: Option<String>,
    insecure: Option<bool>,
    allow_http: Option<bool>,
    allow_insecure: Option<bool>,
    log_enabled: Option<bool>,
    log_level: Option<String>,
    log_file: Option<String>,
}

pub fn parse_args() -> Result<Config> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut explicit_config: Option<PathBuf> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow!("--config needs a value"))?;
            explicit_config = Some(PathBuf::from(value));
        }
    }

    let env_config = env::var("FLIGHTBOARD_CONFIG").ok().map(PathBuf::from);
    let config_path = explicit_config
        .clone()
        .or(env_config)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut config = Config::default();
    if config_path.exists() {
        if let Some(file_config) = load_file_config(&config_path)? {
            apply_file_config(&mut config, file_config);
        }
    } else if explicit_config.is_some() {
        return Err(anyhow!("Config file not found: {}", config_path.display()));
    }
    config.config_path = config_path;

    apply_env(&mut config);
    if apply_cli_args(&mut config, &args)? {
        print_help();
        std::process::exit(0);
    }
    finalize(&mut config)?;
    validate_security(&config)?;
    Ok(config)
}

fn load_file_config(path: &Path) -> Result<Option<FileConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let cfg: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(Some(cfg))
}

fn apply_file_config(target: &mut Config, file: FileConfig) {
    if let Some(feed_url) = file.feed_url {
        target.feed_url = feed_url;
    }
    if let Some(airport) = file.airport {
        target.airport = airport;
    }
    if let Some(follow) = file.follow {
        target.follow = follow;
    }
    if let Some(refresh) = file.refresh_secs {
        target.refresh = Duration::from_secs(refresh);
    }
    if let Some(replay_file) = file.replay_file {
        target.replay_file = replay_file;
    }
    if let Some(state_dir) = file.state_dir {
        target.state_dir = state_dir;
    }
    if let Some(storage_key) = file.storage_key {
        target.storage_key = storage_key;
    }
    if let Some(cooldown) = file.switch_cooldown_ms {
        target.switch_cooldown_ms = cooldown;
    }
    if let Some(hold) = file.manual_hold_ms {
        target.manual_hold_ms = hold;
    }
    if let Some(timeout) = file.pending_timeout_ms {
        target.pending_timeout_ms = timeout;
    }
    if let Some(api_key) = file.api_key {
        target.api_key = api_key;
    }
    if let Some(api_key_header) = file.api_key_header {
        target.api_key_header = api_key_header;
    }
    if let Some(insecure) = file.insecure {
        target.insecure = insecure;
    }
    if let Some(allow_http) = file.allow_http {
        target.allow_http = allow_http;
    }
    if let Some(allow_insecure) = file.allow_insecure {
        target.allow_insecure = allow_insecure;
    }
    if let Some(log_enabled) = file.log_enabled {
        target.log_enabled = log_enabled;
    }
    if let Some(log_level) = file.log_level {
        target.log_level = log_level;
    }
    if let Some(log_file) = file.log_file {
        target.log_file = log_file;
    }
}

fn env_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

fn apply_env(config: &mut Config) {
    if let Ok(value) = env::var("FLIGHTBOARD_FEED_URL") {
        config.feed_url = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_AIRPORT") {
        config.airport = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_FOLLOW") {
        config.follow = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_REFRESH") {
        if let Ok(secs) = value.parse::<u64>() {
            config.refresh = Duration::from_secs(secs);
        }
    }
    if let Ok(value) = env::var("FLIGHTBOARD_REPLAY") {
        config.replay_file = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_STATE_DIR") {
        config.state_dir = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_STORAGE_KEY") {
        config.storage_key = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_SWITCH_COOLDOWN_MS") {
        if let Ok(val) = value.parse::<u64>() {
            config.switch_cooldown_ms = val;
        }
    }
    if let Ok(value) = env::var("FLIGHTBOARD_MANUAL_HOLD_MS") {
        if let Ok(val) = value.parse::<u64>() {
            config.manual_hold_ms = val;
        }
    }
    if let Ok(value) = env::var("FLIGHTBOARD_PENDING_TIMEOUT_MS") {
        if let Ok(val) = value.parse::<u64>() {
            config.pending_timeout_ms = val;
        }
    }
    if let Ok(value) = env::var("FLIGHTBOARD_API_KEY") {
        config.api_key = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_API_KEY_HEADER") {
        config.api_key_header = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_INSECURE") {
        config.insecure = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHTBOARD_ALLOW_HTTP") {
        config.allow_http = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHTBOARD_ALLOW_INSECURE") {
        config.allow_insecure = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHTBOARD_LOG_ENABLED") {
        config.log_enabled = env_flag(&value);
    }
    if let Ok(value) = env::var("FLIGHTBOARD_LOG_LEVEL") {
        config.log_level = value;
    }
    if let Ok(value) = env::var("FLIGHTBOARD_LOG_FILE") {
        config.log_file = value;
    }
}

/// Returns `Ok(true)` when help was requested.
fn apply_cli_args(config: &mut Config, args: &[String]) -> Result<bool> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                iter.next();
            }
            "--feed-url" => {
                config.feed_url = iter
                    .next()
                    .ok_or_else(|| anyhow!("--feed-url needs a value"))?
                    .to_string();
            }
            "--airport" => {
                config.airport = iter
                    .next()
                    .ok_or_else(|| anyhow!("--airport needs a value"))?
                    .to_string();
            }
            "--follow" => {
                config.follow = iter
                    .next()
                    .ok_or_else(|| anyhow!("--follow needs a value"))?
                    .to_string();
            }
            "--refresh" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--refresh needs a value"))?;
                let secs: u64 = value.parse()?;
                config.refresh = Duration::from_secs(secs);
            }
            "--replay" => {
                config.replay_file = iter
                    .next()
                    .ok_or_else(|| anyhow!("--replay needs a value"))?
                    .to_string();
            }
            "--state-dir" => {
                config.state_dir = iter
                    .next()
                    .ok_or_else(|| anyhow!("--state-dir needs a value"))?
                    .to_string();
            }
            "--storage-key" => {
                config.storage_key = iter
                    .next()
                    .ok_or_else(|| anyhow!("--storage-key needs a value"))?
                    .to_string();
            }
            "--cooldown-ms" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--cooldown-ms needs a value"))?;
                config.switch_cooldown_ms = value.parse()?;
            }
            "--manual-hold-ms" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--manual-hold-ms needs a value"))?;
                config.manual_hold_ms = value.parse()?;
            }
            "--pending-timeout-ms" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--pending-timeout-ms needs a value"))?;
                config.pending_timeout_ms = value.parse()?;
            }
            "--api-key" => {
                config.api_key = iter
                    .next()
                    .ok_or_else(|| anyhow!("--api-key needs a value"))?
                    .to_string();
            }
            "--api-key-header" => {
                config.api_key_header = iter
                    .next()
                    .ok_or_else(|| anyhow!("--api-key-header needs a value"))?
                    .to_string();
            }
            "--insecure" => {
                config.insecure = true;
            }
            "--allow-http" => {
                config.allow_http = true;
            }
            "--allow-insecure" => {
                config.allow_insecure = true;
            }
            "--log" => {
                config.log_enabled = true;
            }
            "--no-log" => {
                config.log_enabled = false;
            }
            "--log-level" => {
                config.log_level = iter
                    .next()
                    .ok_or_else(|| anyhow!("--log-level needs a value"))?
                    .to_string();
            }
            "--log-file" => {
                config.log_file = iter
                    .next()
                    .ok_or_else(|| anyhow!("--log-file needs a value"))?
                    .to_string();
            }
            "-h" | "--help" => {
                return Ok(true);
            }
            other => {
                return Err(anyhow!("Unknown argument: {other}"));
            }
        }
    }
    Ok(false)
}

fn finalize(config: &mut Config) -> Result<()> {
    config.airport = normalize_icao(&config.airport)
        .ok_or_else(|| anyhow!("Airport must be a 4-letter ICAO code: {:?}", config.airport))?;
    config.follow = normalize_callsign(&config.follow);
    if config.replay_path().is_none() && !config.feed_url.contains("{airport}") {
        return Err(anyhow!(
            "feed_url must contain an {{airport}} placeholder: {}",
            config.feed_url
        ));
    }
    Ok(())
}

fn print_help() {
    println!("flightboard-follow");
    println!("Usage: flightboard-follow [--feed-url URL] [--airport ICAO] [--follow CALLSIGN]");
    println!("       [--refresh SECONDS] [--replay FILE] [--config PATH]");
    println!("       [--state-dir DIR] [--storage-key KEY]");
    println!("       [--cooldown-ms MS] [--manual-hold-ms MS] [--pending-timeout-ms MS]");
    println!("       [--api-key KEY] [--api-key-header NAME]");
    println!("       [--insecure] [--allow-http] [--allow-insecure]");
    println!("       [--log] [--no-log] [--log-level LEVEL] [--log-file PATH]");
    println!("Environment: FLIGHTBOARD_FEED_URL overrides the feed URL template");
    println!("Environment: FLIGHTBOARD_AIRPORT/FOLLOW set the start airport and flight");
    println!("Environment: FLIGHTBOARD_CONFIG overrides config path");
    println!("Environment: FLIGHTBOARD_REPLAY replays a JSON-lines batch file");
    println!("Environment: FLIGHTBOARD_SWITCH_COOLDOWN_MS/MANUAL_HOLD_MS/PENDING_TIMEOUT_MS tune auto-follow");
    println!("Environment: FLIGHTBOARD_API_KEY/FLIGHTBOARD_API_KEY_HEADER configure API auth header");
    println!("Environment: FLIGHTBOARD_LOG_ENABLED/LEVEL/FILE configure logging");
    println!("Commands: track CALLSIGN | clear | airport ICAO | status | quit");
}

fn validate_security(config: &Config) -> Result<()> {
    if config.replay_path().is_some() {
        return Ok(());
    }
    let trimmed = config.feed_url.trim();
    if trimmed.to_ascii_lowercase().starts_with("http://") && !config.allow_http {
        return Err(anyhow!(
            "Refusing insecure http URL (set allow_http=true or FLIGHTBOARD_ALLOW_HTTP=1 to override)"
        ));
    }
    if config.insecure && !config.allow_insecure {
        return Err(anyhow!(
            "Refusing --insecure without explicit allow_insecure=true or FLIGHTBOARD_ALLOW_INSECURE=1"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        dir.push(format!("flightboard-config-test-{suffix}"));
        let _ = fs::create_dir_all(&dir);
        dir.push(name);
        dir
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn default_allows_http_url() {
        let cfg = Config::default();
        assert!(validate_security(&cfg).is_ok());
    }

    #[test]
    fn http_url_rejected_when_disabled() {
        let mut cfg = Config::default();
        cfg.allow_http = false;
        let err = validate_security(&cfg).unwrap_err();
        assert!(err.to_string().contains("Refusing insecure http URL"));

        cfg.replay_file = "batches.jsonl".to_string();
        assert!(validate_security(&cfg).is_ok());
    }

    #[test]
    fn insecure_needs_explicit_allow() {
        let mut cfg = Config::default();
        cfg.insecure = true;
        assert!(validate_security(&cfg).is_err());
        cfg.allow_insecure = true;
        assert!(validate_security(&cfg).is_ok());
    }

    #[test]
    fn load_file_config_parses_values() {
        let path = temp_file("config.toml");
        let content = r#"
feed_url = "https://board.example/api/flights/{airport}"
airport = "lsgg"
follow = "ezs1527"
refresh_secs = 5
switch_cooldown_ms = 8000
manual_hold_ms = 20000
pending_timeout_ms = 0
api_key = "abc123"
log_enabled = true
log_level = "debug"
"#;
        fs::write(&path, content).unwrap();
        let cfg = load_file_config(&path).unwrap().unwrap();
        assert_eq!(
            cfg.feed_url.as_deref(),
            Some("https://board.example/api/flights/{airport}")
        );
        assert_eq!(cfg.airport.as_deref(), Some("lsgg"));
        assert_eq!(cfg.follow.as_deref(), Some("ezs1527"));
        assert_eq!(cfg.refresh_secs, Some(5));
        assert_eq!(cfg.switch_cooldown_ms, Some(8000));
        assert_eq!(cfg.manual_hold_ms, Some(20000));
        assert_eq!(cfg.pending_timeout_ms, Some(0));
        assert_eq!(cfg.api_key.as_deref(), Some("abc123"));
        assert_eq!(cfg.log_enabled, Some(true));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn file_values_flow_into_tracker_config() {
        let mut cfg = Config::default();
        let file = FileConfig {
            storage_key: Some("  ".to_string()),
            switch_cooldown_ms: Some(1000),
            manual_hold_ms: Some(2000),
            pending_timeout_ms: Some(0),
            ..Default::default()
        };
        apply_file_config(&mut cfg, file);
        let tracker = cfg.tracker_config();
        assert_eq!(tracker.storage_key, DEFAULT_STORAGE_KEY);
        assert_eq!(tracker.switch_cooldown, Duration::from_millis(1000));
        assert_eq!(tracker.manual_hold, Duration::from_millis(2000));
        assert_eq!(tracker.pending_timeout, None);
    }

    #[test]
    fn cli_args_override_and_finalize() {
        let mut cfg = Config::default();
        let help = apply_cli_args(
            &mut cfg,
            &args(&[
                "--config",
                "ignored.toml",
                "--airport",
                " eddf ",
                "--follow",
                " dlh4 ",
                "--cooldown-ms",
                "100",
                "--log",
            ]),
        )
        .unwrap();
        assert!(!help);
        finalize(&mut cfg).unwrap();
        assert_eq!(cfg.airport, "EDDF");
        assert_eq!(cfg.follow, "DLH4");
        assert_eq!(cfg.switch_cooldown_ms, 100);
        assert!(cfg.log_enabled);
    }

    #[test]
    fn cli_rejects_bad_input() {
        let mut cfg = Config::default();
        assert!(apply_cli_args(&mut cfg, &args(&["--bogus"])).is_err());
        assert!(apply_cli_args(&mut cfg, &args(&["--airport"])).is_err());
        assert!(apply_cli_args(&mut cfg, &args(&["--help"])).unwrap());

        cfg.airport = "ZRH".to_string();
        assert!(finalize(&mut cfg).is_err());

        let mut cfg = Config::default();
        cfg.feed_url = "http://board.local/flights".to_string();
        assert!(finalize(&mut cfg).is_err());
    }
}
