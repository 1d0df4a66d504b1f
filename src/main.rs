use anyhow::Result;
use tracing::{debug, info, warn};

use flightboard_follow::config::parse_args;
use flightboard_follow::logging::init as init_logging;
use flightboard_follow::runtime::run;

fn main() -> Result<()> {
    let config = parse_args()?;
    let _log_guard = init_logging(&config);
    info!("flightboard-follow starting");
    debug!("config path: {}", config.config_path.display());

    if let Err(err) = run(&config) {
        warn!("runtime error: {err:#}");
        eprintln!("{err:#}");
    }

    info!("flightboard-follow exited");
    Ok(())
}
