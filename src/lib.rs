use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use log::{info, LevelFilter};

use crate::config::io::ConfigIO;
use crate::config::types::{Config, Preset};
use crate::device::controller::Controller;
use crate::device::types::ControllerState;
use crate::error::AppRunError;

pub mod config;
pub mod device;
pub mod error;

/// Logs to stderr, and also to the file named by `LOG_FILE` if set. Records of other crates are
/// only shown from `Warn` up.
pub fn init_logging(level: LevelFilter) -> Result<(), fern::InitError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Warn)
        .level_for("ble_joystick", level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(fern::log_file(log_file)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// A preset wins over the config file; without either the config file is looked up on disk.
pub fn load_config(path: Option<PathBuf>, preset: Option<Preset>) -> Result<Config, AppRunError> {
    if let (None, Some(preset)) = (&path, preset) {
        return Ok(Config::preset(preset));
    }

    Ok(ConfigIO::new(path)?.read()?)
}

fn describe(state: &ControllerState) -> String {
    let peripherals: Vec<String> = state.peripherals
        .iter()
        .map(|peripheral| format!("{}={}", peripheral.name, if peripheral.connected { "up" } else { "down" }))
        .collect();

    format!(
        "x={} y={} button={}{} [{}]",
        state.axis_x,
        state.axis_y,
        state.button,
        if state.button_pressed { " (pressed)" } else { "" },
        peripherals.join(" "),
    )
}

/// Polls the controller like a game loop would, logging every change, until `duration` has passed.
pub fn run(config: Config, poll_interval: Duration, duration: Option<Duration>) -> Result<(), AppRunError> {
    let mut controller = Controller::new(config)?;
    controller.start()?;

    let started = Instant::now();
    let mut last: Option<ControllerState> = None;

    while duration.map_or(true, |duration| started.elapsed() < duration) {
        let state = controller.get_state();
        if last.as_ref() != Some(&state) {
            info!("{}", describe(&state));
            last = Some(state);
        }

        thread::sleep(poll_interval);
    }

    controller.stop();
    Ok(())
}
