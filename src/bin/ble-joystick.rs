use std::path::PathBuf;
use clap::Parser;
use log::{info, LevelFilter};
use ble_joystick::{init_logging, load_config, run};
use ble_joystick::config::types::{Config, Preset};
use ble_joystick::error::{AppRunError, ConfigError};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Keeps a connection to BLE joystick peripherals and prints their state.\n\nExample: ./target/release/ble-joystick --preset pico-pair --duration 30s", long_about = None)]
struct Args {
    /// Read the peripheral and timing configuration from this JSON file
    #[arg(long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Use a built-in peripheral configuration instead of a config file
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// How often the state is polled, like a game loop would
    #[arg(long, default_value = "16ms")]
    poll_interval: humantime::Duration,

    /// Stop after this long. Runs until killed if omitted.
    #[arg(long)]
    duration: Option<humantime::Duration>,

    /// Print the built-in configuration of the selected preset as JSON and exit
    #[arg(long)]
    print_default_config: bool,

    /// Log debug output of the connection state machine
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<(), AppRunError> {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })?;
    info!(concat!("BLE Joystick ", env!("CARGO_PKG_VERSION")));

    if args.print_default_config {
        let config = Config::preset(args.preset.unwrap_or(Preset::Joystick));
        let content = serde_json::to_string_pretty(&config).map_err(ConfigError::from)?;
        println!("{}", content);
        return Ok(());
    }

    let config = load_config(args.config, args.preset)?;
    run(config, args.poll_interval.into(), args.duration.map(Into::into))
}
