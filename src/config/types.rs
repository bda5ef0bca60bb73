use std::collections::{HashMap, HashSet};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::codec::FrameCodec;
use crate::device::constants::{
    COOLDOWN_DELAY, CONNECT_TIMEOUT, JOIN_TIMEOUT, JOYSTICK_CHARACTERISTIC, JOYSTICK_DEVICE_NAME,
    JOYSTICK_SERVICE, LINK_CHECK_INTERVAL, SCAN_RETRY_DELAY, SCAN_TIMEOUT, SUBSCRIBE_TIMEOUT,
    TEARDOWN_TIMEOUT, X_AXIS_CHARACTERISTIC, X_AXIS_DEVICE_NAME, Y_BUTTON_CHARACTERISTIC,
    Y_BUTTON_DEVICE_NAME,
};
use crate::device::session::Subscription;
use crate::device::types::Field;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeripheralConfig {
    pub name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub layout: Vec<Field>,
}

/// Delays and deadlines of the connection state machine, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingConfig {
    pub scan_timeout_ms: u64,
    pub scan_retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub subscribe_timeout_ms: u64,
    pub cooldown_delay_ms: u64,
    pub link_check_interval_ms: u64,
    pub teardown_timeout_ms: u64,
    pub join_timeout_ms: u64,
}

impl TimingConfig {
    pub fn scan_timeout(&self) -> Duration { Duration::from_millis(self.scan_timeout_ms) }
    pub fn scan_retry_delay(&self) -> Duration { Duration::from_millis(self.scan_retry_delay_ms) }
    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn subscribe_timeout(&self) -> Duration { Duration::from_millis(self.subscribe_timeout_ms) }
    pub fn cooldown_delay(&self) -> Duration { Duration::from_millis(self.cooldown_delay_ms) }
    pub fn link_check_interval(&self) -> Duration { Duration::from_millis(self.link_check_interval_ms) }
    pub fn teardown_timeout(&self) -> Duration { Duration::from_millis(self.teardown_timeout_ms) }
    pub fn join_timeout(&self) -> Duration { Duration::from_millis(self.join_timeout_ms) }

    fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            ("scanTimeoutMs", self.scan_timeout_ms),
            ("scanRetryDelayMs", self.scan_retry_delay_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("subscribeTimeoutMs", self.subscribe_timeout_ms),
            ("cooldownDelayMs", self.cooldown_delay_ms),
            ("linkCheckIntervalMs", self.link_check_interval_ms),
            ("teardownTimeoutMs", self.teardown_timeout_ms),
            ("joinTimeoutMs", self.join_timeout_ms),
        ];

        if let Some((name, _)) = values.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid { reason: format!("{} must be greater than zero", name) });
        }

        // unsubscribe, disconnect and stopping the scan each get one teardown timeout
        if self.join_timeout_ms <= 3 * self.teardown_timeout_ms {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "joinTimeoutMs ({}) must be longer than three times teardownTimeoutMs ({})",
                    self.join_timeout_ms,
                    self.teardown_timeout_ms,
                ),
            });
        }

        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            scan_timeout_ms: SCAN_TIMEOUT,
            scan_retry_delay_ms: SCAN_RETRY_DELAY,
            connect_timeout_ms: CONNECT_TIMEOUT,
            subscribe_timeout_ms: SUBSCRIBE_TIMEOUT,
            cooldown_delay_ms: COOLDOWN_DELAY,
            link_check_interval_ms: LINK_CHECK_INTERVAL,
            teardown_timeout_ms: TEARDOWN_TIMEOUT,
            join_timeout_ms: JOIN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// One board reporting both axes and the button
    Joystick,
    /// Two boards: Y axis plus button, and X axis
    PicoPair,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub peripherals: Vec<PeripheralConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl Config {
    pub fn joystick() -> Self {
        Config {
            peripherals: vec![PeripheralConfig {
                name: String::from(JOYSTICK_DEVICE_NAME),
                service_uuid: JOYSTICK_SERVICE,
                characteristic_uuid: JOYSTICK_CHARACTERISTIC,
                layout: vec![Field::AxisX, Field::AxisY, Field::Button],
            }],
            timing: TimingConfig::default(),
        }
    }

    pub fn pico_pair() -> Self {
        Config {
            peripherals: vec![
                PeripheralConfig {
                    name: String::from(Y_BUTTON_DEVICE_NAME),
                    service_uuid: JOYSTICK_SERVICE,
                    characteristic_uuid: Y_BUTTON_CHARACTERISTIC,
                    layout: vec![Field::AxisY, Field::Button],
                },
                PeripheralConfig {
                    name: String::from(X_AXIS_DEVICE_NAME),
                    service_uuid: JOYSTICK_SERVICE,
                    characteristic_uuid: X_AXIS_CHARACTERISTIC,
                    layout: vec![Field::AxisX],
                },
            ],
            timing: TimingConfig::default(),
        }
    }

    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Joystick => Config::joystick(),
            Preset::PicoPair => Config::pico_pair(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peripherals.is_empty() {
            return Err(ConfigError::Invalid { reason: String::from("no peripherals configured") });
        }

        let mut names = HashSet::new();
        let mut owners: HashMap<Field, &str> = HashMap::new();

        for peripheral in &self.peripherals {
            if peripheral.name.is_empty() {
                return Err(ConfigError::Invalid { reason: String::from("peripheral name is empty") });
            }
            if !names.insert(peripheral.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("peripheral {} is configured twice", peripheral.name),
                });
            }

            FrameCodec::new(peripheral.layout.clone())?;

            for field in &peripheral.layout {
                if let Some(owner) = owners.insert(*field, peripheral.name.as_str()) {
                    return Err(ConfigError::Invalid {
                        reason: format!("field {} is reported by both {} and {}", field, owner, peripheral.name),
                    });
                }
            }
        }

        self.timing.validate()
    }

    /// One subscription per peripheral, in configuration order.
    pub fn subscriptions(&self) -> Result<Vec<Subscription<FrameCodec>>, ConfigError> {
        self.validate()?;

        self.peripherals
            .iter()
            .map(|peripheral| Ok(Subscription {
                name: peripheral.name.clone(),
                service: peripheral.service_uuid,
                characteristic: peripheral.characteristic_uuid,
                decoder: FrameCodec::new(peripheral.layout.clone())?,
            }))
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::joystick()
    }
}
