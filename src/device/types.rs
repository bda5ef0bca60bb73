use std::fmt;
use serde::{Deserialize, Serialize};

/// Index of a peripheral in configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(pub usize);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    AxisX,
    AxisY,
    Button,
}

impl Field {
    /// Width on the wire, in bytes.
    pub fn width(&self) -> usize {
        match self {
            Field::AxisX | Field::AxisY => 2,
            Field::Button => 1,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Field::AxisX => "AxisX",
            Field::AxisY => "AxisY",
            Field::Button => "Button",
        };

        write!(f, "{}", result)
    }
}

/// The values carried by one decoded frame. Fields the layout does not
/// contain are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fields {
    pub axis_x: Option<u16>,
    pub axis_y: Option<u16>,
    pub button: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub axis_x: u16,
    pub axis_y: u16,
    pub button: u8,
}

impl Telemetry {
    // the firmware pulls the button line low while it is held
    pub fn button_pressed(&self) -> bool {
        self.button == 0
    }

    pub fn apply(&mut self, fields: &Fields) {
        if let Some(value) = fields.axis_x {
            self.axis_x = value;
        }
        if let Some(value) = fields.axis_y {
            self.axis_y = value;
        }
        if let Some(value) = fields.button {
            self.button = value;
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Telemetry {
            axis_x: crate::device::constants::AXIS_CENTER,
            axis_y: crate::device::constants::AXIS_CENTER,
            button: crate::device::constants::BUTTON_RELEASED,
        }
    }
}

/// Latest known values of one peripheral, as handed to the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub telemetry: Telemetry,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Scanning,
    Connecting,
    Subscribing,
    Subscribed,
    Cooldown,
    Stopping,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SessionPhase::Scanning => "scanning",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Subscribing => "subscribing",
            SessionPhase::Subscribed => "subscribed",
            SessionPhase::Cooldown => "cooling down",
            SessionPhase::Stopping => "stopping",
        };

        write!(f, "{}", result)
    }
}

/// Diagnostics about a session. Kept apart from the `Snapshot` so that
/// recording a dropped frame does not touch the consumer-visible values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub connect_attempts: u64,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus {
            phase: SessionPhase::Scanning,
            frames_decoded: 0,
            frames_dropped: 0,
            connect_attempts: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    StateChange {
        peripheral: PeripheralId,
        from: SessionPhase,
        to: SessionPhase,
    },
    FrameDropped {
        peripheral: PeripheralId,
        len: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralState {
    pub name: String,
    pub connected: bool,
}

/// Merged view over all peripherals, returned by `Controller::get_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerState {
    pub axis_x: u16,
    pub axis_y: u16,
    pub button: u8,
    pub button_pressed: bool,
    pub peripherals: Vec<PeripheralState>,
}
