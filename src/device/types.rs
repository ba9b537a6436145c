use std::fmt;
use serde::Serialize;

use crate::error::DecodeError;

/// Opaque identifier of a peer as handed out by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServoId {
    Master,
    Servo1,
    Servo2,
    Servo3,
}

impl TryFrom<u8> for ServoId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServoId::Master),
            1 => Ok(ServoId::Servo1),
            2 => Ok(ServoId::Servo2),
            3 => Ok(ServoId::Servo3),
            other => Err(other),
        }
    }
}

/// Speeds of the four servo channels, ordered [master, 1, 2, 3]. Each in [-1.0, 1.0].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ServoSpeeds(pub [f32; 4]);

/// Last known state reported by the device.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub shader_names: Vec<String>,
    pub accent_shader_names: Vec<String>,
    pub active_shader: Option<String>,
    pub active_accent_shader: Option<String>,
    pub brightness: u8,
    pub is_animation_active: bool,
    pub servo_speeds: ServoSpeeds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    ConnectFailed(String),
    ServiceNotFound,
    CharacteristicsNotFound,
    ScanFailed(String),
    LinkLost(String),
    Cancelled,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ConnectFailed(reason) => write!(f, "connect failed: {}", reason),
            DisconnectReason::ServiceNotFound => write!(f, "service not found"),
            DisconnectReason::CharacteristicsNotFound => write!(f, "characteristics not found"),
            DisconnectReason::ScanFailed(reason) => write!(f, "scan failed: {}", reason),
            DisconnectReason::LinkLost(reason) => write!(f, "link lost: {}", reason),
            DisconnectReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    SyncingInitialState,
    Ready,
    Disconnected(DisconnectReason),
}

impl ConnectionStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionStatus::Ready)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::Scanning => write!(f, "scanning"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::DiscoveringServices => write!(f, "discovering services"),
            ConnectionStatus::SyncingInitialState => write!(f, "syncing initial state"),
            ConnectionStatus::Ready => write!(f, "ready"),
            ConnectionStatus::Disconnected(reason) => write!(f, "disconnected ({})", reason),
        }
    }
}

/// External reasons to (re)start the connection sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    RadioPoweredOn,
    Reconnect,
    Foregrounded,
}

/// One decoded notification payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    ShaderList(Vec<String>),
    AccentShaderList(Vec<String>),
    ActiveShader(String),
    ActiveAccentShader(String),
    Brightness(u8),
    AnimationState(bool),
    ServoSpeeds(ServoSpeeds),
    Malformed(Vec<u8>, DecodeError),
}

/// Outbound intent. Ranges are checked by the dispatcher, not by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetShaders,
    GetAccentShaders,
    GetActiveShader,
    GetActiveAccentShader,
    GetBrightness,
    GetAnimationState,
    GetServoSpeeds,
    SetActiveShader(String),
    SetActiveAccentShader(String),
    SetBrightness(i32),
    SetServoSpeed(u8, f32),
    ActivateAnimation,
    DeactivateAnimation,
    BeatDrop,
}

/// Queries issued right after a connection is established, in this order.
pub const INITIAL_SYNC: [Command; 7] = [
    Command::GetShaders,
    Command::GetActiveShader,
    Command::GetAccentShaders,
    Command::GetActiveAccentShader,
    Command::GetServoSpeeds,
    Command::GetBrightness,
    Command::GetAnimationState,
];
