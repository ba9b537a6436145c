use std::path::PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

use crate::device::types::Command as DeviceCommand;

#[derive(Debug, Parser)]
#[command(name = "gyroled-remote", version, about = "Control a gyroled totem over bluetooth")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Seconds to wait for the totem to become ready (overrides the config file)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Action {
    /// Connect, sync and print the totem state as JSON
    Status,
    /// Print every state change until interrupted
    Watch,
    /// Select the active shader
    Shader { name: String },
    /// Select the active accent shader
    Accent { name: String },
    /// Set the brightness (0-255)
    Brightness { value: i32 },
    /// Set a servo speed; servo 0 is the master multiplier
    Servo {
        id: u8,
        #[arg(allow_negative_numbers = true)]
        speed: f32,
    },
    /// Turn the animation on or off
    Animation { state: Toggle },
    /// Trigger a beat drop
    BeatDrop,
}

impl Action {
    /// The command to send, `None` for read-only actions.
    pub fn command(&self) -> Option<DeviceCommand> {
        match self {
            Action::Status | Action::Watch => None,
            Action::Shader { name } => Some(DeviceCommand::SetActiveShader(name.clone())),
            Action::Accent { name } => Some(DeviceCommand::SetActiveAccentShader(name.clone())),
            Action::Brightness { value } => Some(DeviceCommand::SetBrightness(*value)),
            Action::Servo { id, speed } => Some(DeviceCommand::SetServoSpeed(*id, *speed)),
            Action::Animation { state: Toggle::On } => Some(DeviceCommand::ActivateAnimation),
            Action::Animation { state: Toggle::Off } => Some(DeviceCommand::DeactivateAnimation),
            Action::BeatDrop => Some(DeviceCommand::BeatDrop),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_servo_with_negative_speed() {
        let cli = Cli::parse_from(["gyroled-remote", "servo", "2", "-0.5"]);
        assert_eq!(cli.action.command(), Some(DeviceCommand::SetServoSpeed(2, -0.5)));
    }

    #[test]
    fn parses_animation_toggle() {
        let cli = Cli::parse_from(["gyroled-remote", "--verbose", "animation", "off"]);
        assert!(cli.verbose);
        assert_eq!(cli.action.command(), Some(DeviceCommand::DeactivateAnimation));
    }

    #[test]
    fn status_sends_nothing() {
        let cli = Cli::parse_from(["gyroled-remote", "status"]);
        assert_eq!(cli.action.command(), None);
    }
}
