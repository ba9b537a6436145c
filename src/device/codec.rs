//! Text wire format spoken with the totem.
//!
//! Outbound: `verb`, `verb:arg` or `verb:arg;arg2`. Inbound: `prefix:payload`.
//! Nothing is escaped, a `;` or `:` inside a shader name can not be represented.

use std::str;

use crate::device::constants::*;
use crate::device::types::{Command, DeviceEvent, ServoSpeeds};
use crate::error::DecodeError;

pub fn encode(command: &Command) -> Vec<u8> {
    let text = match command {
        Command::GetShaders => VERB_GET_SHADERS.to_string(),
        Command::GetAccentShaders => VERB_GET_ACCENT_SHADERS.to_string(),
        Command::GetActiveShader => VERB_GET_ACTIVE_SHADER.to_string(),
        Command::GetActiveAccentShader => VERB_GET_ACTIVE_ACCENT_SHADER.to_string(),
        Command::GetBrightness => VERB_GET_BRIGHTNESS.to_string(),
        Command::GetAnimationState => VERB_GET_ANIMATION_STATE.to_string(),
        Command::GetServoSpeeds => VERB_GET_SERVO_SPEEDS.to_string(),
        Command::SetActiveShader(name) => format!("{}{}{}", VERB_SET_ACTIVE_SHADER, DELIMITER, name),
        Command::SetActiveAccentShader(name) => format!("{}{}{}", VERB_SET_ACTIVE_ACCENT_SHADER, DELIMITER, name),
        Command::SetBrightness(value) => format!("{}{}{}", VERB_SET_BRIGHTNESS, DELIMITER, value),
        Command::SetServoSpeed(servo, speed) => format!(
            "{}{}{}{}{:.*}",
            VERB_SET_SERVO_SPEED, DELIMITER, servo, SEPARATOR, SPEED_DECIMALS, speed
        ),
        Command::ActivateAnimation => VERB_ACTIVATE_ANIMATION.to_string(),
        Command::DeactivateAnimation => VERB_DEACTIVATE_ANIMATION.to_string(),
        Command::BeatDrop => VERB_BEAT_DROP.to_string(),
    };

    text.into_bytes()
}

/// Decode one notification. Never fails: bad payloads become `DeviceEvent::Malformed`.
pub fn decode(payload: &[u8]) -> DeviceEvent {
    match decode_text(payload) {
        Ok(event) => event,
        Err(reason) => DeviceEvent::Malformed(payload.to_vec(), reason),
    }
}

fn decode_text(payload: &[u8]) -> Result<DeviceEvent, DecodeError> {
    let text = str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    let (prefix, rest) = text.split_once(DELIMITER).ok_or(DecodeError::MissingDelimiter)?;

    match prefix {
        PREFIX_SHADERS => Ok(DeviceEvent::ShaderList(split_list(rest))),
        PREFIX_ACCENT_SHADERS => Ok(DeviceEvent::AccentShaderList(split_list(rest))),
        PREFIX_ACTIVE_SHADER => parse_name(prefix, rest).map(DeviceEvent::ActiveShader),
        PREFIX_ACTIVE_ACCENT_SHADER => parse_name(prefix, rest).map(DeviceEvent::ActiveAccentShader),
        PREFIX_BRIGHTNESS => {
            let value = rest.trim();
            value.parse::<u8>()
                .map(DeviceEvent::Brightness)
                .map_err(|_| DecodeError::InvalidInteger { value: value.to_string() })
        },
        PREFIX_ANIMATION_STATE => parse_bool(rest.trim()).map(DeviceEvent::AnimationState),
        PREFIX_SERVO_SPEEDS => parse_speeds(rest).map(DeviceEvent::ServoSpeeds),
        other => Err(DecodeError::UnknownPrefix { prefix: other.to_string() }),
    }
}

// empty entries from a trailing or doubled separator are dropped
fn split_list(rest: &str) -> Vec<String> {
    rest.split(SEPARATOR)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_name(prefix: &str, rest: &str) -> Result<String, DecodeError> {
    let name = rest.trim();
    if name.is_empty() {
        return Err(DecodeError::EmptyName { prefix: prefix.to_string() });
    }
    Ok(name.to_string())
}

fn parse_bool(value: &str) -> Result<bool, DecodeError> {
    if value.eq_ignore_ascii_case("true") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("false") || value == "0" {
        Ok(false)
    } else {
        Err(DecodeError::InvalidBool { value: value.to_string() })
    }
}

fn parse_speeds(rest: &str) -> Result<ServoSpeeds, DecodeError> {
    let parts: Vec<&str> = rest.split(SEPARATOR).map(str::trim).collect();
    if parts.len() != 4 {
        return Err(DecodeError::WrongServoCount { count: parts.len() });
    }

    let mut speeds = [0.0_f32; 4];
    for (slot, part) in speeds.iter_mut().zip(parts) {
        let value = part.parse::<f32>()
            .map_err(|_| DecodeError::InvalidFloat { value: part.to_string() })?;

        if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
            return Err(DecodeError::SpeedOutOfRange { value: part.to_string() });
        }
        *slot = value;
    }

    Ok(ServoSpeeds(speeds))
}
