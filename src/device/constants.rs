use uuid::Uuid;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) the command line waits for the engine to become ready.
 */
pub const CONNECT_TIMEOUT: u64 = 15000;

/**
 * The UUID of the Bluetooth BLE service exposed by the totem
 */
pub const TOTEM_SERVICE: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic to send commands to.
 */
pub const TOTEM_WRITE_CHARACTERISTIC: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic the totem pushes state on.
 */
pub const TOTEM_NOTIFY_CHARACTERISTIC: &str = "39f10f90-c4ee-d0fc-6dec-cbc5cfff5a9b";

// outbound verbs
pub const VERB_GET_SHADERS: &str = "getShaders";
pub const VERB_GET_ACCENT_SHADERS: &str = "getAccentShaders";
pub const VERB_GET_ACTIVE_SHADER: &str = "getActiveShader";
pub const VERB_GET_ACTIVE_ACCENT_SHADER: &str = "getActiveAccentShader";
pub const VERB_GET_SERVO_SPEEDS: &str = "getServoSpeeds";
pub const VERB_GET_BRIGHTNESS: &str = "getBrightness";
pub const VERB_GET_ANIMATION_STATE: &str = "getIsAnimationActive";
pub const VERB_SET_ACTIVE_SHADER: &str = "setActiveShader";
pub const VERB_SET_ACTIVE_ACCENT_SHADER: &str = "setActiveAccentShader";
pub const VERB_SET_SERVO_SPEED: &str = "setServoSpeed";
pub const VERB_SET_BRIGHTNESS: &str = "setBrightness";
pub const VERB_ACTIVATE_ANIMATION: &str = "activateAnimation";
pub const VERB_DEACTIVATE_ANIMATION: &str = "deactivateAnimation";
pub const VERB_BEAT_DROP: &str = "beatDrop";

// inbound notification prefixes, without the ':' delimiter
pub const PREFIX_SHADERS: &str = "shaders";
pub const PREFIX_ACCENT_SHADERS: &str = "accentShaders";
pub const PREFIX_ACTIVE_SHADER: &str = "activeShader";
pub const PREFIX_ACTIVE_ACCENT_SHADER: &str = "activeAccentShader";
pub const PREFIX_BRIGHTNESS: &str = "brightness";
pub const PREFIX_ANIMATION_STATE: &str = "animationState";
pub const PREFIX_SERVO_SPEEDS: &str = "servoSpeeds";

pub const DELIMITER: char = ':';
pub const SEPARATOR: char = ';';

/**
 * Number of decimals used when sending a servo speed.
 */
pub const SPEED_DECIMALS: usize = 2;

pub fn make_totem_service_uuid() -> Uuid {
    Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b)
}

pub fn make_totem_write_uuid() -> Uuid {
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8)
}

pub fn make_totem_notify_uuid() -> Uuid {
    Uuid::from_u128(0x39f10f90_c4ee_d0fc_6dec_cbc5cfff5a9b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_constants_match_strings() {
        assert_eq!(make_totem_service_uuid().to_string(), TOTEM_SERVICE);
        assert_eq!(make_totem_write_uuid().to_string(), TOTEM_WRITE_CHARACTERISTIC);
        assert_eq!(make_totem_notify_uuid().to_string(), TOTEM_NOTIFY_CHARACTERISTIC);
    }
}
