use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    make_totem_notify_uuid, make_totem_service_uuid, make_totem_write_uuid, CONNECT_TIMEOUT, WRITE_DEADLINE,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub service_uuid: Uuid,
    pub write_characteristic_uuid: Uuid,
    pub notify_characteristic_uuid: Uuid,
    /// milliseconds
    pub write_deadline_ms: u64,
    /// milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_uuid: make_totem_service_uuid(),
            write_characteristic_uuid: make_totem_write_uuid(),
            notify_characteristic_uuid: make_totem_notify_uuid(),
            write_deadline_ms: WRITE_DEADLINE,
            connect_timeout_ms: CONNECT_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"writeDeadlineMs": 500}"#).unwrap();
        assert_eq!(config.write_deadline_ms, 500);
        assert_eq!(config.service_uuid, make_totem_service_uuid());
        assert_eq!(config.connect_timeout_ms, CONNECT_TIMEOUT);
    }

    #[test]
    fn uses_camel_case_keys() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"notifyCharacteristicUuid\":\"39f10f90-c4ee-d0fc-6dec-cbc5cfff5a9b\""));
    }
}
