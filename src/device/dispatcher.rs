use log::{debug, warn};
use uuid::Uuid;

use crate::device::codec::encode;
use crate::device::constants::{DELIMITER, SEPARATOR};
use crate::device::machine::ConnectionMachine;
use crate::device::transport::Transport;
use crate::device::types::{Command, PeerId, ServoId};
use crate::error::DeviceError;

/// Where commands go while a connection is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePath {
    pub peer: PeerId,
    pub characteristic: Uuid,
}

fn invalid(reason: String) -> DeviceError {
    DeviceError::InvalidCommand { reason }
}

fn validate_name(name: &str) -> Result<(), DeviceError> {
    if name.trim().is_empty() {
        return Err(invalid("shader name is empty".to_string()));
    }
    if name.contains(DELIMITER) || name.contains(SEPARATOR) {
        return Err(invalid(format!("shader name {:?} contains '{}' or '{}'", name, DELIMITER, SEPARATOR)));
    }
    Ok(())
}

/// Range checks that do not depend on the connection.
pub fn validate(command: &Command) -> Result<(), DeviceError> {
    match command {
        Command::SetActiveShader(name) | Command::SetActiveAccentShader(name) => validate_name(name),
        Command::SetBrightness(value) => {
            if !(0..=255).contains(value) {
                return Err(invalid(format!("brightness {} is outside 0..255", value)));
            }
            Ok(())
        },
        Command::SetServoSpeed(servo, speed) => {
            if ServoId::try_from(*servo).is_err() {
                return Err(invalid(format!("servo id {} is outside 0..3", servo)));
            }
            if !speed.is_finite() || !(-1.0..=1.0).contains(speed) {
                return Err(invalid(format!("servo speed {} is outside [-1.0, 1.0]", speed)));
            }
            Ok(())
        },
        _ => Ok(()),
    }
}

pub(crate) fn write<T: Transport>(transport: &mut T, path: &WritePath, command: &Command) -> Result<(), DeviceError> {
    let bytes = encode(command);
    debug!("Writing {:?} to {}", String::from_utf8_lossy(&bytes), path.peer);
    transport.write(&path.peer, path.characteristic, bytes)
}

/// Fire and forget: a command that can not be sent right now is dropped, never queued.
pub fn submit<T: Transport>(machine: &ConnectionMachine, transport: &mut T, command: &Command) -> Result<(), DeviceError> {
    if let Err(err) = validate(command) {
        warn!("Rejecting {:?}: {}", command, err);
        return Err(err);
    }

    let path = match machine.write_path() {
        Some(path) => path,
        None => {
            let err = DeviceError::WriteRejected { status: machine.status().clone() };
            warn!("Dropping {:?}: {}", command, err);
            return Err(err);
        },
    };

    write(transport, path, command).map_err(|err| {
        warn!("Failed to write {:?}: {}", command, err);
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Config;
    use crate::device::transport::fake::{Call, FakeTransport};
    use crate::device::transport::TransportEvent;
    use crate::device::types::Trigger;
    use crate::device::constants::{make_totem_notify_uuid, make_totem_service_uuid, make_totem_write_uuid};

    fn ready_machine(transport: &mut FakeTransport) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(&Config::default());
        let peer = PeerId("totem".into());
        machine.trigger(transport, Trigger::Reconnect);
        machine.handle(transport, &TransportEvent::Discovered(peer.clone()));
        machine.handle(transport, &TransportEvent::Connected(peer.clone()));
        machine.handle(transport, &TransportEvent::ServicesFound(peer.clone(), vec![make_totem_service_uuid()]));
        machine.handle(transport, &TransportEvent::CharacteristicsFound(
            peer.clone(),
            make_totem_service_uuid(),
            vec![make_totem_notify_uuid(), make_totem_write_uuid()],
        ));
        machine.handle(transport, &TransportEvent::Subscribed(peer));
        assert!(machine.status().is_ready());
        transport.take_calls();
        machine
    }

    #[test]
    fn validates_ranges() {
        assert!(validate(&Command::SetBrightness(0)).is_ok());
        assert!(validate(&Command::SetBrightness(255)).is_ok());
        assert!(validate(&Command::SetBrightness(300)).is_err());
        assert!(validate(&Command::SetBrightness(-1)).is_err());
        assert!(validate(&Command::SetServoSpeed(3, -1.0)).is_ok());
        assert!(validate(&Command::SetServoSpeed(5, 0.5)).is_err());
        assert!(validate(&Command::SetServoSpeed(1, 1.5)).is_err());
        assert!(validate(&Command::SetServoSpeed(1, f32::NAN)).is_err());
    }

    #[test]
    fn validates_shader_names() {
        assert!(validate(&Command::SetActiveShader("Loopy Rainbow".into())).is_ok());
        assert!(validate(&Command::SetActiveShader("".into())).is_err());
        assert!(validate(&Command::SetActiveShader("a;b".into())).is_err());
        assert!(validate(&Command::SetActiveAccentShader("a:b".into())).is_err());
    }

    #[test]
    fn rejects_while_not_ready() {
        let mut transport = FakeTransport::new();
        let machine = ConnectionMachine::new(&Config::default());

        let result = submit(&machine, &mut transport, &Command::BeatDrop);
        assert!(matches!(result, Err(DeviceError::WriteRejected { .. })));
        assert!(transport.take_calls().is_empty());
    }

    #[test]
    fn invalid_commands_never_reach_the_transport() {
        let mut transport = FakeTransport::new();
        let machine = ready_machine(&mut transport);

        assert!(matches!(
            submit(&machine, &mut transport, &Command::SetBrightness(300)),
            Err(DeviceError::InvalidCommand { .. })
        ));
        assert!(matches!(
            submit(&machine, &mut transport, &Command::SetServoSpeed(5, 0.5)),
            Err(DeviceError::InvalidCommand { .. })
        ));
        assert!(transport.take_calls().is_empty());
    }

    #[test]
    fn writes_once_when_ready() {
        let mut transport = FakeTransport::new();
        let machine = ready_machine(&mut transport);

        submit(&machine, &mut transport, &Command::SetActiveShader("Loopy Rainbow".into())).unwrap();
        assert_eq!(
            transport.take_calls(),
            vec![Call::Write(PeerId("totem".into()), "setActiveShader:Loopy Rainbow".into())]
        );
    }
}
