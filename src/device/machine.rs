use log::{debug, info, warn};
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::dispatcher::{self, WritePath};
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{ConnectionStatus, DisconnectReason, PeerId, Trigger, INITIAL_SYNC};

/// Connection lifecycle. Reconnecting only ever happens on a `Trigger`, there is no retry timer.
#[derive(Debug)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
    service_uuid: Uuid,
    write_uuid: Uuid,
    notify_uuid: Uuid,
    // peer of the current attempt; events from any other peer are stale
    peer: Option<PeerId>,
    scanning: bool,
    write_path: Option<WritePath>,
}

impl ConnectionMachine {
    pub fn new(config: &Config) -> Self {
        ConnectionMachine {
            status: ConnectionStatus::Idle,
            service_uuid: config.service_uuid,
            write_uuid: config.write_characteristic_uuid,
            notify_uuid: config.notify_characteristic_uuid,
            peer: None,
            scanning: false,
            write_path: None,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Bound only while `Ready`.
    pub fn write_path(&self) -> Option<&WritePath> {
        match self.status {
            ConnectionStatus::Ready => self.write_path.as_ref(),
            _ => None,
        }
    }

    fn transition(&mut self, next: ConnectionStatus) {
        if self.status != next {
            info!("Connection status: {} -> {}", self.status, next);
            self.status = next;
        }
    }

    fn is_current(&self, peer: &PeerId) -> bool {
        if self.peer.as_ref() == Some(peer) {
            return true;
        }
        debug!("Ignoring event from stale peer {}", peer);
        false
    }

    fn stop_scanning<T: Transport>(&mut self, transport: &mut T) {
        if self.scanning {
            self.scanning = false;
            if let Err(err) = transport.stop_scan() {
                warn!("Failed to stop scanning: {}", err);
            }
        }
    }

    // Drops the current attempt. `hang_up` also tells the transport to drop the link.
    fn abandon<T: Transport>(&mut self, transport: &mut T, hang_up: bool) {
        self.stop_scanning(transport);
        self.write_path = None;

        if let Some(peer) = self.peer.take() {
            if hang_up {
                if let Err(err) = transport.disconnect(&peer) {
                    warn!("Failed to disconnect {}: {}", peer, err);
                }
            }
        }
    }

    fn fail<T: Transport>(&mut self, transport: &mut T, reason: DisconnectReason) {
        warn!("Connection attempt failed: {}", reason);
        self.abandon(transport, true);
        self.transition(ConnectionStatus::Disconnected(reason));
    }

    /// Drops whatever connection exists and goes back to `Idle`.
    pub fn shutdown<T: Transport>(&mut self, transport: &mut T) {
        self.abandon(transport, true);
        self.transition(ConnectionStatus::Idle);
    }

    pub fn trigger<T: Transport>(&mut self, transport: &mut T, trigger: Trigger) {
        match self.status {
            ConnectionStatus::Ready => {
                debug!("Ignoring {:?}, already connected", trigger);
                return;
            },
            ConnectionStatus::Idle | ConnectionStatus::Disconnected(_) => {},
            _ => {
                info!("{:?} while {}; cancelling the attempt in flight", trigger, self.status);
                self.abandon(transport, true);
            },
        }

        if !transport.radio_ready() {
            warn!("Bluetooth is not available or not authorized; waiting for the next trigger");
            self.abandon(transport, false);
            self.transition(ConnectionStatus::Idle);
            return;
        }

        self.transition(ConnectionStatus::Scanning);
        if let Err(err) = transport.retrieve_connected_peers(self.service_uuid) {
            warn!("Failed to query connected peers: {}", err);
            self.start_scan(transport);
        }
    }

    fn start_scan<T: Transport>(&mut self, transport: &mut T) {
        info!("Scanning for totem...");
        match transport.scan(self.service_uuid) {
            Ok(()) => self.scanning = true,
            Err(err) => self.fail(transport, DisconnectReason::ScanFailed(err.to_string())),
        }
    }

    fn connect_to<T: Transport>(&mut self, transport: &mut T, peer: PeerId) {
        self.stop_scanning(transport);
        info!("Connecting to peer {}...", peer);
        self.peer = Some(peer.clone());
        self.transition(ConnectionStatus::Connecting);

        if let Err(err) = transport.connect(&peer) {
            self.peer = None;
            self.fail(transport, DisconnectReason::ConnectFailed(err.to_string()));
        }
    }

    pub fn handle<T: Transport>(&mut self, transport: &mut T, event: &TransportEvent) {
        match event {
            TransportEvent::RadioStateChanged(true) => match self.status {
                ConnectionStatus::Idle | ConnectionStatus::Disconnected(_) => {
                    self.trigger(transport, Trigger::RadioPoweredOn);
                },
                _ => {},
            },
            TransportEvent::RadioStateChanged(false) => {
                warn!("Bluetooth radio went away");
                self.abandon(transport, false);
                self.transition(ConnectionStatus::Idle);
            },
            TransportEvent::ConnectedPeers(peers) => {
                if self.status != ConnectionStatus::Scanning || self.peer.is_some() || self.scanning {
                    debug!("Ignoring late connected peers answer");
                    return;
                }

                match peers.first() {
                    Some(peer) => {
                        info!("Reusing already connected peer {}", peer);
                        self.connect_to(transport, peer.clone());
                    },
                    None => self.start_scan(transport),
                }
            },
            TransportEvent::ScanFailed(reason) => {
                if self.status != ConnectionStatus::Scanning || !self.scanning {
                    debug!("Ignoring scan failure while {}: {}", self.status, reason);
                    return;
                }
                // the scan is already gone, nothing to stop
                self.scanning = false;
                self.fail(transport, DisconnectReason::ScanFailed(reason.clone()));
            },
            TransportEvent::Discovered(peer) => {
                if self.status != ConnectionStatus::Scanning || self.peer.is_some() {
                    debug!("Ignoring discovery of {} while {}", peer, self.status);
                    return;
                }
                // first responder wins
                self.connect_to(transport, peer.clone());
            },
            TransportEvent::Connected(peer) => {
                if !self.is_current(peer) || self.status != ConnectionStatus::Connecting {
                    return;
                }

                info!("Connected; Discovering services...");
                self.transition(ConnectionStatus::DiscoveringServices);
                if let Err(err) = transport.discover_services(peer, self.service_uuid) {
                    self.fail(transport, DisconnectReason::LinkLost(err.to_string()));
                }
            },
            TransportEvent::ConnectFailed(peer, reason) => {
                if !self.is_current(peer) || self.status != ConnectionStatus::Connecting {
                    return;
                }
                self.abandon(transport, false);
                self.transition(ConnectionStatus::Disconnected(DisconnectReason::ConnectFailed(reason.clone())));
            },
            TransportEvent::Disconnected(peer, reason) => {
                if !self.is_current(peer) {
                    return;
                }
                warn!("Connection lost: {}", reason);
                self.abandon(transport, false);
                self.transition(ConnectionStatus::Disconnected(DisconnectReason::LinkLost(reason.clone())));
            },
            TransportEvent::ServicesFound(peer, services) => {
                if !self.is_current(peer) || self.status != ConnectionStatus::DiscoveringServices {
                    return;
                }

                if !services.contains(&self.service_uuid) {
                    self.fail(transport, DisconnectReason::ServiceNotFound);
                    return;
                }
                if let Err(err) = transport.discover_characteristics(peer, self.service_uuid) {
                    self.fail(transport, DisconnectReason::LinkLost(err.to_string()));
                }
            },
            TransportEvent::CharacteristicsFound(peer, service, characteristics) => {
                if !self.is_current(peer)
                    || self.status != ConnectionStatus::DiscoveringServices
                    || *service != self.service_uuid
                    || self.write_path.is_some()
                {
                    return;
                }

                let has_notify = characteristics.contains(&self.notify_uuid);
                let has_write = characteristics.contains(&self.write_uuid);
                if !has_notify || !has_write {
                    self.fail(transport, DisconnectReason::CharacteristicsNotFound);
                    return;
                }

                info!("Subscribing to characteristic {:?} {:?}", service, self.notify_uuid);
                if let Err(err) = transport.subscribe(peer, self.notify_uuid) {
                    self.fail(transport, DisconnectReason::LinkLost(err.to_string()));
                    return;
                }

                // not usable until `write_path()` sees `Ready`
                self.write_path = Some(WritePath { peer: peer.clone(), characteristic: self.write_uuid });
            },
            TransportEvent::Subscribed(peer) => {
                if !self.is_current(peer) || self.status != ConnectionStatus::DiscoveringServices {
                    return;
                }
                let Some(path) = self.write_path.clone() else {
                    debug!("Ignoring subscription of {} before characteristics were found", peer);
                    return;
                };

                // replies to the sync requests only arrive once notifications are on
                self.transition(ConnectionStatus::SyncingInitialState);
                self.sync_initial_state(transport, &path);
                self.transition(ConnectionStatus::Ready);
            },
            TransportEvent::Notification(..) => {},
            TransportEvent::WriteFailed(peer, reason) => {
                warn!("Write to {} failed: {}", peer, reason);
            },
        }
    }

    // Responses are matched by prefix when they arrive, not by request.
    fn sync_initial_state<T: Transport>(&mut self, transport: &mut T, path: &WritePath) {
        for command in INITIAL_SYNC.iter() {
            if let Err(err) = dispatcher::write(transport, path, command) {
                warn!("Failed to request {:?}: {}", command, err);
            }
        }
    }
}
