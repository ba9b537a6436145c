use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::transport::{Transport, TransportEvent, TransportEventSender};
use crate::device::types::PeerId;
use crate::error::DeviceError;

type Peripherals = Arc<Mutex<HashMap<PeerId, Peripheral>>>;

fn peer_id(id: &PeripheralId) -> PeerId {
    PeerId(format!("{:?}", id))
}

fn emit(events: &TransportEventSender, event: TransportEvent) {
    if let Err(err) = events.unbounded_send(event) {
        debug!("Engine is gone, dropping transport event: {}", err);
    }
}

fn register(peripherals: &Peripherals, peripheral: &Peripheral) -> PeerId {
    let peer = peer_id(&peripheral.id());
    let mut map = match peripherals.lock() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.insert(peer.clone(), peripheral.clone());
    peer
}

async fn advertises_service(peripheral: &Peripheral, service: Uuid) -> bool {
    if peripheral.services().iter().any(|s| s.uuid == service) {
        return true;
    }

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            false
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            false
        },
        // Some environments ignore the scan filter, so make sure to check the service uuid again
        Ok(Some(properties)) => {
            if properties.services.contains(&service) {
                info!(
                    "Found peripheral {} {:?} {}",
                    properties.address,
                    properties.address_type,
                    properties.local_name.unwrap_or(String::from("NONE")),
                );
                return true;
            }
            false
        },
    }
}

async fn find_peripheral(adapter: &Adapter, service: Uuid, connected_only: bool) -> Vec<Peripheral> {
    let peripherals = match adapter.peripherals().await {
        Ok(v) => v,
        Err(err) => {
            warn!("Failed to query BLE adapter for peripherals: {}", err);
            return Vec::new();
        },
    };

    let mut found = Vec::new();
    for peripheral in peripherals {
        if connected_only && !peripheral.is_connected().await.unwrap_or(false) {
            continue;
        }
        if advertises_service(&peripheral, service).await {
            found.push(peripheral);
        }
    }
    found
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .ok_or(DeviceError::MissingCharacteristic)
}

/// `Transport` on top of the desktop BLE stacks supported by btleplug.
pub struct BtleTransport {
    adapter: Option<Adapter>,
    // cleared once the OS refuses us the radio
    authorized: Arc<AtomicBool>,
    events: TransportEventSender,
    peripherals: Peripherals,
    write_deadline: Duration,
    cancel: CancellationToken,
    // one token per link; cancelling it stops the writer and notification tasks of that link
    links: HashMap<PeerId, CancellationToken>,
    writers: HashMap<PeerId, UnboundedSender<(Characteristic, Vec<u8>)>>,
}

impl BtleTransport {
    pub async fn new(config: &Config, events: TransportEventSender, cancel: CancellationToken) -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapters = match manager.adapters().await {
            Ok(adapters) => adapters,
            Err(btleplug::Error::PermissionDenied) => {
                warn!("No permission to use bluetooth");
                Vec::new()
            },
            Err(err) => return Err(err.into()),
        };

        let adapter = adapters.into_iter().next();
        let peripherals: Peripherals = Arc::new(Mutex::new(HashMap::new()));

        match &adapter {
            Some(adapter) => {
                info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
                central_events_task(adapter.clone(), config.service_uuid, peripherals.clone(), events.clone(), cancel.clone()).await?;
            },
            None => warn!("No bluetooth adapter found"),
        }

        Ok(BtleTransport {
            adapter,
            authorized: Arc::new(AtomicBool::new(true)),
            events,
            peripherals,
            write_deadline: Duration::from_millis(config.write_deadline_ms),
            cancel,
            links: HashMap::new(),
            writers: HashMap::new(),
        })
    }

    fn adapter(&self) -> Result<Adapter, DeviceError> {
        self.adapter.clone().ok_or(DeviceError::TransportUnavailable)
    }

    fn lookup(&self, peer: &PeerId) -> Result<Peripheral, DeviceError> {
        let map = match self.peripherals.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(peer).cloned().ok_or_else(|| DeviceError::DiscoveryFailure {
            what: format!("unknown peer {}", peer),
        })
    }

    fn link(&mut self, peer: &PeerId) -> CancellationToken {
        self.links.entry(peer.clone())
            .or_insert_with(|| self.cancel.child_token())
            .clone()
    }

    fn drop_link(&mut self, peer: &PeerId) {
        self.writers.remove(peer);
        if let Some(link) = self.links.remove(peer) {
            link.cancel();
        }
    }

    fn writer(&mut self, peer: &PeerId, peripheral: Peripheral) -> UnboundedSender<(Characteristic, Vec<u8>)> {
        if let Some(writer) = self.writers.get(peer) {
            if !writer.is_closed() {
                return writer.clone();
            }
        }

        let writer = write_task(
            self.link(peer),
            peer.clone(),
            peripheral,
            self.write_deadline,
            self.events.clone(),
        );
        self.writers.insert(peer.clone(), writer.clone());
        writer
    }
}

async fn central_events_task(
    adapter: Adapter,
    service: Uuid,
    peripherals: Peripherals,
    events: TransportEventSender,
    cancel: CancellationToken,
) -> Result<(), DeviceError> {
    let mut central_events = adapter.events().await?;

    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = central_events.next() => match event {
                    None => break 'mainloop,
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::ServicesAdvertisement { id, .. }) => {
                        let peripheral = match adapter.peripheral(&id).await {
                            Ok(peripheral) => peripheral,
                            Err(err) => {
                                debug!("Discovered peripheral vanished: {}", err);
                                continue;
                            },
                        };
                        if advertises_service(&peripheral, service).await {
                            let peer = register(&peripherals, &peripheral);
                            emit(&events, TransportEvent::Discovered(peer));
                        }
                    },
                    Some(CentralEvent::DeviceDisconnected(id)) => {
                        emit(&events, TransportEvent::Disconnected(peer_id(&id), "disconnected by the peripheral".to_string()));
                    },
                    Some(_) => {},
                },
            }
        }
        debug!("Central event task stopped");
    });

    Ok(())
}

fn write_task(
    cancel: CancellationToken,
    peer: PeerId,
    peripheral: Peripheral,
    deadline: Duration,
    events: TransportEventSender,
) -> UnboundedSender<(Characteristic, Vec<u8>)> {
    let (tx, mut rx) = unbounded::<(Characteristic, Vec<u8>)>();

    // a single task per link keeps the writes in submission order
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = rx.next() => {
                    let Some((characteristic, bytes)) = next else { break 'mainloop };
                    let fut = peripheral.write(&characteristic, &bytes, WriteType::WithResponse);

                    tokio::select! {
                        _ = sleep(deadline) => {
                            warn!("Sending to write characteristic took too long");
                            emit(&events, TransportEvent::WriteFailed(peer.clone(), "deadline exceeded".to_string()));
                        }
                        result = fut => {
                            if let Err(err) = result {
                                emit(&events, TransportEvent::WriteFailed(peer.clone(), err.to_string()));
                            }
                        }
                    };
                },
            }
        }
    });

    tx
}

fn read_notifications_task(
    cancel: CancellationToken,
    peer: PeerId,
    peripheral: Peripheral,
    characteristic: Characteristic,
    events: TransportEventSender,
) {
    spawn(async move {
        let mut notification_stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(err) => {
                emit(&events, TransportEvent::Disconnected(peer, format!("notifications unavailable: {}", err)));
                return;
            },
        };

        if let Err(err) = peripheral.subscribe(&characteristic).await {
            emit(&events, TransportEvent::Disconnected(peer, format!("subscribe failed: {}", err)));
            return;
        }
        emit(&events, TransportEvent::Subscribed(peer.clone()));

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    None => break 'mainloop,
                    Some(data) => {
                        if data.uuid == characteristic.uuid {
                            emit(&events, TransportEvent::Notification(peer.clone(), data.value));
                        }
                    },
                },
            }
        }
        debug!("Read notifications task for {} stopped", peer);
    });
}

impl Transport for BtleTransport {
    // btleplug 0.11.1 does not report the power state; a powered off radio shows up as `ScanFailed`
    fn radio_ready(&self) -> bool {
        self.adapter.is_some() && self.authorized.load(Ordering::Relaxed)
    }

    fn retrieve_connected_peers(&mut self, service: Uuid) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        let peripherals = self.peripherals.clone();
        let events = self.events.clone();

        spawn(async move {
            let connected = find_peripheral(&adapter, service, true).await;
            let peers = connected.iter().map(|peripheral| register(&peripherals, peripheral)).collect();
            emit(&events, TransportEvent::ConnectedPeers(peers));
        });
        Ok(())
    }

    fn scan(&mut self, service: Uuid) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        let peripherals = self.peripherals.clone();
        let events = self.events.clone();
        let authorized = self.authorized.clone();

        spawn(async move {
            let filter = ScanFilter {
                services: vec![service],
            };
            if let Err(err) = adapter.start_scan(filter).await {
                warn!("Scanning failed {:?}", err);
                if let btleplug::Error::PermissionDenied = err {
                    authorized.store(false, Ordering::Relaxed);
                    emit(&events, TransportEvent::RadioStateChanged(false));
                } else {
                    // radio powered off or adapter not ready
                    emit(&events, TransportEvent::ScanFailed(err.to_string()));
                }
                return;
            }

            // peripherals seen by an earlier scan do not always produce a new discovery event
            if let Some(peripheral) = find_peripheral(&adapter, service, false).await.first() {
                let peer = register(&peripherals, peripheral);
                emit(&events, TransportEvent::Discovered(peer));
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {:?}", err);
            }
        });
        Ok(())
    }

    fn connect(&mut self, peer: &PeerId) -> Result<(), DeviceError> {
        let peripheral = self.lookup(peer)?;
        // tasks of an earlier link to the same peer must not outlive it
        self.drop_link(peer);
        let link = self.link(peer);
        let events = self.events.clone();
        let peer = peer.clone();

        spawn(async move {
            info!("Connecting to peripheral...");
            tokio::select! {
                _ = link.cancelled() => {
                    debug!("Connect to {} cancelled", peer);
                },
                result = peripheral.connect() => match result {
                    Ok(()) => emit(&events, TransportEvent::Connected(peer)),
                    Err(err) => emit(&events, TransportEvent::ConnectFailed(peer, err.to_string())),
                },
            }
        });
        Ok(())
    }

    fn disconnect(&mut self, peer: &PeerId) -> Result<(), DeviceError> {
        self.drop_link(peer);
        let peripheral = self.lookup(peer)?;

        spawn(async move {
            if let Err(err) = peripheral.disconnect().await {
                debug!("Disconnect failed: {:?}", err);
            }
        });
        Ok(())
    }

    fn discover_services(&mut self, peer: &PeerId, _service: Uuid) -> Result<(), DeviceError> {
        // btleplug always enumerates every service
        let peripheral = self.lookup(peer)?;
        let events = self.events.clone();
        let peer = peer.clone();

        spawn(async move {
            match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral.services().iter().map(|service| service.uuid).collect();
                    emit(&events, TransportEvent::ServicesFound(peer, services));
                },
                Err(err) => emit(&events, TransportEvent::Disconnected(peer, format!("service discovery failed: {}", err))),
            }
        });
        Ok(())
    }

    fn discover_characteristics(&mut self, peer: &PeerId, service: Uuid) -> Result<(), DeviceError> {
        let peripheral = self.lookup(peer)?;
        let characteristics = peripheral.services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics.into_iter().map(|characteristic| characteristic.uuid))
            .collect();

        emit(&self.events, TransportEvent::CharacteristicsFound(peer.clone(), service, characteristics));
        Ok(())
    }

    fn subscribe(&mut self, peer: &PeerId, characteristic: Uuid) -> Result<(), DeviceError> {
        let peripheral = self.lookup(peer)?;
        let characteristic = find_characteristic(&peripheral, characteristic)?;

        read_notifications_task(self.link(peer), peer.clone(), peripheral, characteristic, self.events.clone());
        Ok(())
    }

    fn write(&mut self, peer: &PeerId, characteristic: Uuid, bytes: Vec<u8>) -> Result<(), DeviceError> {
        let peripheral = self.lookup(peer)?;
        let characteristic = find_characteristic(&peripheral, characteristic)?;

        self.writer(peer, peripheral)
            .unbounded_send((characteristic, bytes))
            .map_err(|_| DeviceError::DisconnectedMidOperation)
    }
}
