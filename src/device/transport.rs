//! Seam between the engine and a concrete radio stack.
//!
//! Every method only starts an operation and returns at once. Completions and
//! unsolicited activity come back as `TransportEvent`s on the channel the transport
//! was built with, which the engine drains on its own task.

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::device::types::PeerId;
use crate::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    RadioStateChanged(bool),
    /// Answer to `retrieve_connected_peers`.
    ConnectedPeers(Vec<PeerId>),
    /// Scanning could not start or stopped on its own, e.g. the radio is powered off.
    ScanFailed(String),
    Discovered(PeerId),
    Connected(PeerId),
    ConnectFailed(PeerId, String),
    Disconnected(PeerId, String),
    ServicesFound(PeerId, Vec<Uuid>),
    CharacteristicsFound(PeerId, Uuid, Vec<Uuid>),
    /// Notifications are enabled; replies to requests written from now on are delivered.
    Subscribed(PeerId),
    Notification(PeerId, Vec<u8>),
    WriteFailed(PeerId, String),
}

pub type TransportEventSender = UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = UnboundedReceiver<TransportEvent>;

pub fn transport_channel() -> (TransportEventSender, TransportEventReceiver) {
    unbounded()
}

pub trait Transport: Send + 'static {
    fn radio_ready(&self) -> bool;

    /// Peers already connected at the OS level that expose `service`.
    fn retrieve_connected_peers(&mut self, service: Uuid) -> Result<(), DeviceError>;

    fn scan(&mut self, service: Uuid) -> Result<(), DeviceError>;

    fn stop_scan(&mut self) -> Result<(), DeviceError>;

    fn connect(&mut self, peer: &PeerId) -> Result<(), DeviceError>;

    /// Also used to abandon a connection attempt that is still in flight.
    fn disconnect(&mut self, peer: &PeerId) -> Result<(), DeviceError>;

    fn discover_services(&mut self, peer: &PeerId, service: Uuid) -> Result<(), DeviceError>;

    fn discover_characteristics(&mut self, peer: &PeerId, service: Uuid) -> Result<(), DeviceError>;

    /// Completes with `Subscribed`, or `Disconnected` when notifications can not be enabled.
    fn subscribe(&mut self, peer: &PeerId, characteristic: Uuid) -> Result<(), DeviceError>;

    /// Write with response. The acknowledgement is not surfaced, only failures are.
    fn write(&mut self, peer: &PeerId, characteristic: Uuid, bytes: Vec<u8>) -> Result<(), DeviceError>;
}
