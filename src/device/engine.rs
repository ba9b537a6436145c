//! The engine: one task that owns the connection state machine, the state store and the
//! transport. Transport callbacks and user intents only enqueue; nothing else mutates state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use futures::StreamExt;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::device::codec::decode;
use crate::device::dispatcher;
use crate::device::machine::ConnectionMachine;
use crate::device::store::StateStore;
use crate::device::transport::{Transport, TransportEvent, TransportEventReceiver};
use crate::device::types::{Command, ConnectionStatus, DeviceState, Trigger};
use crate::error::DeviceError;

#[derive(Debug)]
enum EngineInput {
    Trigger(Trigger),
    Submit(Command),
}

/// Cheap to clone; this is what the presentation layer holds on to.
#[derive(Clone)]
pub struct EngineHandle {
    inputs: UnboundedSender<EngineInput>,
    state: watch::Receiver<DeviceState>,
    status: watch::Receiver<ConnectionStatus>,
    malformed: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Last known device state. Kept while disconnected, never cleared.
    pub fn snapshot(&self) -> DeviceState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<DeviceState> {
        self.state.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }

    pub fn reconnect(&self, trigger: Trigger) -> Result<(), DeviceError> {
        self.inputs
            .unbounded_send(EngineInput::Trigger(trigger))
            .map_err(|_| DeviceError::EngineClosed)
    }

    /// Returns once the command is queued. Out of range commands are refused here; a command
    /// that arrives while the connection is not ready is logged and dropped by the engine.
    pub fn submit(&self, command: Command) -> Result<(), DeviceError> {
        if let Err(err) = dispatcher::validate(&command) {
            warn!("Rejecting {:?}: {}", command, err);
            return Err(err);
        }

        self.inputs
            .unbounded_send(EngineInput::Submit(command))
            .map_err(|_| DeviceError::EngineClosed)
    }
}

pub struct Engine {
    handle: EngineHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Engine {
    /// Must be called from within a tokio runtime. The engine starts `Idle`; nothing happens
    /// until the first `reconnect`.
    pub fn new<T: Transport>(transport: T, transport_events: TransportEventReceiver, config: &Config) -> Engine {
        let (inputs, input_receiver) = unbounded::<EngineInput>();
        let store = StateStore::new();
        let machine = ConnectionMachine::new(config);
        let (status_sender, status) = watch::channel(machine.status().clone());
        let cancel = CancellationToken::new();

        let handle = EngineHandle {
            inputs,
            state: store.subscribe(),
            status,
            malformed: store.malformed_counter(),
        };

        let task = spawn(engine_task(
            cancel.clone(),
            transport,
            transport_events,
            input_receiver,
            machine,
            store,
            status_sender,
        ));

        Engine { handle, cancel, task: Some(task) }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stops the engine and drops the connection. Handles return `EngineClosed` afterwards.
    pub async fn close(mut self) {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            info!("Waiting for engine task to stop");
            if let Err(err) = task.await {
                warn!("Engine task ended abnormally: {}", err);
            }
            info!("Engine task stopped");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn engine_task<T: Transport>(
    cancel: CancellationToken,
    mut transport: T,
    mut transport_events: TransportEventReceiver,
    mut inputs: UnboundedReceiver<EngineInput>,
    mut machine: ConnectionMachine,
    mut store: StateStore,
    status: watch::Sender<ConnectionStatus>,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(event) = transport_events.next() => {
                match event {
                    // decoded in any state
                    TransportEvent::Notification(peer, payload) => {
                        debug!("Notification from {}: {:?}", peer, String::from_utf8_lossy(&payload));
                        store.apply(decode(&payload));
                    },
                    other => machine.handle(&mut transport, &other),
                }
            },
            Some(input) = inputs.next() => {
                match input {
                    EngineInput::Trigger(trigger) => machine.trigger(&mut transport, trigger),
                    EngineInput::Submit(command) => {
                        // failures are logged by the dispatcher; callers only see the next notification
                        let _ = dispatcher::submit(&machine, &mut transport, &command);
                    },
                }
            },
            else => {
                break 'mainloop;
            },
        }

        publish_status(&status, machine.status());
    }

    machine.shutdown(&mut transport);
    publish_status(&status, machine.status());
}

fn publish_status(sender: &watch::Sender<ConnectionStatus>, current: &ConnectionStatus) {
    sender.send_if_modified(|published| {
        if published == current {
            return false;
        }
        *published = current.clone();
        true
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use tokio::time::{sleep, timeout, Duration};

    use super::*;
    use crate::device::transport::fake::{written, Call, FakeTransport};
    use crate::device::transport::transport_channel;
    use crate::device::types::PeerId;

    async fn wait_until<V>(receiver: &mut watch::Receiver<V>, predicate: impl Fn(&V) -> bool) {
        timeout(Duration::from_secs(5), async {
            loop {
                if predicate(&receiver.borrow_and_update()) {
                    return;
                }
                receiver.changed().await.expect("engine stopped");
            }
        }).await.expect("timed out waiting for the engine");
    }

    async fn wait_for_calls(calls: &Arc<Mutex<Vec<Call>>>, predicate: impl Fn(&[Call]) -> bool) {
        timeout(Duration::from_secs(5), async {
            while !predicate(&calls.lock().unwrap()) {
                sleep(Duration::from_millis(5)).await;
            }
        }).await.expect("timed out waiting for transport calls");
    }

    #[tokio::test]
    async fn connects_submits_and_applies_notifications() {
        let (events, event_receiver) = transport_channel();
        let transport = FakeTransport::auto_answering(events.clone());
        let calls = transport.calls.clone();
        let engine = Engine::new(transport, event_receiver, &Config::default());
        let handle = engine.handle();
        assert_eq!(handle.status(), ConnectionStatus::Idle);

        handle.reconnect(Trigger::RadioPoweredOn).unwrap();
        wait_until(&mut handle.subscribe_status(), ConnectionStatus::is_ready).await;
        assert_eq!(written(&calls).len(), 7);

        handle.submit(Command::SetActiveShader("Loopy Rainbow".into())).unwrap();
        wait_for_calls(&calls, |calls| written_in(calls) > 7).await;
        let shader_writes: Vec<String> = written(&calls)
            .into_iter()
            .filter(|text| text.starts_with("setActiveShader"))
            .collect();
        assert_eq!(shader_writes, vec!["setActiveShader:Loopy Rainbow".to_string()]);

        events.unbounded_send(TransportEvent::Notification(
            PeerId("totem-1".into()),
            b"activeShader:Loopy Rainbow".to_vec(),
        )).unwrap();
        wait_until(&mut handle.subscribe_state(), |state| state.active_shader.is_some()).await;
        assert_eq!(handle.snapshot().active_shader.as_deref(), Some("Loopy Rainbow"));

        engine.close().await;
    }

    fn written_in(calls: &[Call]) -> usize {
        calls.iter().filter(|call| matches!(call, Call::Write(..))).count()
    }

    #[tokio::test]
    async fn commands_before_ready_are_dropped() {
        let (_events, event_receiver) = transport_channel();
        let transport = FakeTransport::new();
        let calls = transport.calls.clone();
        let engine = Engine::new(transport, event_receiver, &Config::default());
        let handle = engine.handle();

        handle.submit(Command::BeatDrop).unwrap();
        // inputs are processed in order, so once scanning the submit has been handled
        handle.reconnect(Trigger::Reconnect).unwrap();
        wait_until(&mut handle.subscribe_status(), |status| *status == ConnectionStatus::Scanning).await;

        assert!(written(&calls).is_empty());
        engine.close().await;
    }

    #[tokio::test]
    async fn out_of_range_commands_are_refused() {
        let (_events, event_receiver) = transport_channel();
        let engine = Engine::new(FakeTransport::new(), event_receiver, &Config::default());
        let handle = engine.handle();

        assert!(matches!(handle.submit(Command::SetBrightness(300)), Err(DeviceError::InvalidCommand { .. })));
        assert!(matches!(handle.submit(Command::SetServoSpeed(5, 0.5)), Err(DeviceError::InvalidCommand { .. })));
        engine.close().await;
    }

    #[tokio::test]
    async fn reconnects_with_a_fresh_peer_and_keeps_stale_state() {
        let (events, event_receiver) = transport_channel();
        let transport = FakeTransport::auto_answering(events.clone());
        let calls = transport.calls.clone();
        let engine = Engine::new(transport, event_receiver, &Config::default());
        let handle = engine.handle();
        let mut status = handle.subscribe_status();

        handle.reconnect(Trigger::RadioPoweredOn).unwrap();
        wait_until(&mut status, ConnectionStatus::is_ready).await;

        events.unbounded_send(TransportEvent::Notification(PeerId("totem-1".into()), b"brightness:99".to_vec())).unwrap();
        wait_until(&mut handle.subscribe_state(), |state| state.brightness == 99).await;

        events.unbounded_send(TransportEvent::Disconnected(PeerId("totem-1".into()), "reboot".into())).unwrap();
        wait_until(&mut status, |status| matches!(status, ConnectionStatus::Disconnected(_))).await;
        assert_eq!(handle.snapshot().brightness, 99);

        handle.reconnect(Trigger::Foregrounded).unwrap();
        wait_until(&mut status, ConnectionStatus::is_ready).await;
        assert!(calls.lock().unwrap().contains(&Call::Connect(PeerId("totem-2".into()))));
        assert_eq!(handle.snapshot().brightness, 99);

        engine.close().await;
    }

    #[tokio::test]
    async fn malformed_notifications_are_counted_and_ignored() {
        let (events, event_receiver) = transport_channel();
        let engine = Engine::new(FakeTransport::new(), event_receiver, &Config::default());
        let handle = engine.handle();

        events.unbounded_send(TransportEvent::Notification(PeerId("x".into()), b"brightness:abc".to_vec())).unwrap();
        events.unbounded_send(TransportEvent::Notification(PeerId("x".into()), b"brightness:5".to_vec())).unwrap();
        wait_until(&mut handle.subscribe_state(), |state| state.brightness == 5).await;

        assert_eq!(handle.malformed_count(), 1);
        engine.close().await;
    }

    #[tokio::test]
    async fn closed_engine_refuses_work() {
        let (_events, event_receiver) = transport_channel();
        let engine = Engine::new(FakeTransport::new(), event_receiver, &Config::default());
        let handle = engine.handle();

        engine.close().await;
        assert!(matches!(handle.reconnect(Trigger::Reconnect), Err(DeviceError::EngineClosed)));
        assert!(matches!(handle.submit(Command::BeatDrop), Err(DeviceError::EngineClosed)));
    }
}
