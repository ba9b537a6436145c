use std::time::Duration;
use log::{error, info, warn};
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::cli::types::{Action, Cli};
use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::btle::BtleTransport;
use crate::device::engine::{Engine, EngineHandle};
use crate::device::transport::transport_channel;
use crate::device::types::{DeviceState, Trigger};
use crate::error::AppRunError;

/**
 * How long (milliseconds) to wait for the totem to answer after a command or the initial sync.
 */
const SETTLE_DELAY: u64 = 1500;

#[derive(Serialize)]
struct Report<'a> {
    status: String,
    state: &'a DeviceState,
}

fn print_state(handle: &EngineHandle, state: &DeviceState) -> Result<(), AppRunError> {
    let report = Report { status: handle.status().to_string(), state };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn load_config(config_io: &ConfigIO) -> Config {
    match config_io.read_or_init().await {
        Ok(config) => config,
        Err(err) => {
            if err.is_file_not_found_error() {
                info!("Config file not found, using defaults");
            } else {
                error!("Failed to load config, using defaults: {}", &err);
            }
            Config::default()
        },
    }
}

async fn wait_ready(handle: &EngineHandle, deadline: Duration) -> Result<(), AppRunError> {
    let mut status = handle.subscribe_status();

    let ready = timeout(deadline, async {
        loop {
            if status.borrow_and_update().is_ready() {
                return true;
            }
            if status.changed().await.is_err() {
                return false;
            }
        }
    }).await;

    match ready {
        Ok(true) => Ok(()),
        _ => Err(AppRunError::ConnectTimeout { status: handle.status() }),
    }
}

// Waits until the snapshot changes or the delay passes, whichever comes first.
async fn settle(handle: &EngineHandle) {
    let mut state = handle.subscribe_state();
    state.borrow_and_update();
    let _ = timeout(Duration::from_millis(SETTLE_DELAY), state.changed()).await;
}

async fn watch(handle: &EngineHandle) -> Result<(), AppRunError> {
    let mut state = handle.subscribe_state();

    'mainloop: loop {
        let snapshot = state.borrow_and_update().clone();
        print_state(handle, &snapshot)?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break 'mainloop;
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break 'mainloop;
                }
            },
        }
    }

    Ok(())
}

async fn perform(cli: &Cli, handle: &EngineHandle, deadline: Duration) -> Result<(), AppRunError> {
    wait_ready(handle, deadline).await?;
    info!("Totem ready");

    // give the initial sync burst time to come back
    tokio::time::sleep(Duration::from_millis(SETTLE_DELAY)).await;

    match &cli.action {
        Action::Watch => watch(handle).await,
        action => {
            if let Some(command) = action.command() {
                handle.submit(command)?;
                settle(handle).await;
            }
            print_state(handle, &handle.snapshot())
        },
    }
}

pub async fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let config_io = match &cli.config {
        Some(path) => ConfigIO::open_sync(path)?,
        None => ConfigIO::new_sync()?,
    };

    // a second instance would fight over the same totem
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let config = load_config(&config_io).await;
    let deadline = cli.timeout
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_millis(config.connect_timeout_ms));

    let cancel = CancellationToken::new();
    let (events, event_receiver) = transport_channel();
    let transport = BtleTransport::new(&config, events, cancel.child_token()).await?;
    let engine = Engine::new(transport, event_receiver, &config);
    let handle = engine.handle();

    handle.reconnect(Trigger::RadioPoweredOn)?;
    let result = perform(&cli, &handle, deadline).await;
    if let Err(err) = &result {
        warn!("{}", err);
    }

    engine.close().await;
    cancel.cancel();
    result
}
