//! The relay client: lifecycle, command handler slot and telemetry sending.
//!
//! A [`RelayClient`] owns one logical link to the relay broker. After
//! [`start`](RelayClient::start) it keeps that link alive in the background,
//! reconnecting at a fixed interval, until [`stop`](RelayClient::stop).

use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use iotc_relay_protocol::{CommandParams, Outbound};

use crate::error::RelayError;
use crate::reconnection::{RelayContext, connect, reconnect_loop};
use crate::target::ConnectionTarget;
use crate::types::{
    CommandHandler, ConnectionState, HandlerError, RelayConfig, STOP_GRACE, command_handler,
};

/// Background tasks belonging to one `start()`..`stop()` cycle.
struct RunHandle {
    cancel: CancellationToken,
    reconnect: Option<JoinHandle<()>>,
}

/// Resilient client for the IoTConnect relay broker.
///
/// All methods take `&self`; share the client behind an `Arc` to send from
/// several tasks.
pub struct RelayClient {
    ctx: RelayContext,
    run: Mutex<Option<RunHandle>>,
}

impl RelayClient {
    /// Creates a client with default timing.
    ///
    /// Fails with [`RelayError::InvalidTarget`] for a malformed `tcp://`
    /// target. No I/O happens until [`start`](Self::start).
    pub fn new(target: &str, client_id: impl Into<String>) -> Result<Self, RelayError> {
        Self::with_config(target, client_id, RelayConfig::default())
    }

    pub fn with_config(
        target: &str,
        client_id: impl Into<String>,
        config: RelayConfig,
    ) -> Result<Self, RelayError> {
        let target = ConnectionTarget::parse(target)?;
        Ok(Self::from_target(target, client_id, config))
    }

    fn from_target(
        target: ConnectionTarget,
        client_id: impl Into<String>,
        config: RelayConfig,
    ) -> Self {
        Self {
            ctx: RelayContext::new(target, client_id.into(), config),
            run: Mutex::new(None),
        }
    }

    /// Builder form of [`set_command_handler`](Self::set_command_handler).
    pub fn with_command_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&str, CommandParams) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.set_command_handler(handler);
        self
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.ctx.target
    }

    pub fn client_id(&self) -> &str {
        &self.ctx.client_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.ctx.config
    }

    /// Whether the link is currently registered with the broker.
    ///
    /// A snapshot: the link may drop right after this returns.
    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *self.ctx.state_tx.borrow()
    }

    /// Subscribes to connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state_tx.subscribe()
    }

    /// Installs (or replaces) the command handler.
    ///
    /// Commands already being dispatched finish with the previous handler.
    pub fn set_command_handler<F>(&self, handler: F)
    where
        F: Fn(&str, CommandParams) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.replace_handler(Some(command_handler(handler)));
    }

    /// Removes the command handler. Later commands are logged and dropped.
    pub fn clear_command_handler(&self) {
        self.replace_handler(None);
    }

    fn replace_handler(&self, handler: Option<CommandHandler>) {
        *self
            .ctx
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn run_slot(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the client.
    ///
    /// Makes one connection attempt right away and returns whether it
    /// succeeded. Either way a background task keeps retrying every
    /// `retry_interval` while the link is down. Calling `start` on a running
    /// client does nothing and returns the current connection status.
    ///
    /// The background task is spawned before the first attempt, so dropping
    /// this future early still leaves a client that reconnects.
    pub async fn start(&self) -> bool {
        let cancel = {
            let mut run = self.run_slot();
            if run.is_some() {
                return self.is_connected();
            }
            let cancel = CancellationToken::new();
            self.ctx.running.store(true, Ordering::SeqCst);
            let reconnect = tokio::spawn(reconnect_loop(self.ctx.clone(), cancel.clone()));
            *run = Some(RunHandle {
                cancel: cancel.clone(),
                reconnect: Some(reconnect),
            });
            cancel
        };

        info!(target = %self.ctx.target, client_id = %self.ctx.client_id, "starting relay client");

        match connect(&self.ctx, &cancel).await {
            Ok(_) => true,
            Err(e) => {
                warn!(target = %self.ctx.target, error = %e, "initial connect failed, retrying in background");
                false
            }
        }
    }

    /// Stops the client and closes the connection.
    ///
    /// When this returns no background task touches the socket any more.
    /// Safe to call repeatedly; the client can be started again afterwards.
    pub async fn stop(&self) {
        let Some(run) = self.run_slot().take() else {
            return;
        };

        self.ctx.running.store(false, Ordering::SeqCst);
        run.cancel.cancel();

        if let Some(handle) = run.reconnect {
            let limit = self.ctx.config.retry_interval + STOP_GRACE;
            join_bounded(handle, limit, "reconnect").await;
        }

        let receiver = {
            let mut link = self.ctx.link.lock().await;
            if let Some(mut writer) = link.writer.take() {
                writer.shutdown().await;
            }
            self.ctx.teardown(&mut link);
            link.receiver.take()
        };

        if let Some(handle) = receiver {
            let limit = self.ctx.config.read_timeout + STOP_GRACE;
            join_bounded(handle, limit, "receive").await;
        }

        info!(target = %self.ctx.target, "relay client stopped");
    }

    /// Sends one telemetry message.
    ///
    /// `data` must serialize to a JSON object. Returns `false` without
    /// queuing anything when the link is down or the write fails; a failed
    /// write also drops the link so the background task reconnects.
    pub async fn send_telemetry<T: Serialize + ?Sized>(&self, data: &T) -> bool {
        if !self.is_connected() {
            debug!("telemetry not sent: relay not connected");
            return false;
        }

        let data = match serde_json::to_value(data) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(kind = json_kind(&other), "telemetry data must be a JSON object");
                return false;
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize telemetry");
                return false;
            }
        };

        let mut link = self.ctx.link.lock().await;
        if link.state != ConnectionState::Connected {
            return false;
        }
        let Some(writer) = link.writer.as_mut() else {
            return false;
        };

        match writer
            .write(&Outbound::telemetry(&self.ctx.client_id, &data))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(target = %self.ctx.target, error = %e, "telemetry write failed, dropping connection");
                self.ctx.teardown(&mut link);
                false
            }
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        let run = self
            .run
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(run) = run {
            self.ctx.running.store(false, Ordering::SeqCst);
            run.cancel.cancel();
            if let Some(handle) = run.reconnect {
                handle.abort();
            }
        }
    }
}

async fn join_bounded(mut handle: JoinHandle<()>, limit: Duration, task: &'static str) {
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => warn!(task, error = %e, "background task ended abnormally"),
        Err(_) => {
            warn!(task, ?limit, "background task did not stop in time, aborting");
            handle.abort();
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
