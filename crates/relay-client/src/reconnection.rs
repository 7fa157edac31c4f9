//! Connection establishment and the fixed-interval reconnect loop.
//!
//! Contains the shared [`RelayContext`], the guarded [`Link`] holding the
//! live writer, and the free functions that swap channels in and out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use iotc_relay_protocol::Outbound;

use crate::channel::{FrameReader, FrameWriter, FramedChannel};
use crate::error::RelayError;
use crate::receiver::receive_loop;
use crate::target::ConnectionTarget;
use crate::types::{CommandHandler, ConnectionState, MIN_RETRY_INTERVAL, RelayConfig};

/// Connection state plus the live channel, guarded by one mutex.
pub(crate) struct Link {
    pub(crate) state: ConnectionState,
    pub(crate) writer: Option<FrameWriter>,
    /// Incremented for every installed channel. A receive loop only tears
    /// down the link if the generation still matches its own.
    pub(crate) generation: u64,
    pub(crate) channel_cancel: Option<CancellationToken>,
    pub(crate) receiver: Option<tokio::task::JoinHandle<()>>,
}

/// Shared state passed to the reconnect loop and receive loops.
#[derive(Clone)]
pub(crate) struct RelayContext {
    pub(crate) target: Arc<ConnectionTarget>,
    pub(crate) client_id: Arc<str>,
    pub(crate) config: RelayConfig,
    pub(crate) link: Arc<Mutex<Link>>,
    /// Serializes connection attempts. Held for a whole attempt, so a
    /// dropped attempt releases it and a later one starts cleanly.
    pub(crate) connect_gate: Arc<Mutex<()>>,
    pub(crate) state_tx: Arc<watch::Sender<ConnectionState>>,
    pub(crate) handler: Arc<RwLock<Option<CommandHandler>>>,
    pub(crate) running: Arc<AtomicBool>,
}

impl RelayContext {
    pub(crate) fn new(target: ConnectionTarget, client_id: String, config: RelayConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            target: Arc::new(target),
            client_id: client_id.into(),
            config,
            link: Arc::new(Mutex::new(Link {
                state: ConnectionState::Disconnected,
                writer: None,
                generation: 0,
                channel_cancel: None,
                receiver: None,
            })),
            connect_gate: Arc::new(Mutex::new(())),
            state_tx: Arc::new(state_tx),
            handler: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        *self.state_tx.borrow() == ConnectionState::Connected
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the current handler. The lock is released before the
    /// handler is invoked.
    pub(crate) fn handler(&self) -> Option<CommandHandler> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Updates the state while the link lock is held.
    pub(crate) fn set_state(&self, link: &mut Link, state: ConnectionState) {
        link.state = state;
        self.state_tx.send_replace(state);
    }

    /// Drops the live channel (closing the socket) and marks the link down.
    /// Must be called with the link lock held.
    pub(crate) fn teardown(&self, link: &mut Link) {
        link.writer = None;
        if let Some(cancel) = link.channel_cancel.take() {
            cancel.cancel();
        }
        self.set_state(link, ConnectionState::Disconnected);
    }
}

/// Opens the transport, registers, and installs the new channel.
///
/// Returns `Ok(false)` when the link was already up and nothing changed.
/// On any failure the link is left `Disconnected` and the partially opened
/// socket is closed by drop. Cancel-safe: dropping the future mid-attempt
/// leaves no lock held, and the next attempt overwrites a stale
/// `Connecting` state.
pub(crate) async fn connect(
    ctx: &RelayContext,
    run_cancel: &CancellationToken,
) -> Result<bool, RelayError> {
    let _attempt = ctx.connect_gate.lock().await;
    {
        let mut link = ctx.link.lock().await;
        if link.state == ConnectionState::Connected {
            return Ok(false);
        }
        ctx.set_state(&mut link, ConnectionState::Connecting);
    }

    let opened = open_and_register(ctx).await;

    let mut link = ctx.link.lock().await;
    let (reader, writer) = match opened {
        Ok(halves) => halves,
        Err(e) => {
            ctx.set_state(&mut link, ConnectionState::Disconnected);
            return Err(e);
        }
    };

    if run_cancel.is_cancelled() || !ctx.is_running() {
        ctx.set_state(&mut link, ConnectionState::Disconnected);
        return Err(RelayError::Stopped);
    }

    link.generation += 1;
    let generation = link.generation;
    let channel_cancel = run_cancel.child_token();
    link.writer = Some(writer);
    link.channel_cancel = Some(channel_cancel.clone());
    ctx.set_state(&mut link, ConnectionState::Connected);

    // A previous loop, if still winding down, already had its token
    // cancelled by teardown and exits on its own.
    link.receiver = Some(tokio::spawn(receive_loop(
        ctx.clone(),
        reader,
        generation,
        channel_cancel,
    )));

    info!(target = %ctx.target, client_id = %ctx.client_id, generation, "connected to relay");
    Ok(true)
}

async fn open_and_register(ctx: &RelayContext) -> Result<(FrameReader, FrameWriter), RelayError> {
    let channel = FramedChannel::connect(&ctx.target, &ctx.config).await?;
    let (reader, mut writer) = channel.into_split();
    writer.write(&Outbound::register(&ctx.client_id)).await?;
    Ok((reader, writer))
}

/// Marks the link `Disconnected` if it still belongs to `generation`.
///
/// Returns `false` when a newer channel has already replaced it.
pub(crate) async fn mark_disconnected(ctx: &RelayContext, generation: u64) -> bool {
    let mut link = ctx.link.lock().await;
    if link.generation != generation || link.state != ConnectionState::Connected {
        return false;
    }
    ctx.teardown(&mut link);
    true
}

/// Reconnect loop with a fixed interval.
///
/// The first tick is consumed immediately because `start()` makes its own
/// attempt, so attempts are always at least one interval apart.
pub(crate) async fn reconnect_loop(ctx: RelayContext, cancel: CancellationToken) {
    let period = ctx.config.retry_interval.max(MIN_RETRY_INTERVAL);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if ctx.is_connected() {
            attempt = 0;
            continue;
        }

        attempt = attempt.saturating_add(1);
        debug!(target = %ctx.target, attempt, "reconnecting");

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect(&ctx, &cancel) => match result {
                Ok(true) => {
                    info!(target = %ctx.target, attempt, "reconnected successfully");
                    attempt = 0;
                }
                Ok(false) => attempt = 0,
                // Keep retry noise low: one warning per outage.
                Err(e) if attempt == 1 => {
                    warn!(target = %ctx.target, error = %e, "relay unreachable, retrying in background");
                }
                Err(e) => {
                    debug!(target = %ctx.target, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    debug!(target = %ctx.target, "reconnect loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_ctx() -> RelayContext {
        RelayContext::new(
            ConnectionTarget::Tcp {
                host: "127.0.0.1".into(),
                port: 1,
            },
            "test-client".into(),
            RelayConfig::default(),
        )
    }

    #[tokio::test]
    async fn stale_generation_does_not_clobber_newer_link() {
        let ctx = test_ctx();
        {
            let mut link = ctx.link.lock().await;
            link.generation = 2;
            ctx.set_state(&mut link, ConnectionState::Connected);
        }

        assert!(!mark_disconnected(&ctx, 1).await);
        assert!(ctx.is_connected());

        assert!(mark_disconnected(&ctx, 2).await);
        assert!(!ctx.is_connected());

        // Second teardown of the same generation is a no-op.
        assert!(!mark_disconnected(&ctx, 2).await);
    }

    #[tokio::test]
    async fn teardown_cancels_channel_token() {
        let ctx = test_ctx();
        let token = CancellationToken::new();
        {
            let mut link = ctx.link.lock().await;
            link.channel_cancel = Some(token.clone());
            ctx.set_state(&mut link, ConnectionState::Connected);
            ctx.teardown(&mut link);
            assert!(link.channel_cancel.is_none());
            assert_eq!(link.state, ConnectionState::Disconnected);
        }
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn failed_connect_leaves_link_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let ctx = RelayContext::new(
            ConnectionTarget::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            "test-client".into(),
            RelayConfig::default(),
        );
        ctx.running.store(true, Ordering::SeqCst);

        let result = connect(&ctx, &CancellationToken::new()).await;
        assert!(matches!(result, Err(RelayError::ConnectFailure { .. })));
        assert_eq!(ctx.link.lock().await.state, ConnectionState::Disconnected);
        assert!(ctx.link.lock().await.writer.is_none());
    }

    #[tokio::test]
    async fn connect_after_stop_is_rejected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ctx = RelayContext::new(
            ConnectionTarget::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            "test-client".into(),
            RelayConfig::default(),
        );
        // Not running: the channel opens but is never installed.
        let result = connect(&ctx, &CancellationToken::new()).await;
        assert!(matches!(result, Err(RelayError::Stopped)));
        assert!(!ctx.is_connected());
    }

    #[tokio::test]
    async fn dropped_attempt_does_not_block_the_next() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let ctx = RelayContext::new(
            ConnectionTarget::Tcp {
                host: "127.0.0.1".into(),
                port,
            },
            "test-client".into(),
            RelayConfig::default(),
        );
        ctx.running.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let held = ctx.link.lock().await;
        let attempt = tokio::time::timeout(Duration::from_millis(50), connect(&ctx, &cancel)).await;
        assert!(attempt.is_err());
        drop(held);

        assert!(matches!(connect(&ctx, &cancel).await, Ok(true)));
        assert!(ctx.is_connected());
        assert!(matches!(connect(&ctx, &cancel).await, Ok(false)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn reconnect_loop_exits_on_cancel() {
        let ctx = test_ctx();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconnect_loop(ctx, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }
}
