//! Receive loop: reads framed messages and hands them to the dispatcher.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Frame, FrameReader};
use crate::dispatcher::dispatch;
use crate::reconnection::{RelayContext, mark_disconnected};

/// Reads messages until the channel closes, fails, or is cancelled.
///
/// Reads are bounded by `read_timeout` so the loop re-checks the running
/// flag regularly. On exit the link is marked disconnected unless a newer
/// channel already replaced this one.
pub(crate) async fn receive_loop(
    ctx: RelayContext,
    mut reader: FrameReader,
    generation: u64,
    cancel: CancellationToken,
) {
    let read_timeout = ctx.config.read_timeout;

    while ctx.is_running() {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = reader.read_next(read_timeout) => frame,
        };

        match frame {
            Ok(Frame::Message(message)) => {
                let handler = ctx.handler();
                dispatch(message, handler.as_ref());
            }
            Ok(Frame::Malformed(reason)) => {
                warn!(%reason, "malformed message from relay, skipping");
            }
            Ok(Frame::Idle) => {}
            Ok(Frame::Closed) => {
                info!(target = %ctx.target, "relay closed the connection");
                break;
            }
            Err(e) => {
                warn!(target = %ctx.target, error = %e, "relay read error");
                break;
            }
        }
    }

    if mark_disconnected(&ctx, generation).await {
        debug!(generation, "receive loop marked link disconnected");
    }
    debug!(generation, "receive loop exited");
}
