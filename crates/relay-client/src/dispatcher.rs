//! Routes decoded broker messages to the application's command handler.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use iotc_relay_protocol::Inbound;

use crate::types::CommandHandler;

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Handled,
    HandlerFailed,
    NoHandler,
    Acknowledged,
    Unrecognized,
    Invalid,
}

/// Dispatches one message. Never fails: handler errors and panics are
/// logged and contained here.
pub(crate) fn dispatch(message: Map<String, Value>, handler: Option<&CommandHandler>) -> Dispatch {
    let (name, params) = match Inbound::classify(message) {
        Ok(Inbound::Command { name, params }) => (name, params),
        Ok(Inbound::Ack) => {
            trace!("relay acknowledgment");
            return Dispatch::Acknowledged;
        }
        Ok(Inbound::Unrecognized { msg_type }) => {
            warn!(
                msg_type = msg_type.as_deref().unwrap_or("<missing>"),
                "unknown message type from relay, dropping"
            );
            return Dispatch::Unrecognized;
        }
        Err(e) => {
            warn!(error = %e, "invalid message from relay, dropping");
            return Dispatch::Invalid;
        }
    };

    let Some(handler) = handler else {
        warn!(command = %name, "no command handler set, dropping command");
        return Dispatch::NoHandler;
    };

    debug!(command = %name, params = %params, "relay command received");
    match catch_unwind(AssertUnwindSafe(|| handler(&name, params))) {
        Ok(Ok(())) => Dispatch::Handled,
        Ok(Err(e)) => {
            warn!(command = %name, error = %e, "command handler failed");
            Dispatch::HandlerFailed
        }
        Err(panic) => {
            warn!(
                command = %name,
                panic = panic_message(panic.as_ref()),
                "command handler panicked"
            );
            Dispatch::HandlerFailed
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
