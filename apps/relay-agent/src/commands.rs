//! Commands accepted by the agent.
//!
//! Handlers run on the relay's receive task, so they only update shared
//! state; the main loop picks the changes up on its next tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde_json::Value;

use iotc_relay_client::{CommandParams, HandlerError};

/// Smallest accepted heartbeat interval.
pub const MIN_INTERVAL_SECS: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unsupported command: {0}")]
    Unsupported(String),

    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("invalid interval {0:?}: expected seconds >= {MIN_INTERVAL_SECS}")]
    InvalidInterval(String),
}

/// State shared between the command handler and the main loop.
#[derive(Debug)]
pub struct CommandState {
    interval_secs: AtomicU64,
    pong_pending: AtomicBool,
}

impl CommandState {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs: AtomicU64::new(interval_secs.max(MIN_INTERVAL_SECS)),
            pong_pending: AtomicBool::new(false),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.load(Ordering::Relaxed)
    }

    /// Returns `true` once per received `ping`.
    pub fn take_pong(&self) -> bool {
        self.pong_pending.swap(false, Ordering::AcqRel)
    }
}

/// Handles one relay command.
pub fn handle(state: &CommandState, name: &str, params: &CommandParams) -> Result<(), HandlerError> {
    match name {
        "set-interval" => {
            let seconds = parse_interval(params)?;
            state.interval_secs.store(seconds, Ordering::Relaxed);
            tracing::info!(seconds, "telemetry interval updated");
            Ok(())
        }
        "ping" => {
            tracing::info!("ping received, pong queued");
            state.pong_pending.store(true, Ordering::Release);
            Ok(())
        }
        other => Err(CommandError::Unsupported(other.to_string()).into()),
    }
}

/// Accepts `{"seconds": n}` or a bare `"n"`.
///
/// A JSON number is truncated to whole seconds, so `2.5` means 2. Text must
/// be a whole number.
fn parse_interval(params: &CommandParams) -> Result<u64, CommandError> {
    if let Some(Value::Number(n)) = params.get("seconds") {
        let seconds = n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.trunc() as u64)
        });
        return match seconds {
            Some(seconds) if seconds >= MIN_INTERVAL_SECS => Ok(seconds),
            _ => Err(CommandError::InvalidInterval(n.to_string())),
        };
    }

    let raw = params
        .scalar("seconds")
        .ok_or(CommandError::MissingParameter("seconds"))?;
    match raw.parse::<u64>() {
        Ok(seconds) if seconds >= MIN_INTERVAL_SECS => Ok(seconds),
        _ => Err(CommandError::InvalidInterval(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(value: serde_json::Value) -> CommandParams {
        CommandParams::from_value(Some(value))
    }

    #[test]
    fn set_interval_from_object() {
        let state = CommandState::new(5);
        handle(&state, "set-interval", &structured(json!({"seconds": 2}))).unwrap();
        assert_eq!(state.interval_secs(), 2);

        handle(&state, "set-interval", &structured(json!({"seconds": "30"}))).unwrap();
        assert_eq!(state.interval_secs(), 30);
    }

    #[test]
    fn fractional_seconds_are_truncated() {
        let state = CommandState::new(5);
        handle(&state, "set-interval", &structured(json!({"seconds": 2.5}))).unwrap();
        assert_eq!(state.interval_secs(), 2);

        // Truncates below the floor.
        assert!(handle(&state, "set-interval", &structured(json!({"seconds": 0.9}))).is_err());
        // Text keeps whole-number syntax.
        assert!(handle(&state, "set-interval", &CommandParams::Text("2.5".into())).is_err());
        assert_eq!(state.interval_secs(), 2);
    }

    #[test]
    fn set_interval_from_text() {
        let state = CommandState::new(5);
        handle(&state, "set-interval", &CommandParams::Text(" 12 ".into())).unwrap();
        assert_eq!(state.interval_secs(), 12);
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let state = CommandState::new(5);
        for params in [
            structured(json!({"seconds": 0})),
            structured(json!({"seconds": -3})),
            structured(json!({"seconds": "soon"})),
            structured(json!({"other": 1})),
            CommandParams::Text("abc".into()),
            CommandParams::Absent,
        ] {
            assert!(
                handle(&state, "set-interval", &params).is_err(),
                "{params} should be rejected"
            );
        }
        assert_eq!(state.interval_secs(), 5);
    }

    #[test]
    fn ping_queues_one_pong() {
        let state = CommandState::new(5);
        assert!(!state.take_pong());
        handle(&state, "ping", &CommandParams::Absent).unwrap();
        assert!(state.take_pong());
        assert!(!state.take_pong());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let state = CommandState::new(5);
        let err = handle(&state, "reboot", &CommandParams::Absent).unwrap_err();
        assert_eq!(err.to_string(), "unsupported command: reboot");
    }

    #[test]
    fn initial_interval_has_floor() {
        assert_eq!(CommandState::new(0).interval_secs(), MIN_INTERVAL_SECS);
    }
}
