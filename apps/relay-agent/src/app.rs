//! Application orchestrator: wires the relay client, command handling and
//! the heartbeat loop together.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use iotc_relay_client::{RelayClient, RelayConfig};

use crate::commands::{self, CommandState};
use crate::config::Config;
use crate::throttle::TelemetryThrottle;

/// How often the main loop checks the throttle and pending replies.
const TICK: Duration = Duration::from_millis(250);

/// Periodic status payload.
#[derive(Debug, Serialize)]
struct Heartbeat<'a> {
    #[serde(rename = "UnoQdemo")]
    demo: &'a str,
    interval_sec: u64,
    uptime_sec: u64,
    ts: i64,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Pong {
    event: &'static str,
    ts: i64,
}

/// Runs the agent until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let relay_config = RelayConfig::default()
        .with_retry_interval(Duration::from_secs(config.retry_interval_secs.max(1)));
    let client = Arc::new(RelayClient::with_config(
        &config.endpoint,
        config.client_id.clone(),
        relay_config,
    )?);

    let state = Arc::new(CommandState::new(config.telemetry_interval_secs));
    let handler_state = Arc::clone(&state);
    client.set_command_handler(move |name, params| {
        commands::handle(&handler_state, name, &params)
    });

    if !client.start().await {
        tracing::warn!(endpoint = %config.endpoint, "relay not reachable yet, will keep retrying");
    }

    let started = Instant::now();
    let mut throttle = TelemetryThrottle::new(Duration::from_secs(state.interval_secs()));
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!("agent ready");

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "failed to listen for Ctrl-C");
                }
                tracing::info!("SIGINT received, shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        if state.take_pong() {
            let pong = Pong {
                event: "pong",
                ts: chrono::Utc::now().timestamp(),
            };
            let ok = client.send_telemetry(&pong).await;
            tracing::debug!(ok, "pong sent");
        }

        throttle.set_interval(Duration::from_secs(state.interval_secs()));
        let now = Instant::now();
        if throttle.ready(now) {
            let heartbeat = heartbeat(&config.demo_name, state.interval_secs(), now - started);
            let ok = client.send_telemetry(&heartbeat).await;
            tracing::debug!(ok, uptime_sec = heartbeat.uptime_sec, "heartbeat sent");
            throttle.mark_sent(now);
        }
    }

    client.stop().await;
    Ok(())
}

fn heartbeat(demo: &str, interval_sec: u64, uptime: Duration) -> Heartbeat<'_> {
    Heartbeat {
        demo,
        interval_sec,
        uptime_sec: uptime.as_secs(),
        ts: chrono::Utc::now().timestamp(),
        status: "ok",
    }
}
