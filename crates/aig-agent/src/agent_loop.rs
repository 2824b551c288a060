use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatcher::HandlerRegistry;
use crate::session::{run_session, ConnectionState, SessionConfig};

/// Keep a session alive until `shutdown` fires: connect, serve until the
/// connection drops, wait `reconnect_interval`, repeat. The delay is fixed
/// and attempts are unlimited.
pub async fn run(
    config: SessionConfig,
    registry: Arc<HandlerRegistry>,
    state: watch::Sender<ConnectionState>,
    reconnect_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut attempt: u64 = 0;
    while !shutdown.is_cancelled() {
        attempt += 1;
        match run_session(&config, registry.clone(), &state, &shutdown).await {
            Ok(()) => info!("session closed"),
            Err(e) => warn!("session {attempt} ended: {e}"),
        }
        state.send_replace(ConnectionState::Disconnected);

        if shutdown.is_cancelled() {
            break;
        }
        info!("reconnecting in {}ms", reconnect_interval.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(reconnect_interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
    state.send_replace(ConnectionState::Disconnected);
    info!("agent loop stopped");
}
