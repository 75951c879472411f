use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Liveness state of the current connection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum HeartbeatState {
    /// Not running
    Dead,
    /// A beat was sent and not acknowledged yet
    AwaitingAck,
    /// The last beat was acknowledged
    Resting,
}

/// Cancels the inner [`CancellationToken`], if any, when dropped, so a monitor
/// that goes away never leaves its beat task behind.
#[derive(Debug, Default)]
struct DroppingCancellationToken(Option<CancellationToken>);

impl DroppingCancellationToken {
    fn cancel(&mut self) {
        if let Some(token) = self.0.take() {
            token.cancel();
        }
    }
}

impl Drop for DroppingCancellationToken {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Sends heartbeats at the server-dictated interval and detects missed acknowledgements.
///
/// The monitor never writes to the socket itself. Each beat is a `()` pushed into
/// `beat_tx`; the read loop owning the socket turns it into a heartbeat frame
/// carrying the current sequence number.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    state: Arc<Mutex<HeartbeatState>>,
    beat_tx: UnboundedSender<()>,
    token: Mutex<DroppingCancellationToken>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(beat_tx: UnboundedSender<()>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HeartbeatState::Dead)),
            beat_tx,
            token: Mutex::new(DroppingCancellationToken::default()),
        }
    }

    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Beat once right away, then every `interval`.
    ///
    /// If a scheduled beat finds the previous one still unacknowledged, `on_death`
    /// runs once and the monitor stops without re-arming. Starting an already
    /// running monitor restarts it.
    pub fn start<F>(&self, interval: Duration, on_death: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut current = self.token.lock().unwrap_or_else(PoisonError::into_inner);
            current.cancel();
            current.0 = Some(token.clone());
        }

        self.set_state(HeartbeatState::AwaitingAck);
        if self.beat_tx.send(()).is_err() {
            self.kill();
            return;
        }

        let state = Arc::clone(&self.state);
        let beat_tx = self.beat_tx.clone();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let alive = {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    match *state {
                        HeartbeatState::Resting => {
                            *state = HeartbeatState::AwaitingAck;
                            true
                        }
                        HeartbeatState::AwaitingAck => {
                            *state = HeartbeatState::Dead;
                            false
                        }
                        HeartbeatState::Dead => break,
                    }
                };

                if !alive {
                    #[cfg(feature = "tracing")]
                    warn!(?interval, "Heartbeat was not acknowledged");
                    on_death();
                    break;
                }

                if beat_tx.send(()).is_err() {
                    break;
                }
            }
        });
    }

    /// Record a heartbeat acknowledgement.
    pub fn acknowledge(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == HeartbeatState::AwaitingAck {
            *state = HeartbeatState::Resting;
        }

        #[cfg(feature = "tracing")]
        debug!("Heartbeat acknowledged");
    }

    /// Beat immediately, outside the schedule. Used when the server asks for a heartbeat.
    ///
    /// The schedule and the ack state are left as they are.
    pub fn beat_now(&self) {
        if self.state() != HeartbeatState::Dead {
            _ = self.beat_tx.send(());
        }
    }

    /// Stop the beat task. Calling it again is a no-op.
    pub fn kill(&self) {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        self.set_state(HeartbeatState::Dead);
    }

    fn set_state(&self, next: HeartbeatState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }
}
