//! Event dispatcher / state projection.
//!
//! A single reader task owns line framing and drives the session's derived
//! state. Every inbound line is parsed as JSON; JSON-RPC responses go to
//! the pending-response slot, events go through `apply_event`, parse
//! failures are dropped silently.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{AppState, Phd2Event};
use crate::io::LineReader;
use crate::rpc::Phd2Message;
use crate::stats::{self, Accumulator, GuideStats};
use crate::types::SettleProgress;

/// Derived session state (spec's data model table), mutated only by the
/// reader task, under `state`'s lock.
#[derive(Debug, Default)]
pub struct SessionState {
    pub app_state: AppState,
    pub avg_dist: f64,
    pub version: String,
    pub phd_subver: String,
    pub settle: Option<SettleProgress>,
    pub stats: GuideStats,
    pub settle_px: f64,
    pub single_frame: Option<crate::types::SingleFrameResult>,
}

/// State shared between the reader task and the session façade.
pub struct Shared {
    pub state: Mutex<SessionState>,
    pub response_slot: Mutex<Option<Value>>,
    pub response_ready: Notify,
    pub connected: AtomicBool,
    pub terminate: Arc<AtomicBool>,
}

impl Shared {
    pub fn new(terminate: Arc<AtomicBool>) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            response_slot: Mutex::new(None),
            response_ready: Notify::new(),
            connected: AtomicBool::new(true),
            terminate,
        }
    }

    pub async fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.response_ready.notify_waiters();
    }
}

/// Per-axis running stats, owned exclusively by the reader task
/// (single-writer, no lock) and published into `Shared::state.stats`
/// under its mutex.
struct ReaderAccumulators {
    active: bool,
    ra: Accumulator,
    dec: Accumulator,
}

impl ReaderAccumulators {
    fn new() -> Self {
        Self {
            active: false,
            ra: Accumulator::new(),
            dec: Accumulator::new(),
        }
    }

    fn reset(&mut self) {
        self.ra.reset();
        self.dec.reset();
    }

    fn snapshot(&self) -> GuideStats {
        stats::snapshot(&self.ra, &self.dec)
    }
}

async fn apply_event(ev: Phd2Event, shared: &Shared, accum: &mut ReaderAccumulators) {
    match ev {
        Phd2Event::Version {
            phd_version,
            phd_subver,
        } => {
            let mut state = shared.state.lock().await;
            state.version = phd_version;
            state.phd_subver = phd_subver.unwrap_or_default();
        }
        Phd2Event::AppState { state: raw } => {
            let parsed = AppState::from_str(&raw).unwrap();
            let mut state = shared.state.lock().await;
            let is_guiding = parsed.is_guiding();
            state.app_state = parsed;
            if is_guiding {
                state.avg_dist = 0.0;
            }
        }
        Phd2Event::StartGuiding => {
            accum.active = true;
            accum.reset();
            let fresh = accum.snapshot();
            let mut state = shared.state.lock().await;
            state.stats = fresh;
        }
        Phd2Event::GuideStep(step) => {
            if accum.active {
                accum.ra.add(step.ra_distance_raw);
                accum.dec.add(step.dec_distance_raw);
            }
            let snapshot = accum.active.then(|| accum.snapshot());
            let mut state = shared.state.lock().await;
            state.app_state = AppState::Guiding;
            state.avg_dist = step.avg_dist;
            if let Some(s) = snapshot {
                state.stats = s;
            }
        }
        Phd2Event::SettleBegin => {
            accum.active = false;
        }
        Phd2Event::Settling {
            distance,
            time,
            settle_time,
        } => {
            let mut state = shared.state.lock().await;
            let settle_px = state.settle_px;
            state.settle = Some(SettleProgress {
                done: false,
                distance,
                settle_px,
                time,
                settle_time,
                status: 0,
                error: None,
            });
        }
        Phd2Event::SettleDone { status, error } => {
            accum.active = true;
            accum.reset();
            let snapshot = accum.snapshot();
            let mut state = shared.state.lock().await;
            state.settle = Some(SettleProgress {
                done: true,
                distance: 0.0,
                settle_px: 0.0,
                time: 0.0,
                settle_time: 0.0,
                status,
                error,
            });
            state.stats = snapshot;
        }
        Phd2Event::Paused => {
            shared.state.lock().await.app_state = AppState::Paused;
        }
        Phd2Event::StartCalibration => {
            shared.state.lock().await.app_state = AppState::Calibrating;
        }
        Phd2Event::LoopingExposures { .. } => {
            shared.state.lock().await.app_state = AppState::Looping;
        }
        Phd2Event::LoopingExposuresStopped | Phd2Event::GuidingStopped => {
            shared.state.lock().await.app_state = AppState::Stopped;
        }
        Phd2Event::StarLost { avg_dist } => {
            let mut state = shared.state.lock().await;
            state.app_state = AppState::LostLock;
            state.avg_dist = avg_dist;
        }
        Phd2Event::SingleFrameComplete {
            success,
            error,
            path,
        } => {
            shared.state.lock().await.single_frame = Some(crate::types::SingleFrameResult {
                success,
                error_message: error,
                path,
            });
        }
        Phd2Event::Other { .. } => {}
    }
}

/// Spawn the reader task: owns framing (via `reader`) and drives the state
/// projection until the connection is terminated or the peer disconnects.
pub fn spawn_reader_task(mut reader: Box<dyn LineReader>, shared: Arc<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut accum = ReaderAccumulators::new();
        loop {
            match reader.read_line().await {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Phd2Message>(&line) {
                        Ok(Phd2Message::Response(resp)) => {
                            let value = match resp.error {
                                Some(err) => {
                                    serde_json::json!({"error": {"message": err.message}})
                                }
                                None => serde_json::json!({"result": resp.result}),
                            };
                            *shared.response_slot.lock().await = Some(value);
                            shared.response_ready.notify_waiters();
                        }
                        Ok(Phd2Message::Event(ev)) => {
                            apply_event(ev, &shared, &mut accum).await;
                        }
                        Err(e) => {
                            warn!("dropping unparseable line ({}): {}", e, line);
                        }
                    }
                }
                Ok(None) => {
                    debug!("reader task ending: connection closed or terminated");
                    break;
                }
                Err(e) => {
                    warn!("reader task error: {}", e);
                    break;
                }
            }
        }
        shared.mark_disconnected().await;
    })
}
