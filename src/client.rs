//! Session façade: the public API for driving a PHD2 guiding session.
//!
//! Every method here composes one or more RPC calls with waits on the
//! event-driven state the reader task projects in `connection.rs`. Each
//! operation checks the connection first and preserves session invariants
//! on failure (pre-installed state is rolled back, no line is sent for
//! arguments that fail validation up front).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Phd2Config;
use crate::connection::{spawn_reader_task, Shared};
use crate::error::{Phd2Error, Result};
use crate::events::AppState;
use crate::io::{ConnectionFactory, MessageWriter, TcpConnectionFactory};
use crate::rpc::RpcRequest;
use crate::stats::GuideStats;
use crate::types::{Profile, SettleProgress, SingleFrameResult, Subframe};

const DEFAULT_STOP_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LOOP_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A guiding session against one PHD2 instance.
///
/// Exactly one `Session` should be used per remote PHD2 instance at a
/// time; `connect` tears down and replaces any prior connection.
pub struct Session {
    config: Phd2Config,
    factory: Arc<dyn ConnectionFactory>,
    shared: Option<Arc<Shared>>,
    writer: Arc<AsyncMutex<Option<Box<dyn MessageWriter>>>>,
    reader_handle: Option<JoinHandle<()>>,
    terminate: Arc<AtomicBool>,
    /// Serializes `call` so at most one RPC is ever in flight, preserving
    /// O1 even if the façade is driven from multiple tasks concurrently.
    call_mutex: AsyncMutex<()>,
}

impl Session {
    /// Create a session that will dial real TCP sockets.
    pub fn new(config: Phd2Config) -> Self {
        Self::with_connection_factory(config, Arc::new(TcpConnectionFactory::new()))
    }

    /// Create a session backed by a custom `ConnectionFactory`, primarily
    /// for tests that substitute an in-memory or mock transport.
    pub fn with_connection_factory(config: Phd2Config, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            config,
            factory,
            shared: None,
            writer: Arc::new(AsyncMutex::new(None)),
            reader_handle: None,
            terminate: Arc::new(AtomicBool::new(false)),
            call_mutex: AsyncMutex::new(()),
        }
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.shared.as_ref().ok_or(Phd2Error::NotConnected)
    }

    // ---- lifecycle --------------------------------------------------

    /// Connect to `host:4400+(instance-1)`, tearing down any prior
    /// connection first. Starts the reader task.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect().await;

        let addr = format!("{}:{}", self.config.host, self.config.port());
        let timeout = Duration::from_secs(self.config.connect_timeout_seconds);
        self.terminate = Arc::new(AtomicBool::new(false));

        let pair = self
            .factory
            .connect(&addr, timeout, self.terminate.clone())
            .await?;

        let shared = Arc::new(Shared::new(self.terminate.clone()));
        let handle = spawn_reader_task(pair.reader, shared.clone());

        self.shared = Some(shared);
        *self.writer.lock().await = Some(pair.writer);
        self.reader_handle = Some(handle);
        info!("connected to PHD2 at {}", addr);
        Ok(())
    }

    /// Signal termination to the reader, wait for it to exit, close the
    /// socket. Idempotent.
    pub async fn disconnect(&mut self) {
        self.terminate.store(true, Ordering::Relaxed);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.await;
        }
        if let Some(shared) = &self.shared {
            shared.mark_disconnected().await;
        }
        self.shared = None;
    }

    // ---- RPC ----------------------------------------------------------

    /// Raw JSON-RPC invocation. Most callers should prefer the
    /// higher-level operations below.
    pub async fn call(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        let shared = self.shared()?;
        let _permit = self.call_mutex.lock().await;

        let request = RpcRequest::new(method, params);
        let line = serde_json::to_string(&request)
            .expect("RpcRequest serialization is infallible for the shapes this crate builds");

        {
            let mut writer_guard = self.writer.lock().await;
            let writer = writer_guard.as_deref_mut().ok_or(Phd2Error::NotConnected)?;
            debug!("-> {}", line);
            writer.write_message(&line).await?;
        }

        loop {
            let notified = shared.response_ready.notified();
            {
                let mut slot = shared.response_slot.lock().await;
                if let Some(value) = slot.take() {
                    debug!("<- {}", value);
                    if let Some(err) = value.get("error") {
                        let message = err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string();
                        return Err(Phd2Error::RpcError(message));
                    }
                    return Ok(value.get("result").cloned().unwrap_or(Value::Null));
                }
            }
            if !shared.connected.load(Ordering::Acquire) {
                return Err(Phd2Error::NotConnected);
            }
            notified.await;
        }
    }

    async fn call_no_result(&self, method: impl Into<String>, params: Option<Value>) -> Result<()> {
        self.call(method, params).await.map(|_| ())
    }

    // ---- guiding --------------------------------------------------------

    /// Start guiding with the given settling parameters.
    pub async fn guide(&self, settle_pixels: f64, settle_time: f64, settle_timeout: f64) -> Result<()> {
        let shared = self.shared()?;
        {
            let mut state = shared.state.lock().await;
            if let Some(existing) = &state.settle {
                if !existing.done {
                    return Err(Phd2Error::RpcError("cannot guide while settling".into()));
                }
            }
            state.settle = Some(SettleProgress {
                done: false,
                distance: 0.0,
                settle_px: settle_pixels,
                time: 0.0,
                settle_time,
                status: 0,
                error: None,
            });
        }

        let params = serde_json::json!([
            {"pixels": settle_pixels, "time": settle_time, "timeout": settle_timeout},
            false
        ]);
        match self.call_no_result("guide", Some(params)).await {
            Ok(()) => {
                shared.state.lock().await.settle_px = settle_pixels;
                Ok(())
            }
            Err(e) => {
                shared.state.lock().await.settle = None;
                Err(e)
            }
        }
    }

    /// Dither guiding with the given dither amount and settling parameters.
    pub async fn dither(
        &self,
        dither_pixels: f64,
        settle_pixels: f64,
        settle_time: f64,
        settle_timeout: f64,
    ) -> Result<()> {
        let shared = self.shared()?;
        {
            let mut state = shared.state.lock().await;
            if let Some(existing) = &state.settle {
                if !existing.done {
                    return Err(Phd2Error::RpcError("cannot dither while settling".into()));
                }
            }
            state.settle = Some(SettleProgress {
                done: false,
                distance: dither_pixels,
                settle_px: settle_pixels,
                time: 0.0,
                settle_time,
                status: 0,
                error: None,
            });
        }

        let params = serde_json::json!([
            dither_pixels,
            false,
            {"pixels": settle_pixels, "time": settle_time, "timeout": settle_timeout}
        ]);
        match self.call_no_result("dither", Some(params)).await {
            Ok(()) => {
                shared.state.lock().await.settle_px = settle_pixels;
                Ok(())
            }
            Err(e) => {
                shared.state.lock().await.settle = None;
                Err(e)
            }
        }
    }

    /// True iff a guide/dither settle is currently in progress.
    pub async fn is_settling(&self) -> Result<bool> {
        let shared = self.shared()?;
        {
            let state = shared.state.lock().await;
            if state.settle.is_some() {
                return Ok(true);
            }
        }
        let result = self.call("get_settling", None).await?;
        let settling = result.as_bool().unwrap_or(false);
        if settling {
            let mut state = shared.state.lock().await;
            if state.settle.is_none() {
                state.settle = Some(SettleProgress {
                    done: false,
                    distance: -1.0,
                    settle_px: 0.0,
                    time: 0.0,
                    settle_time: 0.0,
                    status: 0,
                    error: None,
                });
            }
        }
        Ok(settling)
    }

    /// Progress of the settle in flight, or its final outcome (consumed
    /// exactly once).
    pub async fn check_settling(&self) -> Result<SettleProgress> {
        let shared = self.shared()?;
        let mut state = shared.state.lock().await;
        let settle = state.settle.as_ref().ok_or(Phd2Error::NotSettling)?;
        if settle.done {
            let done = settle.clone();
            state.settle = None;
            Ok(done)
        } else {
            Ok(settle.clone())
        }
    }

    /// Guide statistics since the last `StartGuiding`/`SettleDone`.
    pub async fn get_stats(&self) -> Result<GuideStats> {
        let shared = self.shared()?;
        let mut stats = shared.state.lock().await.stats;
        stats.rms_tot = stats.rms_ra.hypot(stats.rms_dec);
        Ok(stats)
    }

    /// Stop looping and guiding, waiting (up to `timeout`) for `AppState`
    /// to become `Stopped`. Works around a known PHD2 bug where a trailing
    /// `GuideStep` suppresses `GuidingStopped`.
    pub async fn stop_capture(&self, timeout: Duration) -> Result<()> {
        let shared = self.shared()?;
        self.call_no_result("stop_capture", None).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if shared.state.lock().await.app_state == AppState::Stopped {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        warn!("stop_capture timed out waiting for Stopped, polling get_app_state");
        let result = self.call("get_app_state", None).await?;
        let state_str = result.as_str().unwrap_or_default().to_string();
        let parsed: AppState = state_str.parse().unwrap();
        let is_stopped = parsed == AppState::Stopped;
        shared.state.lock().await.app_state = parsed;
        if is_stopped {
            Ok(())
        } else {
            Err(Phd2Error::Timeout(format!(
                "guider did not stop capture after {:?}",
                timeout
            )))
        }
    }

    /// `stop_capture` with the default 10s deadline.
    pub async fn stop_capture_default(&self) -> Result<()> {
        self.stop_capture(DEFAULT_STOP_CAPTURE_TIMEOUT).await
    }

    /// Start looping exposures, waiting (up to `timeout`) for `AppState`
    /// to become `Looping`.
    pub async fn start_loop(&self, timeout: Duration) -> Result<()> {
        let shared = self.shared()?;
        if shared.state.lock().await.app_state == AppState::Looping {
            return Ok(());
        }

        let exposure_ms = self.get_exposure().await?;
        self.call_no_result("loop", None).await?;
        tokio::time::sleep(Duration::from_millis(exposure_ms as u64)).await;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if shared.state.lock().await.app_state == AppState::Looping {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Err(Phd2Error::Timeout(
            "timed-out waiting for guiding to start looping".into(),
        ))
    }

    pub async fn start_loop_default(&self) -> Result<()> {
        self.start_loop(DEFAULT_LOOP_TIMEOUT).await
    }

    // ---- equipment ------------------------------------------------------

    /// Connect the equipment in the named equipment profile, switching
    /// profiles first if needed.
    pub async fn connect_equipment(&self, profile_name: &str) -> Result<()> {
        let current = self.call("get_profile", None).await?;
        let current_name = current
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if current_name != profile_name {
            let profiles = self.get_profiles().await?;
            let id = profiles
                .iter()
                .find(|p| p.name == profile_name)
                .map(|p| p.id)
                .ok_or_else(|| Phd2Error::UnknownProfile(profile_name.to_string()))?;

            self.stop_capture_default().await?;
            self.call_no_result("set_connected", Some(Value::Bool(false)))
                .await?;
            self.call_no_result("set_profile", Some(Value::from(id)))
                .await?;
        }
        self.call_no_result("set_connected", Some(Value::Bool(true)))
            .await
    }

    /// Disconnect equipment.
    pub async fn disconnect_equipment(&self) -> Result<()> {
        self.stop_capture_default().await?;
        self.call_no_result("set_connected", Some(Value::Bool(false)))
            .await
    }

    async fn get_profiles(&self) -> Result<Vec<Profile>> {
        let result = self.call("get_profiles", None).await?;
        serde_json::from_value(result)
            .map_err(|e| Phd2Error::RpcError(format!("malformed get_profiles response: {}", e)))
    }

    /// Equipment profile names.
    pub async fn get_equipment_profiles(&self) -> Result<Vec<String>> {
        Ok(self.get_profiles().await?.into_iter().map(|p| p.name).collect())
    }

    // ---- pause / status -------------------------------------------------

    pub async fn pause(&self) -> Result<()> {
        self.call_no_result("set_paused", Some(Value::Bool(true))).await
    }

    pub async fn unpause(&self) -> Result<()> {
        self.call_no_result("set_paused", Some(Value::Bool(false))).await
    }

    /// Current (AppState, AvgDist).
    pub async fn get_status(&self) -> Result<(AppState, f64)> {
        let shared = self.shared()?;
        let state = shared.state.lock().await;
        Ok((state.app_state.clone(), state.avg_dist))
    }

    pub async fn is_guiding(&self) -> Result<bool> {
        let (state, _) = self.get_status().await?;
        Ok(state.is_guiding())
    }

    /// PHD2's reported `(PHDVersion, PHDSubver)`, captured from the initial
    /// `Version` event.
    pub async fn version(&self) -> Result<(String, String)> {
        let shared = self.shared()?;
        let state = shared.state.lock().await;
        Ok((state.version.clone(), state.phd_subver.clone()))
    }

    pub async fn save_image(&self) -> Result<String> {
        let result = self.call("save_image", None).await?;
        result
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Phd2Error::RpcError("save_image response missing filename".into()))
    }

    pub async fn pixel_scale(&self) -> Result<f64> {
        let result = self.call("get_pixel_scale", None).await?;
        result
            .as_f64()
            .ok_or_else(|| Phd2Error::RpcError("get_pixel_scale did not return a number".into()))
    }

    pub async fn get_exposure(&self) -> Result<i64> {
        let result = self.call("get_exposure", None).await?;
        result
            .as_i64()
            .ok_or_else(|| Phd2Error::RpcError("get_exposure did not return an integer".into()))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.call_no_result("shutdown", None).await
    }

    // ---- single frame capture --------------------------------------------

    /// Capture a single frame with the given optional parameters. Fails
    /// `InvalidArgument` (without sending any line) if `path` is given
    /// while `save == Some(false)`.
    #[allow(clippy::too_many_arguments)]
    pub async fn capture_single_frame(
        &self,
        exposure: Option<i64>,
        binning: Option<i64>,
        gain: Option<i64>,
        roi: Option<Subframe>,
        path: Option<String>,
        save: Option<bool>,
    ) -> Result<()> {
        if path.is_some() && save == Some(false) {
            return Err(Phd2Error::InvalidArgument(
                "path must be omitted when save is false".into(),
            ));
        }

        let shared = self.shared()?;

        let mut params = serde_json::Map::new();
        if let Some(e) = exposure {
            params.insert("exposure".into(), Value::from(e));
        }
        if let Some(b) = binning {
            params.insert("binning".into(), Value::from(b));
        }
        if let Some(g) = gain {
            params.insert("gain".into(), Value::from(g));
        }
        if let Some(r) = roi {
            params.insert("subframe".into(), Value::from(r.to_array().to_vec()));
        }
        if let Some(p) = path {
            params.insert("path".into(), Value::from(p));
        }
        if let Some(s) = save {
            params.insert("save".into(), Value::Bool(s));
        }

        shared.state.lock().await.single_frame = None;
        self.call_no_result("capture_single_frame", Some(Value::Object(params)))
            .await
    }

    /// Returns and clears the stored single-frame result, if complete.
    pub async fn check_single_frame(&self) -> Result<Option<SingleFrameResult>> {
        let shared = self.shared()?;
        let mut state = shared.state.lock().await;
        Ok(state.single_frame.take())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best-effort: unblocks the reader's poll loop and any blocked
        // caller promptly. `disconnect().await` is still the right way to
        // tear down a session deliberately; `Drop` can't await the join.
        self.terminate.store(true, Ordering::Relaxed);
    }
}
