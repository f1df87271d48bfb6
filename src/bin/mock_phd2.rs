//! Mock PHD2 server for integration tests and manual exercising of the
//! client. Emits a `Version` event on connect and simulates the event
//! sequences real PHD2 produces for guide/dither/capture rather than
//! returning static canned replies.
//!
//! Usage: `mock_phd2 [PORT]`. Port also settable via `MOCK_PHD2_PORT`; the
//! positional argument takes precedence. Default port is 4400.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct ConnState {
    app_state: String,
}

async fn send(stream: &mut (impl AsyncWriteExt + Unpin), value: &Value) {
    let line = format!("{}\r\n", value);
    if let Err(e) = stream.write_all(line.as_bytes()).await {
        warn!("write failed: {}", e);
    }
}

type SharedWriter = Arc<Mutex<tokio::net::tcp::OwnedWriteHalf>>;

async fn handle_connection(stream: TcpStream) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let writer: SharedWriter = Arc::new(Mutex::new(write_half));

    {
        let mut w = writer.lock().await;
        send(
            &mut *w,
            &json!({"Event": "Version", "PHDVersion": "2.6.13", "PHDSubver": "dev1"}),
        )
        .await;
    }

    let state = Arc::new(Mutex::new(ConnState {
        app_state: "Stopped".to_string(),
    }));

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("read error: {}", e);
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug!("<- {}", trimmed);

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping unparseable request: {}", e);
                continue;
            }
        };
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned();

        let result = match method {
            "guide" => {
                let writer = writer.clone();
                let state = state.clone();
                tokio::spawn(simulate_settle(writer, state, params, false));
                Value::Bool(true)
            }
            "dither" => {
                let writer = writer.clone();
                let state = state.clone();
                tokio::spawn(simulate_settle(writer, state, params, true));
                Value::Bool(true)
            }
            "get_settling" => Value::Bool(false),
            "stop_capture" => {
                let writer = writer.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    state.lock().await.app_state = "Stopped".to_string();
                    let mut w = writer.lock().await;
                    send(&mut *w, &json!({"Event": "GuidingStopped"})).await;
                });
                Value::Bool(true)
            }
            "loop" => {
                let writer = writer.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    let mut w = writer.lock().await;
                    send(&mut *w, &json!({"Event": "LoopingExposures", "Frame": 1})).await;
                });
                Value::Bool(true)
            }
            "get_exposure" => Value::from(1000),
            "get_profile" => json!({"id": 1, "name": "Simulator"}),
            "get_profiles" => json!([{"id": 1, "name": "Simulator"}]),
            "set_connected" | "set_profile" | "set_paused" => Value::Bool(true),
            "get_app_state" => Value::String(state.lock().await.app_state.clone()),
            "get_pixel_scale" => Value::from(1.23),
            "save_image" => json!({"filename": "/tmp/mock_phd2.fits"}),
            "capture_single_frame" => {
                let writer = writer.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    let mut w = writer.lock().await;
                    send(
                        &mut *w,
                        &json!({"Event": "SingleFrameComplete", "Success": true, "Path": "/tmp/frame.fits"}),
                    )
                    .await;
                });
                Value::Bool(true)
            }
            "shutdown" => Value::Bool(true),
            other => {
                warn!("unhandled method {}", other);
                Value::Null
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::from(1));
        let mut w = writer.lock().await;
        send(&mut *w, &json!({"jsonrpc": "2.0", "result": result, "id": id})).await;
    }
    info!("connection closed");
}

async fn simulate_settle(
    writer: SharedWriter,
    state: Arc<Mutex<ConnState>>,
    params: Option<Value>,
    is_dither: bool,
) {
    let settle = params
        .as_ref()
        .and_then(|p| p.as_array())
        .and_then(|arr| arr.iter().find(|v| v.is_object()))
        .cloned()
        .unwrap_or_else(|| json!({"pixels": 1.5, "time": 4.0, "timeout": 30.0}));
    let settle_time = settle.get("time").and_then(Value::as_f64).unwrap_or(4.0);

    state.lock().await.app_state = "Guiding".to_string();

    {
        let mut w = writer.lock().await;
        send(&mut *w, &json!({"Event": "SettleBegin"})).await;
    }

    let steps = 3;
    for i in 0..steps {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let distance = if is_dither { 3.0 } else { 5.0 } * (1.0 - (i as f64 + 1.0) / steps as f64);
        let mut w = writer.lock().await;
        send(
            &mut *w,
            &json!({
                "Event": "Settling",
                "Distance": distance,
                "Time": (i as f64 + 1.0) * 0.5,
                "SettleTime": settle_time,
            }),
        )
        .await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    let mut w = writer.lock().await;
    send(&mut *w, &json!({"Event": "SettleDone", "Status": 0, "Error": Value::Null})).await;
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            std::env::var("MOCK_PHD2_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
        })
        .unwrap_or(4400);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|e| panic!("failed to bind port {}: {}", port, e));
    info!("mock PHD2 listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("accepted connection from {}", addr);
                tokio::spawn(handle_connection(stream));
            }
            Err(e) => warn!("accept failed: {}", e),
        }
    }
}
