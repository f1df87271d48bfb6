//! Façade-level behavior against hand-written fake transports: settle
//! pre-install/rollback, `CheckSettling` once-per-cycle, `StopCapture`
//! timeout+workaround, `ConnectEquipment` unknown-profile rejection, and
//! `CaptureSingleFrame` argument validation.
//!
//! These are plain trait implementations rather than `mockall` mocks:
//! `mockall` is a dev-dependency of the library crate, so its generated
//! `Mock*` types only exist inside the library's own `#[cfg(test)]` build,
//! not for external integration tests like this one.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;

use phd2_client::io::{ConnectionFactory, ConnectionPair, LineReader, MessageWriter};
use phd2_client::{Phd2Config, Phd2Error, Result, Session};

struct ScriptedReader {
    lines: StdMutex<VecDeque<String>>,
}

#[async_trait]
impl LineReader for ScriptedReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        Ok(self.lines.lock().unwrap().pop_front())
    }
}

struct RecordingWriter {
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl MessageWriter for RecordingWriter {
    async fn write_message(&mut self, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

struct ScriptedFactory {
    lines: Vec<String>,
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn connect(
        &self,
        _addr: &str,
        _timeout: Duration,
        _terminate: Arc<AtomicBool>,
    ) -> Result<ConnectionPair> {
        Ok(ConnectionPair {
            reader: Box::new(ScriptedReader {
                lines: StdMutex::new(self.lines.clone().into()),
            }),
            writer: Box::new(RecordingWriter {
                sent: self.sent.clone(),
            }),
        })
    }
}

fn config() -> Phd2Config {
    Phd2Config {
        host: "127.0.0.1".into(),
        instance: 1,
        connect_timeout_seconds: 1,
        command_timeout_seconds: 1,
    }
}

async fn session_with_script(lines: Vec<&str>, sent: Arc<StdMutex<Vec<String>>>) -> Session {
    let factory = ScriptedFactory {
        lines: lines.into_iter().map(str::to_string).collect(),
        sent,
    };
    let mut session = Session::with_connection_factory(config(), Arc::new(factory));
    session.connect().await.unwrap();
    session
}

#[tokio::test]
async fn guide_rolls_back_settle_state_on_rpc_error() {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let session = session_with_script(
        vec![r#"{"jsonrpc":"2.0","error":{"code":1,"message":"no star selected"},"id":1}"#],
        sent,
    )
    .await;

    let result = session.guide(2.0, 10.0, 100.0).await;
    assert!(matches!(result, Err(Phd2Error::RpcError(_))));

    let is_settling = session.is_settling().await;
    assert!(is_settling.is_err() || !is_settling.unwrap());
}

#[tokio::test]
async fn check_settling_without_a_settle_in_progress_fails_not_settling() {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let session = session_with_script(vec![], sent).await;
    let result = session.check_settling().await;
    assert!(matches!(result, Err(Phd2Error::NotSettling)));
}

#[tokio::test]
async fn check_settling_returns_done_exactly_once() {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let session = session_with_script(
        vec![
            r#"{"jsonrpc":"2.0","result":0,"id":1}"#,
            r#"{"Event":"SettleDone","Status":0,"Error":null}"#,
        ],
        sent,
    )
    .await;

    session.guide(1.0, 5.0, 30.0).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = session.check_settling().await.unwrap();
    assert!(first.done);

    let second = session.check_settling().await;
    assert!(matches!(second, Err(Phd2Error::NotSettling)));
}

#[tokio::test]
async fn stop_capture_times_out_and_falls_back_to_get_app_state() {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let session = session_with_script(
        vec![
            r#"{"jsonrpc":"2.0","result":0,"id":1}"#,
            r#"{"jsonrpc":"2.0","result":"Stopped","id":1}"#,
        ],
        sent.clone(),
    )
    .await;

    session.stop_capture(Duration::from_millis(200)).await.unwrap();

    let sent = sent.lock().unwrap();
    assert!(sent.iter().any(|l| l.contains("stop_capture")));
    assert!(sent.iter().any(|l| l.contains("get_app_state")));
}

#[tokio::test]
async fn connect_equipment_rejects_unknown_profile_without_setting_it() {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let session = session_with_script(
        vec![
            r#"{"jsonrpc":"2.0","result":{"name":"A"},"id":1}"#,
            r#"{"jsonrpc":"2.0","result":[{"name":"A","id":1}],"id":1}"#,
        ],
        sent.clone(),
    )
    .await;

    let result = session.connect_equipment("B").await;
    assert!(matches!(result, Err(Phd2Error::UnknownProfile(name)) if name == "B"));

    let sent = sent.lock().unwrap();
    assert!(!sent.iter().any(|l| l.contains("set_profile")));
}

#[tokio::test]
async fn capture_single_frame_rejects_path_without_save_and_sends_nothing() {
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let session = session_with_script(vec![], sent.clone()).await;

    let result = session
        .capture_single_frame(None, None, None, None, Some("/x".into()), Some(false))
        .await;
    assert!(matches!(result, Err(Phd2Error::InvalidArgument(_))));
    assert!(sent.lock().unwrap().is_empty());
}
