//! Control protocol spoken over `~/.kvmirror/daemon.sock`.
//!
//! One JSON object per line in each direction. Requests are tagged by `cmd`:
//!
//! ```text
//! {"cmd":"status"}
//! {"cmd":"reconcile"}                          every intent
//! {"cmd":"reconcile","intent":"platform/db"}   one intent
//! {"cmd":"stop"}
//! ```
//!
//! Every reply is a [`DaemonResponse`].

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum DaemonRequest {
    Status,
    Reconcile {
        /// `<namespace>/<name>`; absent means every intent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        intent: Option<String>,
    },
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn into_data(self) -> Result<Value, DaemonError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        Err(DaemonError::Protocol(
            self.error.unwrap_or_else(|| "daemon returned an error".to_string()),
        ))
    }
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    call(home, &DaemonRequest::Status)
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    call(home, &DaemonRequest::Stop).map(|_| ())
}

/// Ask the running daemon to reconcile one intent, or all of them, and wait
/// for the run summary.
pub fn request_reconcile(home: &Path, intent: Option<String>) -> Result<Value, DaemonError> {
    call(home, &DaemonRequest::Reconcile { intent })
}

/// One request, one response line. A missing socket or a refused connection
/// means no daemon is listening.
fn call(home: &Path, request: &DaemonRequest) -> Result<Value, DaemonError> {
    let socket = socket_path(home);
    let mut stream = UnixStream::connect(&socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused => DaemonError::DaemonNotRunning {
            socket: socket.clone(),
        },
        _ => io_err(&socket, err),
    })?;

    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    stream
        .write_all(&payload)
        .map_err(|e| io_err(&socket, e))?;

    let mut line = String::new();
    let read = BufReader::new(stream)
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed the connection without replying".to_string(),
        ));
    }
    serde_json::from_str::<DaemonResponse>(line.trim_end())?.into_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_cmd() {
        assert_eq!(
            serde_json::to_string(&DaemonRequest::Status).unwrap(),
            r#"{"cmd":"status"}"#
        );
        assert_eq!(
            serde_json::to_string(&DaemonRequest::Reconcile { intent: None }).unwrap(),
            r#"{"cmd":"reconcile"}"#
        );
        let scoped: DaemonRequest =
            serde_json::from_str(r#"{"cmd":"reconcile","intent":"platform/db"}"#).unwrap();
        assert_eq!(
            scoped,
            DaemonRequest::Reconcile {
                intent: Some("platform/db".to_string())
            }
        );
    }

    #[test]
    fn unknown_command_does_not_decode() {
        assert!(serde_json::from_str::<DaemonRequest>(r#"{"cmd":"bogus"}"#).is_err());
    }

    #[test]
    fn error_response_becomes_protocol_error() {
        let err = DaemonResponse::error("boom").into_data().unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(msg) if msg == "boom"));
    }

    #[test]
    fn ok_response_yields_data() {
        let data = DaemonResponse::ok(json!({"running": true})).into_data().unwrap();
        assert_eq!(data["running"], json!(true));
    }

    #[test]
    fn missing_socket_reports_not_running() {
        let home = tempfile::TempDir::new().expect("home");
        let err = request_status(home.path()).unwrap_err();
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }));
    }
}
