//! Wire types for the request/response channel and the output push channel.
//!
//! Requests are JSON objects tagged by `type`. Binary payloads and passwords
//! travel base64-encoded (`dataB64`, `passwordB64`, `sftpPasswordB64`).
//! Every reply carries `ok`; failed replies add `error` and optionally
//! `detail`, `hostPort` and `fingerprint`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallError, ErrorCode, RemoteError};

/// Identifier of a configured host.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a tab within a host. Allocated per host, never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl TabId {
    pub const FIRST: TabId = TabId(1);
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(host, tab)` pair addressing one terminal session.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TabKey {
    pub host: HostId,
    pub tab: TabId,
}

impl TabKey {
    pub fn new(host: HostId, tab: TabId) -> Self {
        Self { host, tab }
    }
}

impl fmt::Display for TabKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host {} tab {}", self.host, self.tab)
    }
}

/// Operations understood by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Op {
    Select {
        host_id: HostId,
        tab_id: TabId,
        cols: u16,
        rows: u16,
    },
    Input {
        host_id: HostId,
        tab_id: TabId,
        #[serde(rename = "dataB64", with = "b64")]
        data: Vec<u8>,
    },
    Resize {
        host_id: HostId,
        tab_id: TabId,
        cols: u16,
        rows: u16,
    },
    Disconnect {
        host_id: HostId,
        tab_id: TabId,
    },
    State {
        host_id: HostId,
        tab_id: TabId,
    },
    TrustHost {
        host_id: HostId,
    },
    SftpLs {
        host_id: HostId,
        path: String,
    },
    SftpMkdir {
        host_id: HostId,
        path: String,
    },
    SftpRm {
        host_id: HostId,
        path: String,
    },
    SftpMv {
        host_id: HostId,
        from: String,
        to: String,
    },
    SftpRead {
        host_id: HostId,
        path: String,
    },
    SftpWrite {
        host_id: HostId,
        path: String,
        #[serde(rename = "dataB64", with = "b64")]
        data: Vec<u8>,
    },
    SftpUploadBegin {
        host_id: HostId,
        dir: String,
        name: String,
    },
    SftpUploadChunk {
        upload_id: String,
        #[serde(rename = "dataB64", with = "b64")]
        data: Vec<u8>,
    },
    SftpUploadEnd {
        upload_id: String,
    },
    SftpDownload {
        host_id: HostId,
        path: String,
    },
}

impl Op {
    /// The wire name of the operation, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Select { .. } => "select",
            Op::Input { .. } => "input",
            Op::Resize { .. } => "resize",
            Op::Disconnect { .. } => "disconnect",
            Op::State { .. } => "state",
            Op::TrustHost { .. } => "trust_host",
            Op::SftpLs { .. } => "sftp_ls",
            Op::SftpMkdir { .. } => "sftp_mkdir",
            Op::SftpRm { .. } => "sftp_rm",
            Op::SftpMv { .. } => "sftp_mv",
            Op::SftpRead { .. } => "sftp_read",
            Op::SftpWrite { .. } => "sftp_write",
            Op::SftpUploadBegin { .. } => "sftp_upload_begin",
            Op::SftpUploadChunk { .. } => "sftp_upload_chunk",
            Op::SftpUploadEnd { .. } => "sftp_upload_end",
            Op::SftpDownload { .. } => "sftp_download",
        }
    }

    pub fn host(&self) -> Option<HostId> {
        match self {
            Op::Select { host_id, .. }
            | Op::Input { host_id, .. }
            | Op::Resize { host_id, .. }
            | Op::Disconnect { host_id, .. }
            | Op::State { host_id, .. }
            | Op::TrustHost { host_id }
            | Op::SftpLs { host_id, .. }
            | Op::SftpMkdir { host_id, .. }
            | Op::SftpRm { host_id, .. }
            | Op::SftpMv { host_id, .. }
            | Op::SftpRead { host_id, .. }
            | Op::SftpWrite { host_id, .. }
            | Op::SftpUploadBegin { host_id, .. }
            | Op::SftpDownload { host_id, .. } => Some(*host_id),
            Op::SftpUploadChunk { .. } | Op::SftpUploadEnd { .. } => None,
        }
    }
}

/// A single request on the channel: an operation plus optional credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(flatten)]
    pub op: Op,
    #[serde(
        rename = "passwordB64",
        with = "b64_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<String>,
    #[serde(
        rename = "sftpPasswordB64",
        with = "b64_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sftp_password: Option<String>,
}

impl Request {
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_sftp_password(mut self, password: Option<String>) -> Self {
        self.sftp_password = password;
        self
    }
}

impl From<Op> for Request {
    fn from(op: Op) -> Self {
        Self {
            op,
            password: None,
            sftp_password: None,
        }
    }
}

/// A chunk of terminal output pushed by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFrame {
    pub host_id: HostId,
    pub tab_id: TabId,
    pub data_b64: String,
}

impl OutputFrame {
    pub fn key(&self) -> TabKey {
        TabKey::new(self.host_id, self.tab_id)
    }
}

/// Coarse connection phase of one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Reconnecting { attempts: u32 },
    Connected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Disconnected => f.write_str("disconnected"),
            Phase::Reconnecting { attempts } => write!(f, "reconnecting ({attempts})"),
            Phase::Connected => f.write_str("connected"),
        }
    }
}

/// Last known connection state of a tab, as reported by a `state` poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub phase: Phase,
    pub error: Option<ErrorCode>,
    pub host_port: Option<String>,
    pub fingerprint: Option<String>,
    pub detail: Option<String>,
}

impl ConnectionState {
    fn with_phase(phase: Phase) -> Self {
        Self {
            phase,
            error: None,
            host_port: None,
            fingerprint: None,
            detail: None,
        }
    }

    /// Placeholder shown between a connect request and the first poll.
    pub fn optimistic() -> Self {
        Self::with_phase(Phase::Reconnecting { attempts: 0 })
    }

    pub fn disconnected() -> Self {
        Self::with_phase(Phase::Disconnected)
    }

    pub fn connected() -> Self {
        Self::with_phase(Phase::Connected)
    }

    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }

    pub fn is_disconnected(&self) -> bool {
        self.phase == Phase::Disconnected
    }

    /// Parse the body of a successful `state` reply.
    pub fn from_reply(body: Value) -> Result<Self, serde_json::Error> {
        let reply: StateReply = serde_json::from_value(body)?;
        let phase = match reply.state.as_str() {
            "connected" => Phase::Connected,
            "reconnecting" => Phase::Reconnecting {
                attempts: reply.attempts,
            },
            _ => Phase::Disconnected,
        };
        Ok(Self {
            phase,
            error: non_empty(reply.err_code).map(ErrorCode::from),
            host_port: non_empty(reply.host_port),
            fingerprint: non_empty(reply.fingerprint),
            detail: non_empty(reply.detail),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateReply {
    #[serde(default)]
    state: String,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    err_code: Option<String>,
    #[serde(default)]
    host_port: Option<String>,
    #[serde(default)]
    fingerprint: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Split a raw reply into success or a structured [`CallError`].
pub fn reply_into_result(body: Value) -> Result<Value, CallError> {
    match body.get("ok").and_then(Value::as_bool) {
        Some(true) => Ok(body),
        Some(false) => {
            let field = |name: &str| {
                body.get(name)
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            let code = field("error").unwrap_or_else(|| "unknown".to_string());
            Err(CallError::Remote(RemoteError {
                code: ErrorCode::from(code),
                detail: field("detail"),
                host_port: field("hostPort"),
                fingerprint: field("fingerprint"),
            }))
        }
        None => Err(CallError::Transport("reply without ok field".into())),
    }
}

pub(crate) mod b64 {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        BASE64
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(s) => serializer.serialize_str(&BASE64.encode(s.as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn input_request_encodes_data_as_base64() {
        let req = Request::from(Op::Input {
            host_id: HostId(3),
            tab_id: TabId(2),
            data: b"ls\r".to_vec(),
        });
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({"type": "input", "hostId": 3, "tabId": 2, "dataB64": "bHMN"})
        );
    }

    #[test]
    fn passwords_travel_base64_and_are_omitted_when_absent() {
        let req = Request::from(Op::SftpLs {
            host_id: HostId(1),
            path: "/tmp".into(),
        })
        .with_sftp_password(Some("pw".into()));
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "sftp_ls");
        assert_eq!(value["sftpPasswordB64"], "cHc=");
        assert!(value.get("passwordB64").is_none());

        let back: Request = serde_json::from_value(value).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn upload_chunk_uses_camel_case_upload_id() {
        let req = Request::from(Op::SftpUploadChunk {
            upload_id: "u-1".into(),
            data: vec![0, 1, 2],
        });
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["uploadId"], "u-1");
        assert_eq!(value["dataB64"], "AAEC");
        assert_eq!(req.op.host(), None);
    }

    #[test]
    fn state_reply_parses_reconnecting_with_trust_hint() {
        let state = ConnectionState::from_reply(json!({
            "ok": true,
            "state": "reconnecting",
            "attempts": 3,
            "detail": "",
            "errCode": "unknown_host_key",
            "hostPort": "10.0.0.1:22",
            "fingerprint": "SHA256:abc",
        }))
        .unwrap();
        assert_eq!(state.phase, Phase::Reconnecting { attempts: 3 });
        assert_eq!(state.error, Some(ErrorCode::UnknownHostKey));
        assert_eq!(state.host_port.as_deref(), Some("10.0.0.1:22"));
        assert_eq!(state.detail, None);
    }

    #[test]
    fn state_reply_defaults_to_disconnected() {
        let state = ConnectionState::from_reply(json!({"ok": true})).unwrap();
        assert!(state.is_disconnected());
        assert_eq!(state.error, None);
    }

    #[test]
    fn failed_reply_becomes_remote_error() {
        let err = reply_into_result(json!({
            "ok": false,
            "error": "host_key_mismatch",
            "hostPort": "h:22",
            "fingerprint": "SHA256:x",
        }))
        .unwrap_err();
        let remote = err.remote().unwrap();
        assert_eq!(remote.code, ErrorCode::HostKeyMismatch);
        assert_eq!(remote.fingerprint.as_deref(), Some("SHA256:x"));
        assert_eq!(remote.detail, None);
    }

    #[test]
    fn reply_without_ok_is_a_transport_error() {
        let err = reply_into_result(json!({"state": "connected"})).unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }

    #[test]
    fn output_frame_field_names() {
        let frame: OutputFrame =
            serde_json::from_value(json!({"hostId": 1, "tabId": 4, "dataB64": "QUI="})).unwrap();
        assert_eq!(frame.key(), TabKey::new(HostId(1), TabId(4)));
    }
}
