//! Host-scoped file operations on the request channel.
//!
//! Every operation goes through [`TransferClient::call_with_credentials`],
//! which attaches the right password and answers at most one trust error and
//! one password error per call through the shared prompt gates.

use std::path::{Path, PathBuf};

use data_encoding::BASE64;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::browser::Listing;
use crate::config::TransferConfig;
use crate::error::{CallError, TransferError};
use crate::interaction::{Outcome, Resolution};
use crate::protocol::{HostId, Op, Request};
use crate::services::Services;
use crate::transport::TransportExt;

/// Summary of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub upload_id: String,
    pub bytes_sent: u64,
    pub chunks: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadBeginReply {
    upload_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadReply {
    local_path: PathBuf,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReply {
    #[serde(default)]
    data_b64: String,
}

#[derive(Clone)]
pub struct TransferClient {
    services: Services,
    config: TransferConfig,
}

impl TransferClient {
    pub fn new(services: Services, config: TransferConfig) -> Self {
        Self { services, config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub async fn list(&self, host: HostId, path: &str) -> Result<Listing, TransferError> {
        let body = self
            .call_with_credentials(
                host,
                Op::SftpLs {
                    host_id: host,
                    path: path.to_string(),
                },
            )
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    pub async fn mkdir(&self, host: HostId, path: &str) -> Result<(), TransferError> {
        self.call_with_credentials(
            host,
            Op::SftpMkdir {
                host_id: host,
                path: path.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn remove(&self, host: HostId, path: &str) -> Result<(), TransferError> {
        self.call_with_credentials(
            host,
            Op::SftpRm {
                host_id: host,
                path: path.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn rename(&self, host: HostId, from: &str, to: &str) -> Result<(), TransferError> {
        self.call_with_credentials(
            host,
            Op::SftpMv {
                host_id: host,
                from: from.to_string(),
                to: to.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Read a whole remote file, up to the configured limit.
    pub async fn read(&self, host: HostId, path: &str) -> Result<Vec<u8>, TransferError> {
        let body = self
            .call_with_credentials(
                host,
                Op::SftpRead {
                    host_id: host,
                    path: path.to_string(),
                },
            )
            .await?;
        let reply: ReadReply = serde_json::from_value(body)?;
        let data = BASE64.decode(reply.data_b64.as_bytes())?;
        if data.len() > self.config.read_limit {
            return Err(TransferError::TooLarge {
                size: data.len() as u64,
                limit: self.config.read_limit as u64,
            });
        }
        Ok(data)
    }

    pub async fn write(&self, host: HostId, path: &str, data: Vec<u8>) -> Result<(), TransferError> {
        self.call_with_credentials(
            host,
            Op::SftpWrite {
                host_id: host,
                path: path.to_string(),
                data,
            },
        )
        .await?;
        Ok(())
    }

    /// Have the remote side download a file. Returns the path it was saved to.
    pub async fn download(&self, host: HostId, path: &str) -> Result<PathBuf, TransferError> {
        let body = self
            .call_with_credentials(
                host,
                Op::SftpDownload {
                    host_id: host,
                    path: path.to_string(),
                },
            )
            .await?;
        let reply: DownloadReply = serde_json::from_value(body)?;
        info!(host = %host, remote = path, local = %reply.local_path.display(), "download complete");
        Ok(reply.local_path)
    }

    /// Upload everything `reader` yields as `dir/name`.
    ///
    /// Chunks are read one at a time, each only after the previous chunk call
    /// resolved. A failed chunk abandons the upload without an `end` call.
    pub async fn upload<R>(
        &self,
        host: HostId,
        dir: &str,
        name: &str,
        mut reader: R,
    ) -> Result<UploadReport, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let body = self
            .call_with_credentials(
                host,
                Op::SftpUploadBegin {
                    host_id: host,
                    dir: dir.to_string(),
                    name: name.to_string(),
                },
            )
            .await?;
        let UploadBeginReply { upload_id } = serde_json::from_value(body)?;
        info!(host = %host, dir, name, upload_id = %upload_id, "upload started");

        let chunk_size = self.config.chunk_size.max(1);
        let mut buf = Vec::with_capacity(chunk_size);
        let mut bytes_sent = 0u64;
        let mut chunks = 0usize;
        loop {
            let n = match read_chunk(&mut reader, &mut buf, chunk_size).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(upload_id = %upload_id, "upload abandoned, local read failed: {}", e);
                    return Err(e.into());
                }
            };
            if n == 0 {
                break;
            }
            let request = Request::from(Op::SftpUploadChunk {
                upload_id: upload_id.clone(),
                data: std::mem::take(&mut buf),
            });
            if let Err(e) = self.services.transport.request(request).await {
                warn!(upload_id = %upload_id, chunk = chunks, "upload abandoned: {}", e);
                return Err(e.into());
            }
            chunks += 1;
            bytes_sent += n as u64;
            debug!(upload_id = %upload_id, chunk = chunks, bytes_sent, "chunk sent");
            if n < chunk_size {
                break;
            }
        }

        self.services
            .transport
            .request(Request::from(Op::SftpUploadEnd {
                upload_id: upload_id.clone(),
            }))
            .await?;
        info!(upload_id = %upload_id, bytes_sent, chunks, "upload complete");
        Ok(UploadReport {
            upload_id,
            bytes_sent,
            chunks,
        })
    }

    /// Upload a local file into `dir`, keeping its file name.
    pub async fn upload_file(
        &self,
        host: HostId,
        local: &Path,
        dir: &str,
    ) -> Result<UploadReport, TransferError> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", local.display()),
                )
            })?;
        let file = tokio::fs::File::open(local).await?;
        self.upload(host, dir, &name, file).await
    }

    /// Issue `op` with the host's transfer credentials, answering one trust
    /// error and one password error along the way.
    async fn call_with_credentials(&self, host: HostId, op: Op) -> Result<Value, TransferError> {
        let record = self
            .services
            .hosts
            .host(host)
            .ok_or(TransferError::UnknownHost(host))?;
        if !record.sftp.enabled {
            return Err(TransferError::Disabled(host));
        }

        let mut trust_answered = false;
        let mut password_answered = false;
        loop {
            let creds = self.services.credentials.transfer_credentials(&record);
            let sent = creds.password.clone();
            let request = Request::from(op.clone())
                .with_password(creds.password)
                .with_sftp_password(creds.sftp_password);
            let err = match self.services.transport.request(request).await {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };
            let CallError::Remote(remote) = &err else {
                return Err(err.into());
            };

            if remote.code.is_trust() && !trust_answered {
                trust_answered = true;
                match self.services.resolve_trust(&record, remote).await {
                    Some(Resolution {
                        outcome: Outcome::Accepted,
                        ..
                    }) => continue,
                    Some(Resolution {
                        outcome: Outcome::Failed(message),
                        ..
                    }) => return Err(TransferError::Trust(message)),
                    _ => return Err(TransferError::TrustDeclined),
                }
            }

            if remote.code.is_password()
                && !password_answered
                && record.connection_password_reusable_for_sftp()
            {
                password_answered = true;
                match self.services.resolve_password(&record, sent.as_deref()).await {
                    Some(Resolution {
                        outcome: Outcome::Accepted,
                        ..
                    }) => continue,
                    _ => return Err(TransferError::PasswordDeclined),
                }
            }

            debug!(host = %host, op = op.kind(), "transfer failed: {}", err);
            return Err(err.into());
        }
    }
}

/// Fill `buf` with up to `size` bytes. Short only at end of input.
async fn read_chunk<R>(reader: &mut R, buf: &mut Vec<u8>, size: usize) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    buf.resize(size, 0);
    let mut filled = 0;
    while filled < size {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{AuthMethod, CredentialMode, HostDirectory, StaticHosts, test_host};
    use crate::testing::{FakeFrontend, FakeTransport, fail, fail_trust, ok};
    use serde_json::json;
    use std::sync::Arc;

    struct Harness {
        transport: Arc<FakeTransport>,
        frontend: Arc<FakeFrontend>,
        hosts: Arc<StaticHosts>,
        client: TransferClient,
    }

    fn harness_with(record: crate::host::HostRecord, chunk_size: usize) -> Harness {
        let transport = FakeTransport::new();
        let frontend = FakeFrontend::new();
        let hosts = Arc::new(StaticHosts::new([record]));
        let services = Services::new(transport.clone(), frontend.clone(), hosts.clone());
        let client = TransferClient::new(
            services,
            TransferConfig {
                chunk_size,
                ..Default::default()
            },
        );
        Harness {
            transport,
            frontend,
            hosts,
            client,
        }
    }

    fn harness() -> Harness {
        harness_with(test_host(1), 4)
    }

    const H: HostId = HostId(1);

    // ── upload ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn upload_sends_ceil_n_over_c_chunks_in_order() {
        let h = harness();
        h.transport.respond(|req| match &req.op {
            Op::SftpUploadBegin { .. } => Ok(json!({"ok": true, "uploadId": "u1"})),
            _ => Ok(ok()),
        });

        let data = b"0123456789".to_vec();
        let report = h.client.upload(H, "/tmp", "f.bin", &data[..]).await.unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.bytes_sent, 10);

        let kinds: Vec<&str> = h.transport.requests().iter().map(|r| r.op.kind()).collect();
        assert_eq!(
            kinds,
            [
                "sftp_upload_begin",
                "sftp_upload_chunk",
                "sftp_upload_chunk",
                "sftp_upload_chunk",
                "sftp_upload_end"
            ]
        );
        let sent: Vec<u8> = h
            .transport
            .requests()
            .into_iter()
            .filter_map(|r| match r.op {
                Op::SftpUploadChunk { data, .. } => Some(data),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(sent, data);
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk_size() {
        let h = harness();
        h.transport.respond(|req| match &req.op {
            Op::SftpUploadBegin { .. } => Ok(json!({"ok": true, "uploadId": "u1"})),
            _ => Ok(ok()),
        });
        let report = h.client.upload(H, "/", "f", &b"01234567"[..]).await.unwrap();
        assert_eq!(report.chunks, 2);
        assert_eq!(h.transport.count("sftp_upload_end"), 1);
    }

    #[tokio::test]
    async fn empty_upload_sends_begin_and_end_only() {
        let h = harness();
        h.transport.respond(|req| match &req.op {
            Op::SftpUploadBegin { .. } => Ok(json!({"ok": true, "uploadId": "u1"})),
            _ => Ok(ok()),
        });
        let report = h.client.upload(H, "/", "empty", &b""[..]).await.unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(h.transport.count("sftp_upload_chunk"), 0);
        assert_eq!(h.transport.count("sftp_upload_end"), 1);
    }

    #[tokio::test]
    async fn failed_chunk_abandons_without_end() {
        let h = harness();
        let mut chunks = 0;
        h.transport.respond(move |req| match &req.op {
            Op::SftpUploadBegin { .. } => Ok(json!({"ok": true, "uploadId": "u1"})),
            Op::SftpUploadChunk { .. } => {
                chunks += 1;
                if chunks == 3 {
                    Ok(fail("sftp_failed"))
                } else {
                    Ok(ok())
                }
            }
            _ => Ok(ok()),
        });

        let err = h
            .client
            .upload(H, "/", "f", &b"0123456789abcd"[..])
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "sftp_failed");
        assert_eq!(h.transport.count("sftp_upload_chunk"), 3);
        assert_eq!(h.transport.count("sftp_upload_end"), 0);
    }

    // ── credential resolution ─────────────────────────────────────────

    #[tokio::test]
    async fn trust_retry_reuses_stored_password() {
        let mut record = test_host(1);
        record.auth.password = Some("stored".into());
        let h = harness_with(record, 4);
        h.frontend.set_trust_answer(true);
        let mut listed = 0;
        h.transport.respond(move |req| match &req.op {
            Op::SftpLs { .. } => {
                listed += 1;
                if listed == 1 {
                    Ok(fail_trust("unknown_host_key"))
                } else {
                    Ok(json!({"ok": true, "cwd": "/root", "entries": []}))
                }
            }
            _ => Ok(ok()),
        });

        let listing = h.client.list(H, "").await.unwrap();
        assert_eq!(listing.cwd, "/root");
        assert_eq!(h.frontend.trust_prompts(), 1);
        assert_eq!(h.frontend.password_prompts(), 0);

        let ls: Vec<Request> = h
            .transport
            .requests()
            .into_iter()
            .filter(|r| r.op.kind() == "sftp_ls")
            .collect();
        assert_eq!(ls.len(), 2);
        assert_eq!(ls[1].password.as_deref(), Some("stored"));
        assert_eq!(ls[1].sftp_password.as_deref(), Some("stored"));
        assert_eq!(h.transport.count("trust_host"), 1);
    }

    #[tokio::test]
    async fn rejected_trust_is_reported_and_suppressed() {
        let h = harness();
        h.frontend.set_trust_answer(false);
        h.transport.respond(|req| match &req.op {
            Op::SftpLs { .. } => Ok(fail_trust("host_key_mismatch")),
            _ => Ok(ok()),
        });

        let err = h.client.list(H, "/").await.unwrap_err();
        assert!(matches!(err, TransferError::TrustDeclined));
        let err = h.client.list(H, "/").await.unwrap_err();
        assert!(matches!(err, TransferError::TrustDeclined));
        assert_eq!(h.frontend.trust_prompts(), 1, "second call is suppressed");
        assert_eq!(h.transport.count("trust_host"), 0);
    }

    #[tokio::test]
    async fn password_prompt_then_retry() {
        let h = harness();
        h.frontend.set_password(Some("typed"));
        h.transport.respond(|req| match &req.op {
            Op::SftpMkdir { .. } if req.password.is_none() => Ok(fail("password_required")),
            _ => Ok(ok()),
        });

        h.client.mkdir(H, "/tmp/new").await.unwrap();
        assert_eq!(h.frontend.password_prompts(), 1);
        assert_eq!(h.transport.count("sftp_mkdir"), 2);
        assert_eq!(
            h.hosts.host(H).unwrap().stored_password(),
            Some("typed"),
            "entered password is reported to the directory"
        );
    }

    #[tokio::test]
    async fn rejected_cached_password_is_replaced() {
        let h = harness();
        h.client.services.credentials.set_password(H, "old".into());
        h.frontend.set_password(Some("new"));
        h.transport.respond(|req| match &req.op {
            Op::SftpRm { .. } if req.password.as_deref() == Some("old") => {
                Ok(fail("password_required"))
            }
            _ => Ok(ok()),
        });

        h.client.remove(H, "/x").await.unwrap();
        assert_eq!(h.frontend.password_prompts(), 1);
        let passwords: Vec<_> = h
            .transport
            .of_kind("sftp_rm")
            .into_iter()
            .map(|r| r.password)
            .collect();
        assert_eq!(passwords, vec![Some("old".to_string()), Some("new".to_string())]);
    }

    #[tokio::test]
    async fn same_error_after_retry_is_returned() {
        let h = harness();
        h.frontend.set_password(Some("wrong"));
        h.transport.respond(|req| match &req.op {
            Op::SftpRm { .. } => Ok(fail("password_required")),
            _ => Ok(ok()),
        });

        let err = h.client.remove(H, "/x").await.unwrap_err();
        assert_eq!(err.error_code(), "password_required");
        assert_eq!(h.frontend.password_prompts(), 1);
        assert_eq!(h.transport.count("sftp_rm"), 2);
    }

    #[tokio::test]
    async fn no_password_prompt_for_key_auth_or_custom_credentials() {
        for tweak in [
            (|r: &mut crate::host::HostRecord| r.auth.method = AuthMethod::Key)
                as fn(&mut crate::host::HostRecord),
            |r| r.sftp.credentials = CredentialMode::Custom,
        ] {
            let mut record = test_host(1);
            tweak(&mut record);
            let h = harness_with(record, 4);
            h.transport.respond(|_| Ok(fail("password_required")));
            let err = h.client.mkdir(H, "/d").await.unwrap_err();
            assert_eq!(err.error_code(), "password_required");
            assert_eq!(h.frontend.password_prompts(), 0);
            assert_eq!(h.transport.count("sftp_mkdir"), 1);
        }
    }

    #[tokio::test]
    async fn custom_credentials_are_sent() {
        let mut record = test_host(1);
        record.sftp.credentials = CredentialMode::Custom;
        record.sftp.password = Some("custom".into());
        let h = harness_with(record, 4);
        h.client.rename(H, "/a", "/b").await.unwrap();
        let req = &h.transport.requests()[0];
        assert_eq!(req.sftp_password.as_deref(), Some("custom"));
        assert_eq!(req.password, None);
    }

    #[tokio::test]
    async fn disabled_host_sends_nothing() {
        let mut record = test_host(1);
        record.sftp.enabled = false;
        let h = harness_with(record, 4);
        let err = h.client.list(H, "/").await.unwrap_err();
        assert!(matches!(err, TransferError::Disabled(HostId(1))));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_host() {
        let h = harness();
        let err = h.client.list(HostId(99), "/").await.unwrap_err();
        assert!(matches!(err, TransferError::UnknownHost(HostId(99))));
    }

    // ── read / download ───────────────────────────────────────────────

    #[tokio::test]
    async fn read_decodes_and_enforces_limit() {
        let h = harness();
        h.transport
            .respond(|_| Ok(json!({"ok": true, "dataB64": BASE64.encode(b"hello")})));
        assert_eq!(h.client.read(H, "/etc/motd").await.unwrap(), b"hello");

        let mut record = test_host(1);
        record.id = H;
        let small = harness_with(record, 4);
        let client = TransferClient::new(
            small.client.services.clone(),
            TransferConfig {
                read_limit: 2,
                ..Default::default()
            },
        );
        small
            .transport
            .respond(|_| Ok(json!({"ok": true, "dataB64": BASE64.encode(b"hello")})));
        assert!(matches!(
            client.read(H, "/etc/motd").await,
            Err(TransferError::TooLarge { size: 5, limit: 2 })
        ));
    }

    #[tokio::test]
    async fn write_sends_file_contents() {
        let h = harness();
        h.transport.respond(|_| Ok(ok()));
        h.client.write(H, "/etc/hosts", b"127.0.0.1 nas\n".to_vec()).await.unwrap();
        let writes = h.transport.of_kind("sftp_write");
        assert_eq!(writes.len(), 1);
        let body = serde_json::to_value(&writes[0]).unwrap();
        assert_eq!(body["path"], "/etc/hosts");
        assert_eq!(body["dataB64"], BASE64.encode(b"127.0.0.1 nas\n"));
    }

    #[tokio::test]
    async fn download_returns_local_path() {
        let h = harness();
        h.transport
            .respond(|_| Ok(json!({"ok": true, "localPath": "/home/me/Downloads/f.txt"})));
        let path = h.client.download(H, "/srv/f.txt").await.unwrap();
        assert_eq!(path, PathBuf::from("/home/me/Downloads/f.txt"));
    }

    #[tokio::test]
    async fn transport_failure_is_not_retried() {
        let h = harness();
        h.transport
            .respond(|_| Err(CallError::Transport("socket closed".into())));
        let err = h.client.write(H, "/f", b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.error_code(), "transport");
        assert_eq!(h.transport.count("sftp_write"), 1);
    }
}
