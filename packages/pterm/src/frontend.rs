//! Interactive prompts and notices on the controlling terminal.
//!
//! The frontend never reads stdin itself. Each question is sent as a
//! [`Prompt`] to whoever owns the terminal: the attach loop while a session is
//! attached, or [`line_prompter`] for one-shot commands.

use async_trait::async_trait;
use pterm_client::{Frontend, HostRecord, Notice, Phase, TrustRequest};
use std::io::{BufRead, Write};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::terminal::TerminalGuard;

/// A question for the user. `None` means the prompt was abandoned.
pub struct Prompt {
    pub text: String,
    pub secret: bool,
    pub respond_to: oneshot::Sender<Option<String>>,
}

pub struct CliFrontend {
    prompts: mpsc::Sender<Prompt>,
    /// Print state changes (attach) or stay quiet (one-shot commands).
    verbose: bool,
}

impl CliFrontend {
    pub fn new(prompts: mpsc::Sender<Prompt>, verbose: bool) -> Self {
        Self { prompts, verbose }
    }

    async fn ask(&self, text: String, secret: bool) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        let prompt = Prompt {
            text,
            secret,
            respond_to: tx,
        };
        if self.prompts.send(prompt).await.is_err() {
            debug!("no prompt handler, treating as cancelled");
            return None;
        }
        rx.await.ok().flatten()
    }
}

fn trust_question(request: &TrustRequest) -> String {
    let target = request.host_port.as_deref().unwrap_or(&request.host_name);
    let fingerprint = request.fingerprint.as_deref().unwrap_or("unknown");
    if request.mismatch {
        format!(
            "WARNING: host key for {} ({}) has CHANGED.\r\nNew fingerprint: {}\r\nTrust the new key? [y/N] ",
            request.host_name, target, fingerprint
        )
    } else {
        format!(
            "Unknown host key for {} ({}).\r\nFingerprint: {}\r\nTrust this host? [y/N] ",
            request.host_name, target, fingerprint
        )
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Status line for a notice, if it is worth showing.
fn status_line(notice: &Notice) -> Option<String> {
    match notice {
        Notice::Failed { operation, message } => Some(format!("{operation} failed: {message}")),
        Notice::StateChanged { state, .. } => match state.phase {
            Phase::Disconnected => Some(match &state.error {
                Some(code) => format!("disconnected ({code})"),
                None => "disconnected".to_string(),
            }),
            Phase::Reconnecting { attempts } if attempts > 0 => {
                Some(format!("reconnecting, attempt {attempts}"))
            }
            Phase::Connected => Some("connected".to_string()),
            Phase::Reconnecting { .. } => None,
        },
        _ => None,
    }
}

#[async_trait]
impl Frontend for CliFrontend {
    async fn confirm_trust(&self, request: &TrustRequest) -> bool {
        let answer = self.ask(trust_question(request), false).await;
        answer.as_deref().is_some_and(is_yes)
    }

    async fn request_password(&self, host: &HostRecord) -> Option<String> {
        let text = format!("Password for {}@{}: ", host.user, host.address);
        self.ask(text, true).await.filter(|p| !p.is_empty())
    }

    fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Failed { operation, message } => warn!("{} failed: {}", operation, message),
            Notice::StateChanged { key, state } => info!("{} is {}", key, state.phase),
            other => debug!("{:?}", other),
        }
        if !self.verbose {
            return;
        }
        if let Some(line) = status_line(&notice) {
            eprint!("\r\n[pterm: {line}]\r\n");
        }
    }
}

/// Answer prompts by reading whole lines from stdin (cooked mode).
pub async fn line_prompter(mut prompts: mpsc::Receiver<Prompt>) {
    while let Some(prompt) = prompts.recv().await {
        let Prompt {
            text,
            secret,
            respond_to,
        } = prompt;
        let answer = tokio::task::spawn_blocking(move || read_line(&text, secret))
            .await
            .ok()
            .flatten();
        let _ = respond_to.send(answer);
    }
}

fn read_line(text: &str, secret: bool) -> Option<String> {
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(text.replace("\r\n", "\n").as_bytes());
    let _ = stderr.flush();

    let guard = TerminalGuard::new();
    if secret {
        guard.disable_echo();
    }
    let mut line = String::new();
    let read = std::io::stdin().lock().read_line(&mut line);
    drop(guard);
    if secret {
        let _ = stderr.write_all(b"\n");
    }
    match read {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

/// Line editor for prompts answered while the terminal is in raw mode.
#[derive(Default)]
pub struct RawLine {
    buf: Vec<u8>,
}

/// Result of feeding bytes to a [`RawLine`].
#[derive(Debug, PartialEq, Eq)]
pub enum LineInput {
    /// Still typing; these bytes should be echoed.
    Echo(Vec<u8>),
    Done(String),
    Cancelled,
}

impl RawLine {
    pub fn feed(&mut self, data: &[u8], secret: bool) -> LineInput {
        let mut echo = Vec::new();
        for &b in data {
            match b {
                b'\r' | b'\n' => {
                    let line = String::from_utf8_lossy(&self.buf).into_owned();
                    self.buf.clear();
                    return LineInput::Done(line);
                }
                // Ctrl-C, Ctrl-D
                0x03 | 0x04 => {
                    self.buf.clear();
                    return LineInput::Cancelled;
                }
                0x7f | 0x08 => {
                    if self.buf.pop().is_some() && !secret {
                        echo.extend_from_slice(b"\x08 \x08");
                    }
                }
                _ => {
                    self.buf.push(b);
                    if !secret {
                        echo.push(b);
                    }
                }
            }
        }
        LineInput::Echo(echo)
    }
}
