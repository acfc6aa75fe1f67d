use anyhow::Result;
use pterm_client::{HostRecord, TabId};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::info;

use crate::frontend::{LineInput, Prompt, RawLine};
use crate::session::Session;
use crate::terminal::{TerminalGuard, get_terminal_size};

const DETACH_BYTE: u8 = 0x1D; // Ctrl-]

/// What happened when an attach session ended.
pub enum AttachOutcome {
    /// User pressed Ctrl-]; the remote tab keeps running.
    Detached,
    /// The bridge went away.
    Closed,
}

fn write_stdout(bytes: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(bytes);
    let _ = stdout.flush();
}

/// Attach the terminal to a tab on `host`, answering prompts inline.
pub async fn attach(
    session: &Session,
    host: &HostRecord,
    tab: Option<TabId>,
    mut prompts: mpsc::Receiver<Prompt>,
) -> Result<AttachOutcome> {
    let client = &session.client;

    // 1. Enter raw mode
    let guard = TerminalGuard::new();
    guard.enter_raw_mode();

    // 2. Select the tab; the sink measures the terminal for the initial size
    let key = client.connect(host.id, tab).await?;
    info!("attached to {}", key);
    if get_terminal_size().is_err() {
        info!("terminal size unavailable, using defaults");
    }
    write_stdout(
        format!(
            "\r[pterm: {} ({}) tab {} -- Ctrl-] to detach]\r\n",
            host.name, host.address, key.tab
        )
        .as_bytes(),
    );

    // 3. Set up SIGWINCH handler
    #[cfg(unix)]
    let mut sigwinch =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())?;

    // 4. Spawn blocking stdin reader thread (with poll so it can shut down cleanly)
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    let stdin_shutdown = Arc::new(AtomicBool::new(false));
    let stdin_shutdown_thread = stdin_shutdown.clone();
    std::thread::spawn(move || {
        use std::io::Read;
        use std::os::fd::AsRawFd;
        let stdin = std::io::stdin();
        let stdin_fd = stdin.as_raw_fd();
        let mut buf = [0u8; 4096];
        loop {
            if stdin_shutdown_thread.load(Ordering::Relaxed) {
                break;
            }
            let mut pfd = nix::libc::pollfd {
                fd: stdin_fd,
                events: nix::libc::POLLIN,
                revents: 0,
            };
            let ret = unsafe { nix::libc::poll(&mut pfd, 1, 100) };
            if ret <= 0 {
                continue;
            }
            let mut handle = stdin.lock();
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    drop(handle);
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // 5. Main select loop. While a prompt is open, keystrokes answer it
    //    instead of going to the remote side.
    let mut open_prompt: Option<Prompt> = None;
    let mut line = RawLine::default();
    let outcome = loop {
        tokio::select! {
            data = stdin_rx.recv() => {
                let Some(data) = data else {
                    break AttachOutcome::Detached;
                };

                if let Some(prompt) = open_prompt.take() {
                    match line.feed(&data, prompt.secret) {
                        LineInput::Echo(echo) => {
                            write_stdout(&echo);
                            open_prompt = Some(prompt);
                        }
                        LineInput::Done(answer) => {
                            write_stdout(b"\r\n");
                            let _ = prompt.respond_to.send(Some(answer));
                        }
                        LineInput::Cancelled => {
                            write_stdout(b"\r\n");
                            let _ = prompt.respond_to.send(None);
                        }
                    }
                    continue;
                }

                if let Some(pos) = data.iter().position(|&b| b == DETACH_BYTE) {
                    if pos > 0 {
                        client.submit(key, &data[..pos]).await;
                    }
                    break AttachOutcome::Detached;
                }
                client.submit(key, data).await;
            }

            Some(prompt) = prompts.recv(), if open_prompt.is_none() => {
                write_stdout(format!("\r\n{}", prompt.text).as_bytes());
                open_prompt = Some(prompt);
            }

            _ = sigwinch.recv() => {
                client.resize(key).await;
            }

            () = session.bridge.closed() => {
                break AttachOutcome::Closed;
            }
        }
    };

    // 6. Clean exit: abandon any open prompt, stop stdin reader, restore terminal
    if let Some(prompt) = open_prompt {
        let _ = prompt.respond_to.send(None);
    }
    stdin_shutdown.store(true, Ordering::Relaxed);
    drop(guard);
    match outcome {
        AttachOutcome::Detached => eprintln!("\r\n[pterm: detached]"),
        AttachOutcome::Closed => eprintln!("\r\n[pterm: connection closed]"),
    }
    Ok(outcome)
}
