use anyhow::Result;
use async_trait::async_trait;
use nix::libc;
use pterm_client::{Geometry, RenderSink, SinkFactory, TabKey};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// RAII guard that saves terminal settings and restores them on drop.
#[cfg(unix)]
pub struct TerminalGuard {
    original: Option<nix::sys::termios::Termios>,
}

#[cfg(unix)]
impl TerminalGuard {
    pub fn new() -> Self {
        use nix::sys::termios;
        let stdin = std::io::stdin();
        let original = termios::tcgetattr(&stdin).ok();
        Self { original }
    }

    pub fn enter_raw_mode(&self) {
        self.apply(|t| nix::sys::termios::cfmakeraw(t));
    }

    /// Keep line editing but stop echoing typed characters.
    pub fn disable_echo(&self) {
        use nix::sys::termios::LocalFlags;
        self.apply(|t| t.local_flags.remove(LocalFlags::ECHO));
    }

    fn apply(&self, change: impl FnOnce(&mut nix::sys::termios::Termios)) {
        if let Some(ref original) = self.original {
            use nix::sys::termios;
            let stdin = std::io::stdin();
            let mut modified = original.clone();
            change(&mut modified);
            let _ = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, &modified);
        }
    }
}

#[cfg(unix)]
impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Some(ref original) = self.original {
            use nix::sys::termios;
            let stdin = std::io::stdin();
            let _ = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, original);
        }
    }
}

/// Get the current terminal size (rows, cols).
#[cfg(unix)]
pub fn get_terminal_size() -> Result<(u16, u16)> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if ret == -1 {
        anyhow::bail!("ioctl TIOCGWINSZ failed");
    }
    Ok((ws.ws_row, ws.ws_col))
}

/// Renders one tab onto stdout.
///
/// Only the visible tab writes through; a hidden tab keeps its bytes and
/// replays them when it is shown again.
pub struct TerminalSink {
    visible: AtomicBool,
    backlog: Mutex<Vec<u8>>,
}

/// Bytes a hidden tab keeps for replay.
const BACKLOG_LIMIT: usize = 256 * 1024;

impl TerminalSink {
    fn new() -> Self {
        Self {
            visible: AtomicBool::new(false),
            backlog: Mutex::new(Vec::new()),
        }
    }

    fn emit(bytes: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }

    fn keep(&self, bytes: &[u8]) {
        let mut backlog = self.backlog.lock().unwrap_or_else(PoisonError::into_inner);
        backlog.extend_from_slice(bytes);
        if backlog.len() > BACKLOG_LIMIT {
            let excess = backlog.len() - BACKLOG_LIMIT;
            backlog.drain(..excess);
        }
    }

    fn take_backlog(&self) -> Vec<u8> {
        std::mem::take(&mut *self.backlog.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl RenderSink for TerminalSink {
    async fn write(&self, bytes: Vec<u8>) {
        if self.visible.load(Ordering::SeqCst) {
            tokio::task::spawn_blocking(move || Self::emit(&bytes))
                .await
                .ok();
        } else {
            self.keep(&bytes);
        }
    }

    fn set_visible(&self, visible: bool) {
        let was = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was {
            let backlog = self.take_backlog();
            if !backlog.is_empty() {
                Self::emit(&backlog);
            }
        }
    }

    fn measure(&self) -> Option<Geometry> {
        get_terminal_size()
            .ok()
            .map(|(rows, cols)| Geometry::new(cols, rows))
            .filter(Geometry::is_valid)
    }
}

#[derive(Default)]
pub struct TerminalSinks;

impl SinkFactory for TerminalSinks {
    fn create(&self, _key: TabKey) -> Arc<dyn RenderSink> {
        Arc::new(TerminalSink::new())
    }
}
