//! Local terminal handling
//!
//! Raw mode, size queries, resize notifications and a stdin reader that
//! does not hold the runtime hostage on shutdown.

use std::io::{self, Read};

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crossterm::terminal;
use crossterm::tty::IsTty;

use ct_protocol::TerminalSize;

/// A terminal whose input mode can be switched to raw and back
pub trait RawTerminal: Send {
    /// Remember the current mode and switch to raw
    fn enable_raw(&mut self) -> io::Result<()>;

    /// Restore the mode remembered by `enable_raw`
    fn restore(&mut self) -> io::Result<()>;
}

/// The process's controlling terminal, driven through crossterm
#[derive(Debug, Default)]
pub struct CrosstermTerminal {
    /// Whether this handle switched raw mode on
    switched: bool,
}

impl CrosstermTerminal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawTerminal for CrosstermTerminal {
    fn enable_raw(&mut self) -> io::Result<()> {
        if terminal::is_raw_mode_enabled()? {
            return Ok(());
        }
        terminal::enable_raw_mode()?;
        self.switched = true;
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        if std::mem::take(&mut self.switched) {
            terminal::disable_raw_mode()?;
        }
        Ok(())
    }
}

/// Raw mode held for the lifetime of the guard
///
/// The prior mode is restored on drop, whichever way the holder exits.
pub struct RawModeGuard<'a, T: RawTerminal + ?Sized> {
    terminal: &'a mut T,
}

impl<'a, T: RawTerminal + ?Sized> RawModeGuard<'a, T> {
    /// Switch `terminal` to raw mode
    pub fn acquire(terminal: &'a mut T) -> io::Result<Self> {
        terminal.enable_raw()?;
        Ok(Self { terminal })
    }
}

impl<T: RawTerminal + ?Sized> Drop for RawModeGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.restore() {
            tracing::warn!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Whether stdin and stdout are both attached to a terminal
pub fn is_interactive() -> bool {
    io::stdin().is_tty() && io::stdout().is_tty()
}

/// Current size of the local terminal
pub fn terminal_size() -> io::Result<TerminalSize> {
    let (cols, rows) = terminal::size()?;
    Ok(TerminalSize::new(cols, rows))
}

/// Stream of new terminal sizes, one item per window change
#[cfg(unix)]
pub fn resize_events() -> io::Result<BoxStream<'static, TerminalSize>> {
    use tokio::signal::unix::{signal, SignalKind};

    let winch = signal(SignalKind::window_change())?;
    let events = futures::stream::unfold(winch, |mut winch| async move {
        loop {
            winch.recv().await?;
            match terminal_size() {
                Ok(size) => return Some((size, winch)),
                Err(e) => tracing::debug!("Failed to read terminal size: {}", e),
            }
        }
    });
    Ok(events.boxed())
}

/// Stream of new terminal sizes, polled since there is no resize signal
#[cfg(not(unix))]
pub fn resize_events() -> io::Result<BoxStream<'static, TerminalSize>> {
    use std::time::Duration;

    let ticker = tokio::time::interval(Duration::from_millis(250));
    let last = terminal_size().ok();
    let events = futures::stream::unfold((ticker, last), |(mut ticker, last)| async move {
        loop {
            ticker.tick().await;
            if let Ok(size) = terminal_size() {
                if Some(size) != last {
                    return Some((size, (ticker, Some(size))));
                }
            }
        }
    });
    Ok(events.boxed())
}

/// Async reader over stdin backed by a dedicated thread
///
/// The thread blocks in `read` and is abandoned at process exit, so a
/// session can end without waiting for the operator's next keystroke.
pub fn stdin_reader() -> io::Result<impl AsyncRead + Unpin + Send + 'static> {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(16);

    std::thread::Builder::new()
        .name("ci-term-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 4096];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        })?;

    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    Ok(StreamReader::new(chunks.boxed()))
}
