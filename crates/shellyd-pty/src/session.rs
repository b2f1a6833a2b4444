//! The PTY shell session.

use crate::{PtyError, PtyResult};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Maximum bytes read from the master per chunk.
pub const OUTPUT_CHUNK_SIZE: usize = 4096;

/// Bounded depth of the output channel; the reader thread blocks on a
/// full channel, which backpressures the shell through the PTY buffer.
const OUTPUT_CHANNEL_CAPACITY: usize = 32;

/// How long to wait for the child after SIGTERM before SIGKILL.
const TERM_GRACE_MS: u64 = 500;

/// Events delivered from the reader thread to the owning connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// One chunk of master output, in production order.
    Output(Vec<u8>),
    /// The master reached EOF or the read failed; the session is over.
    Exited,
}

/// Parameters for spawning a shell.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Login shell executable, e.g. `/bin/zsh`.
    pub shell: String,
    /// Initial window rows.
    pub rows: u16,
    /// Initial window columns.
    pub cols: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            rows: 24,
            cols: 80,
        }
    }
}

/// A live login shell under a pseudo-terminal.
///
/// Owned exclusively by one connection. Input is written straight to the
/// master; output arrives on the channel returned by [`ShellSession::spawn`].
pub struct ShellSession {
    master: Mutex<Box<dyn MasterPty + Send>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    pid: Option<u32>,
    stop: Arc<AtomicBool>,
    torn_down: AtomicBool,
}

impl ShellSession {
    /// Allocate a PTY and spawn the login shell.
    ///
    /// The child gets the slave as its controlling terminal with stdio
    /// wired to it, a login argument, a 256-color truecolor environment,
    /// and `$HOME` as its working directory.
    pub fn spawn(config: &ShellConfig) -> PtyResult<(Arc<Self>, mpsc::Receiver<ShellEvent>)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.arg("-l");
        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        cmd.env("LANG", "en_US.UTF-8");
        cmd.env("LC_ALL", "en_US.UTF-8");
        if let Some(home) = dirs::home_dir() {
            cmd.cwd(home);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let pid = child.process_id();
        // The parent keeps only the master side.
        drop(pair.slave);

        info!(shell = %config.shell, pid = ?pid, "Shell session started");

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Pty(e.to_string()))?;

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let reader_stop = stop.clone();
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; OUTPUT_CHUNK_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if reader_stop.load(Ordering::SeqCst) {
                                break;
                            }
                            if tx.blocking_send(ShellEvent::Output(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            if !reader_stop.load(Ordering::SeqCst) {
                                debug!(error = %err, "PTY read ended");
                            }
                            break;
                        }
                    }
                }
                let _ = tx.blocking_send(ShellEvent::Exited);
            })?;

        let session = Arc::new(Self {
            master: Mutex::new(pair.master),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            pid,
            stop,
            torn_down: AtomicBool::new(false),
        });

        Ok((session, rx))
    }

    /// Write raw input bytes to the master.
    pub fn write_input(&self, bytes: &[u8]) -> PtyResult<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Apply a window resize. Non-positive dimensions are ignored.
    pub fn resize(&self, rows: i32, cols: i32) -> PtyResult<()> {
        if rows <= 0 || cols <= 0 {
            debug!(rows, cols, "Ignoring non-positive resize");
            return Ok(());
        }

        self.master
            .lock()
            .unwrap()
            .resize(PtySize {
                rows: rows as u16,
                cols: cols as u16,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Pty(e.to_string()))
    }

    /// The child process id, when known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Tear the session down: stop the reader, SIGTERM the child, wait
    /// briefly, SIGKILL if still alive, and reap.
    ///
    /// Blocking (up to the grace window); call from a blocking context.
    pub fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.store(true, Ordering::SeqCst);

        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        let mut child = self.child.lock().unwrap();
        let mut reaped = false;
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(TERM_GRACE_MS);
        while std::time::Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => {
                    reaped = true;
                    break;
                }
                Ok(None) => std::thread::sleep(std::time::Duration::from_millis(50)),
                Err(err) => {
                    warn!(error = %err, "try_wait failed during shell teardown");
                    break;
                }
            }
        }

        if !reaped {
            if let Err(err) = child.kill() {
                warn!(error = %err, "SIGKILL failed during shell teardown");
            }
            let _ = child.wait();
        }

        info!(pid = ?self.pid, "Shell session torn down");
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        // Normal teardown goes through shutdown(); this is the backstop
        // against leaking a child when the owner is dropped abruptly.
        if !self.torn_down.load(Ordering::SeqCst) {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for ShellSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellSession")
            .field("pid", &self.pid)
            .field("torn_down", &self.torn_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
