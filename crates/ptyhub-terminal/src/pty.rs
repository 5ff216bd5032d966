use std::ffi::OsString;
use std::io;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

#[cfg(unix)]
use libc::{poll, pollfd, POLLERR, POLLHUP, POLLOUT};
use portable_pty::native_pty_system;
use portable_pty::Child;
use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use tracing::{debug, warn};

use ptyhub_common::mutex_lock_or_recover;

use crate::decoder::Utf8Decoder;
use crate::error::PtyError;
use crate::error::SpawnErrorKind;

/// How long a failed read waits for the child's exit status before the
/// error is relayed on its own.
const EXIT_SETTLE_TIMEOUT: Duration = Duration::from_millis(100);
/// How long the waiter lets the reader drain output before reporting exit.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK_SIZE: usize = 8192;

/// Raw events relayed from the reader and waiter threads.
#[derive(Debug)]
pub enum PtyEvent {
    Data(String),
    Exit(u32),
    Error(PtyError),
}

pub type PtyEventSink = Arc<dyn Fn(PtyEvent) + Send + Sync>;

pub struct PtyHandle {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    writer: Mutex<Box<dyn Write + Send>>,
    pid: Option<u32>,
    size: PtySize,
    killed: bool,
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.kill();
    }
}

impl PtyHandle {
    /// Spawn `program` inside a new PTY.
    ///
    /// Output, exit and read errors are delivered to `sink` from background
    /// threads; the sink must hand them off rather than block.
    pub fn spawn(
        program: &str,
        args: &[String],
        cwd: &Path,
        env: impl IntoIterator<Item = (OsString, OsString)>,
        cols: u16,
        rows: u16,
        sink: PtyEventSink,
    ) -> Result<Self, PtyError> {
        let pty_system = native_pty_system();

        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = pty_system.openpty(size).map_err(|e| PtyError::Open {
            reason: e.to_string(),
        })?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(cwd);
        cmd.env_clear();
        for (key, value) in env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|e| {
            let kind = e
                .downcast_ref::<io::Error>()
                .map(SpawnErrorKind::from_io)
                .unwrap_or(SpawnErrorKind::Other);
            PtyError::Spawn {
                reason: e.to_string(),
                kind,
            }
        })?;
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(|e| PtyError::Open {
            reason: e.to_string(),
        })?;
        let writer = pair.master.take_writer().map_err(|e| PtyError::Open {
            reason: e.to_string(),
        })?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        spawn_io_threads(reader, child, sink)?;

        Ok(Self {
            master: pair.master,
            killer,
            writer: Mutex::new(writer),
            pid,
            size,
            killed: false,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn size(&self) -> (u16, u16) {
        (self.size.cols, self.size.rows)
    }

    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut writer = mutex_lock_or_recover(&self.writer);
        let mut offset = 0;
        while offset < data.len() {
            match writer.write(&data[offset..]) {
                Ok(0) => {
                    return Err(PtyError::Write {
                        reason: "write returned 0 bytes, PTY closed".to_string(),
                    });
                }
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait_writable()?;
                }
                Err(e) => {
                    return Err(PtyError::Write {
                        reason: e.to_string(),
                    })
                }
            }
        }
        writer.flush().map_err(|e| PtyError::Write {
            reason: e.to_string(),
        })
    }

    fn wait_writable(&self) -> Result<(), PtyError> {
        #[cfg(unix)]
        {
            let Some(fd) = self.master.as_raw_fd() else {
                return Ok(());
            };
            let mut fds = [pollfd {
                fd,
                events: POLLOUT,
                revents: 0,
            }];
            loop {
                let rc = unsafe { poll(fds.as_mut_ptr(), 1, -1) };
                if rc < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(PtyError::Write {
                        reason: err.to_string(),
                    });
                }
                let events = fds[0].revents;
                if events & (POLLHUP | POLLERR) != 0 {
                    return Err(PtyError::Write {
                        reason: "PTY closed".to_string(),
                    });
                }
                if events & POLLOUT != 0 {
                    return Ok(());
                }
            }
        }
        #[cfg(not(unix))]
        {
            Ok(())
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self.master.resize(self.size).map_err(|e| PtyError::Resize {
            reason: e.to_string(),
        })
    }

    /// Kill the child. Safe to call on a process that already exited.
    pub fn kill(&mut self) {
        if self.killed {
            return;
        }
        self.killed = true;
        if let Err(e) = self.killer.kill() {
            debug!(pid = ?self.pid, error = %e, "Kill on exited PTY child");
        }
    }
}

fn spawn_io_threads(
    mut reader: Box<dyn Read + Send>,
    mut child: Box<dyn Child + Send + Sync>,
    sink: PtyEventSink,
) -> Result<(), PtyError> {
    let (exited_tx, exited_rx) = mpsc::channel::<()>();
    let (drained_tx, drained_rx) = mpsc::channel::<Option<PtyError>>();

    let reader_sink = Arc::clone(&sink);
    let span = tracing::debug_span!("pty_reader");
    std::thread::Builder::new()
        .name("pty-reader".to_string())
        .spawn(move || {
            let _guard = span.enter();
            let mut decoder = Utf8Decoder::new();
            let mut buf = [0u8; READ_CHUNK_SIZE];
            let outcome = loop {
                match reader.read(&mut buf) {
                    Ok(0) => break None,
                    Ok(n) => {
                        let text = decoder.decode(&buf[..n]);
                        if !text.is_empty() {
                            reader_sink(PtyEvent::Data(text));
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => break Some(PtyError::read(&e)),
                }
            };

            let tail = decoder.finish();
            if !tail.is_empty() {
                reader_sink(PtyEvent::Data(tail));
            }

            match outcome {
                None => {
                    debug!("PTY reader EOF");
                    let _ = drained_tx.send(None);
                }
                Some(err) => {
                    // A read error racing a normal exit is reported after the
                    // exit status, so the exit is never swallowed.
                    if exited_rx.recv_timeout(EXIT_SETTLE_TIMEOUT).is_ok() {
                        let _ = drained_tx.send(Some(err));
                    } else {
                        warn!(error = %err, "PTY reader error");
                        reader_sink(PtyEvent::Error(err));
                        let _ = drained_tx.send(None);
                    }
                }
            }
        })
        .map_err(|e| PtyError::Open {
            reason: format!("failed to start reader thread: {e}"),
        })?;

    let span = tracing::debug_span!("pty_waiter");
    std::thread::Builder::new()
        .name("pty-waiter".to_string())
        .spawn(move || {
            let _guard = span.enter();
            let status = child.wait();
            let _ = exited_tx.send(());
            let trailing = drained_rx
                .recv_timeout(READER_DRAIN_TIMEOUT)
                .ok()
                .flatten();
            match status {
                Ok(status) => sink(PtyEvent::Exit(status.exit_code())),
                Err(e) => sink(PtyEvent::Error(PtyError::Wait {
                    reason: e.to_string(),
                })),
            }
            if let Some(err) = trailing {
                sink(PtyEvent::Error(err));
            }
        })
        .map_err(|e| PtyError::Open {
            reason: format!("failed to start waiter thread: {e}"),
        })?;

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;

    fn collecting_sink() -> (PtyEventSink, Receiver<PtyEvent>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let sink: PtyEventSink = Arc::new(move |event| {
            let _ = mutex_lock_or_recover(&tx).send(event);
        });
        (sink, rx)
    }

    fn wait_for_exit(rx: &Receiver<PtyEvent>) -> (String, Option<u32>) {
        let mut output = String::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
            match event {
                PtyEvent::Data(text) => output.push_str(&text),
                PtyEvent::Exit(code) => return (output, Some(code)),
                PtyEvent::Error(_) => {}
            }
        }
        (output, None)
    }

    #[test]
    fn test_spawn_reports_output_then_exit() {
        let (sink, rx) = collecting_sink();
        let cwd = std::env::temp_dir();
        let _pty = PtyHandle::spawn(
            "/bin/sh",
            &["-c".to_string(), "printf ready; exit 3".to_string()],
            &cwd,
            std::env::vars_os(),
            80,
            24,
            sink,
        )
        .unwrap();

        let (output, code) = wait_for_exit(&rx);
        assert!(output.contains("ready"));
        assert_eq!(code, Some(3));
    }

    #[test]
    fn test_spawn_missing_program_fails() {
        let (sink, _rx) = collecting_sink();
        let result = PtyHandle::spawn(
            "/definitely/not/a/shell",
            &[],
            &std::env::temp_dir(),
            std::env::vars_os(),
            80,
            24,
            sink,
        );
        assert!(matches!(result, Err(PtyError::Spawn { .. })));
    }

    #[test]
    fn test_kill_is_idempotent() {
        let (sink, rx) = collecting_sink();
        let mut pty = PtyHandle::spawn(
            "/bin/sh",
            &["-c".to_string(), "sleep 30".to_string()],
            &std::env::temp_dir(),
            std::env::vars_os(),
            80,
            24,
            sink,
        )
        .unwrap();

        pty.kill();
        pty.kill();
        let (_, code) = wait_for_exit(&rx);
        assert!(code.is_some());
    }
}
