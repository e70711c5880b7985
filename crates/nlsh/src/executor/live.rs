//! Single-reader draining of a child's output pipes.
//!
//! One task owns both pipes. Each line (or trailing partial line at EOF) is
//! first handed to an [`OutputSink`] and then appended to the result buffer,
//! so the buffer has exactly one writer and display never consumes bytes the
//! buffer does not also see.

use std::future::Future;
use std::io::{self, Write};
use std::process::ExitStatus;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

/// Receives output chunks as they are read from a running command.
///
/// Sinks only observe the bytes; they cannot alter what ends up in the
/// [`CommandResult`](super::CommandResult).
pub trait OutputSink: Send {
    /// Called with each chunk read from stdout.
    fn stdout(&mut self, chunk: &[u8]);
    /// Called with each chunk read from stderr.
    fn stderr(&mut self, chunk: &[u8]);
}

/// Sink used by buffered execution: discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSink;

impl OutputSink for SilentSink {
    fn stdout(&mut self, _chunk: &[u8]) {}
    fn stderr(&mut self, _chunk: &[u8]) {}
}

/// Sink that mirrors output to the process's own stdout and stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSink;

impl OutputSink for TerminalSink {
    fn stdout(&mut self, chunk: &[u8]) {
        let mut out = io::stdout().lock();
        // Display is best effort; a closed terminal must not abort the command.
        let _ = out.write_all(chunk).and_then(|_| out.flush());
    }

    fn stderr(&mut self, chunk: &[u8]) {
        let mut err = io::stderr().lock();
        let _ = err.write_all(chunk).and_then(|_| err.flush());
    }
}

/// Everything collected from a finished child.
#[derive(Debug)]
pub(crate) struct Drained {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ExitStatus,
    pub interrupted: bool,
}

/// Drain `child` until both pipes close, or until `interrupt` fires and the
/// child has been reaped.
pub(crate) async fn drain<S, F>(
    mut child: Child,
    sink: &mut S,
    interrupt: F,
) -> io::Result<Drained>
where
    S: OutputSink + ?Sized,
    F: Future<Output = ()>,
{
    let mut stdout = child
        .stdout
        .take()
        .map(BufReader::new)
        .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .map(BufReader::new)
        .ok_or_else(|| io::Error::other("child stderr was not captured"))?;

    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    // Partial lines survive a cancelled read_until, so these live across
    // iterations of the select loop.
    let mut out_line = Vec::new();
    let mut err_line = Vec::new();
    let mut out_done = false;
    let mut err_done = false;
    let mut interrupted = false;
    let mut reaped = None;

    tokio::pin!(interrupt);

    while !(out_done && err_done) {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut out_line), if !out_done => {
                if read? == 0 {
                    out_done = true;
                }
                flush_line(&mut out_line, &mut out_buf, |chunk| sink.stdout(chunk));
            }
            read = stderr.read_until(b'\n', &mut err_line), if !err_done => {
                if read? == 0 {
                    err_done = true;
                }
                flush_line(&mut err_line, &mut err_buf, |chunk| sink.stderr(chunk));
            }
            () = &mut interrupt, if !interrupted => {
                interrupted = true;
                tracing::debug!("interrupt received, killing child");
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "child already exited");
                }
            }
            status = child.wait(), if interrupted => {
                reaped = Some(status?);
                break;
            }
        }
    }

    // Bytes read before the child was reaped but not yet newline-terminated.
    flush_line(&mut out_line, &mut out_buf, |chunk| sink.stdout(chunk));
    flush_line(&mut err_line, &mut err_buf, |chunk| sink.stderr(chunk));

    let status = match reaped {
        Some(status) => status,
        None => child.wait().await?,
    };

    Ok(Drained {
        stdout: out_buf,
        stderr: err_buf,
        status,
        interrupted,
    })
}

fn flush_line(line: &mut Vec<u8>, buf: &mut Vec<u8>, mut display: impl FnMut(&[u8])) {
    if line.is_empty() {
        return;
    }
    display(line);
    buf.extend_from_slice(line);
    line.clear();
}

/// Resolve when the user presses Ctrl-C.
///
/// If the signal handler cannot be installed this never resolves, so a
/// registration failure is never mistaken for an interrupt.
pub(crate) async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::debug!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        stdout: Vec<u8>,
        stderr: Vec<u8>,
        chunks: usize,
    }

    impl OutputSink for Recording {
        fn stdout(&mut self, chunk: &[u8]) {
            self.stdout.extend_from_slice(chunk);
            self.chunks += 1;
        }

        fn stderr(&mut self, chunk: &[u8]) {
            self.stderr.extend_from_slice(chunk);
            self.chunks += 1;
        }
    }

    fn spawn(script: &str) -> Child {
        tokio::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn /bin/sh")
    }

    #[test]
    fn test_flush_line_moves_bytes() {
        let mut line = b"abc\n".to_vec();
        let mut buf = Vec::new();
        let mut shown = Vec::new();
        flush_line(&mut line, &mut buf, |c| shown.extend_from_slice(c));
        assert!(line.is_empty());
        assert_eq!(buf, b"abc\n");
        assert_eq!(shown, b"abc\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sink_sees_exactly_the_buffer() {
        let child = spawn("printf 'one\\ntwo\\nthree'; echo oops >&2");
        let mut sink = Recording::default();
        let drained = drain(child, &mut sink, std::future::pending())
            .await
            .unwrap();

        assert_eq!(drained.stdout, b"one\ntwo\nthree");
        assert_eq!(drained.stderr, b"oops\n");
        assert_eq!(sink.stdout, drained.stdout);
        assert_eq!(sink.stderr, drained.stderr);
        // Line oriented: three stdout pieces and one stderr piece.
        assert_eq!(sink.chunks, 4);
        assert!(!drained.interrupted);
        assert!(drained.status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_kills_and_keeps_partial_output() {
        let child = spawn("echo started; exec sleep 30");
        let mut sink = Recording::default();
        let interrupt = async {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        };
        let drained = drain(child, &mut sink, interrupt).await.unwrap();

        assert!(drained.interrupted);
        assert!(!drained.status.success());
        assert_eq!(drained.stdout, b"started\n");
    }
}
