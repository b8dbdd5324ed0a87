use std::fs;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use ipcsocket_transport::Result as TransportResult;

use crate::cmd::SendArgs;
use crate::endpoint::{self, Stream};
use crate::exit::{
    transport_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_response, OutputFormat};

const RESPONSE_BUFFER: usize = 64 * 1024;
const INTERRUPT_RETRY: Duration = Duration::from_millis(50);

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let stream =
        endpoint::connect(&args.endpoint).map_err(|err| transport_error("connect failed", err))?;
    tracing::debug!(endpoint = %args.endpoint, size = payload.len(), "sending payload");

    endpoint::write_all(&stream, &payload).map_err(|err| transport_error("send failed", err))?;

    if args.wait {
        let reply = wait_for_response(&stream, wait_timeout)?;
        print_response(&reply, &args.endpoint, format);
    }

    stream
        .close()
        .map_err(|err| transport_error("close failed", err))?;
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// What `--wait` needs from a connected stream.
trait ResponseSource: Sync {
    fn read_chunk(&self, buf: &mut [u8]) -> TransportResult<usize>;
    /// Unblock a `read_chunk` running on another thread.
    fn interrupt(&self) -> TransportResult<()>;
}

impl ResponseSource for Stream {
    fn read_chunk(&self, buf: &mut [u8]) -> TransportResult<usize> {
        self.read(buf)
    }

    fn interrupt(&self) -> TransportResult<()> {
        endpoint::interrupt(self)
    }
}

/// Read one chunk, giving up after `timeout`.
///
/// The read runs on a scoped thread; on timeout the stream is interrupted so the thread can be
/// joined before returning. A pipe cancel only reaches a read that has already been issued, so
/// the interrupt is repeated until the reader reports back.
fn wait_for_response<R: ResponseSource>(source: &R, timeout: Duration) -> CliResult<Vec<u8>> {
    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        scope.spawn(move || {
            let mut buf = vec![0u8; RESPONSE_BUFFER];
            let result = source.read_chunk(&mut buf).map(|n| {
                buf.truncate(n);
                buf
            });
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(Ok(reply)) if reply.is_empty() => Err(CliError::new(
                FAILURE,
                "connection closed before a response arrived",
            )),
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(transport_error("receive failed", err)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CliError::new(INTERNAL, "reader thread exited without a result"))
            }
            Err(RecvTimeoutError::Timeout) => {
                interrupt_until_done(source, &rx);
                Err(CliError::new(
                    TIMEOUT,
                    format!("no response within {}ms", timeout.as_millis()),
                ))
            }
        }
    })
}

fn interrupt_until_done<R: ResponseSource, T>(source: &R, rx: &mpsc::Receiver<T>) {
    let mut warned = false;
    loop {
        if let Err(err) = source.interrupt() {
            if !warned {
                tracing::warn!(error = %err, "failed to interrupt pending read");
                warned = true;
            }
        }
        match rx.recv_timeout(INTERRUPT_RETRY) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!("pending read still running; interrupting again");
            }
            Ok(_) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ipcsocket_transport::TransportError;

    use super::*;

    struct ScriptedSource {
        reply: Option<&'static [u8]>,
        // Interrupts that arrive before the read is issued and are lost.
        lost_interrupts: usize,
        interrupts: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(reply: Option<&'static [u8]>) -> Self {
            Self {
                reply,
                lost_interrupts: 0,
                interrupts: AtomicUsize::new(0),
            }
        }
    }

    impl ResponseSource for ScriptedSource {
        fn read_chunk(&self, buf: &mut [u8]) -> TransportResult<usize> {
            match self.reply {
                Some(reply) => {
                    buf[..reply.len()].copy_from_slice(reply);
                    Ok(reply.len())
                }
                None => {
                    while self.interrupts.load(Ordering::SeqCst) <= self.lost_interrupts {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(TransportError::Cancelled)
                }
            }
        }

        fn interrupt(&self) -> TransportResult<()> {
            self.interrupts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn reply_is_returned() {
        let source = ScriptedSource::new(Some(b"pong"));
        let reply = wait_for_response(&source, Duration::from_secs(2)).unwrap();
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn silent_peer_times_out_and_is_interrupted() {
        let source = ScriptedSource::new(None);
        let err = wait_for_response(&source, Duration::from_millis(50)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
        assert!(source.interrupts.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn interrupt_is_repeated_until_reader_returns() {
        let source = ScriptedSource {
            lost_interrupts: 2,
            ..ScriptedSource::new(None)
        };
        let err = wait_for_response(&source, Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.code, TIMEOUT);
        assert!(source.interrupts.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn empty_reply_means_peer_closed() {
        let source = ScriptedSource::new(Some(b""));
        let err = wait_for_response(&source, Duration::from_secs(2)).unwrap_err();
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}
