use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ipcsocket_transport::TransportError;

use crate::cmd::EchoArgs;
use crate::endpoint::{self, Listener, Stream};
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

enum IoDisposition {
    Break,
    Fatal(CliError),
}

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let listener = Arc::new(
        endpoint::bind(&args.endpoint).map_err(|err| transport_error("bind failed", err))?,
    );

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), listener.clone())?;
    tracing::info!(endpoint = %args.endpoint, "echo server ready");

    let mut buf = vec![0u8; args.buffer_size as usize];
    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(TransportError::Closed) if !running.load(Ordering::SeqCst) => break,
            Err(err) => return Err(transport_error("accept failed", err)),
        };
        tracing::debug!("client connected");

        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => match classify_io_error("receive failed", err) {
                    IoDisposition::Break => break,
                    IoDisposition::Fatal(cli_err) => return Err(cli_err),
                },
            };

            tracing::info!(size = n, "echoing chunk");

            if let Err(err) = endpoint::write_all(&stream, &buf[..n]) {
                match classify_io_error("echo send failed", err) {
                    IoDisposition::Break => break,
                    IoDisposition::Fatal(cli_err) => return Err(cli_err),
                }
            }
        }
        close_session(stream);
    }

    Ok(SUCCESS)
}

fn close_session(stream: Stream) {
    match stream.close() {
        Ok(()) => tracing::debug!("client session closed"),
        Err(err) => tracing::warn!(error = %err, "failed closing client session"),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>, listener: Arc<Listener>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        // Wakes a blocked accept; the loop then sees `running == false`.
        if let Err(err) = listener.close() {
            tracing::debug!(error = %err, "listener close on interrupt");
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// A vanished client ends its session; anything else stops the server.
fn classify_io_error(context: &str, err: TransportError) -> IoDisposition {
    let peer_gone = match &err {
        TransportError::Io(source) => matches!(
            source.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        ),
        TransportError::ShortRead { .. } | TransportError::Cancelled => true,
        _ => false,
    };
    if peer_gone {
        tracing::debug!(error = %err, "client went away");
        return IoDisposition::Break;
    }
    IoDisposition::Fatal(transport_error(context, err))
}
