//! Minimal echo server: accepts one client and echoes bytes back until it disconnects.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal (Unix):
//!   cargo run --features cli -- send /tmp/ipcsocket-echo-<pid>/echo.sock \
//!     --data hello --wait --wait-timeout 3s

use std::io::{Read, Write};

#[cfg(unix)]
fn listen() -> Result<(ipcsocket::transport::UnixDomainListener, String), Box<dyn std::error::Error>>
{
    let dir = std::env::temp_dir().join(format!("ipcsocket-echo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("echo.sock");
    let listener = ipcsocket::transport::UnixDomainListener::bind(&path)?;
    Ok((listener, path.display().to_string()))
}

#[cfg(windows)]
fn listen() -> Result<(ipcsocket::transport::NamedPipeListener, String), Box<dyn std::error::Error>>
{
    let name = format!("ipcsocket-echo-{}", std::process::id());
    let listener = ipcsocket::transport::NamedPipeListener::bind(&name)?;
    let path = listener.path().to_string();
    Ok((listener, path))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (listener, endpoint) = listen()?;
    eprintln!("Listening on {endpoint}");

    let mut stream = listener.accept()?;
    eprintln!("Client connected");

    let mut buf = [0u8; 4096];
    loop {
        match Read::read(&mut stream, &mut buf) {
            Ok(0) => {
                eprintln!("Client disconnected");
                break;
            }
            Ok(n) => {
                eprintln!("Received {n} bytes");
                Write::write_all(&mut stream, &buf[..n])?;
            }
            Err(e) => {
                eprintln!("Client disconnected: {e}");
                break;
            }
        }
    }

    Ok(())
}
