#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use ipcsocket::transport::{UnixDomainListener, UnixDomainStream};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/ipcscli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .subsec_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn wait_for_listener(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if let Ok(probe) = UnixDomainStream::connect(path) {
            drop(probe);
            return;
        }
        if start.elapsed() >= timeout {
            panic!("connect timeout");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn cli() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ipcsocket"));
    cmd.arg("--log-level").arg("error");
    cmd
}

#[test]
fn send_wait_prints_echoed_payload() {
    let dir = unique_temp_dir("echo");
    let sock_path = dir.join("echo.sock");

    let mut child = cli()
        .arg("echo")
        .arg(&sock_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("echo command should start");

    wait_for_listener(&sock_path, Duration::from_secs(3));

    let output = cli()
        .arg("--format")
        .arg("json")
        .arg("send")
        .arg(&sock_path)
        .arg("--data")
        .arg("ping")
        .arg("--wait")
        .arg("--wait-timeout")
        .arg("3s")
        .output()
        .expect("send should run");

    assert!(output.status.success(), "send failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("send should emit json");
    assert_eq!(value["payload"], "ping");
    assert_eq!(value["size"], 4);

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn echo_socket_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = unique_temp_dir("mode");
    let sock_path = dir.join("echo.sock");

    let mut child = cli()
        .arg("echo")
        .arg(&sock_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("echo command should start");

    wait_for_listener(&sock_path, Duration::from_secs(3));
    let mode = std::fs::metadata(&sock_path)
        .expect("socket should exist")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);

    let _ = child.kill();
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn silent_server_times_out_with_124() {
    let dir = unique_temp_dir("silent");
    let sock_path = dir.join("silent.sock");
    let listener = UnixDomainListener::bind(&sock_path).expect("bind should succeed");

    let server = thread::spawn(move || {
        let stream = listener.accept().expect("accept should succeed");
        let mut buf = [0u8; 16];
        // Consume the payload, never answer, and hold the stream until the client gives up.
        let _ = stream.read(&mut buf);
        let _ = stream.read(&mut buf);
    });

    let output = cli()
        .arg("send")
        .arg(&sock_path)
        .arg("--data")
        .arg("hello")
        .arg("--wait")
        .arg("--wait-timeout")
        .arg("200ms")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(124));
    server.join().expect("server thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn send_to_missing_socket_fails() {
    let dir = unique_temp_dir("missing");
    let output = cli()
        .arg("send")
        .arg(dir.join("nobody.sock"))
        .arg("--data")
        .arg("x")
        .output()
        .expect("send should run");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect failed"));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_reports_package_version() {
    let output = cli().arg("version").output().expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("ipcsocket {}", env!("CARGO_PKG_VERSION"))
    );
}
