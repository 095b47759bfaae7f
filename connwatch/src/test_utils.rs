#![cfg(any(test, feature = "test-utils"))]

use std::{
    net::{TcpListener, TcpStream},
    process::{Command, Stdio},
    thread::sleep,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

pub use crate::feed::MemoryFeed;

const NATS_IMAGE: &str = "docker.io/library/nats:2.10";

/// Handle to an ephemeral NATS container standing in for the management
/// service's event bus.
pub struct NatsServer {
    pub url: String,
    container_id: String,
}

impl Drop for NatsServer {
    fn drop(&mut self) {
        let _ = Command::new("podman")
            .args(["rm", "-f", &self.container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Spawn a NATS container with basic auth (`auth`/`auth`) on a random
/// localhost port and wait until it accepts connections.
pub fn start_nats_server() -> std::io::Result<NatsServer> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let output = Command::new("podman")
        .args([
            "run",
            "-d",
            "--rm",
            "-p",
            &format!("127.0.0.1:{port}:4222"),
            NATS_IMAGE,
            "--user",
            "auth",
            "--pass",
            "auth",
        ])
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("podman run failed: {stderr}"),
        ));
    }

    let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let server = NatsServer {
        url: format!("nats://127.0.0.1:{port}"),
        container_id,
    };

    wait_for_port(port, Duration::from_secs(10))?;
    Ok(server)
}

fn wait_for_port(port: u16, timeout: Duration) -> std::io::Result<()> {
    let addr = format!("127.0.0.1:{port}");
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if TcpStream::connect(&addr).is_ok() {
            return Ok(());
        }
        sleep(Duration::from_millis(100));
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("timed out waiting for {addr}"),
    ))
}

/// Wall clock in milliseconds, the unit of `observed_at_ms`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
