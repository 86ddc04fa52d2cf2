//! Host liveness checks

use std::future::Future;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Reachability test for a single host
pub trait Pinger: Send + Sync + 'static {
    /// True if the host answered within `timeout`
    fn ping(&self, address: Ipv4Addr, timeout: Duration) -> impl Future<Output = bool> + Send;
}

/// ICMP echo through the platform `ping` binary
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPinger;

impl SystemPinger {
    fn command(address: Ipv4Addr, timeout: Duration) -> Command {
        let mut command = Command::new("ping");
        let millis = timeout.as_millis().to_string();
        // iputils takes whole seconds; the tokio timeout in ping() is the real bound
        let secs = timeout.as_secs().max(1).to_string();

        if cfg!(target_os = "windows") {
            command.args(["-n", "1", "-w", millis.as_str()]);
        } else if cfg!(target_os = "macos") {
            command.args(["-c", "1", "-W", millis.as_str()]);
        } else {
            command.args(["-c", "1", "-W", secs.as_str()]);
        }

        command
            .arg(address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Pinger for SystemPinger {
    async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> bool {
        let status = Self::command(address, timeout).status();

        match tokio::time::timeout(timeout, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!("ping {} failed to run: {}", address, e);
                false
            }
            Err(_) => false,
        }
    }
}
