//! External collaborators: the discovery advertiser and the pairing
//! display helper. Both are thin contracts around host tooling; neither
//! is ever fatal to the daemon.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use tracing::{info, warn};

/// Service type registered on the local link.
const SERVICE_TYPE: &str = "_shelly._tcp.";

/// Shows the 6-digit pairing code to the operator.
pub trait PairingDisplay: Send + Sync {
    /// Display the code together with the requesting device label.
    fn show(&self, code: &str, device_label: &str);
    /// Dismiss the display after verification.
    fn dismiss(&self);
}

/// Default display: an operator banner on stdout, plus an optional
/// external helper named by `SHELLYD_PAIRING_HELPER` which receives the
/// code and label as arguments and is killed on dismissal.
pub struct OperatorDisplay {
    helper: Mutex<Option<Child>>,
}

impl OperatorDisplay {
    pub fn new() -> Self {
        Self {
            helper: Mutex::new(None),
        }
    }
}

impl Default for OperatorDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingDisplay for OperatorDisplay {
    fn show(&self, code: &str, device_label: &str) {
        println!();
        println!("  ┌──────────────────────────────────────┐");
        println!("  │  Pairing request from {:<15}│", truncate(device_label, 15));
        println!("  │                                      │");
        println!("  │           code:  {}              │", code);
        println!("  │                                      │");
        println!("  │  Enter this code on the device.      │");
        println!("  └──────────────────────────────────────┘");
        println!();

        if let Ok(helper) = std::env::var("SHELLYD_PAIRING_HELPER") {
            match Command::new(&helper)
                .arg(code)
                .arg(device_label)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => {
                    let mut guard = self.helper.lock().unwrap();
                    if let Some(mut old) = guard.replace(child) {
                        let _ = old.kill();
                        let _ = old.wait();
                    }
                }
                Err(err) => warn!(helper = %helper, error = %err, "Pairing helper failed to start"),
            }
        }
    }

    fn dismiss(&self) {
        if let Some(mut child) = self.helper.lock().unwrap().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max.saturating_sub(1)).chain(['…']).collect()
    }
}

/// Advertises `_shelly._tcp.` on the local link via the host's mDNS
/// tool (`dns-sd` on macOS, `avahi-publish-service` elsewhere). The
/// record is withdrawn when the advertiser is dropped.
pub struct DiscoveryAdvertiser {
    child: Option<Child>,
}

impl DiscoveryAdvertiser {
    /// Start advertising the plain port. Failures are logged, never fatal.
    pub fn start(port: u16) -> Self {
        let version = env!("CARGO_PKG_VERSION");
        let platform = std::env::consts::OS;
        let txt_version = format!("version={}", version);
        let txt_platform = format!("platform={}", platform);
        let port_str = port.to_string();

        let candidates: [(&str, Vec<&str>); 2] = [
            (
                "dns-sd",
                vec!["-R", "shellyd", SERVICE_TYPE, "local", &port_str, &txt_version, &txt_platform],
            ),
            (
                "avahi-publish-service",
                vec!["shellyd", SERVICE_TYPE, &port_str, &txt_version, &txt_platform],
            ),
        ];

        for (tool, args) in candidates {
            if !tool_exists(tool) {
                continue;
            }
            match Command::new(tool)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(child) => {
                    info!(tool, port, "Discovery advertisement started");
                    return Self { child: Some(child) };
                }
                Err(err) => warn!(tool, error = %err, "Discovery tool failed to start"),
            }
        }

        warn!("No mDNS tool available; daemon will not be discoverable");
        Self { child: None }
    }
}

impl Drop for DiscoveryAdvertiser {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn tool_exists(tool: &str) -> bool {
    let path = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path).any(|dir| dir.join(tool).is_file())
        || Path::new("/usr/bin").join(tool).is_file()
}
