//! Daemon startup, shutdown, and shared state wiring.

mod lifecycle;

pub use lifecycle::{check_status, stop_daemon};

use crate::collaborators::{DiscoveryAdvertiser, OperatorDisplay, PairingDisplay};
use crate::connection::ConnectionDeps;
use crate::listener::Listener;
use crate::pairing::PairingController;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use shellyd_audit::AuditSink;
use shellyd_core::{Config, Paths};
use shellyd_keys::KeyStore;
use shellyd_trust::TrustMaterial;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Runtime overrides from the `start` subcommand.
#[derive(Debug, Default)]
pub struct StartOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pairing: bool,
}

/// Run the daemon until SIGINT/SIGTERM.
pub async fn run_daemon(
    paths: Paths,
    options: StartOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    // Missing or unwritable state directory is fatal at startup.
    paths.ensure_dirs()?;

    let first_run = !paths.config_file().exists();
    let mut config = Config::load(&paths)?;
    if first_run {
        config.save(&paths)?;
    }
    if let Some(host) = options.host {
        config.host = host;
    }
    if let Some(port) = options.port {
        config.port = port;
    }

    let keys = KeyStore::new(paths.authorized_keys_file());
    keys.ensure_file()?;

    // TLS is best-effort: generation or load failure leaves the plain
    // endpoint serving.
    let trust = match TrustMaterial::ensure(&paths).and_then(|_| TrustMaterial::load(&paths)) {
        Ok(trust) => Some(trust),
        Err(err) => {
            warn!(error = %err, "Trust material unavailable; TLS endpoint disabled");
            None
        }
    };
    let certificate_fingerprint = trust.as_ref().map(|t| t.fingerprint().to_string());
    let tls_acceptor = if config.tls_enabled {
        trust.as_ref().map(|t| t.acceptor())
    } else {
        None
    };

    let audit = if config.audit_logging_enabled {
        AuditSink::start(paths.audit_log_file(), config.audit_log_retention_days)?
    } else {
        AuditSink::disabled()
    };

    let pairing = Arc::new(PairingController::new(paths.pairing_code_file()));
    let display: Arc<dyn PairingDisplay> = Arc::new(OperatorDisplay::new());

    // Pairing auto-activates on request or when nothing is authorized yet.
    if options.pairing || keys.is_empty()? {
        let code = pairing.generate();
        display.show(&code, "a new device");
        info!("Pairing active for the next 10 minutes");
    }

    let advertiser = DiscoveryAdvertiser::start(config.port);

    // Per-process identity surfaced in the auth challenge. The pinned
    // trust anchor is the certificate fingerprint, not this key.
    let server_public_key = BASE64.encode(
        SigningKey::generate(&mut OsRng)
            .verifying_key()
            .to_bytes(),
    );

    let host_label = hostname();
    let max_connections = config.max_connections;
    let host = config.host.clone();
    let port = config.port;

    let deps = ConnectionDeps {
        config: Arc::new(RwLock::new(config)),
        paths: paths.clone(),
        keys,
        pairing,
        audit,
        certificate_fingerprint,
        server_public_key,
        display,
        host_label,
    };

    let listener = Listener::bind(&host, port, tls_acceptor, max_connections, deps).await?;

    write_pid_file(&paths)?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let listener_task = tokio::spawn(listener.run(shutdown_tx.clone()));

    wait_for_shutdown_signal().await;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    let _ = listener_task.await;

    drop(advertiser);
    remove_pid_file(&paths);

    Ok(())
}

async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        Err(err) => {
            warn!(error = %err, "No SIGTERM handler; SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

fn write_pid_file(paths: &Paths) -> std::io::Result<()> {
    std::fs::write(paths.pid_file(), std::process::id().to_string())
}

fn remove_pid_file(paths: &Paths) {
    let _ = std::fs::remove_file(paths.pid_file());
}

/// The host's name, for the pairing challenge and discovery record.
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret == 0 {
        if let Ok(cstr) = std::ffi::CStr::from_bytes_until_nul(&buf) {
            let name = cstr.to_string_lossy();
            if !name.is_empty() {
                return name.into_owned();
            }
        }
    }
    "this host".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_is_nonempty() {
        assert!(!hostname().is_empty());
    }

    #[test]
    fn test_pid_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        write_pid_file(&paths).unwrap();
        let pid: u32 = std::fs::read_to_string(paths.pid_file())
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert_eq!(pid, std::process::id());

        remove_pid_file(&paths);
        assert!(!paths.pid_file().exists());
    }
}
