//! shellyd: remote terminal daemon for a paired mobile client.

use clap::{Parser, Subcommand};
use shellyd::app;
use shellyd::collaborators::{OperatorDisplay, PairingDisplay};
use shellyd::pairing::PairingController;
use shellyd_core::{init_logging, Paths};
use shellyd_keys::KeyStore;
use std::path::PathBuf;

/// shellyd command-line interface.
#[derive(Parser)]
#[command(name = "shellyd")]
#[command(about = "Remote terminal daemon for a paired mobile client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Base directory for runtime files. Defaults to ~/.shellyd
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Listen host (overrides the configured value for this run)
        #[arg(long)]
        host: Option<String>,

        /// Listen port; the TLS endpoint binds port + 1
        #[arg(long)]
        port: Option<u16>,

        /// Run in the foreground (don't detach)
        #[arg(long)]
        foreground: bool,

        /// Verbose (debug-level) logging
        #[arg(short, long)]
        verbose: bool,

        /// Activate pairing on startup
        #[arg(long)]
        pairing: bool,
    },
    /// Stop the daemon
    Stop,
    /// Check daemon status
    Status,
    /// Authorize a client public key
    AddKey {
        /// Base64-encoded Ed25519 public key
        blob: String,

        /// Device label for the key
        #[arg(long)]
        name: Option<String>,
    },
    /// Activate pairing without a running listener
    Pair,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match &cli.base_dir {
        Some(base) => Paths::with_base_dir(base.clone()),
        None => Paths::new()?,
    };

    match cli.command {
        Some(Commands::Start {
            host,
            port,
            foreground,
            verbose,
            pairing,
        }) => {
            init_logging(if verbose { "debug" } else { "info" });
            if foreground {
                start_foreground(paths, host, port, pairing)
            } else {
                start_background(&cli.base_dir, host, port, verbose, pairing)
            }
        }
        None => {
            init_logging("info");
            start_foreground(paths, None, None, false)
        }
        Some(Commands::Stop) => {
            init_logging("info");
            app::stop_daemon(&paths)
        }
        Some(Commands::Status) => {
            init_logging("info");
            app::check_status(&paths)
        }
        Some(Commands::AddKey { blob, name }) => {
            init_logging("info");
            add_key(&paths, &blob, name.as_deref())
        }
        Some(Commands::Pair) => {
            init_logging("info");
            activate_pairing(&paths)
        }
    }
}

fn start_foreground(
    paths: Paths,
    host: Option<String>,
    port: Option<u16>,
    pairing: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(app::run_daemon(paths, app::StartOptions { host, port, pairing }))
}

/// Detach by re-spawning ourselves with `--foreground` and exiting.
fn start_background(
    base_dir: &Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    verbose: bool,
    pairing: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let exe = std::env::current_exe()?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("start").arg("--foreground");
    if let Some(base) = base_dir {
        cmd.arg("--base-dir").arg(base);
    }
    if let Some(host) = host {
        cmd.arg("--host").arg(host);
    }
    if let Some(port) = port {
        cmd.arg("--port").arg(port.to_string());
    }
    if verbose {
        cmd.arg("--verbose");
    }
    if pairing {
        cmd.arg("--pairing");
    }
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    let child = cmd.spawn()?;
    println!("shellyd started (pid {})", child.id());
    Ok(())
}

fn add_key(
    paths: &Paths,
    blob: &str,
    name: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    paths.ensure_dirs()?;
    let store = KeyStore::new(paths.authorized_keys_file());
    store.ensure_file()?;

    let key = store.add(blob, name.unwrap_or(""))?;
    println!("Authorized key {}", key.fingerprint());
    if !key.label.is_empty() {
        println!("  Label: {}", key.label);
    }
    Ok(())
}

fn activate_pairing(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    paths.ensure_dirs()?;
    let controller = PairingController::new(paths.pairing_code_file());
    let code = controller.generate();

    let display = OperatorDisplay::new();
    display.show(&code, "a new device");
    println!("Pairing code valid for 10 minutes: {}", code);
    println!("(also written to {})", paths.pairing_code_file().display());
    Ok(())
}
