//! Daemon lifecycle management (stop, status) via the PID file.

use shellyd_core::Paths;

/// Stop a running daemon: SIGTERM, a grace period, then SIGKILL.
pub fn stop_daemon(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let pid_path = paths.pid_file();

    let Some(pid) = read_pid(paths) else {
        println!("Daemon is not running (no PID file)");
        return Ok(());
    };

    if !process_alive(pid) {
        println!("Daemon is not running (stale PID file)");
        let _ = std::fs::remove_file(&pid_path);
        return Ok(());
    }

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    // Wait up to 3 seconds for a graceful exit.
    for _ in 0..30 {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if !process_alive(pid) {
            println!("Daemon stopped");
            let _ = std::fs::remove_file(&pid_path);
            return Ok(());
        }
    }

    println!("Daemon did not stop gracefully, sending SIGKILL to PID {}", pid);
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    let _ = std::fs::remove_file(&pid_path);
    println!("Daemon killed");

    Ok(())
}

/// Report whether the daemon is running.
pub fn check_status(paths: &Paths) -> Result<(), Box<dyn std::error::Error>> {
    let Some(pid) = read_pid(paths) else {
        println!("Daemon is not running");
        return Ok(());
    };

    if process_alive(pid) {
        println!("Daemon is running");
        println!("  PID:    {}", pid);
        println!("  State:  {}", paths.base_dir().display());
    } else {
        println!("Daemon is not running (stale PID file)");
    }

    Ok(())
}

fn read_pid(paths: &Paths) -> Option<i32> {
    let raw = std::fs::read_to_string(paths.pid_file()).ok()?;
    raw.trim().parse().ok()
}

fn process_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}
