//! Auto-starts the control plane server when a client subcommand can't
//! reach one: poll `GET /healthz` and spawn `fabric serve` in the
//! background on refusal.

use std::process::Stdio;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const MAX_WAIT: Duration = Duration::from_secs(15);

/// Spawns `fabric serve` in the background so the server stays up for
/// this and future client commands; returns once the process is started.
pub fn spawn_serve() -> std::io::Result<std::process::Child> {
    let exe = std::env::current_exe()?;
    std::process::Command::new(exe).arg("serve").stdout(Stdio::null()).stderr(Stdio::null()).spawn()
}

async fn is_up(http: &reqwest::Client, base_url: &str) -> bool {
    http.get(format!("{base_url}/healthz"))
        .timeout(Duration::from_millis(500))
        .send()
        .await
        .map(|resp| resp.status().is_success())
        .unwrap_or(false)
}

/// Polls `base_url/healthz` until it answers or `MAX_WAIT` elapses.
pub async fn wait_for_server(http: &reqwest::Client, base_url: &str) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < MAX_WAIT {
        if is_up(http, base_url).await {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

/// Ensures a control-plane server answers at `base_url`, spawning one in
/// the background if none does. A client command calls this before its
/// first request unless `--no-auto-start` was passed.
pub async fn ensure_server_or_spawn(http: &reqwest::Client, base_url: &str) -> Result<(), String> {
    if is_up(http, base_url).await {
        return Ok(());
    }

    eprintln!("fabric: control plane not running at {base_url}, starting it...");
    spawn_serve().map_err(|e| e.to_string())?;
    if wait_for_server(http, base_url).await {
        Ok(())
    } else {
        Err("server failed to become ready".to_string())
    }
}
