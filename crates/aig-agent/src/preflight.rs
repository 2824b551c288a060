use std::path::Path;
use std::process::Command;

use aig_service::HttpService;
use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::ToolSettings;

/// Run all preflight checks before entering the connection loop.
///
/// A missing tool installation is fatal. An unreachable server is only
/// logged: the loop keeps retrying it.
pub async fn run_all(tool: &ToolSettings, service: &HttpService) -> Result<()> {
    check_tool_dir(&tool.work_dir)?;
    check_tool_bin(&tool.program)?;
    check_server_health(service).await;
    info!("all preflight checks passed");
    Ok(())
}

fn check_tool_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!(
            "tool directory {} does not exist. Install the evaluation tool or set --tool-dir",
            dir.display()
        );
    }
    info!("tool dir: {}", dir.display());
    Ok(())
}

fn check_tool_bin(program: &Path) -> Result<()> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .with_context(|| format!("{} is not installed or not executable", program.display()))?;
    if !output.status.success() {
        bail!("{} --version failed", program.display());
    }
    let version = String::from_utf8_lossy(&output.stdout);
    info!(
        "{}: {}",
        program.display(),
        version.lines().next().unwrap_or("").trim()
    );
    Ok(())
}

async fn check_server_health(service: &HttpService) {
    match service.health_check().await {
        Ok(()) => info!("server: reachable"),
        Err(e) => warn!("server not reachable yet ({e}), will keep retrying"),
    }
}
