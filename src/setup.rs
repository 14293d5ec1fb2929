use std::process::Command;

use crate::config::{CheckerConfig, ProbeMode};

/// Fails early when the configured probe needs a binary that is not installed.
pub fn check_probe_dependency(config: &CheckerConfig) -> Result<(), anyhow::Error> {
    match config.probe {
        ProbeMode::Http => Ok(()),
        ProbeMode::Mpv => {
            if is_binary_available(&config.mpv_path) {
                return Ok(());
            }
            let hint = if cfg!(target_os = "windows") {
                "winget install mpv"
            } else if cfg!(target_os = "macos") {
                "brew install mpv"
            } else {
                "sudo apt install mpv"
            };
            Err(anyhow::anyhow!(
                "'{}' not found. Install mpv ({}) or use --probe http.",
                config.mpv_path,
                hint
            ))
        }
    }
}

fn is_binary_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
