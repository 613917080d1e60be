//! Browser process spawn and DevTools endpoint discovery.
//!
//! The browser is launched with a throwaway profile directory and
//! `--remote-debugging-port`; Chromium then prints the WebSocket endpoint on
//! stderr. Discovery fails if the line does not appear within
//! [`ENDPOINT_DEADLINE`] or the process exits first.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use url::Url;

use crate::CdpError;

/// How long the browser gets to print its DevTools endpoint.
pub const ENDPOINT_DEADLINE: Duration = Duration::from_secs(15);

const PROFILE_PREFIX: &str = "pagehand-profile-";

/// Options controlling the browser spawn.
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    /// Browser binary. When `None`, well-known names are searched on PATH.
    pub executable: Option<PathBuf>,
    /// Debugging port; 0 asks the browser for an ephemeral one.
    pub port: u16,
    pub headless: bool,
    /// Window size applied in headless mode.
    pub window_size: (u32, u32),
    /// Extra args appended verbatim after the built-in ones.
    pub args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: None,
            port: 0,
            headless: true,
            window_size: (1440, 900),
            args: Vec::new(),
        }
    }
}

/// A running browser child process plus its discovered endpoint.
pub struct BrowserProcess {
    child: Child,
    profile_dir: Option<TempDir>,
    ws_url: String,
    host: String,
    port: u16,
}

impl BrowserProcess {
    /// Spawn the browser and wait for its DevTools WebSocket endpoint.
    pub async fn launch(options: &LaunchOptions) -> Result<Self, CdpError> {
        let executable = resolve_executable(options)?;
        let profile_dir = tempfile::Builder::new()
            .prefix(PROFILE_PREFIX)
            .tempdir()
            .map_err(|e| CdpError::Launch(format!("failed to create profile dir: {e}")))?;

        let mut command = Command::new(&executable);
        command
            .arg(format!("--remote-debugging-port={}", options.port))
            .arg(format!("--user-data-dir={}", profile_dir.path().display()))
            .arg("--use-mock-keychain");
        if options.headless {
            command.arg("--headless").arg(format!(
                "--window-size={},{}",
                options.window_size.0, options.window_size.1
            ));
        }
        command.args(&options.args);
        command.stderr(Stdio::piped()).stdout(Stdio::null());
        command.kill_on_drop(true);

        info!(executable = %executable.display(), headless = options.headless, "launching browser");

        let mut child = command
            .spawn()
            .map_err(|e| CdpError::Launch(format!("failed to spawn {}: {e}", executable.display())))?;

        let ws_url = discover_ws_url(&mut child).await?;
        let (host, port) = endpoint_host_port(&ws_url)?;
        debug!(ws_url = %ws_url, host = %host, port, "devtools endpoint discovered");

        Ok(Self {
            child,
            profile_dir: Some(profile_dir),
            ws_url,
            host,
            port,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// WebSocket endpoint for attaching directly to a page target.
    pub fn page_ws_url(&self, target_id: &str) -> String {
        format!("ws://{}:{}/devtools/page/{}", self.host, self.port, target_id)
    }

    /// Whether the child is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the process and schedule profile removal.
    ///
    /// Filesystem errors while deleting the profile are swallowed; the OS
    /// temp dir is self-cleaning anyway.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!(error = %e, "failed to signal browser process");
        }
        let _ = self.child.wait().await;

        if let Some(profile) = self.profile_dir.take() {
            tokio::task::spawn_blocking(move || {
                if let Err(e) = profile.close() {
                    debug!(error = %e, "profile dir removal failed");
                }
            });
        }
    }
}

fn resolve_executable(options: &LaunchOptions) -> Result<PathBuf, CdpError> {
    if let Some(path) = &options.executable {
        if !path.exists() {
            return Err(CdpError::Launch(format!(
                "browser executable not found at {}",
                path.display()
            )));
        }
        return Ok(path.clone());
    }

    if let Ok(path) = std::env::var("PAGEHAND_BROWSER") {
        return Ok(PathBuf::from(path));
    }

    const CANDIDATES: &[&str] = &[
        "chromium",
        "chromium-browser",
        "google-chrome",
        "google-chrome-stable",
        "chrome",
    ];
    for name in CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    Err(CdpError::Launch(
        "no Chromium-family browser found on PATH; set LaunchOptions.executable or PAGEHAND_BROWSER"
            .into(),
    ))
}

/// Read stderr until the DevTools endpoint line appears.
async fn discover_ws_url(child: &mut Child) -> Result<String, CdpError> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CdpError::Launch("browser process has no stderr handle".into()))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let scan = async {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(ws) = parse_endpoint_line(&line) {
                        return Ok(ws);
                    }
                    if preview.len() < 8 {
                        preview.push(line);
                    }
                }
                Ok(None) => {
                    return Err(CdpError::Launch(format!(
                        "browser exited before exposing a devtools endpoint. stderr: {}",
                        preview.join(" | ")
                    )))
                }
                Err(e) => return Err(CdpError::Launch(format!("stderr read failed: {e}"))),
            }
        }
    };

    tokio::time::timeout(ENDPOINT_DEADLINE, scan)
        .await
        .map_err(|_| {
            CdpError::Launch(format!(
                "browser did not expose a devtools endpoint within {} s",
                ENDPOINT_DEADLINE.as_secs()
            ))
        })?
}

/// Pull the WebSocket url out of a stderr line, if it carries one.
fn parse_endpoint_line(line: &str) -> Option<String> {
    let (_, rest) = line.rsplit_once("listening on ")?;
    let ws = rest.trim();
    if ws.starts_with("ws://") && ws.contains("/devtools/browser/") {
        Some(ws.to_string())
    } else {
        None
    }
}

fn endpoint_host_port(ws_url: &str) -> Result<(String, u16), CdpError> {
    let parsed = Url::parse(ws_url)
        .map_err(|e| CdpError::Launch(format!("bad devtools endpoint {ws_url}: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| CdpError::Launch(format!("devtools endpoint {ws_url} has no host")))?
        .to_string();
    let port = parsed
        .port()
        .ok_or_else(|| CdpError::Launch(format!("devtools endpoint {ws_url} has no port")))?;
    Ok((host, port))
}
