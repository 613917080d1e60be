//! Browser and action configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options accepted by [`crate::Browser::launch`].
#[derive(Clone, Debug)]
pub struct BrowserOptions {
    /// Run without a window. Headful is mostly useful together with
    /// `observe`.
    pub headless: bool,
    /// Debugging port; 0 lets the browser pick an ephemeral one.
    pub port: u16,
    /// Browser binary override.
    pub executable: Option<PathBuf>,
    /// Extra command-line args appended after the built-in ones.
    pub args: Vec<String>,
    /// Accept pages with broken TLS certificates.
    pub ignore_ssl_errors: bool,
    /// Pause before every verb so a human can follow along.
    pub observe: bool,
    /// Length of the observe pause.
    pub observe_time: Duration,
    /// Window size applied in headless mode.
    pub window_size: (u32, u32),
    /// Deadline for `goto` and `open_tab`.
    pub navigation_timeout: Duration,
    /// Deadline for the settle wait after ordinary actions.
    pub action_timeout: Duration,
    /// How long an action listens for the first settling signal.
    pub wait_for_start: Duration,
    /// Quiet window with no outstanding requests before network idle.
    pub network_idle_window: Duration,
    /// Hit-test at most this many candidates per click.
    pub elements_to_match: usize,
    /// Polling cadence for selector resolution.
    pub retry_interval: Duration,
    pub retry_timeout: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            port: 0,
            executable: None,
            args: Vec::new(),
            ignore_ssl_errors: false,
            observe: false,
            observe_time: Duration::from_secs(3),
            window_size: (1440, 900),
            navigation_timeout: Duration::from_secs(30),
            action_timeout: Duration::from_secs(15),
            wait_for_start: Duration::from_millis(500),
            network_idle_window: Duration::from_millis(500),
            elements_to_match: 10,
            retry_interval: Duration::from_millis(1000),
            retry_timeout: Duration::from_millis(10000),
        }
    }
}

impl BrowserOptions {
    pub fn headful() -> Self {
        Self {
            headless: false,
            ..Self::default()
        }
    }

    /// Observe mode: headful plus a pause before every verb.
    pub fn observed(observe_time: Duration) -> Self {
        Self {
            headless: false,
            observe: true,
            observe_time,
            ..Self::default()
        }
    }
}

/// Per-navigation overrides for `goto`/`reload`/`open_tab`.
#[derive(Clone, Debug, Default)]
pub struct NavOptions {
    pub timeout: Option<Duration>,
    /// Extra HTTP headers applied to the attached target before navigating.
    pub headers: Option<serde_json::Value>,
}

/// Per-click overrides.
#[derive(Clone, Debug)]
pub struct ClickOptions {
    pub await_navigation: bool,
    pub timeout: Option<Duration>,
    pub wait_for_start: Option<Duration>,
    /// Modifier keys held during the click.
    pub modifiers: crate::input::KeyModifiers,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            await_navigation: true,
            timeout: None,
            wait_for_start: None,
            modifiers: crate::input::KeyModifiers::empty(),
        }
    }
}

/// Overrides for `write`.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Spacing between character events.
    pub delay: Duration,
    pub await_navigation: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(10),
            await_navigation: true,
        }
    }
}

/// Overrides for `press`.
#[derive(Clone, Debug, Default)]
pub struct PressOptions {
    /// Hold time between the downs and the ups of a chord.
    pub delay: Option<Duration>,
    pub await_navigation: bool,
}

/// Where a screenshot should go.
#[derive(Clone, Debug, Default)]
pub struct ScreenshotOptions {
    /// Target file; defaults to `Screenshot-<unixMs>.png` in the current
    /// directory.
    pub path: Option<PathBuf>,
    /// Skip writing and hand back the raw bytes instead.
    pub return_bytes: bool,
}

/// Uniform result of every verb.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ActionResult {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            url: None,
        }
    }

    pub fn with_url(description: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            url: Some(url.into()),
        }
    }
}

/// Convenience for `exists` polling arguments.
pub fn interval_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

pub fn timeout_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_and_caps() {
        let options = BrowserOptions::default();
        assert!(options.headless);
        assert_eq!(options.navigation_timeout, Duration::from_secs(30));
        assert_eq!(options.action_timeout, Duration::from_secs(15));
        assert_eq!(options.wait_for_start, Duration::from_millis(500));
        assert_eq!(options.elements_to_match, 10);
    }

    #[test]
    fn action_result_serializes_without_null_url() {
        let result = ActionResult::new("Clicked button");
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"description":"Clicked button"}"#);
    }
}
