use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use super::ChromeError;
use super::discovery::{BrowserVersion, query_version};

/// Attempts made on fresh ports before a launch is reported as failed.
pub const MAX_PORT_RETRIES: u32 = 3;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for launching a browser process.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub executable: PathBuf,
    pub headless: bool,
    pub window_size: (u32, u32),
    /// Appended after the built-in flags.
    pub extra_args: Vec<String>,
}

/// A running browser with a throwaway profile.
///
/// Dropping the handle kills the process and removes the profile unless it
/// was detached first.
pub struct ChromeProcess {
    child: Option<std::process::Child>,
    port: u16,
    user_data_dir: PathBuf,
    owns_profile: bool,
    version: BrowserVersion,
}

impl ChromeProcess {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.as_ref().map_or(0, std::process::Child::id)
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.version.ws_debugger_url
    }

    #[must_use]
    pub fn user_data_dir(&self) -> &Path {
        &self.user_data_dir
    }

    pub fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.child = None;
        if self.owns_profile {
            remove_profile(&self.user_data_dir);
            self.owns_profile = false;
        }
    }

    /// Let the process outlive this handle. The caller becomes responsible
    /// for the pid and the profile directory.
    #[must_use]
    pub fn detach(mut self) -> DetachedProcess {
        let detached = DetachedProcess {
            pid: self.pid(),
            port: self.port,
            ws_url: self.version.ws_debugger_url.clone(),
            user_data_dir: self.user_data_dir.clone(),
        };
        self.child = None;
        self.owns_profile = false;
        detached
    }
}

impl Drop for ChromeProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// What remains of a launch once the handle has been let go.
#[derive(Debug, Clone)]
pub struct DetachedProcess {
    pub pid: u32,
    pub port: u16,
    pub ws_url: String,
    pub user_data_dir: PathBuf,
}

/// Find an available TCP port on localhost.
///
/// # Errors
///
/// Returns `ChromeError::LaunchFailed` if binding fails.
pub fn find_available_port() -> Result<u16, ChromeError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").map_err(|e| {
        ChromeError::LaunchFailed(format!("could not bind to find a free port: {e}"))
    })?;
    let port = listener
        .local_addr()
        .map_err(|e| ChromeError::LaunchFailed(format!("could not get local address: {e}")))?
        .port();
    Ok(port)
}

/// Launch the browser, retrying on a fresh port when it fails to come up.
///
/// `timeout` bounds each attempt separately.
///
/// # Errors
///
/// Returns the last attempt's error. Spawn failures are not retried.
pub async fn launch_chrome(
    config: &LaunchConfig,
    timeout: Duration,
) -> Result<ChromeProcess, ChromeError> {
    let mut attempt = 1;
    loop {
        let port = find_available_port()?;
        match launch_on_port(config, port, timeout).await {
            Ok(process) => return Ok(process),
            Err(e @ (ChromeError::StartupTimeout { .. } | ChromeError::LaunchFailed(_)))
                if attempt < MAX_PORT_RETRIES && !is_spawn_failure(&e) =>
            {
                tracing::debug!(attempt, port, error = %e, "browser did not come up, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_spawn_failure(e: &ChromeError) -> bool {
    matches!(e, ChromeError::LaunchFailed(msg) if msg.starts_with("failed to spawn"))
}

/// Flags passed to every launch, before the caller's extras.
#[must_use]
pub fn build_args(config: &LaunchConfig, port: u16, user_data_dir: &Path) -> Vec<String> {
    let (width, height) = config.window_size;
    let mut args = vec![
        format!("--remote-debugging-port={port}"),
        format!("--user-data-dir={}", user_data_dir.display()),
        format!("--window-size={width},{height}"),
        "--no-first-run".to_owned(),
        "--no-default-browser-check".to_owned(),
        "--disable-background-networking".to_owned(),
    ];
    if config.headless {
        args.push("--headless=new".to_owned());
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

async fn launch_on_port(
    config: &LaunchConfig,
    port: u16,
    timeout: Duration,
) -> Result<ChromeProcess, ChromeError> {
    let user_data_dir =
        std::env::temp_dir().join(format!("browser-probe-{}", uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&user_data_dir)?;

    let spawned = Command::new(&config.executable)
        .args(build_args(config, port, &user_data_dir))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            remove_profile(&user_data_dir);
            return Err(ChromeError::LaunchFailed(format!(
                "failed to spawn {}: {e}",
                config.executable.display()
            )));
        }
    };
    tracing::debug!(pid = child.id(), port, "browser spawned");

    let mut child = Some(child);
    let start = tokio::time::Instant::now();
    loop {
        if let Some(c) = child.as_mut() {
            if let Ok(Some(status)) = c.try_wait() {
                remove_profile(&user_data_dir);
                return Err(ChromeError::LaunchFailed(format!(
                    "browser exited with {status} before becoming ready"
                )));
            }
        }

        if let Ok(version) = query_version(port).await {
            tracing::debug!(browser = %version.browser, port, "browser ready");
            return Ok(ChromeProcess {
                child,
                port,
                user_data_dir,
                owns_profile: true,
                version,
            });
        }

        if start.elapsed() > timeout {
            if let Some(mut c) = child.take() {
                let _ = c.kill();
                let _ = c.wait();
            }
            remove_profile(&user_data_dir);
            return Err(ChromeError::StartupTimeout { port });
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Remove a throwaway profile directory. Missing directories are fine.
pub fn remove_profile(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove profile directory");
        }
    }
}

/// Terminate a browser that is no longer reachable over CDP.
pub fn kill_pid(pid: u32) {
    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return;
        };
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(pid, "SIGTERM failed, process likely already gone");
        }
    }

    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(headless: bool) -> LaunchConfig {
        LaunchConfig {
            executable: PathBuf::from("/usr/bin/chromium"),
            headless,
            window_size: (1280, 720),
            extra_args: vec!["--mute-audio".into()],
        }
    }

    #[test]
    fn find_available_port_returns_valid_port() {
        let port = find_available_port().unwrap();
        assert!(port > 0);
    }

    #[test]
    fn args_include_port_profile_and_size() {
        let args = build_args(&config(true), 9333, Path::new("/tmp/profile"));
        assert!(args.contains(&"--remote-debugging-port=9333".to_owned()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_owned()));
        assert!(args.contains(&"--window-size=1280,720".to_owned()));
        assert!(args.contains(&"--headless=new".to_owned()));
        assert_eq!(args.last().unwrap(), "--mute-audio");
    }

    #[test]
    fn headed_launch_omits_headless_flag() {
        let args = build_args(&config(false), 9333, Path::new("/tmp/profile"));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn remove_profile_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(profile.join("Default")).unwrap();
        remove_profile(&profile);
        assert!(!profile.exists());
        remove_profile(&profile);
    }

    #[tokio::test]
    async fn missing_executable_fails_without_retry() {
        let cfg = LaunchConfig {
            executable: PathBuf::from("/nonexistent/browser-probe-test-binary"),
            ..config(true)
        };
        let err = launch_chrome(&cfg, Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(is_spawn_failure(&err), "unexpected error: {err}");
    }
}
