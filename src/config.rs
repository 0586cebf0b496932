use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chrome::Engine;
use crate::error::{AppError, ErrorKind};
use crate::session::Viewport;

/// Default per-operation timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Default observation window for monitors in milliseconds.
pub const DEFAULT_MONITOR_DURATION_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Config structs (parsed from TOML)
// ---------------------------------------------------------------------------

/// The parsed TOML config file. Every field is optional.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    pub browser: BrowserConfig,
    pub session: SessionConfig,
    pub monitor: MonitorConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub engine: Option<String>,
    pub headless: Option<bool>,
    pub executable: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub extra_args: Option<Vec<String>>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: Option<String>,
    pub pretty: Option<bool>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `--config` named a file that does not exist.
    #[error("config file not found: {}", .0.display())]
    Missing(PathBuf),
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        Self::new(ErrorKind::InvalidArgument, e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Config file search
// ---------------------------------------------------------------------------

/// Find the config file to use.
///
/// Search order:
/// 1. `explicit_path` (from `--config`)
/// 2. `$BROWSER_PROBE_CONFIG`
/// 3. `./.browser-custom.toml`
/// 4. `<config_dir>/browser-probe/config.toml`
/// 5. `~/.browser-custom.toml`
///
/// # Errors
///
/// Returns `ConfigError::Missing` if an explicit path was given and does not
/// exist. The other locations are simply skipped when absent.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
    find_config_file_with(explicit_path, std::env::var("BROWSER_PROBE_CONFIG").ok())
}

/// [`find_config_file`] with the environment value passed in.
///
/// # Errors
///
/// See [`find_config_file`].
pub fn find_config_file_with(
    explicit_path: Option<&Path>,
    env_config: Option<String>,
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(p) = explicit_path {
        if p.exists() {
            return Ok(Some(p.to_path_buf()));
        }
        return Err(ConfigError::Missing(p.to_path_buf()));
    }

    if let Some(env_path) = env_config {
        let p = PathBuf::from(env_path);
        if p.exists() {
            return Ok(Some(p));
        }
        tracing::warn!(path = %p.display(), "BROWSER_PROBE_CONFIG points to a missing file");
    }

    let local = PathBuf::from(".browser-custom.toml");
    if local.exists() {
        return Ok(Some(local));
    }

    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("browser-probe").join("config.toml");
        if platform.exists() {
            return Ok(Some(platform));
        }
    }

    Ok(dirs::home_dir()
        .map(|home| home.join(".browser-custom.toml"))
        .filter(|p| p.exists()))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Locate and parse the config file.
///
/// # Errors
///
/// Only a missing explicit `--config` path is an error; unreadable or
/// malformed files log a warning and yield defaults.
pub fn load_config(explicit_path: Option<&Path>) -> Result<(Option<PathBuf>, ConfigFile), ConfigError> {
    let path = find_config_file(explicit_path)?;
    let config = path.as_deref().map(load_config_from).unwrap_or_default();
    Ok((path, config))
}

#[must_use]
pub fn load_config_from(path: &Path) -> ConfigFile {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents, path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read config file");
            ConfigFile::default()
        }
    }
}

/// Parse TOML into a [`ConfigFile`].
///
/// A strict pass detects unknown keys; if only that pass fails the lenient
/// result is used with a warning.
#[must_use]
pub fn parse_config(contents: &str, path: &Path) -> ConfigFile {
    match toml::from_str::<StrictConfigFile>(contents) {
        Ok(strict) => strict.into(),
        Err(strict_err) => match toml::from_str::<ConfigFile>(contents) {
            Ok(config) => {
                tracing::warn!(path = %path.display(), "unknown keys in config file: {strict_err}");
                config
            }
            Err(parse_err) => {
                tracing::warn!(path = %path.display(), "could not parse config file: {parse_err}");
                ConfigFile::default()
            }
        },
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictConfigFile {
    #[serde(default)]
    browser: StrictBrowserConfig,
    #[serde(default)]
    session: StrictSessionConfig,
    #[serde(default)]
    monitor: StrictMonitorConfig,
    #[serde(default)]
    output: StrictOutputConfig,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictBrowserConfig {
    engine: Option<String>,
    headless: Option<bool>,
    executable: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    extra_args: Option<Vec<String>>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictSessionConfig {
    timeout_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictMonitorConfig {
    duration_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StrictOutputConfig {
    dir: Option<String>,
    pretty: Option<bool>,
}

impl From<StrictConfigFile> for ConfigFile {
    fn from(s: StrictConfigFile) -> Self {
        Self {
            browser: BrowserConfig {
                engine: s.browser.engine,
                headless: s.browser.headless,
                executable: s.browser.executable,
                width: s.browser.width,
                height: s.browser.height,
                extra_args: s.browser.extra_args,
            },
            session: SessionConfig {
                timeout_ms: s.session.timeout_ms,
            },
            monitor: MonitorConfig {
                duration_ms: s.monitor.duration_ms,
            },
            output: OutputConfig {
                dir: s.output.dir,
                pretty: s.output.pretty,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Values given on the command line or through `BROWSER_PROBE_*` variables.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub engine: Option<String>,
    pub headless: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub executable: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub pretty: bool,
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub engine: Engine,
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub viewport: Viewport,
    pub extra_args: Vec<String>,
    pub timeout_ms: u64,
    pub monitor_duration_ms: u64,
    pub output_dir: Option<PathBuf>,
    pub pretty: bool,
}

/// Merge overrides over the file over built-in defaults.
#[must_use]
pub fn resolve_config(
    file: &ConfigFile,
    config_path: Option<PathBuf>,
    overrides: &Overrides,
) -> ResolvedConfig {
    let engine = overrides
        .engine
        .as_deref()
        .or(file.browser.engine.as_deref())
        .map(Engine::from_name)
        .unwrap_or_default();
    let default_viewport = Viewport::default();

    ResolvedConfig {
        config_path,
        engine,
        headless: overrides.headless.or(file.browser.headless).unwrap_or(true),
        executable: overrides
            .executable
            .clone()
            .or_else(|| file.browser.executable.as_ref().map(PathBuf::from)),
        viewport: Viewport {
            width: overrides
                .width
                .or(file.browser.width)
                .unwrap_or(default_viewport.width),
            height: overrides
                .height
                .or(file.browser.height)
                .unwrap_or(default_viewport.height),
        },
        extra_args: file.browser.extra_args.clone().unwrap_or_default(),
        timeout_ms: overrides
            .timeout_ms
            .or(file.session.timeout_ms)
            .filter(|&ms| ms > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS),
        monitor_duration_ms: file
            .monitor
            .duration_ms
            .unwrap_or(DEFAULT_MONITOR_DURATION_MS),
        output_dir: overrides
            .output_dir
            .clone()
            .or_else(|| file.output.dir.as_ref().map(PathBuf::from)),
        pretty: overrides.pretty || file.output.pretty.unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_full_config() {
        let toml = r#"
[browser]
engine = "edge"
headless = false
executable = "/usr/bin/microsoft-edge"
width = 1920
height = 1080
extra_args = ["--no-sandbox"]

[session]
timeout_ms = 60000

[monitor]
duration_ms = 2500

[output]
dir = "/tmp/artifacts"
pretty = true
"#;
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.browser.engine.as_deref(), Some("edge"));
        assert_eq!(config.browser.headless, Some(false));
        assert_eq!(config.browser.width, Some(1920));
        assert_eq!(
            config.browser.extra_args.as_deref(),
            Some(&["--no-sandbox".to_string()][..])
        );
        assert_eq!(config.session.timeout_ms, Some(60000));
        assert_eq!(config.monitor.duration_ms, Some(2500));
        assert_eq!(config.output.dir.as_deref(), Some("/tmp/artifacts"));
        assert_eq!(config.output.pretty, Some(true));
    }

    #[test]
    fn parse_invalid_toml_returns_default() {
        let config = parse_config("this is not valid toml [[[", Path::new("test.toml"));
        assert!(config.browser.engine.is_none());
        assert!(config.session.timeout_ms.is_none());
    }

    #[test]
    fn parse_unknown_keys_keeps_known() {
        let toml = "[session]\ntimeout_ms = 9000\nretries = 3\n";
        let config = parse_config(toml, Path::new("test.toml"));
        assert_eq!(config.session.timeout_ms, Some(9000));
    }

    #[test]
    fn resolve_defaults() {
        let resolved = resolve_config(&ConfigFile::default(), None, &Overrides::default());
        assert_eq!(resolved.engine, Engine::Chromium);
        assert!(resolved.headless);
        assert_eq!(resolved.viewport.width, 1280);
        assert_eq!(resolved.viewport.height, 720);
        assert_eq!(resolved.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(resolved.monitor_duration_ms, DEFAULT_MONITOR_DURATION_MS);
        assert!(resolved.output_dir.is_none());
        assert!(!resolved.pretty);
    }

    #[test]
    fn overrides_beat_file_values() {
        let file = parse_config(
            "[browser]\nengine = \"edge\"\nheadless = false\nwidth = 800\n[session]\ntimeout_ms = 1000\n",
            Path::new("test.toml"),
        );
        let overrides = Overrides {
            engine: Some("chrome".into()),
            timeout_ms: Some(4000),
            ..Overrides::default()
        };
        let resolved = resolve_config(&file, None, &overrides);
        assert_eq!(resolved.engine, Engine::Chrome);
        assert!(!resolved.headless, "file value applies when no flag is given");
        assert_eq!(resolved.viewport.width, 800);
        assert_eq!(resolved.timeout_ms, 4000);
    }

    #[test]
    fn unknown_engine_in_file_falls_back() {
        let file = parse_config("[browser]\nengine = \"netscape\"\n", Path::new("test.toml"));
        let resolved = resolve_config(&file, None, &Overrides::default());
        assert_eq!(resolved.engine, Engine::Chromium);
    }

    #[test]
    fn zero_timeout_uses_default() {
        let overrides = Overrides {
            timeout_ms: Some(0),
            ..Overrides::default()
        };
        let resolved = resolve_config(&ConfigFile::default(), None, &overrides);
        assert_eq!(resolved.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn explicit_config_path_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "").unwrap();
        let found = find_config_file_with(Some(&path), None).unwrap();
        assert_eq!(found, Some(path));
    }

    #[test]
    fn env_config_path_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        std::fs::write(&path, "").unwrap();
        let found =
            find_config_file_with(None, Some(path.to_string_lossy().into_owned())).unwrap();
        assert_eq!(found, Some(path));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = find_config_file_with(Some(Path::new("/nonexistent/custom.toml")), None)
            .unwrap_err();
        let app: AppError = err.into();
        assert_eq!(app.kind, ErrorKind::InvalidArgument);
        assert!(app.message.contains("/nonexistent/custom.toml"));
    }

    #[test]
    fn load_config_from_nonexistent_returns_default() {
        let config = load_config_from(Path::new("/nonexistent/config.toml"));
        assert!(config.browser.engine.is_none());
    }
}
