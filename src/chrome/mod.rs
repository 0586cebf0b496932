mod discovery;
mod error;
mod launcher;
mod platform;

pub use discovery::{BrowserVersion, query_version};
pub use error::ChromeError;
pub use launcher::{
    ChromeProcess, DetachedProcess, LaunchConfig, MAX_PORT_RETRIES, build_args,
    find_available_port, kill_pid, launch_chrome, remove_profile,
};
pub use platform::{Engine, find_executable};
