use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_LABEL: &str = "dev.backup-status.daemon";
pub const DEFAULT_PREFERENCES_PATH: &str = "/Library/Preferences/com.apple.TimeMachine.plist";
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

pub const APP_DIR: &str = ".backup-status";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn app_root(home: &Path) -> PathBuf {
    home.join(APP_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    app_root(home).join(CONFIG_FILE)
}

pub fn socket_path(home: &Path) -> PathBuf {
    app_root(home).join(DAEMON_SOCKET)
}
