//! Host platform (linux for example) utility functions

use std::path::PathBuf;

/// Environment variable pointing at the software root, which holds the `params` and `sessions`
/// directories.
pub const SW_ROOT_ENV_VAR: &str = "TRACK_CTRL_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the software root directory.
///
/// This is the value of `TRACK_CTRL_ROOT` if it is set, otherwise the current working directory.
pub fn get_sw_root() -> std::io::Result<PathBuf> {
    match std::env::var_os(SW_ROOT_ENV_VAR) {
        Some(root) => Ok(PathBuf::from(root)),
        None => std::env::current_dir()
    }
}
