//! Helpers for speech tools that run as external processes.

use std::path::PathBuf;

use tempfile::NamedTempFile;

use crate::{audio::AudioFormat, error::Result};

/// Find a binary at an explicit path, falling back to `PATH`.
pub fn find_binary(name: &str, config_path: Option<&str>) -> Option<PathBuf> {
    if let Some(path_str) = config_path {
        let path = expand_tilde(path_str);
        if path.is_file() {
            return Some(path);
        }
    }
    which::which(name).ok()
}

/// Expand `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(dirs) = directories::BaseDirs::new()
    {
        return dirs.home_dir().join(stripped);
    }
    PathBuf::from(path)
}

/// Write audio to a temp file. The returned handle keeps the file alive.
pub fn write_temp_audio(audio: &[u8], format: AudioFormat) -> Result<NamedTempFile> {
    let temp_file = NamedTempFile::with_suffix(format!(".{}", format.extension()))?;
    std::fs::write(temp_file.path(), audio)?;
    Ok(temp_file)
}

/// Empty temp file with the given extension, for tools that write output.
pub fn temp_output(extension: &str) -> Result<NamedTempFile> {
    Ok(NamedTempFile::with_suffix(format!(".{extension}"))?)
}

pub fn model_exists(path: Option<&str>) -> bool {
    path.map(expand_tilde).is_some_and(|p| p.exists())
}

/// Stand-in executables for process lifecycle tests.
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, target_os = "linux"))]
pub(crate) mod testing {
    use std::{
        fs,
        os::unix::fs::PermissionsExt,
        path::{Path, PathBuf},
        time::Duration,
    };

    /// A script that writes its pid to `pid_file` and then sleeps.
    pub fn sleeping_binary(dir: &Path, name: &str, pid_file: &Path) -> PathBuf {
        let path = dir.join(name);
        fs::write(
            &path,
            format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub async fn wait_for_pid(pid_file: &Path) -> u32 {
        for _ in 0..100 {
            if let Some(pid) = fs::read_to_string(pid_file)
                .ok()
                .and_then(|s| s.trim().parse().ok())
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} was never written", pid_file.display());
    }

    /// Waits for `pid` to exit. A zombie counts as exited.
    pub async fn wait_until_exited(pid: u32) -> bool {
        for _ in 0..100 {
            match fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => return true,
                Ok(stat)
                    if stat
                        .rsplit_once(')')
                        .is_some_and(|(_, rest)| rest.trim_start().starts_with(['Z', 'X'])) =>
                {
                    return true;
                },
                Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        false
    }
}
