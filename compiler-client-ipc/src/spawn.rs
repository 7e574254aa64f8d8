// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server Spawner: launches a new server process detached from standard
//! streams, returning only its process id.

use std::collections::HashMap;
use std::path::Path;

/// Name of the deployment-root variable that, if present, triggers
/// derived runtime-installation environment overrides before spawn.
const TOOLS_ROOT_VAR: &str = "COMPILER_CLIENT_TOOLS_ROOT";

/// Computes environment overrides to apply before launching the server.
/// Returns an empty map unless `COMPILER_CLIENT_TOOLS_ROOT` is set in the
/// client's own environment.
fn deployment_env_overrides() -> HashMap<String, String> {
    let mut overrides = HashMap::new();
    if let Ok(root) = std::env::var(TOOLS_ROOT_VAR) {
        overrides.insert("COMPILER_CLIENT_RUNTIME_ROOT".to_string(), root.clone());
        overrides.insert(
            "COMPILER_CLIENT_RUNTIME_SHARED".to_string(),
            format!("{root}/shared"),
        );
    }
    overrides
}

/// Launches the server at `expected_image_path`. Returns its pid, or `None`
/// on failure. Process and thread handles are closed immediately by the
/// platform implementation; only the identifier is retained.
pub fn spawn(expected_image_path: &Path) -> Option<u32> {
    let overrides = deployment_env_overrides();
    imp::spawn(expected_image_path, &overrides)
}

#[cfg(windows)]
mod imp {
    use super::HashMap;
    use std::collections::HashMap as StdHashMap;
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Threading::{
        CreateProcessW, CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW, CREATE_UNICODE_ENVIRONMENT,
        NORMAL_PRIORITY_CLASS, PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOW,
    };

    fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(Some(0)).collect()
    }

    fn build_environment_block(overrides: &HashMap<String, String>) -> Option<Vec<u16>> {
        if overrides.is_empty() {
            return None;
        }

        let mut merged: StdHashMap<String, String> = std::env::vars().collect();
        merged.extend(overrides.clone());

        let mut block = Vec::new();
        for (key, value) in merged {
            block.extend(OsStr::new(&format!("{key}={value}")).encode_wide());
            block.push(0);
        }
        block.push(0);
        Some(block)
    }

    pub fn spawn(expected_image_path: &Path, overrides: &HashMap<String, String>) -> Option<u32> {
        let exe_wide = wide(&expected_image_path.to_string_lossy());
        let dir_wide = expected_image_path
            .parent()
            .map(|d| wide(&d.to_string_lossy()));
        let env_block = build_environment_block(overrides);

        let mut startup_info: STARTUPINFOW = unsafe { std::mem::zeroed() };
        startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
        startup_info.dwFlags = STARTF_USESTDHANDLES;
        startup_info.hStdInput = INVALID_HANDLE_VALUE;
        startup_info.hStdOutput = INVALID_HANDLE_VALUE;
        startup_info.hStdError = INVALID_HANDLE_VALUE;

        let mut process_info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

        let mut flags = NORMAL_PRIORITY_CLASS | CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP;
        if env_block.is_some() {
            flags |= CREATE_UNICODE_ENVIRONMENT;
        }

        // SAFETY: all pointee buffers (`exe_wide`, `dir_wide`, `env_block`)
        // outlive this call; `startup_info`/`process_info` are zero-
        // initialized structs of the correct size. `bInheritHandles` is
        // FALSE (0) so the child does not inherit our std handles.
        let ok = unsafe {
            CreateProcessW(
                exe_wide.as_ptr(),
                std::ptr::null_mut(),
                std::ptr::null(),
                std::ptr::null(),
                0,
                flags,
                env_block
                    .as_ref()
                    .map(|b| b.as_ptr() as *const _)
                    .unwrap_or(std::ptr::null()),
                dir_wide
                    .as_ref()
                    .map(|d| d.as_ptr())
                    .unwrap_or(std::ptr::null()),
                &startup_info,
                &mut process_info,
            )
        };

        if ok == 0 {
            let attributed = crate::error::IpcError::SpawnFailed(std::io::Error::last_os_error());
            tracing::warn!(
                "failed to spawn {}: {attributed}",
                expected_image_path.display()
            );
            return None;
        }

        // SAFETY: both handles were just populated by CreateProcessW; we
        // only need the pid, so close them immediately.
        unsafe {
            CloseHandle(process_info.hThread);
            CloseHandle(process_info.hProcess);
        }

        Some(process_info.dwProcessId)
    }
}

#[cfg(unix)]
mod imp {
    use super::HashMap;
    use std::os::unix::process::CommandExt;
    use std::path::Path;
    use std::process::{Command, Stdio};

    pub fn spawn(expected_image_path: &Path, overrides: &HashMap<String, String>) -> Option<u32> {
        let mut command = Command::new(expected_image_path);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .envs(overrides);

        if let Some(dir) = expected_image_path.parent() {
            command.current_dir(dir);
        }

        // SAFETY: setsid() detaches the child from our controlling
        // terminal/session; it has no preconditions beyond running in the
        // forked child before exec, which `pre_exec` guarantees.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        match command.spawn() {
            Ok(child) => Some(child.id()),
            Err(e) => {
                let attributed = crate::error::IpcError::SpawnFailed(e);
                tracing::warn!(
                    "failed to spawn {}: {attributed}",
                    expected_image_path.display()
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_overrides_without_tools_root_var() {
        std::env::remove_var(TOOLS_ROOT_VAR);
        assert!(deployment_env_overrides().is_empty());
    }

    #[test]
    fn overrides_present_when_tools_root_var_set() {
        std::env::set_var(TOOLS_ROOT_VAR, "/opt/compiler-tools");
        let overrides = deployment_env_overrides();
        assert_eq!(
            overrides.get("COMPILER_CLIENT_RUNTIME_ROOT").map(String::as_str),
            Some("/opt/compiler-tools")
        );
        std::env::remove_var(TOOLS_ROOT_VAR);
    }

    #[test]
    fn spawning_a_nonexistent_server_returns_none() {
        let bogus = Path::new("/definitely/does/not/exist/CompilerServer.exe");
        assert_eq!(spawn(bogus), None);
    }
}
