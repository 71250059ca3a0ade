use std::ffi::CString;

use nix::unistd::execve;

use crate::error::{ContainerError, ContainerResult};

/// Builds a null-terminated argv for `execve`: the entry point followed by
/// its arguments.
pub fn build_argv(entry_point: &str, args: &[String]) -> ContainerResult<Vec<CString>> {
    let mut argv = vec![
        CString::new(entry_point)
            .map_err(|e| ContainerError::InvalidConfiguration { message: e.to_string() })?,
    ];
    for arg in args {
        argv.push(
            CString::new(arg.as_str())
                .map_err(|e| ContainerError::InvalidConfiguration { message: e.to_string() })?,
        );
    }
    Ok(argv)
}

/// The child inherits the parent's full environment unchanged.
pub fn build_environment() -> ContainerResult<Vec<CString>> {
    std::env::vars()
        .map(|(k, v)| {
            CString::new(format!("{k}={v}"))
                .map_err(|e| ContainerError::InvalidConfiguration { message: e.to_string() })
        })
        .collect()
}

/// Replaces the calling process image with `entry_point`. Never returns on
/// success.
pub fn exec_entry_point(entry_point: &[String]) -> ContainerResult<()> {
    let (path, rest) = entry_point
        .split_first()
        .ok_or_else(|| ContainerError::InvalidConfiguration {
            message: "empty entry point".to_string(),
        })?;

    let path_c =
        CString::new(path.as_str()).map_err(|e| ContainerError::InvalidConfiguration { message: e.to_string() })?;
    let argv = build_argv(path, rest)?;
    let envp = build_environment()?;

    execve(&path_c, &argv, &envp)
        .map_err(|e| ContainerError::namespace_op(format!("execve {path} failed: {e}")))?;
    unreachable!("execve replaced the process image")
}
