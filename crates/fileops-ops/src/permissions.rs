//! Permission changes.

use std::fs;
use std::path::Path;

use fileops_core::ErrorCode;
use tracing::warn;

/// Mask of the bits `set_permissions` applies (permission, setuid, setgid
/// and sticky bits).
pub const MODE_MASK: u32 = 0o7777;

/// Set the permission bits of `path` to `mask`.
///
/// `mask` uses POSIX mode bits. On platforms without them only the
/// read-only attribute is derived from the write bits.
pub fn set_permissions<R>(path: &Path, mask: u32, mut on_result: R) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    match apply_mode(path, mask) {
        Ok(()) => {
            on_result(path, true);
            ErrorCode::NoError
        }
        Err(e) => {
            warn!(path = %path.display(), mask = format_args!("{mask:o}"), error = %e, "chmod failed");
            on_result(path, false);
            ErrorCode::ChmodFailed
        }
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mask: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mask & MODE_MASK))
}

#[cfg(not(unix))]
fn apply_mode(path: &Path, mask: u32) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mask & 0o222 == 0);
    fs::set_permissions(path, permissions)
}
