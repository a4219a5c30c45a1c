//! Move operation.

use std::fs;
use std::path::{Path, PathBuf};

use fileops_core::ErrorCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::batch::{is_into_itself, run_batch, target_in};
use crate::copy::copy_symlink;

/// Move every path into `destination`, stopping at the first failure.
///
/// Symlinks are moved by recreating the link at the destination and
/// removing the original. Everything else is renamed; there is no
/// copy-and-delete fallback when the rename fails.
pub fn move_files<R>(
    paths: &[PathBuf],
    destination: &Path,
    cancel: &CancellationToken,
    on_result: R,
) -> ErrorCode
where
    R: FnMut(&Path, bool),
{
    run_batch(paths, cancel, on_result, |path| {
        let target = target_in(path, destination).ok_or(ErrorCode::MoveFailed)?;
        if is_into_itself(path, &target) {
            return Err(ErrorCode::CannotCopyIntoItself);
        }

        let metadata = fs::symlink_metadata(path).map_err(|_| ErrorCode::MoveFailed)?;
        if metadata.file_type().is_symlink() {
            copy_symlink(path, &target).map_err(|_| ErrorCode::MoveFailed)?;
            fs::remove_file(path).map_err(|_| ErrorCode::MoveFailed)?;
        } else {
            fs::rename(path, &target).map_err(|_| ErrorCode::MoveFailed)?;
        }

        debug!(from = %path.display(), to = %target.display(), "moved");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_move_directory() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("dir");
        let dest = temp.path().join("dest");
        fs::create_dir_all(src.join("inner")).unwrap();
        fs::write(src.join("inner/file.txt"), "payload").unwrap();
        fs::create_dir(&dest).unwrap();

        let code = move_files(&[src.clone()], &dest, &CancellationToken::new(), |_: &Path, _| {});

        assert_eq!(code, ErrorCode::NoError);
        assert!(!src.exists());
        assert_eq!(
            fs::read_to_string(dest.join("dir/inner/file.txt")).unwrap(),
            "payload"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_move_symlink_recreates_link() {
        let temp = TempDir::new().unwrap();
        let link = temp.path().join("link");
        let dest = temp.path().join("dest");
        fs::create_dir(&dest).unwrap();
        std::os::unix::fs::symlink("../somewhere", &link).unwrap();

        let code = move_files(&[link.clone()], &dest, &CancellationToken::new(), |_: &Path, _| {});

        assert_eq!(code, ErrorCode::NoError);
        assert!(fs::symlink_metadata(&link).is_err());
        assert_eq!(
            fs::read_link(dest.join("link")).unwrap(),
            PathBuf::from("../somewhere")
        );
    }
}
