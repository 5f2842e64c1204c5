//! Root checks and handing the build tree back to the invoking user.

use std::path::Path;

use anyhow::{Context, Result};
use nix::unistd::{chown, Gid, Uid, User};
use tracing::debug;

pub fn is_root() -> bool {
    Uid::effective().is_root()
}

/// Account that should own the build tree: `name` when given, otherwise
/// the current user.
pub fn owner(name: Option<&str>) -> Result<Option<User>> {
    match name {
        Some(name) => User::from_name(name).with_context(|| format!("failed to look up user {name}")),
        None => User::from_uid(Uid::current()).context("failed to look up current user"),
    }
}

/// Recursively chown `root` to `uid:gid` without following symlinks.
/// Returns the number of entries changed.
pub fn chown_tree(root: &Path, uid: Uid, gid: Gid) -> Result<usize> {
    let mut changed = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let meta = std::fs::symlink_metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if meta.file_type().is_symlink() {
            continue;
        }
        chown(&path, Some(uid), Some(gid))
            .with_context(|| format!("failed to chown {}", path.display()))?;
        changed += 1;
        if meta.is_dir() {
            for entry in std::fs::read_dir(&path)? {
                stack.push(entry?.path());
            }
        }
    }
    Ok(changed)
}

/// Give `build_dir` to `user` after a run. Only root can, and only a
/// directory that still exists needs it.
pub fn restore_owner(build_dir: &Path, user: Option<&str>) -> Result<()> {
    if !is_root() || !build_dir.exists() {
        return Ok(());
    }
    let Some(owner) = owner(user)? else {
        debug!(user = ?user, "no such user, leaving build directory as is");
        return Ok(());
    };
    if owner.uid.is_root() {
        return Ok(());
    }
    let changed = chown_tree(build_dir, owner.uid, owner.gid)?;
    debug!(
        path = %build_dir.display(),
        user = %owner.name,
        entries = changed,
        "build directory ownership restored"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chown_tree_to_self() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/file"), b"x").unwrap();
        std::os::unix::fs::symlink("/nonexistent", dir.path().join("a/link")).unwrap();

        let changed = chown_tree(dir.path(), Uid::effective(), Gid::effective()).unwrap();
        // root, a, a/b, a/b/file; the symlink is skipped
        assert_eq!(changed, 4);
    }

    #[test]
    fn test_owner_of_current_user() {
        let user = owner(None).unwrap().unwrap();
        assert_eq!(user.uid, Uid::current());
    }
}
