use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve the directory holding Ember's files (`ember.db`, `ember.salt`),
/// creating it if needed.
///
/// Priority:
/// 1. `explicit` (the `--data-dir` flag)
/// 2. `EMBER_DATA_DIR` environment variable
/// 3. Platform-specific app data dir (`~/.local/share/ember/`, etc.)
pub fn data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return ensure(dir.to_owned());
    }
    if let Ok(dir) = std::env::var("EMBER_DATA_DIR") {
        return ensure(PathBuf::from(dir));
    }

    let dirs = ProjectDirs::from("", "", "ember")
        .context("could not determine platform data directory")?;
    ensure(dirs.data_dir().to_owned())
}

fn ensure(path: PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(&path)
        .with_context(|| format!("create data dir: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_dir_wins_and_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let resolved = data_dir(Some(&nested)).unwrap();
        assert_eq!(resolved, nested);
        assert!(nested.is_dir());
    }

    #[test]
    fn explicit_dir_may_already_exist() {
        let dir = tempdir().unwrap();
        let resolved = data_dir(Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path());
    }
}
