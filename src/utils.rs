use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use crate::fixtures::FixtureFormat;

#[derive(Debug, Clone)]
pub struct WrittenFixture {
    pub format: FixtureFormat,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Create `dir` (and parents) if it does not exist yet.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))
}

/// Replace `path` with `contents`.
/// Data goes to a temp file in the same directory which is then renamed over
/// the destination, so readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    // Temp files start out owner-only; fixtures should be readable like any other output.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .with_context(|| format!("failed to set permissions for {}", path.display()))?;
    }
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to move temp file into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_overwrites_existing_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("out.bin");
        fs::write(&path, b"old contents that are longer").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        let leftovers = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(leftovers, 1, "temp file should not be left behind");
    }

    #[test]
    fn ensure_dir_creates_nested_directories() {
        let tmp = tempdir().expect("tempdir");
        let nested = tmp.path().join("a/b/c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }

    #[test]
    fn write_atomic_fails_for_missing_directory() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("missing/out.bin");
        let err = write_atomic(&path, b"x").unwrap_err();
        assert!(format!("{err:#}").contains("failed to create temp file"));
    }
}
