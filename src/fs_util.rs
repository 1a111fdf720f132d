use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ImportError;

/// `<output>.failed`, written next to an output whose run failed.
pub fn failed_path(output: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{output}.failed"))
}

pub fn mark_failed(output: &Utf8Path, reason: &str) -> Result<(), ImportError> {
    write_atomic(&failed_path(output), format!("{reason}\n").as_bytes())
}

pub fn clear_failed(output: &Utf8Path) -> Result<bool, ImportError> {
    let sentinel = failed_path(output);
    if !sentinel.as_std_path().exists() {
        return Ok(false);
    }
    fs::remove_file(sentinel.as_std_path())
        .map_err(|err| ImportError::Filesystem(format!("remove {sentinel}: {err}")))?;
    Ok(true)
}

fn ensure_parent(dest: &Utf8Path) -> Result<&Utf8Path, ImportError> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(parent)
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), ImportError> {
    let parent = ensure_parent(dest)?;
    let temp = tempfile::Builder::new()
        .prefix(".gh-assemblies-copy")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| ImportError::Filesystem(format!("copy {source}: {err}")))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_atomic(dest: &Utf8Path, content: &[u8]) -> Result<(), ImportError> {
    let parent = ensure_parent(dest)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".gh-assemblies-write")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| ImportError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_lifecycle() {
        let temp = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::from_path_buf(temp.path().join("ncbi.tsv.gz")).unwrap();
        assert_eq!(failed_path(&output).file_name(), Some("ncbi.tsv.gz.failed"));

        mark_failed(&output, "datasets exited with status 1").unwrap();
        assert!(failed_path(&output).as_std_path().exists());
        assert!(clear_failed(&output).unwrap());
        assert!(!clear_failed(&output).unwrap());
    }

    #[test]
    fn copy_replaces_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let source = root.join("remote/a.tsv");
        let dest = root.join("work/a.tsv");
        write_atomic(&source, b"new").unwrap();
        write_atomic(&dest, b"old").unwrap();
        copy_file_atomic(&source, &dest).unwrap();
        assert_eq!(fs::read_to_string(dest.as_std_path()).unwrap(), "new");
    }
}
