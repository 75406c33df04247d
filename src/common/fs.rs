//! Filesystem utility functions

use std::path::Path;
use std::fs;

use super::error::{ProxyError, Result};

/// Check that a path exists and points to a regular file
pub fn check_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(ProxyError::Config(format!(
            "File does not exist: {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(ProxyError::Config(format!(
            "Path is not a file: {:?}",
            path
        )));
    }

    Ok(())
}

/// Read the full contents of a file
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    check_file_exists(path)?;

    fs::read(path).map_err(ProxyError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_check_file_exists() {
        let path = PathBuf::from("Cargo.toml");
        assert!(check_file_exists(&path).is_ok());

        let path = PathBuf::from("non_existent_file.txt");
        assert!(check_file_exists(&path).is_err());
    }

    #[test]
    fn test_read_file() {
        let path = PathBuf::from("Cargo.toml");
        let content = read_file(&path).expect("should read an existing file");
        assert!(!content.is_empty());

        let path = PathBuf::from("non_existent_file.txt");
        assert!(read_file(&path).is_err());
    }
}
