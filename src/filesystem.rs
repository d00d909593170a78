//! Filesystem access used by migrations and dumps

use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};

pub trait Filesystem {
    /// Files matching `pattern`, sorted by path
    ///
    /// Only the final path component may contain `*` wildcards, e.g.
    /// `migrations/*.up.sql`. A missing directory matches nothing.
    fn glob(&self, pattern: &Path) -> Result<Vec<PathBuf>>;

    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Write a file, creating parent directories
    fn write(&self, path: &Path, contents: &str) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// The local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    fn glob(&self, pattern: &Path) -> Result<Vec<PathBuf>> {
        let dir = match pattern.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_pattern = pattern
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&dir).map_err(|e| DbError::io(&dir, e))?;
        let mut matches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DbError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if wildcard_match(&file_pattern, &name) {
                matches.push(path);
            }
        }
        matches.sort();
        Ok(matches)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        std::fs::read_to_string(path).map_err(|e| DbError::io(path, e))
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.create_dir_all(parent)?;
        }
        std::fs::write(path, contents).map_err(|e| DbError::io(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| DbError::io(path, e))
    }
}

/// `*` matches any run of characters, everything else matches literally
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || !name[first.len()..].ends_with(last) {
        return false;
    }

    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*.up.sql", "2024_01_01_000000_create_users.up.sql"));
        assert!(!wildcard_match("*.up.sql", "2024_01_01_000000_create_users.down.sql"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "acb"));
        assert!(wildcard_match("exact.sql", "exact.sql"));
        assert!(!wildcard_match("ab*ba", "aba"));
    }

    #[test]
    fn test_glob_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem;
        fs.write(&dir.path().join("b.up.sql"), "").unwrap();
        fs.write(&dir.path().join("a.up.sql"), "").unwrap();
        fs.write(&dir.path().join("a.down.sql"), "").unwrap();

        let found = fs.glob(&dir.path().join("*.up.sql")).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.up.sql", "b.up.sql"]);

        assert!(fs.glob(&dir.path().join("missing").join("*.sql")).unwrap().is_empty());
    }

    #[test]
    fn test_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFilesystem;
        let path = dir.path().join("nested").join("file.sql");
        fs.write(&path, "SELECT 1;").unwrap();
        assert!(fs.exists(&path));
        assert_eq!(fs.read_to_string(&path).unwrap(), "SELECT 1;");
        assert!(matches!(
            fs.read_to_string(&dir.path().join("nope")),
            Err(DbError::Io { .. })
        ));
    }
}
