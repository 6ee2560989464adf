//! Filesystem-backed per-client store.
//!
//! Layout: `<root>/<uid decimal>/<filename>`. One flat directory per client, created
//! lazily on the first store.

use crate::error::StoreError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct ClientStore {
    root: PathBuf,
}

impl ClientStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn client_dir(&self, uid: u32) -> PathBuf {
        self.root.join(uid.to_string())
    }

    pub async fn client_dir_exists(&self, uid: u32) -> bool {
        match tokio::fs::metadata(self.client_dir(uid)).await {
            Ok(meta) => meta.is_dir(),
            Err(_) => false,
        }
    }

    /// Create the client directory if needed. An existing directory is not an error.
    pub async fn ensure_client_dir(&self, uid: u32) -> Result<PathBuf, StoreError> {
        let dir = self.client_dir(uid);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if tokio::fs::metadata(&dir).await?.is_dir() {
                    Ok(dir)
                } else {
                    Err(StoreError::Io(e))
                }
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Resolve a client-supplied filename inside the client directory.
    pub fn file_path(&self, uid: u32, name: &[u8]) -> Result<PathBuf, StoreError> {
        let component = sanitize_filename(name)?;
        Ok(self.client_dir(uid).join(component))
    }

    /// Size of a regular file, or `None` when it is missing or not a regular file.
    pub async fn file_size(&self, path: &Path) -> Result<Option<u64>, StoreError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    pub async fn remove_file(&self, path: &Path) -> Result<(), StoreError> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    /// Entry names of the client directory, in enumeration order.
    pub async fn list_names(&self, uid: u32) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut rd = tokio::fs::read_dir(self.client_dir(uid)).await?;
        let mut names = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            names.push(name_bytes(entry.file_name()));
        }
        Ok(names)
    }
}

/// Accept only a single normal path component.
/// Rejects: empty names, `.` and `..`, separators (`/`, `\`), and NUL bytes.
pub fn sanitize_filename(name: &[u8]) -> Result<OsString, StoreError> {
    let shown = String::from_utf8_lossy(name).into_owned();
    if name.is_empty() {
        return Err(StoreError::UnsafeName(shown));
    }
    if name == b"." || name == b".." {
        return Err(StoreError::UnsafeName(shown));
    }
    if name.iter().any(|b| matches!(b, b'/' | b'\\' | 0)) {
        return Err(StoreError::UnsafeName(shown));
    }
    os_name(name).ok_or(StoreError::UnsafeName(shown))
}

#[cfg(unix)]
fn os_name(name: &[u8]) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;
    Some(std::ffi::OsStr::from_bytes(name).to_os_string())
}

#[cfg(not(unix))]
fn os_name(name: &[u8]) -> Option<OsString> {
    let s = std::str::from_utf8(name).ok()?;
    // ':' would address an alternate data stream on Windows
    if s.contains(':') {
        return None;
    }
    Some(OsString::from(s))
}

#[cfg(unix)]
fn name_bytes(name: OsString) -> Vec<u8> {
    use std::os::unix::ffi::OsStringExt;
    name.into_vec()
}

#[cfg(not(unix))]
fn name_bytes(name: OsString) -> Vec<u8> {
    name.to_string_lossy().into_owned().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_client_dir_is_decimal_uid() {
        let store = ClientStore::new("/srv/backups");
        assert_eq!(
            store.client_dir(4_000_000_000),
            Path::new("/srv/backups/4000000000")
        );
        assert_eq!(store.client_dir(0), Path::new("/srv/backups/0"));
    }

    #[test]
    fn test_sanitize_filename_safe_names() {
        assert!(sanitize_filename(b"notes.txt").is_ok());
        assert!(sanitize_filename(b".hidden").is_ok());
        assert!(sanitize_filename(b"a..b").is_ok());
    }

    #[test]
    fn test_sanitize_filename_unsafe_names() {
        assert!(sanitize_filename(b"").is_err());
        assert!(sanitize_filename(b".").is_err());
        assert!(sanitize_filename(b"..").is_err());
        assert!(sanitize_filename(b"../etc/passwd").is_err());
        assert!(sanitize_filename(b"/etc/passwd").is_err());
        assert!(sanitize_filename(b"dir\\file").is_err());
        assert!(sanitize_filename(b"file\0.txt").is_err());
    }

    #[tokio::test]
    async fn test_ensure_client_dir_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = ClientStore::new(temp_dir.path());

        assert!(!store.client_dir_exists(42).await);
        let dir = store.ensure_client_dir(42).await.unwrap();
        assert!(dir.is_dir());
        assert!(store.client_dir_exists(42).await);

        // Second call is fine
        store.ensure_client_dir(42).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_client_dir_blocked_by_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("7"), b"not a dir").unwrap();
        let store = ClientStore::new(temp_dir.path());

        assert!(!store.client_dir_exists(7).await);
        assert!(store.ensure_client_dir(7).await.is_err());
    }

    #[tokio::test]
    async fn test_file_size_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = ClientStore::new(temp_dir.path());
        store.ensure_client_dir(1).await.unwrap();

        let path = store.file_path(1, b"data.bin").unwrap();
        assert_eq!(store.file_size(&path).await.unwrap(), None);

        fs::write(&path, vec![0u8; 3000]).unwrap();
        assert_eq!(store.file_size(&path).await.unwrap(), Some(3000));

        store.remove_file(&path).await.unwrap();
        assert_eq!(store.file_size(&path).await.unwrap(), None);
        assert!(store.remove_file(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_file_size_ignores_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = ClientStore::new(temp_dir.path());
        let dir = store.ensure_client_dir(1).await.unwrap();
        fs::create_dir(dir.join("sub")).unwrap();

        let path = store.file_path(1, b"sub").unwrap();
        assert_eq!(store.file_size(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = ClientStore::new(temp_dir.path());
        let dir = store.ensure_client_dir(9).await.unwrap();
        assert!(store.list_names(9).await.unwrap().is_empty());

        for name in ["a", "b", "c"] {
            fs::write(dir.join(name), name).unwrap();
        }
        let mut names = store.list_names(9).await.unwrap();
        names.sort();
        assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
