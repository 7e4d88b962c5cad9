//! Request path validation.
//!
//! Every path a peer sends is relative to the served root. A request path
//! must not climb out of the root with `..`, must not be absolute, and after
//! symlink resolution must still live under the root.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Reject empty, absolute, NUL-containing and `..`-bearing relative paths.
pub fn validate_relative(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("path is empty".into()));
    }
    if path.contains('\0') {
        return Err(Error::InvalidPath("path contains a NUL byte".into()));
    }

    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::InvalidPath(format!("'{path}' leaves the shared root")));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidPath(format!("'{path}' is absolute")));
            }
        }
    }
    Ok(())
}

/// Resolve `relative` to an existing regular file under `root`.
///
/// `root` must already be canonical.
pub async fn resolve_file(root: &Path, relative: &str) -> Result<PathBuf> {
    validate_relative(relative)?;

    let candidate = root.join(relative);
    let resolved = tokio::fs::canonicalize(&candidate)
        .await
        .map_err(|_| Error::FileNotFound(relative.to_string()))?;

    // A symlink inside the root may still point outside of it.
    if !resolved.starts_with(root) {
        return Err(Error::InvalidPath(format!("'{relative}' leaves the shared root")));
    }

    let metadata = tokio::fs::metadata(&resolved).await?;
    if !metadata.is_file() {
        return Err(Error::FileNotFound(relative.to_string()));
    }
    Ok(resolved)
}

/// Resolve the directory an upload is written to, creating it under `root`.
///
/// `dir` is taken relative to the root even when it starts with `/`; `None`
/// or an empty value selects the root itself. Each component is created and
/// checked in turn so a symlink pointing out of the root is never followed.
/// `root` must already be canonical.
pub async fn upload_dir(root: &Path, dir: Option<&str>) -> Result<PathBuf> {
    let Some(dir) = dir.map(|d| d.trim_matches('/')).filter(|d| !d.is_empty()) else {
        return Ok(root.to_path_buf());
    };
    validate_relative(dir)?;

    let mut current = root.to_path_buf();
    for component in Path::new(dir).components() {
        let Component::Normal(part) = component else {
            continue;
        };
        let next = current.join(part);
        match tokio::fs::create_dir(&next).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
        current = tokio::fs::canonicalize(&next).await?;
        if !current.starts_with(root) {
            return Err(Error::InvalidPath(format!("'{dir}' leaves the shared root")));
        }
        if !tokio::fs::metadata(&current).await?.is_dir() {
            return Err(Error::InvalidPath(format!("'{dir}' is not a directory")));
        }
    }
    Ok(current)
}

/// Reduce an uploaded file name to its final component.
///
/// Browsers may send a full client-side path; only the last segment is
/// kept. Returns `None` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return None;
    }
    Some(last.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_relative_parent_directory() {
        assert!(validate_relative("../etc/passwd").is_err());
        assert!(validate_relative("docs/../../secret.txt").is_err());
        assert!(validate_relative("..").is_err());
    }

    #[test]
    fn test_validate_relative_absolute() {
        assert!(validate_relative("/etc/passwd").is_err());
    }

    #[test]
    fn test_validate_relative_accepts_nested() {
        assert!(validate_relative("a.txt").is_ok());
        assert!(validate_relative("docs/report.pdf").is_ok());
        assert!(validate_relative("./docs/report.pdf").is_ok());
    }

    #[test]
    fn test_validate_relative_null_and_empty() {
        assert!(validate_relative("").is_err());
        assert!(validate_relative("a\0b").is_err());
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("photo.jpg").as_deref(), Some("photo.jpg"));
        assert_eq!(
            sanitize_file_name("C:\\Users\\me\\photo.jpg").as_deref(),
            Some("photo.jpg")
        );
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[tokio::test]
    async fn test_resolve_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let resolved = resolve_file(&root, "a.txt").await.unwrap();
        assert_eq!(resolved, root.join("a.txt"));

        assert!(matches!(
            resolve_file(&root, "missing.txt").await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            resolve_file(&root, "sub").await,
            Err(Error::FileNotFound(_))
        ));
        assert!(matches!(
            resolve_file(&root, "../a.txt").await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        assert_eq!(upload_dir(&root, None).await.unwrap(), root);
        assert_eq!(upload_dir(&root, Some("/")).await.unwrap(), root);
        assert_eq!(upload_dir(&root, Some("/pub")).await.unwrap(), root.join("pub"));
        assert_eq!(
            upload_dir(&root, Some("inbox/2024/")).await.unwrap(),
            root.join("inbox/2024")
        );
        assert!(root.join("inbox/2024").is_dir());

        assert!(matches!(
            upload_dir(&root, Some("../escape")).await,
            Err(Error::InvalidPath(_))
        ));
        assert!(!dir.path().parent().unwrap().join("escape").exists());

        std::fs::write(root.join("file.txt"), b"x").unwrap();
        assert!(matches!(
            upload_dir(&root, Some("file.txt")).await,
            Err(Error::InvalidPath(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_upload_dir_rejects_escaping_symlink() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        assert!(matches!(
            upload_dir(&root, Some("link/sub")).await,
            Err(Error::InvalidPath(_))
        ));
        assert!(!outside.path().join("sub").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_file_rejects_escaping_symlink() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"s").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.join("link.txt"))
            .unwrap();

        assert!(matches!(
            resolve_file(&root, "link.txt").await,
            Err(Error::InvalidPath(_))
        ));
    }
}
