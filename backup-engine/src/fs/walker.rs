//! Directory enumeration for the backup manifest.
//!
//! Walks the site root depth-first and records every regular file with its
//! size at enumeration time. Contents are never read here. Walk errors
//! (unreadable directories, races with deletion) are logged and skipped:
//! per-file accessibility is re-checked when the file is archived.

use crate::models::FileEntry;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for building a manifest
#[derive(Debug, Clone)]
pub struct EnumerateOptions {
    /// Directory names excluded wherever they appear in a path
    pub exclude_dirs: Vec<String>,

    /// File extensions excluded (without the dot)
    pub exclude_extensions: Vec<String>,

    /// Backup output directory, never enumerated
    pub output_dir: Option<PathBuf>,
}

impl Default for EnumerateOptions {
    fn default() -> Self {
        Self {
            exclude_dirs: vec![".git".to_string(), "node_modules".to_string()],
            exclude_extensions: Vec::new(),
            output_dir: None,
        }
    }
}

impl EnumerateOptions {
    pub fn from_config(config: &crate::config::BackupConfig) -> Self {
        Self {
            exclude_dirs: config.exclude_dirs.clone(),
            exclude_extensions: config.exclude_extensions.clone(),
            output_dir: Some(config.output_dir.clone()),
        }
    }
}

/// Result of a walk: ordered manifest plus the byte total
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<FileEntry>,
    pub total_bytes: u64,
}

/// Walk `root` and build the file manifest.
///
/// # Example
/// ```no_run
/// use backup_engine::fs::walker::{enumerate, EnumerateOptions};
/// use std::path::Path;
///
/// let result = enumerate(Path::new("/var/www/site"), &EnumerateOptions::default());
/// println!("{} files, {} bytes", result.files.len(), result.total_bytes);
/// ```
pub fn enumerate(root: &Path, options: &EnumerateOptions) -> Enumeration {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let output_dir = options
        .output_dir
        .as_ref()
        .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.clone()));

    let exclude_dirs: Vec<String> = options.exclude_dirs.iter().map(|d| d.to_lowercase()).collect();
    let exclude_exts: Vec<String> = options
        .exclude_extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let mut result = Enumeration::default();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if output_dir.as_deref() == Some(entry.path()) {
                return false;
            }
            !has_excluded_component(entry.path(), &root, &exclude_dirs)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Skipping unreadable path during enumeration: {}", e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        if has_excluded_extension(entry.path(), &exclude_exts) {
            continue;
        }

        if let Some(file) = file_entry(&entry, &root) {
            result.total_bytes += file.size_bytes;
            result.files.push(file);
        }
    }

    result
}

/// Build a manifest entry. Symlinks are resolved to their target; links to
/// directories and broken links are dropped.
fn file_entry(entry: &DirEntry, root: &Path) -> Option<FileEntry> {
    let path = entry.path();
    let size_bytes = if entry.path_is_symlink() {
        match std::fs::metadata(path) {
            Ok(resolved) if resolved.is_file() => resolved.len(),
            _ => return None,
        }
    } else {
        entry.metadata().ok()?.len()
    };

    Some(FileEntry {
        absolute_path: path.to_path_buf(),
        relative_path: relative_string(path, root)?,
        size_bytes,
    })
}

/// Forward-slash relative path, independent of the host separator
fn relative_string(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn has_excluded_component(path: &Path, root: &Path, exclude_dirs: &[String]) -> bool {
    if exclude_dirs.is_empty() {
        return false;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(part) => {
            let part = part.to_string_lossy().to_lowercase();
            exclude_dirs.iter().any(|d| *d == part)
        }
        _ => false,
    })
}

fn has_excluded_extension(path: &Path, exclude_exts: &[String]) -> bool {
    if exclude_exts.is_empty() {
        return false;
    }
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    match name.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_lowercase();
            exclude_exts.iter().any(|e| *e == ext)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(result: &Enumeration) -> Vec<&str> {
        result.files.iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let result = enumerate(temp_dir.path(), &EnumerateOptions::default());
        assert!(result.files.is_empty());
        assert_eq!(result.total_bytes, 0);
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"12345")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"1234567")?;

        let result = enumerate(temp_dir.path(), &EnumerateOptions::default());
        assert_eq!(names(&result), vec!["file1.txt", "subdir/file2.txt"]);
        assert_eq!(result.total_bytes, 12);
        assert_eq!(result.files[1].size_bytes, 7);
        assert!(result.files[1].absolute_path.is_absolute());

        Ok(())
    }

    #[test]
    fn test_excluded_component_anywhere_in_path() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("wp-content/Cache/pages"))?;
        fs::create_dir_all(root.join("wp-content/uploads"))?;
        fs::create_dir_all(root.join("cachedata"))?;
        fs::write(root.join("wp-content/Cache/pages/a.html"), b"x")?;
        fs::write(root.join("wp-content/uploads/b.png"), b"x")?;
        fs::write(root.join("cachedata/c.txt"), b"x")?;

        let options = EnumerateOptions {
            exclude_dirs: vec!["cache".to_string()],
            ..EnumerateOptions::default()
        };
        let result = enumerate(root, &options);

        // Component-wise, not prefix: "cachedata" survives
        assert_eq!(names(&result), vec!["cachedata/c.txt", "wp-content/uploads/b.png"]);
        Ok(())
    }

    #[test]
    fn test_excluded_extensions_case_insensitive() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::write(root.join("debug.LOG"), b"x")?;
        fs::write(root.join("archive.tar.log"), b"x")?;
        fs::write(root.join("logfile"), b"x")?;
        fs::write(root.join("index.php"), b"x")?;

        let options = EnumerateOptions {
            exclude_extensions: vec![".log".to_string()],
            ..EnumerateOptions::default()
        };
        let result = enumerate(root, &options);
        assert_eq!(names(&result), vec!["index.php", "logfile"]);
        Ok(())
    }

    #[test]
    fn test_output_dir_always_excluded() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("uploads/backups"))?;
        fs::write(root.join("uploads/backups/backup-1.zip"), b"zip")?;
        fs::write(root.join("uploads/photo.jpg"), b"jpg")?;

        let options = EnumerateOptions {
            output_dir: Some(root.join("uploads/backups")),
            ..EnumerateOptions::default()
        };
        let result = enumerate(root, &options);
        assert_eq!(names(&result), vec!["uploads/photo.jpg"]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_resolved_or_dropped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir(root.join("dir"))?;
        fs::write(root.join("target.txt"), b"abc")?;
        std::os::unix::fs::symlink(root.join("target.txt"), root.join("link.txt"))?;
        std::os::unix::fs::symlink(root.join("dir"), root.join("dirlink"))?;
        std::os::unix::fs::symlink(root.join("gone"), root.join("broken"))?;

        let result = enumerate(root, &EnumerateOptions::default());
        assert_eq!(names(&result), vec!["link.txt", "target.txt"]);
        assert_eq!(result.files[0].size_bytes, 3);
        Ok(())
    }
}
