//! Directory scanning: find the local files eligible for upload
//!
//! A scan walks the tree below a root directory depth-first, parent
//! first, visiting the entries of each directory in file-name order. Only
//! regular files whose base name passes the [`FileNamePattern`] are
//! yielded. Files are produced lazily, one at a time, so very large trees
//! are never materialized in memory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{DriveupError, Result};
use crate::pattern::FileNamePattern;

/// Parameters of a single scan
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Directory where the traversal starts
    pub root: PathBuf,
    /// Descend into subdirectories
    pub recursive: bool,
    /// Full-match regex on the base name; empty means every file
    pub pattern: String,
    /// Follow symbolic links to directories
    pub follow_links: bool,
}

impl ScanRequest {
    /// Scan `root` non-recursively, accepting every file
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: false,
            pattern: String::new(),
            follow_links: false,
        }
    }

    /// Set whether subdirectories are visited.
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Set the file name pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Set whether directory symlinks are followed.
    pub fn with_follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }
}

/// A file selected by a scan
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileRecord {
    absolute_path: PathBuf,
}

impl FileRecord {
    pub fn absolute_path(&self) -> &Path {
        &self.absolute_path
    }

    pub fn into_path(self) -> PathBuf {
        self.absolute_path
    }
}

/// Start a scan.
///
/// The pattern is compiled first, then the root is checked, so a bad
/// pattern or an unusable root fails before any entry is visited. Errors
/// on individual entries during the walk are logged and skipped.
pub fn scan(request: &ScanRequest) -> Result<Scan> {
    let pattern = FileNamePattern::new(&request.pattern)?;
    let root = absolute_root(&request.root)?;
    check_root(&root)?;

    debug!(
        "Scanning {:?} (recursive: {}, pattern: {:?}, follow links: {})",
        root,
        request.recursive,
        pattern.as_str(),
        request.follow_links
    );
    if pattern.is_match_all() {
        debug!("No pattern given, every file is eligible");
    }

    let max_depth = if request.recursive { usize::MAX } else { 1 };
    let entries = WalkDir::new(&root)
        .min_depth(1)
        .max_depth(max_depth)
        .follow_links(request.follow_links)
        .sort_by_file_name()
        .into_iter();

    Ok(Scan { pattern, entries })
}

/// Lazy sequence of [`FileRecord`]s produced by [`scan`]
pub struct Scan {
    pattern: FileNamePattern,
    entries: walkdir::IntoIter,
}

impl Scan {
    /// Whether a walked entry is (or links to) a regular file
    fn is_regular_file(entry: &DirEntry) -> bool {
        if entry.file_type().is_file() {
            return true;
        }
        // Unfollowed symlinks report their own type; look at the target.
        entry.path_is_symlink()
            && fs::metadata(entry.path())
                .map(|m| m.is_file())
                .unwrap_or(false)
    }
}

impl Iterator for Scan {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(ancestor) = e.loop_ancestor() {
                        warn!("Skipping symlink loop back to {:?}", ancestor);
                    } else {
                        warn!("Skipping unreadable entry: {}", e);
                    }
                    continue;
                }
            };

            if !Self::is_regular_file(&entry) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if !self.pattern.matches(&file_name) {
                debug!("Pattern rejected {:?}", entry.path());
                continue;
            }

            return Some(FileRecord {
                absolute_path: entry.into_path(),
            });
        }
    }
}

/// Make a root absolute against the working directory, without resolving links
fn absolute_root(root: &Path) -> Result<PathBuf> {
    if root.is_absolute() {
        Ok(root.to_path_buf())
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| DriveupError::directory_access(root, e))?;
        Ok(cwd.join(root))
    }
}

/// The root must exist, be a directory and be listable
fn check_root(root: &Path) -> Result<()> {
    let metadata = fs::metadata(root).map_err(|e| DriveupError::directory_access(root, e))?;
    if !metadata.is_dir() {
        return Err(DriveupError::directory_access(
            root,
            io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    fs::read_dir(root).map_err(|e| DriveupError::directory_access(root, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::{tempdir, TempDir};

    /// data/{a.txt, b.log, sub/c.txt}
    fn create_data_tree() -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.log"), "b").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), "c").unwrap();
        dir
    }

    fn paths(request: &ScanRequest) -> Vec<PathBuf> {
        scan(request).unwrap().map(FileRecord::into_path).collect()
    }

    fn path_set(request: &ScanRequest) -> HashSet<PathBuf> {
        paths(request).into_iter().collect()
    }

    #[test]
    fn test_recursive_scan_with_pattern() {
        let dir = create_data_tree();
        let request = ScanRequest::new(dir.path())
            .with_recursive(true)
            .with_pattern(r".*\.txt");

        let expected: HashSet<_> = [dir.path().join("a.txt"), dir.path().join("sub/c.txt")]
            .into_iter()
            .collect();
        assert_eq!(path_set(&request), expected);
    }

    #[test]
    fn test_non_recursive_scan_ignores_subdirectories() {
        let dir = create_data_tree();
        let request = ScanRequest::new(dir.path()).with_pattern(r".*\.txt");

        assert_eq!(paths(&request), vec![dir.path().join("a.txt")]);
    }

    #[test]
    fn test_no_pattern_returns_every_file() {
        let dir = tempdir().unwrap();
        for name in ["one", "two.bin", ".hidden"] {
            fs::write(dir.path().join(name), name).unwrap();
        }

        let expected: HashSet<_> = ["one", "two.bin", ".hidden"]
            .iter()
            .map(|n| dir.path().join(n))
            .collect();
        assert_eq!(path_set(&ScanRequest::new(dir.path())), expected);
    }

    #[test]
    fn test_directories_are_never_returned() {
        let dir = create_data_tree();
        fs::create_dir(dir.path().join("empty")).unwrap();

        let found = paths(&ScanRequest::new(dir.path()).with_recursive(true));
        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|p| p.is_file()));
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        let request = ScanRequest::new(dir.path()).with_recursive(true);
        assert!(paths(&request).is_empty());
    }

    #[test]
    fn test_full_match_pattern_on_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report"), "").unwrap();
        fs::write(dir.path().join("report.csv"), "").unwrap();

        let exact = ScanRequest::new(dir.path()).with_pattern("report");
        assert_eq!(paths(&exact), vec![dir.path().join("report")]);

        let with_ext = ScanRequest::new(dir.path()).with_pattern(r"report\..*");
        assert_eq!(paths(&with_ext), vec![dir.path().join("report.csv")]);
    }

    #[test]
    fn test_deep_tree_returns_each_file_once_in_depth_first_order() {
        let dir = tempdir().unwrap();
        let deep = dir.path().join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();
        fs::write(dir.path().join("b").join("b.txt"), "").unwrap();
        fs::write(deep.join("c.txt"), "").unwrap();
        fs::write(dir.path().join("d.txt"), "").unwrap();

        let found = paths(&ScanRequest::new(dir.path()).with_recursive(true));
        assert_eq!(
            found,
            vec![
                dir.path().join("a.txt"),
                dir.path().join("b/b.txt"),
                deep.join("c.txt"),
                dir.path().join("d.txt"),
            ]
        );
    }

    #[test]
    fn test_scan_is_idempotent() {
        let dir = create_data_tree();
        let request = ScanRequest::new(dir.path()).with_recursive(true);
        assert_eq!(path_set(&request), path_set(&request));
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let request = ScanRequest::new(dir.path().join("does-not-exist"));

        let err = scan(&request).err().unwrap();
        assert!(matches!(err, DriveupError::DirectoryAccess { .. }));
    }

    #[test]
    fn test_file_root_is_an_error() {
        let dir = create_data_tree();
        let request = ScanRequest::new(dir.path().join("a.txt"));

        let err = scan(&request).err().unwrap();
        assert!(matches!(err, DriveupError::DirectoryAccess { .. }));
    }

    #[test]
    fn test_invalid_pattern_fails_before_root_check() {
        let request = ScanRequest::new("/definitely/not/here").with_pattern("[unclosed");

        let err = scan(&request).err().unwrap();
        assert!(matches!(err, DriveupError::PatternSyntax(_)));
    }

    #[test]
    fn test_records_are_absolute() {
        let dir = create_data_tree();
        for record in scan(&ScanRequest::new(dir.path())).unwrap() {
            assert!(record.absolute_path().is_absolute());
        }
    }

    #[test]
    fn test_relative_root_is_joined_onto_working_directory() {
        let root = absolute_root(Path::new("some/rel")).unwrap();
        assert!(root.is_absolute());
        assert_eq!(root, std::env::current_dir().unwrap().join("some/rel"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_not_followed_by_default() {
        use std::os::unix::fs::symlink;

        let dir = create_data_tree();
        symlink(dir.path().join("sub"), dir.path().join("linked")).unwrap();
        symlink(dir.path().join("a.txt"), dir.path().join("alias.txt")).unwrap();

        let found = path_set(&ScanRequest::new(dir.path()).with_recursive(true));
        assert!(found.contains(&dir.path().join("alias.txt")));
        assert!(!found.contains(&dir.path().join("linked/c.txt")));
        assert_eq!(found.len(), 4);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_is_skipped_when_following() {
        use std::os::unix::fs::symlink;

        let dir = create_data_tree();
        symlink(dir.path(), dir.path().join("sub").join("back")).unwrap();

        let request = ScanRequest::new(dir.path())
            .with_recursive(true)
            .with_follow_links(true);
        let found = paths(&request);

        assert_eq!(
            found,
            vec![
                dir.path().join("a.txt"),
                dir.path().join("b.log"),
                dir.path().join("sub/c.txt"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_skipped() {
        use std::os::unix::fs::symlink;

        let dir = create_data_tree();
        // Sorts between b.log and sub/, so the walk has to carry on past it.
        symlink(dir.path().join("gone.txt"), dir.path().join("dangling.txt")).unwrap();

        let expected = vec![
            dir.path().join("a.txt"),
            dir.path().join("b.log"),
            dir.path().join("sub/c.txt"),
        ];
        for follow in [true, false] {
            let request = ScanRequest::new(dir.path())
                .with_recursive(true)
                .with_follow_links(follow);
            assert_eq!(paths(&request), expected, "follow_links = {}", follow);
        }
    }
}
