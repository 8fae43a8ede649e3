// Screenshot listing module
// Enumerates screenshot files in the watched directory and diffs snapshots

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// The screenshot file names present in the watched directory at one poll.
///
/// Names are kept sorted so that "first in listing order" is the same on
/// every platform, whatever order the OS hands directory entries back in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    names: Vec<OsString>,
}

impl Snapshot {
    /// Build a snapshot from a set of file names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut names: Vec<OsString> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    #[cfg(test)]
    pub fn names(&self) -> &[OsString] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &OsStr) -> bool {
        self.names
            .binary_search_by(|candidate| candidate.as_os_str().cmp(name))
            .is_ok()
    }

    /// Names present now that were not present in `previous`, in listing order.
    /// Names that disappeared since `previous` are not reported.
    pub fn added_since(&self, previous: &Snapshot) -> Vec<OsString> {
        self.names
            .iter()
            .filter(|name| !previous.contains(name))
            .cloned()
            .collect()
    }
}

/// List the regular files in `dir` whose name ends with `extension`.
///
/// The suffix match is case-sensitive and byte-wise, so names that are not
/// valid UTF-8 are listed too. Symlinks are followed, so a link to a
/// screenshot counts as a screenshot. A missing or unreadable directory is an
/// error.
pub fn list_screenshots(dir: &Path, extension: &str) -> io::Result<Snapshot> {
    let mut names = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.as_bytes().ends_with(extension.as_bytes()) {
            continue;
        }
        // is_file() follows symlinks and is false for entries that vanished
        if entry.path().is_file() {
            names.push(name);
        }
    }

    Ok(Snapshot::from_names(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"data").expect("failed to create test file");
    }

    #[test]
    fn listing_keeps_only_matching_files() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        touch(temp_dir.path(), "a.png");
        touch(temp_dir.path(), "b.txt");
        touch(temp_dir.path(), "c.png");

        let snapshot = list_screenshots(temp_dir.path(), ".png").expect("listing failed");
        assert_eq!(snapshot.names(), ["a.png", "c.png"]);
    }

    #[test]
    fn listing_skips_directories_with_matching_names() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        touch(temp_dir.path(), "a.png");
        fs::create_dir(temp_dir.path().join("folder.png")).expect("failed to create dir");

        let snapshot = list_screenshots(temp_dir.path(), ".png").expect("listing failed");
        assert_eq!(snapshot.names(), ["a.png"]);
    }

    #[test]
    fn listing_suffix_match_is_case_sensitive() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        touch(temp_dir.path(), "upper.PNG");
        touch(temp_dir.path(), "lower.png");
        touch(temp_dir.path(), "png");

        let snapshot = list_screenshots(temp_dir.path(), ".png").expect("listing failed");
        assert_eq!(snapshot.names(), ["lower.png"]);
    }

    #[test]
    fn listing_empty_directory_is_empty() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let snapshot = list_screenshots(temp_dir.path(), ".png").expect("listing failed");
        assert!(snapshot.is_empty());
    }

    #[test]
    fn listing_missing_directory_fails() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let missing = temp_dir.path().join("does-not-exist");

        let err = list_screenshots(&missing, ".png").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn added_since_reports_new_names() {
        let previous = Snapshot::from_names(["a.png"]);
        let current = Snapshot::from_names(["a.png", "b.png"]);

        assert_eq!(current.added_since(&previous), ["b.png"]);
    }

    #[test]
    fn added_since_ignores_deletions() {
        let previous = Snapshot::from_names(["a.png", "b.png"]);
        let current = Snapshot::from_names(["a.png"]);

        assert!(current.added_since(&previous).is_empty());
    }

    #[test]
    fn added_since_is_sorted_whatever_the_input_order() {
        let previous = Snapshot::from_names(["2021-01-01_10.00.00.png"]);
        let current = Snapshot::from_names([
            "2021-01-01_10.00.09.png",
            "2021-01-01_10.00.00.png",
            "2021-01-01_10.00.05.png",
        ]);

        assert_eq!(
            current.added_since(&previous),
            ["2021-01-01_10.00.05.png", "2021-01-01_10.00.09.png"]
        );
    }

    #[test]
    fn from_names_drops_duplicates() {
        let snapshot = Snapshot::from_names(["b.png", "a.png", "b.png"]);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(OsStr::new("a.png")));
        assert!(snapshot.contains(OsStr::new("b.png")));
        assert!(!snapshot.contains(OsStr::new("c.png")));
    }

    #[test]
    fn listing_keeps_names_that_are_not_utf8() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let odd = OsStr::from_bytes(b"shot-\xff.png");
        fs::write(temp_dir.path().join(odd), b"data").expect("failed to create test file");
        touch(temp_dir.path(), "plain.png");

        let snapshot = list_screenshots(temp_dir.path(), ".png").expect("listing failed");
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(odd));
        assert!(snapshot.added_since(&Snapshot::default()).contains(&odd.to_os_string()));
    }
}
