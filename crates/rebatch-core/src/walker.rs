use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{RenameError, Result};
use crate::pattern::Pattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A filesystem object seen during a walk. Symlinks that are not followed
/// show up as files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
    /// Children of the root are at depth 1.
    pub depth: usize,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Something the walker stepped over instead of failing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalkWarning {
    #[error("Entry vanished during traversal: {0:?}")]
    EntryVanished(PathBuf),
    #[error("Unreadable entry {path:?}: {message}")]
    Unreadable { path: PathBuf, message: String },
    #[error("Skipping entry with a non UTF-8 name: {0:?}")]
    NonUtf8Name(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkOptions {
    pub recursive: bool,
    pub include_files: bool,
    pub include_dirs: bool,
    pub follow_symlinks: bool,
    /// Worker threads for [`TreeWalker::collect`]; 0 or 1 walks on the calling thread.
    pub threads: usize,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            include_files: true,
            include_dirs: false,
            follow_symlinks: false,
            threads: 1,
        }
    }
}

pub type Predicate = Arc<dyn Fn(&Entry) -> bool + Send + Sync>;

/// A drained walk.
#[derive(Debug, Clone, Default)]
pub struct WalkOutput {
    pub entries: Vec<Entry>,
    pub warnings: Vec<WalkWarning>,
}

/// Enumerates entries under a root in a stable order: siblings sorted by
/// name, directories emitted before their contents.
#[derive(Clone)]
pub struct TreeWalker {
    root: PathBuf,
    options: WalkOptions,
    predicate: Option<Predicate>,
}

impl TreeWalker {
    pub fn new(root: impl AsRef<Path>, options: WalkOptions) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            options,
            predicate: None,
        }
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Entry) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Only emit entries whose name matches `pattern`. Directories are still
    /// descended into when they do not match.
    pub fn with_pattern(self, pattern: Pattern) -> Self {
        self.with_predicate(move |entry| pattern.matches(&entry.name))
    }

    pub fn options(&self) -> &WalkOptions {
        &self.options
    }

    /// Start a fresh lazy traversal. Each call re-reads the tree.
    pub fn walk(&self) -> Result<Walk> {
        let root = resolve_root(&self.root)?;
        debug!("Walking {:?}", root);
        Ok(Walk::new(&root, 0, self.options.clone(), self.predicate.clone()))
    }

    /// Drain a traversal. With more than one thread, each top-level
    /// directory is walked as its own task and the results are stitched back
    /// into the same order a sequential walk produces.
    pub fn collect(&self) -> Result<WalkOutput> {
        if self.options.threads <= 1 || !self.options.recursive {
            return self.walk()?.drain();
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.threads)
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                warn!("Falling back to a sequential walk: {}", e);
                return self.walk()?.drain();
            }
        };

        let root = resolve_root(&self.root)?;
        let listing = WalkOptions {
            recursive: false,
            include_files: true,
            include_dirs: true,
            ..self.options.clone()
        };
        let top_level = Walk::new(&root, 0, listing, None).drain()?;
        let mut output = WalkOutput {
            entries: Vec::new(),
            warnings: top_level.warnings,
        };

        let subtrees: Vec<Option<Result<WalkOutput>>> = pool.install(|| {
            top_level
                .entries
                .par_iter()
                .map(|child| {
                    child.is_dir().then(|| {
                        Walk::new(&child.path, 1, self.options.clone(), self.predicate.clone()).drain()
                    })
                })
                .collect()
        });

        for (child, subtree) in top_level.entries.into_iter().zip(subtrees) {
            if accepts(&self.options, self.predicate.as_ref(), &child) {
                output.entries.push(child);
            }
            if let Some(subtree) = subtree {
                let subtree = subtree?;
                output.entries.extend(subtree.entries);
                output.warnings.extend(subtree.warnings);
            }
        }

        debug!(
            "Parallel walk finished: {} entries, {} warnings",
            output.entries.len(),
            output.warnings.len()
        );
        Ok(output)
    }
}

/// Lazily walk `root` with the given filters.
pub fn walk<F>(
    root: impl AsRef<Path>,
    recursive: bool,
    include_dirs: bool,
    include_files: bool,
    predicate: F,
) -> Result<Walk>
where
    F: Fn(&Entry) -> bool + Send + Sync + 'static,
{
    let options = WalkOptions {
        recursive,
        include_dirs,
        include_files,
        ..WalkOptions::default()
    };
    TreeWalker::new(root, options).with_predicate(predicate).walk()
}

/// A lazy, finite traversal. Stops for good after yielding an error.
pub struct Walk {
    inner: walkdir::IntoIter,
    /// Depth of the walked directory below the tree root.
    base_depth: usize,
    options: WalkOptions,
    predicate: Option<Predicate>,
    warnings: Vec<WalkWarning>,
    finished: bool,
}

impl Walk {
    fn new(dir: &Path, base_depth: usize, options: WalkOptions, predicate: Option<Predicate>) -> Self {
        let max_depth = if options.recursive { usize::MAX } else { 1 };
        let inner = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(options.follow_symlinks)
            .sort_by_file_name()
            .into_iter();
        Self {
            inner,
            base_depth,
            options,
            predicate,
            warnings: Vec::new(),
            finished: false,
        }
    }

    pub fn warnings(&self) -> &[WalkWarning] {
        &self.warnings
    }

    pub fn drain(mut self) -> Result<WalkOutput> {
        let mut entries = Vec::new();
        for entry in self.by_ref() {
            entries.push(entry?);
        }
        Ok(WalkOutput {
            entries,
            warnings: self.warnings,
        })
    }

    /// Turn a traversal error into a warning. Only symlink loops are fatal.
    fn recover(&mut self, err: walkdir::Error) -> Result<()> {
        if let Some(ancestor) = err.loop_ancestor() {
            let at = err.path().unwrap_or(ancestor).to_path_buf();
            return Err(RenameError::SymlinkCycleDetected(at));
        }

        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        let warning = match err.io_error() {
            Some(io) if io.kind() == ErrorKind::NotFound => WalkWarning::EntryVanished(path),
            _ => WalkWarning::Unreadable {
                path,
                message: err.to_string(),
            },
        };
        self.skip(warning);
        Ok(())
    }

    fn skip(&mut self, warning: WalkWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }
}

impl Iterator for Walk {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let dent = match self.inner.next()? {
                Ok(dent) => dent,
                Err(err) => match self.recover(err) {
                    Ok(()) => continue,
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                },
            };

            let is_dir = dent.file_type().is_dir();
            let Some(name) = dent.file_name().to_str().map(str::to_string) else {
                if is_dir {
                    self.inner.skip_current_dir();
                }
                self.skip(WalkWarning::NonUtf8Name(dent.into_path()));
                continue;
            };

            let entry = Entry {
                depth: self.base_depth + dent.depth(),
                kind: if is_dir { EntryKind::Directory } else { EntryKind::File },
                path: dent.into_path(),
                name,
            };
            if accepts(&self.options, self.predicate.as_ref(), &entry) {
                return Some(Ok(entry));
            }
        }
        None
    }
}

fn accepts(options: &WalkOptions, predicate: Option<&Predicate>, entry: &Entry) -> bool {
    let kind_ok = match entry.kind {
        EntryKind::File => options.include_files,
        EntryKind::Directory => options.include_dirs,
    };
    kind_ok && predicate.map_or(true, |p| (**p)(entry))
}

fn resolve_root(root: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(root).map_err(|e| RenameError::io(root, e))?;
    if !absolute.is_dir() {
        return Err(RenameError::RootNotFound(absolute));
    }
    Ok(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// ```text
    /// tmp/
    ///   b.txt
    ///   a.txt
    ///   docs/
    ///     z.md
    ///     inner/
    ///       y.md
    ///   c.pdf
    /// ```
    fn setup_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("c.pdf"), "c").unwrap();
        fs::create_dir_all(root.join("docs/inner")).unwrap();
        fs::write(root.join("docs/z.md"), "z").unwrap();
        fs::write(root.join("docs/inner/y.md"), "y").unwrap();
        dir
    }

    fn names(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_non_recursive_files_sorted() {
        let dir = setup_tree();
        let output = TreeWalker::new(dir.path(), WalkOptions::default()).collect().unwrap();
        assert_eq!(names(&output.entries), vec!["a.txt", "b.txt", "c.pdf"]);
        assert!(output.entries.iter().all(|e| e.depth == 1));
        assert!(output.entries.iter().all(|e| e.path.is_absolute()));
    }

    #[test]
    fn test_recursive_depth_first_order() {
        let dir = setup_tree();
        let options = WalkOptions {
            recursive: true,
            include_dirs: true,
            ..WalkOptions::default()
        };
        let output = TreeWalker::new(dir.path(), options).collect().unwrap();
        assert_eq!(
            names(&output.entries),
            vec!["a.txt", "b.txt", "c.pdf", "docs", "inner", "y.md", "z.md"]
        );
        let depths: Vec<usize> = output.entries.iter().map(|e| e.depth).collect();
        assert_eq!(depths, vec![1, 1, 1, 1, 2, 3, 2]);
    }

    #[test]
    fn test_directories_only() {
        let dir = setup_tree();
        let options = WalkOptions {
            recursive: true,
            include_files: false,
            include_dirs: true,
            ..WalkOptions::default()
        };
        let output = TreeWalker::new(dir.path(), options).collect().unwrap();
        assert_eq!(names(&output.entries), vec!["docs", "inner"]);
        assert!(output.entries.iter().all(Entry::is_dir));
    }

    #[test]
    fn test_pattern_filters_emitted_entries_only() {
        let dir = setup_tree();
        let options = WalkOptions {
            recursive: true,
            ..WalkOptions::default()
        };
        let output = TreeWalker::new(dir.path(), options)
            .with_pattern(Pattern::glob("*.md").unwrap())
            .collect()
            .unwrap();
        assert_eq!(names(&output.entries), vec!["y.md", "z.md"]);
    }

    #[test]
    fn test_parallel_walk_matches_sequential_order() {
        let dir = setup_tree();
        fs::create_dir_all(dir.path().join("aaa/deep")).unwrap();
        fs::write(dir.path().join("aaa/deep/x.txt"), "x").unwrap();

        let options = WalkOptions {
            recursive: true,
            include_dirs: true,
            ..WalkOptions::default()
        };
        let sequential = TreeWalker::new(dir.path(), options.clone()).collect().unwrap();
        let parallel = TreeWalker::new(dir.path(), WalkOptions { threads: 4, ..options })
            .collect()
            .unwrap();
        assert_eq!(sequential.entries, parallel.entries);
    }

    #[test]
    fn test_walk_is_lazy_and_restartable() {
        let dir = setup_tree();
        let walker = TreeWalker::new(dir.path(), WalkOptions::default());
        let first: Vec<Entry> = walker.walk().unwrap().take(1).map(|e| e.unwrap()).collect();
        assert_eq!(names(&first), vec!["a.txt"]);

        fs::write(dir.path().join("0.txt"), "0").unwrap();
        let again = walker.walk().unwrap().drain().unwrap();
        assert_eq!(names(&again.entries), vec!["0.txt", "a.txt", "b.txt", "c.pdf"]);
    }

    #[test]
    fn test_free_walk_function() {
        let dir = setup_tree();
        let entries: Vec<Entry> = walk(dir.path(), true, false, true, |e| e.name.ends_with(".txt"))
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(names(&entries), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = TreeWalker::new(dir.path().join("missing"), WalkOptions::default()).walk();
        assert!(matches!(result, Err(RenameError::RootNotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_not_followed_by_default() {
        let dir = setup_tree();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("docs/inner/loop")).unwrap();

        let options = WalkOptions {
            recursive: true,
            ..WalkOptions::default()
        };
        let output = TreeWalker::new(dir.path(), options).collect().unwrap();
        assert_eq!(
            names(&output.entries),
            vec!["a.txt", "b.txt", "c.pdf", "loop", "y.md", "z.md"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_detected_when_following() {
        let dir = setup_tree();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("docs/inner/loop")).unwrap();

        let options = WalkOptions {
            recursive: true,
            follow_symlinks: true,
            ..WalkOptions::default()
        };
        let result = TreeWalker::new(dir.path(), options).collect();
        assert!(matches!(result, Err(RenameError::SymlinkCycleDetected(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_followed_symlink_without_cycle() {
        let dir = setup_tree();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("linked.md"), "l").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("ext")).unwrap();

        let options = WalkOptions {
            recursive: true,
            follow_symlinks: true,
            ..WalkOptions::default()
        };
        let output = TreeWalker::new(dir.path(), options).collect().unwrap();
        assert!(names(&output.entries).contains(&"linked.md"));
    }

    #[test]
    fn test_vanished_directory_becomes_warning() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/x.txt"), "x").unwrap();
        fs::write(dir.path().join("z.txt"), "z").unwrap();

        let options = WalkOptions {
            recursive: true,
            ..WalkOptions::default()
        };
        let mut walk = TreeWalker::new(dir.path(), options).walk().unwrap();
        // The root listing is read on the first step; `sub` goes away after that.
        assert_eq!(walk.next().unwrap().unwrap().name, "a.txt");
        fs::remove_dir_all(dir.path().join("sub")).unwrap();

        let output = walk.drain().unwrap();
        assert_eq!(names(&output.entries), vec!["z.txt"]);
        assert_eq!(
            output.warnings,
            vec![WalkWarning::EntryVanished(dir.path().join("sub"))]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_name_becomes_warning() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = setup_tree();
        let bad = dir.path().join(OsStr::from_bytes(b"bad\xff.txt"));
        fs::write(&bad, "bad").unwrap();

        let output = TreeWalker::new(dir.path(), WalkOptions::default()).collect().unwrap();
        assert_eq!(names(&output.entries), vec!["a.txt", "b.txt", "c.pdf"]);
        assert_eq!(output.warnings, vec![WalkWarning::NonUtf8Name(bad)]);
    }
}
