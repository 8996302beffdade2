use crate::calculators::modified_secs;
use crate::error::InaccessiblePath;
use crate::storage::models::{normalize_extension, ScannedFile};
use crate::storage::queries::relative_dir_string;
use glob::Pattern;
use std::path::Path;
use tracing::error;
use walkdir::WalkDir;

/// One step of a tree walk.
#[derive(Debug)]
pub enum WalkItem {
    File(ScannedFile),
    /// An entry that could not be read, with its `/`-joined path relative to the root.
    /// An empty relative path means the root itself.
    Inaccessible {
        entry: InaccessiblePath,
        relative: String,
    },
}

pub fn compile_ignore_patterns(ignore_globs: &[String]) -> Vec<Pattern> {
    ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect()
}

/// Walk a source root, yielding regular files and unreadable entries. Symlinks are not
/// followed. Entries matching an ignore pattern are skipped along with their subtrees.
pub fn walk<'a>(
    root: &'a Path,
    recursive: bool,
    ignore_patterns: &'a [Pattern],
) -> impl Iterator<Item = WalkItem> + 'a {
    let mut walker = WalkDir::new(root).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        .filter_entry(move |entry| {
            !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
        })
        .filter_map(move |entry| match entry {
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    return None;
                }
                match entry.metadata() {
                    Ok(metadata) => {
                        scanned_file(root, entry.path(), metadata.len(), modified_secs(&metadata))
                            .map(WalkItem::File)
                    }
                    Err(err) => Some(inaccessible(root, entry.path(), err.to_string())),
                }
            }
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                Some(inaccessible(root, &path, err.to_string()))
            }
        })
}

fn inaccessible(root: &Path, path: &Path, reason: String) -> WalkItem {
    let relative = path
        .strip_prefix(root)
        .map(relative_dir_string)
        .unwrap_or_default();
    WalkItem::Inaccessible {
        entry: InaccessiblePath {
            path: path.to_path_buf(),
            reason,
        },
        relative,
    }
}

fn scanned_file(root: &Path, path: &Path, size: u64, modified_date: i64) -> Option<ScannedFile> {
    let relative = path.strip_prefix(root).ok()?;
    let name = relative.file_name()?.to_string_lossy().into_owned();
    let relative_dir = relative
        .parent()
        .map(relative_dir_string)
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| normalize_extension(&e.to_string_lossy()))
        .unwrap_or_default();

    Some(ScannedFile {
        relative_dir,
        name,
        ext,
        size: size as i64,
        modified_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn files(items: Vec<WalkItem>) -> Vec<(String, String, String)> {
        let mut out: Vec<_> = items
            .into_iter()
            .filter_map(|item| match item {
                WalkItem::File(f) => Some((f.relative_dir, f.name, f.ext)),
                WalkItem::Inaccessible { .. } => None,
            })
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_walk_recursive_and_top_level() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.JPG"), b"1").unwrap();
        fs::write(root.join("a/b/deep.txt"), b"2").unwrap();
        fs::write(root.join("a/noext"), b"3").unwrap();

        let all = files(walk(root, true, &[]).collect());
        assert_eq!(
            all,
            vec![
                ("".to_string(), "top.JPG".to_string(), "jpg".to_string()),
                ("a".to_string(), "noext".to_string(), "".to_string()),
                ("a/b".to_string(), "deep.txt".to_string(), "txt".to_string()),
            ]
        );

        let top = files(walk(root, false, &[]).collect());
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].1, "top.JPG");
    }

    #[test]
    fn test_walk_skips_ignored_subtrees() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::write(root.join("cache/x.bin"), b"x").unwrap();
        fs::write(root.join("keep.bin"), b"k").unwrap();

        let patterns = compile_ignore_patterns(&["**/cache".to_string(), "[".to_string()]);
        assert_eq!(patterns.len(), 1);
        let found = files(walk(root, true, &patterns).collect());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, "keep.bin");
    }
}
