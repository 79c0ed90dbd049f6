use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

/// File extensions eligible for hardlink probing.
pub const MEDIA_EXTENSIONS: &[&str] = &["mkv", "mp4"];

/// Walk `roots` and collect files that carry a recognized media extension
/// and whose OS-reported hard-link count is exactly 1. Traversal is
/// best-effort: an unreadable entry is logged and skipped, and a missing
/// root never aborts the walk of the others. Output is sorted.
pub fn find_unlinked_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        if !root.exists() {
            warn!(root = %root.display(), "skipping missing media root");
            continue;
        }
        info!(root = %root.display(), "probing for hardlink-deficient files");
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%error, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !has_media_extension(path) {
                continue;
            }
            match link_count(path) {
                Ok(1) => files.push(path.to_path_buf()),
                Ok(_) => {}
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable file")
                }
            }
        }
    }
    files.sort();
    files
}

fn has_media_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

#[cfg(unix)]
fn link_count(path: &Path) -> std::io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(std::fs::metadata(path)?.nlink())
}

#[cfg(not(unix))]
fn link_count(_path: &Path) -> std::io::Result<u64> {
    // Link counts are not exposed portably; report every file as shared so
    // nothing is ever deleted on such platforms.
    Ok(2)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::find_unlinked_files;

    fn write_file(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, b"payload").expect("write");
    }

    #[test]
    #[cfg(unix)]
    fn finds_only_single_link_media_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("media");

        let lonely = root.join("Movie (2020)").join("Movie (2020).mkv");
        write_file(&lonely);

        let seeded = root.join("Show (2019)").join("Show (2019) S01E01.mkv");
        write_file(&seeded);
        fs::hard_link(&seeded, root.join("seed-copy.mkv")).expect("hard link");

        write_file(&root.join("notes.txt"));

        let found = find_unlinked_files(&[root]);
        assert_eq!(found, vec![lonely]);
    }

    #[test]
    #[cfg(unix)]
    fn extension_match_is_case_insensitive() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("media");
        let upper = root.join("Movie (2021)").join("Movie (2021).MKV");
        write_file(&upper);

        let found = find_unlinked_files(&[root]);
        assert_eq!(found, vec![upper]);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let temp = tempdir().expect("tempdir");
        let found = find_unlinked_files(&[temp.path().join("does-not-exist")]);
        assert!(found.is_empty());
    }
}
