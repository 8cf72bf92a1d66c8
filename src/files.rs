use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions of photo files whose metadata can be stored.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Collect supported photo files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks). Only `.jpg`/`.jpeg` files are included,
/// and the staging temp files of an interrupted rewrite never match.
///
/// # Example
///
/// ```rust,no_run
/// use iris_meta::files::collect_images;
/// use std::path::PathBuf;
///
/// let images = collect_images(&[
///     PathBuf::from("eye.jpg"),        // single file
///     PathBuf::from("./patients/"),    // entire directory
/// ]);
/// println!("Found {} images", images.len());
/// ```
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

/// Check if a file has a supported photo extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Key under which pending writes for a file are tracked.
///
/// Resolves symlinks and `..` when the file exists, so two spellings of the
/// same file share one entry. Falls back to an absolute path otherwise.
pub fn canonical_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── is_supported_image ───────────────────────────────────────────

    #[test]
    fn supported_image_extensions() {
        assert!(is_supported_image(Path::new("eye.jpg")));
        assert!(is_supported_image(Path::new("eye.JPEG")));
        assert!(is_supported_image(Path::new("EYE.Jpg")));
    }

    #[test]
    fn unsupported_image_extensions() {
        assert!(!is_supported_image(Path::new("eye.png")));
        assert!(!is_supported_image(Path::new("eye.jpg.temp")));
        assert!(!is_supported_image(Path::new("notes.txt")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    // ── collect_images ───────────────────────────────────────────────

    #[test]
    fn collect_images_single_file() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("right.jpg");
        fs::write(&jpg, b"fake").unwrap();

        let images = collect_images(&[jpg.clone()]);
        assert_eq!(images, vec![jpg]);
    }

    #[test]
    fn collect_images_skips_unsupported() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("readme.txt");
        fs::write(&txt, b"hello").unwrap();

        assert!(collect_images(&[txt]).is_empty());
    }

    #[test]
    fn collect_images_directory_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("patient-1");
        fs::create_dir(&sub).unwrap();

        fs::write(dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(sub.join("b.jpeg"), b"fake").unwrap();
        fs::write(sub.join("b.jpeg.temp"), b"fake").unwrap();
        fs::write(sub.join("c.png"), b"fake").unwrap();

        let images = collect_images(&[dir.path().to_path_buf()]);
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn collect_images_nonexistent_path() {
        assert!(collect_images(&[PathBuf::from("/nonexistent/path")]).is_empty());
    }

    // ── canonical_path ───────────────────────────────────────────────

    #[test]
    fn canonical_path_resolves_dot_segments() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        let jpg = dir.path().join("eye.jpg");
        fs::write(&jpg, b"fake").unwrap();

        let indirect = sub.join("..").join("eye.jpg");
        assert_eq!(canonical_path(&indirect), canonical_path(&jpg));
    }

    #[test]
    fn canonical_path_of_missing_file_is_absolute() {
        let key = canonical_path(Path::new("does-not-exist.jpg"));
        assert!(key.is_absolute());
        assert!(key.ends_with("does-not-exist.jpg"));
    }
}
