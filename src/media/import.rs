use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::blobs::BlobStore;
use super::thumbnail::{derive_thumbnail, extension_for, probe_dimensions};
use crate::config::Config;
use crate::error::{EditorError, Result};
use crate::lineage::grouper::UNTITLED;
use crate::state::data::ImageEntity;
use crate::state::library::RecordStore;

/// Supported upload extensions
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Result of a folder import operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub imported_count: usize,
    /// Duplicates already in the catalog
    pub skipped_count: usize,
    /// Files that could not be decoded or stored
    pub failed_count: usize,
    /// Ids of the new root images
    pub imported_ids: Vec<String>,
}

/// Import every supported image below `dir` as a new root version
pub fn import_folder(
    dir: &Path,
    store: &dyn RecordStore,
    blobs: &dyn BlobStore,
    config: &Config,
) -> Result<ImportResult> {
    if !dir.is_dir() {
        return Err(EditorError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }

    info!("🔍 Scanning folder: {}", dir.display());

    let mut known: HashSet<String> = store
        .load_images(None)?
        .into_iter()
        .filter_map(|image| image.storage_ref)
        .collect();
    let mut result = ImportResult::default();

    // Walk the directory tree recursively
    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !has_image_extension(path) {
            continue;
        }

        match import_file(path, store, blobs, config, &mut known) {
            Ok(Some(id)) => {
                result.imported_count += 1;
                result.imported_ids.push(id);
                if result.imported_count % 100 == 0 {
                    info!("⏳ Imported {} files...", result.imported_count);
                }
            }
            Ok(None) => result.skipped_count += 1,
            Err(e) => {
                warn!("⚠️  Error importing {}: {}", path.display(), e);
                result.failed_count += 1;
            }
        }
    }

    info!(
        "✅ Import complete: {} new, {} skipped, {} failed",
        result.imported_count, result.skipped_count, result.failed_count
    );
    Ok(result)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Returns the new image id, or None when the pixels are already catalogued
fn import_file(
    path: &Path,
    store: &dyn RecordStore,
    blobs: &dyn BlobStore,
    config: &Config,
    known: &mut HashSet<String>,
) -> Result<Option<String>> {
    let bytes = std::fs::read(path)?;
    // Header only; duplicates never pay for a full decode
    let (width, height) = probe_dimensions(&bytes)?;

    let storage_ref = blobs.put(&bytes, extension_for(&bytes))?;
    if !known.insert(storage_ref.clone()) {
        debug!("Skipping duplicate {}", path.display());
        return Ok(None);
    }
    let thumbnail = derive_thumbnail(&bytes, config.thumbnail_size)?;
    let thumbnail_ref = blobs.put(&thumbnail.bytes, "png")?;

    let base_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let mut image = ImageEntity::upload(Uuid::new_v4().to_string(), base_name, width, height);
    image.storage_ref = Some(storage_ref);
    image.thumbnail_ref = Some(thumbnail_ref);
    store.upsert_image(&image)?;

    Ok(Some(image.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::blobs::LocalBlobStore;
    use crate::media::thumbnail::sample_png;
    use crate::state::library::Library;

    #[test]
    fn test_import_folder_counts_and_dedupes() {
        let photos = tempfile::tempdir().unwrap();
        let blob_dir = tempfile::tempdir().unwrap();
        std::fs::write(photos.path().join("beach.png"), sample_png(300, 200)).unwrap();
        std::fs::create_dir(photos.path().join("nested")).unwrap();
        std::fs::write(photos.path().join("nested").join("copy.PNG"), sample_png(300, 200)).unwrap();
        std::fs::write(photos.path().join("broken.jpg"), b"nope").unwrap();
        std::fs::write(photos.path().join("notes.txt"), b"ignored").unwrap();

        let store = Library::open_in_memory().unwrap();
        let blobs = LocalBlobStore::open(blob_dir.path()).unwrap();
        let result = import_folder(photos.path(), &store, &blobs, &Config::default()).unwrap();

        assert_eq!(result.imported_count, 1);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.failed_count, 1);

        let images = store.load_images(None).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].base_name, "beach");
        assert_eq!(images[0].version, 1);
        assert_eq!((images[0].display_width, images[0].display_height), (300, 200));
        assert_eq!((images[0].real_width, images[0].real_height), (Some(300), Some(200)));
        assert!(images[0].thumbnail_ref.is_some());
    }

    #[test]
    fn test_reimport_skips_everything() {
        let photos = tempfile::tempdir().unwrap();
        let blob_dir = tempfile::tempdir().unwrap();
        std::fs::write(photos.path().join("a.png"), sample_png(10, 10)).unwrap();

        let store = Library::open_in_memory().unwrap();
        let blobs = LocalBlobStore::open(blob_dir.path()).unwrap();
        import_folder(photos.path(), &store, &blobs, &Config::default()).unwrap();
        let second = import_folder(photos.path(), &store, &blobs, &Config::default()).unwrap();

        assert_eq!(second.imported_count, 0);
        assert_eq!(second.skipped_count, 1);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let store = Library::open_in_memory().unwrap();
        let blob_dir = tempfile::tempdir().unwrap();
        let blobs = LocalBlobStore::open(blob_dir.path()).unwrap();
        let missing = blob_dir.path().join("missing");
        assert!(import_folder(&missing, &store, &blobs, &Config::default()).is_err());
    }
}
