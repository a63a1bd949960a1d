/// Media module
///
/// This module handles image bytes outside the catalog:
/// - Content-addressed blob storage and signed URLs (blobs.rs)
/// - Thumbnail derivation and dimension probing (thumbnail.rs)
/// - Recursive folder uploads (import.rs)

pub mod blobs;
pub mod import;
pub mod thumbnail;

pub use blobs::{BlobStore, LocalBlobStore, SignedUrl, UrlCache};
pub use import::{import_folder, ImportResult};
pub use thumbnail::{derive_thumbnail, Thumbnail};
