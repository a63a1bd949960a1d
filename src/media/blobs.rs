/// Blob storage and time-limited access URLs
///
/// Blobs are content-addressed: the storage reference is the blake3 hash of
/// the bytes plus an extension, so storing the same pixels twice is free.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{EditorError, Result};

const KEY_CONTEXT: &str = "lineage-editor 2024 blob url signing";
const KEY_FILE: &str = ".signing-key";

/// A URL that stops verifying after `expires_at`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their storage reference
    fn put(&self, bytes: &[u8], extension: &str) -> Result<String>;
    fn read(&self, storage_ref: &str) -> Result<Vec<u8>>;
    /// Batch-issue access URLs; unknown refs are left out of the map
    fn signed_urls(&self, refs: &[String], ttl: Duration) -> Result<HashMap<String, SignedUrl>>;
}

/// Blob store backed by a local directory
pub struct LocalBlobStore {
    root: PathBuf,
    key: [u8; 32],
}

impl LocalBlobStore {
    /// Open a store under `root`, creating the directory and signing key on first use
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;

        let key_path = root.join(KEY_FILE);
        let material = match fs::read(&key_path) {
            Ok(material) => material,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let material = uuid::Uuid::new_v4().as_bytes().to_vec();
                fs::write(&key_path, &material)?;
                info!("🔑 Created blob signing key at {}", key_path.display());
                material
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::with_key(root, blake3::derive_key(KEY_CONTEXT, &material)))
    }

    pub fn with_key(root: &Path, key: [u8; 32]) -> Self {
        Self {
            root: root.to_path_buf(),
            key,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to its file, rejecting anything that is not a bare file name
    fn path_for(&self, storage_ref: &str) -> Result<PathBuf> {
        let valid = !storage_ref.is_empty()
            && !storage_ref.starts_with('.')
            && storage_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
        if !valid {
            return Err(EditorError::BlobNotFound(storage_ref.to_string()));
        }
        Ok(self.root.join(storage_ref))
    }

    fn signature(&self, storage_ref: &str, expires: i64) -> String {
        let message = format!("{}|{}", storage_ref, expires);
        blake3::keyed_hash(&self.key, message.as_bytes()).to_hex().to_string()
    }

    pub fn sign(&self, storage_ref: &str, expires_at: DateTime<Utc>) -> Result<SignedUrl> {
        let path = self.path_for(storage_ref)?;
        let expires = expires_at.timestamp();
        Ok(SignedUrl {
            url: format!(
                "file://{}?expires={}&sig={}",
                path.display(),
                expires,
                self.signature(storage_ref, expires)
            ),
            expires_at,
        })
    }

    /// Check a URL issued by this store; returns its storage reference
    pub fn verify(&self, url: &str, now: DateTime<Utc>) -> Option<String> {
        let rest = url.strip_prefix("file://")?;
        let (path, query) = rest.split_once('?')?;
        let storage_ref = Path::new(path).file_name()?.to_str()?.to_string();

        let mut expires = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => expires = value.parse::<i64>().ok(),
                Some(("sig", value)) => sig = Some(value),
                _ => {}
            }
        }
        let (expires, sig) = (expires?, sig?);

        if now.timestamp() > expires {
            debug!("Signed URL for {} expired at {}", storage_ref, expires);
            return None;
        }
        let expected = blake3::Hash::from_hex(self.signature(&storage_ref, expires)).ok()?;
        let given = blake3::Hash::from_hex(sig).ok()?;
        // Hash equality is constant-time
        (expected == given).then_some(storage_ref)
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, bytes: &[u8], extension: &str) -> Result<String> {
        let storage_ref = format!("{}.{}", blake3::hash(bytes).to_hex(), extension);
        let path = self.path_for(&storage_ref)?;
        if !path.exists() {
            fs::write(&path, bytes)?;
            debug!("Stored blob {} ({} bytes)", storage_ref, bytes.len());
        }
        Ok(storage_ref)
    }

    fn read(&self, storage_ref: &str) -> Result<Vec<u8>> {
        let path = self.path_for(storage_ref)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EditorError::BlobNotFound(storage_ref.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn signed_urls(&self, refs: &[String], ttl: Duration) -> Result<HashMap<String, SignedUrl>> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| EditorError::Config(format!("signed URL ttl: {}", e)))?;
        let expires_at = Utc::now() + ttl;

        let mut urls = HashMap::with_capacity(refs.len());
        for storage_ref in refs {
            match self.path_for(storage_ref) {
                Ok(path) if path.exists() => {
                    urls.insert(storage_ref.clone(), self.sign(storage_ref, expires_at)?);
                }
                _ => debug!("Skipping URL for missing blob {}", storage_ref),
            }
        }
        Ok(urls)
    }
}

impl std::fmt::Debug for LocalBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBlobStore")
            .field("root", &self.root)
            .finish()
    }
}

/// Remembers issued URLs and only asks the store again near expiry
#[derive(Debug, Clone, Default)]
pub struct UrlCache {
    entries: HashMap<String, SignedUrl>,
}

impl UrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs for every resolvable ref; refs missing or within 10% of their
    /// lifetime from expiry are re-issued in one batch.
    pub fn resolve(
        &mut self,
        blobs: &dyn BlobStore,
        refs: &[String],
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<HashMap<String, String>> {
        let margin = chrono::Duration::from_std(ttl / 10).unwrap_or_else(|_| chrono::Duration::zero());
        let stale: Vec<String> = refs
            .iter()
            .filter(|r| {
                self.entries
                    .get(*r)
                    .map_or(true, |signed| signed.expires_at - now <= margin)
            })
            .cloned()
            .collect();

        if !stale.is_empty() {
            debug!("Issuing {} signed URLs", stale.len());
            self.entries.extend(blobs.signed_urls(&stale, ttl)?);
        }

        Ok(refs
            .iter()
            .filter_map(|r| self.entries.get(r).map(|signed| (r.clone(), signed.url.clone())))
            .collect())
    }

    pub fn invalidate(&mut self, storage_ref: &str) {
        self.entries.remove(storage_ref);
    }
}
