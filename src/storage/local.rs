//! Local filesystem image store.
//!
//! Layout: `{root}/{user_id}/{filename}`, one file per image, no sidecar
//! metadata.  Uploads are written to `{root}/.tmp/` first, fsynced, then
//! renamed into the bucket so readers never see a partial image.  Entries
//! under the root whose names start with `.` are engine-internal and are
//! never treated as user buckets.

use bytes::Bytes;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::backend::{ImageListing, ImageStore, StoredImage};
use super::error::{Rejection, StoreError};
use super::listing::{page_count, page_window, sort_entries, ImageEntry, ListRequest};
use super::locks::UserLocks;
use super::validation::{check_filename, check_user_id, ExtensionAllowList, ImageValidator};

/// Staging directory for in-flight uploads, relative to the root.
const TEMP_DIR: &str = ".tmp";

/// Stores images on the local filesystem.
pub struct LocalImageStore {
    /// Directory holding one bucket per user.
    root: PathBuf,
    validator: Box<dyn ImageValidator>,
    locks: UserLocks,
}

impl LocalImageStore {
    /// Create a store rooted at `root`.
    ///
    /// The root and its staging directory are created if missing; calling
    /// this again on the same root is harmless.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(TEMP_DIR))?;
        Ok(Self {
            root,
            validator: Box::new(ExtensionAllowList::default()),
            locks: UserLocks::new(true),
        })
    }

    /// Replace the image type check.
    pub fn with_validator(mut self, validator: impl ImageValidator) -> Self {
        self.validator = Box::new(validator);
        self
    }

    /// Enable or disable per-user writer serialization (on by default).
    pub fn serialize_writes(mut self, enabled: bool) -> Self {
        self.locks = UserLocks::new(enabled);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(TEMP_DIR).join(format!("upload-{}", id))
    }

    /// Write `data` to a staging file and rename it to `final_path`.
    async fn write_atomic(&self, final_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let tmp_path = self.temp_path();
        if let Some(parent) = tmp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp_path, final_path).await
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        written
    }

    /// Stat every regular file in `bucket`.
    ///
    /// Returns `None` if the bucket does not exist.  Files that disappear
    /// while being enumerated are skipped.
    async fn read_entries(&self, bucket: &Path) -> std::io::Result<Option<Vec<ImageEntry>>> {
        let mut dir = match fs::read_dir(bucket).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !metadata.is_file() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!("Skipping non UTF-8 filename in {}: {:?}", bucket.display(), raw);
                    continue;
                }
            };
            entries.push(ImageEntry {
                name,
                size: metadata.len(),
                modified: metadata.modified()?,
            });
        }
        Ok(Some(entries))
    }

    async fn count_files(dir: &Path) -> std::io::Result<usize> {
        let mut entries = fs::read_dir(dir).await?;
        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl ImageStore for LocalImageStore {
    fn upload(
        &self,
        user_id: &str,
        filename: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            check_user_id(&user_id)?;
            if !self.validator.is_allowed(&filename, &data) {
                return Err(Rejection::InvalidFileType.into());
            }
            check_filename(&filename)?;

            let _guard = self.locks.acquire(&user_id).await;

            // Buckets are created on first upload.
            let bucket = self.bucket_path(&user_id);
            fs::create_dir_all(&bucket).await?;

            self.write_atomic(&bucket.join(&filename), &data).await?;
            debug!("Stored {}/{} ({} bytes)", user_id, filename, data.len());
            Ok(())
        })
    }

    fn list(
        &self,
        user_id: &str,
        request: ListRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ImageListing, StoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            if request.page == 0 {
                return Err(Rejection::InvalidPage.into());
            }
            if request.page_size == 0 {
                return Err(Rejection::InvalidPageSize.into());
            }
            check_user_id(&user_id)?;

            let bucket = self.bucket_path(&user_id);
            let mut entries = match self.read_entries(&bucket).await? {
                Some(entries) => entries,
                None => return Ok(ImageListing::default()),
            };

            let total = entries.len();
            sort_entries(&mut entries, request.sort, request.ascending);
            let window = page_window(total, request.page, request.page_size);

            let mut images = Vec::with_capacity(window.len());
            for entry in entries.drain(window) {
                let data = match fs::read(bucket.join(&entry.name)).await {
                    Ok(data) => data,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        debug!("{}/{} vanished during listing", user_id, entry.name);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                images.push(StoredImage {
                    name: entry.name,
                    data: Bytes::from(data),
                    size: entry.size,
                    modified: entry.modified,
                });
            }

            Ok(ImageListing {
                images,
                total,
                page_count: page_count(total, request.page_size),
            })
        })
    }

    fn delete(
        &self,
        user_id: &str,
        filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let user_id = user_id.to_string();
        let filename = filename.to_string();
        Box::pin(async move {
            if filename.is_empty() {
                return Err(Rejection::MissingFile.into());
            }
            // A path that cannot name an image in a bucket is simply not found.
            if check_user_id(&user_id).is_err() || check_filename(&filename).is_err() {
                return Err(Rejection::FileNotFound.into());
            }

            let _guard = self.locks.acquire(&user_id).await;

            let path = self.bucket_path(&user_id).join(&filename);
            match fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {}
                Ok(_) => return Err(Rejection::FileNotFound.into()),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(Rejection::FileNotFound.into())
                }
                Err(e) => return Err(e.into()),
            }

            match fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(Rejection::FileNotFound.into()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn average_images_per_user(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<f64, StoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut dir = fs::read_dir(&self.root).await?;
            let mut buckets = 0usize;
            let mut images = 0usize;

            while let Some(entry) = dir.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                buckets += 1;
                images += Self::count_files(&entry.path()).await?;
            }

            if buckets == 0 {
                return Ok(0.0);
            }
            Ok(images as f64 / buckets as f64)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::listing::SortKey;
    use std::collections::HashSet;
    use std::time::{Duration, SystemTime};

    fn test_store() -> (tempfile::TempDir, LocalImageStore) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = LocalImageStore::new(dir.path().join("images")).expect("failed to create store");
        (dir, store)
    }

    fn request(page: usize, page_size: usize, ascending: bool, sort: SortKey) -> ListRequest {
        ListRequest {
            page,
            page_size,
            ascending,
            sort,
        }
    }

    fn names(listing: &ImageListing) -> Vec<String> {
        listing.images.iter().map(|i| i.name.clone()).collect()
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_new_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("images");
        LocalImageStore::new(&root).unwrap();
        LocalImageStore::new(&root).unwrap();
        assert!(root.is_dir());
        assert!(root.join(TEMP_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_upload_then_list() {
        let (_dir, store) = test_store();
        store
            .upload("alice", "cat.png", Bytes::from("meow"))
            .await
            .unwrap();

        let listing = store
            .list("alice", request(1, 10, true, SortKey::Name))
            .await
            .unwrap();
        assert_eq!(listing.total, 1);
        assert_eq!(listing.page_count, 1);
        assert_eq!(listing.images.len(), 1);
        assert_eq!(listing.images[0].name, "cat.png");
        assert_eq!(listing.images[0].data, Bytes::from("meow"));
        assert_eq!(listing.images[0].size, 4);
    }

    #[tokio::test]
    async fn test_upload_empty_content() {
        let (_dir, store) = test_store();
        store.upload("alice", "blank.jpg", Bytes::new()).await.unwrap();
        let stored = std::fs::read(store.root().join("alice/blank.jpg")).unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_upload_overwrites() {
        let (_dir, store) = test_store();
        store.upload("alice", "a.png", Bytes::from("v1")).await.unwrap();
        store.upload("alice", "a.png", Bytes::from("version 2")).await.unwrap();

        let listing = store
            .list("alice", request(1, 10, true, SortKey::Name))
            .await
            .unwrap();
        assert_eq!(listing.total, 1);
        assert_eq!(listing.images[0].data, Bytes::from("version 2"));
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_extension_without_side_effects() {
        let (_dir, store) = test_store();
        let err = store
            .upload("alice", "anim.gif", Bytes::from("GIF89a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::InvalidFileType)));
        assert_eq!(err.to_string(), "Invalid file type.");
        assert!(!store.root().join("alice").exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_extension() {
        let (_dir, store) = test_store();
        let err = store.upload("alice", "png", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::InvalidFileType)));
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal() {
        let (dir, store) = test_store();
        let err = store
            .upload("alice", "../escape.png", Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::InvalidFileName)));

        let err = store
            .upload("..", "escape.png", Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::InvalidUser)));
        assert!(!dir.path().join("escape.png").exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_user() {
        let (_dir, store) = test_store();
        let err = store.upload("", "a.png", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::MissingUser)));
    }

    #[tokio::test]
    async fn test_upload_leaves_no_staging_files() {
        let (_dir, store) = test_store();
        store.upload("alice", "a.png", Bytes::from("x")).await.unwrap();
        let staged = std::fs::read_dir(store.root().join(TEMP_DIR)).unwrap().count();
        assert_eq!(staged, 0);
    }

    #[tokio::test]
    async fn test_custom_validator() {
        struct PngMagic;
        impl ImageValidator for PngMagic {
            fn is_allowed(&self, _filename: &str, data: &[u8]) -> bool {
                data.starts_with(b"\x89PNG")
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap().with_validator(PngMagic);
        assert!(store
            .upload("alice", "real.bin", Bytes::from_static(b"\x89PNG\r\n"))
            .await
            .is_ok());
        assert!(store
            .upload("alice", "fake.png", Bytes::from_static(b"GIF89a"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_missing_bucket_is_empty() {
        let (_dir, store) = test_store();
        let listing = store
            .list("nobody", request(1, 10, false, SortKey::Date))
            .await
            .unwrap();
        assert!(listing.images.is_empty());
        assert_eq!(listing.total, 0);
        assert_eq!(listing.page_count, 0);
    }

    #[tokio::test]
    async fn test_list_rejects_reserved_and_traversal_users() {
        let (_dir, store) = test_store();
        for user in [".", "..", ".tmp", ".hidden", "a/b"] {
            let err = store
                .list(user, request(1, 10, true, SortKey::Name))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Rejected(Rejection::InvalidUser)), "{user}");
        }
    }

    #[tokio::test]
    async fn test_list_rejects_zero_page_and_page_size() {
        let (_dir, store) = test_store();
        let err = store
            .list("alice", request(1, 0, true, SortKey::Name))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::InvalidPageSize)));

        let err = store
            .list("alice", request(0, 10, true, SortKey::Name))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::InvalidPage)));
    }

    #[tokio::test]
    async fn test_pagination_is_globally_ordered() {
        let (_dir, store) = test_store();
        let mut expected = Vec::new();
        for i in 0..25 {
            let name = format!("img-{:02}.png", i);
            store
                .upload("alice", &name, Bytes::from(vec![0u8; i]))
                .await
                .unwrap();
            expected.push(name);
        }
        expected.sort();

        let mut seen = Vec::new();
        for page in 1..=3 {
            let listing = store
                .list("alice", request(page, 10, true, SortKey::Name))
                .await
                .unwrap();
            assert_eq!(listing.total, 25);
            assert_eq!(listing.page_count, 3);
            let expected_len = if page == 3 { 5 } else { 10 };
            assert_eq!(listing.images.len(), expected_len);
            seen.extend(names(&listing));
        }

        assert_eq!(seen, expected);
        let distinct: HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 25);
    }

    #[tokio::test]
    async fn test_pagination_sorts_before_slicing() {
        let (_dir, store) = test_store();
        // Sizes are deliberately out of name order.
        for (name, size) in [("a.png", 5), ("b.png", 1), ("c.png", 4), ("d.png", 2), ("e.png", 3)] {
            store
                .upload("alice", name, Bytes::from(vec![7u8; size]))
                .await
                .unwrap();
        }

        let first = store
            .list("alice", request(1, 2, true, SortKey::Size))
            .await
            .unwrap();
        let second = store
            .list("alice", request(2, 2, true, SortKey::Size))
            .await
            .unwrap();
        let third = store
            .list("alice", request(3, 2, true, SortKey::Size))
            .await
            .unwrap();
        assert_eq!(names(&first), ["b.png", "d.png"]);
        assert_eq!(names(&second), ["e.png", "c.png"]);
        assert_eq!(names(&third), ["a.png"]);
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty() {
        let (_dir, store) = test_store();
        store.upload("alice", "a.png", Bytes::from("x")).await.unwrap();
        let listing = store
            .list("alice", request(5, 10, true, SortKey::Name))
            .await
            .unwrap();
        assert!(listing.images.is_empty());
        assert_eq!(listing.total, 1);
        assert_eq!(listing.page_count, 1);
    }

    #[tokio::test]
    async fn test_list_by_size() {
        let (_dir, store) = test_store();
        for (name, size) in [("m.png", 50), ("s.png", 10), ("l.png", 90), ("x.png", 10)] {
            store
                .upload("alice", name, Bytes::from(vec![1u8; size]))
                .await
                .unwrap();
        }

        let asc = store
            .list("alice", request(1, 10, true, SortKey::Size))
            .await
            .unwrap();
        let sizes: Vec<u64> = asc.images.iter().map(|i| i.size).collect();
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]), "{sizes:?}");

        let desc = store
            .list("alice", request(1, 10, false, SortKey::Size))
            .await
            .unwrap();
        let sizes: Vec<u64> = desc.images.iter().map(|i| i.size).collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]), "{sizes:?}");
    }

    #[tokio::test]
    async fn test_list_by_date() {
        let (_dir, store) = test_store();
        for (name, secs) in [("b.png", 3_000), ("a.png", 1_000), ("c.png", 2_000)] {
            store.upload("alice", name, Bytes::from("x")).await.unwrap();
            set_mtime(&store.root().join("alice").join(name), secs);
        }

        let asc = store
            .list("alice", request(1, 10, true, SortKey::Date))
            .await
            .unwrap();
        assert_eq!(names(&asc), ["a.png", "c.png", "b.png"]);
        let times: Vec<SystemTime> = asc.images.iter().map(|i| i.modified).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));

        let desc = store
            .list("alice", request(1, 10, false, SortKey::Date))
            .await
            .unwrap();
        assert_eq!(names(&desc), ["b.png", "c.png", "a.png"]);
    }

    #[tokio::test]
    async fn test_list_by_name_descending() {
        let (_dir, store) = test_store();
        for name in ["b.png", "C.png", "a.png"] {
            store.upload("alice", name, Bytes::from("x")).await.unwrap();
        }
        let listing = store
            .list("alice", request(1, 10, false, SortKey::Name))
            .await
            .unwrap();
        assert_eq!(names(&listing), ["C.png", "b.png", "a.png"]);
    }

    #[tokio::test]
    async fn test_list_ignores_subdirectories() {
        let (_dir, store) = test_store();
        store.upload("alice", "a.png", Bytes::from("x")).await.unwrap();
        std::fs::create_dir(store.root().join("alice/nested")).unwrap();

        let listing = store
            .list("alice", request(1, 10, true, SortKey::Name))
            .await
            .unwrap();
        assert_eq!(listing.total, 1);
    }

    #[tokio::test]
    async fn test_delete_existing() {
        let (_dir, store) = test_store();
        store.upload("alice", "a.png", Bytes::from("x")).await.unwrap();
        store.upload("alice", "b.png", Bytes::from("y")).await.unwrap();

        store.delete("alice", "a.png").await.unwrap();
        assert!(!store.root().join("alice/a.png").exists());

        let listing = store
            .list("alice", request(1, 10, true, SortKey::Name))
            .await
            .unwrap();
        assert_eq!(names(&listing), ["b.png"]);

        let err = store.delete("alice", "a.png").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::FileNotFound)));
    }

    #[tokio::test]
    async fn test_delete_keeps_empty_bucket() {
        let (_dir, store) = test_store();
        store.upload("alice", "a.png", Bytes::from("x")).await.unwrap();
        store.delete("alice", "a.png").await.unwrap();
        assert!(store.root().join("alice").is_dir());
    }

    #[tokio::test]
    async fn test_delete_rejections() {
        let (_dir, store) = test_store();
        let err = store.delete("alice", "").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::MissingFile)));

        let err = store.delete("nobody", "a.png").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::FileNotFound)));

        let err = store.delete("alice", "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(Rejection::FileNotFound)));
    }

    #[tokio::test]
    async fn test_average_with_no_users() {
        let (_dir, store) = test_store();
        assert_eq!(store.average_images_per_user().await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_average_counts_emptied_buckets() {
        let (_dir, store) = test_store();
        for name in ["a.png", "b.png", "c.png"] {
            store.upload("alice", name, Bytes::from("x")).await.unwrap();
        }
        store.upload("bob", "a.png", Bytes::from("x")).await.unwrap();
        store.upload("carol", "a.png", Bytes::from("x")).await.unwrap();
        store.delete("carol", "a.png").await.unwrap();

        let weight = store.average_images_per_user().await.unwrap();
        assert!((weight - 4.0 / 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_same_user() {
        let (_dir, store) = test_store();
        let store = std::sync::Arc::new(store);
        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .upload("alice", &format!("{i}.png"), Bytes::from(vec![0u8; i]))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let listing = store
            .list("alice", request(1, 100, true, SortKey::Name))
            .await
            .unwrap();
        assert_eq!(listing.total, 16);
    }
}
