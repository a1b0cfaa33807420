//! Abstract image store trait.
//!
//! Handlers only see [`ImageStore`]; the concrete store decides where the
//! bytes live.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use super::error::StoreError;
use super::listing::ListRequest;

/// One image returned by a listing, content included.
#[derive(Debug, Clone)]
pub struct StoredImage {
    /// Original uploaded filename.
    pub name: String,
    /// Full image content.
    pub data: Bytes,
    /// Byte length at stat time.
    pub size: u64,
    /// Last-modified time at stat time.
    pub modified: SystemTime,
}

/// A page of images plus totals for the whole bucket.
#[derive(Debug, Clone, Default)]
pub struct ImageListing {
    pub images: Vec<StoredImage>,
    /// Number of images the user has, ignoring pagination.
    pub total: usize,
    /// `ceil(total / page_size)`.
    pub page_count: usize,
}

/// Per-user image storage contract.
pub trait ImageStore: Send + Sync + 'static {
    /// Store `data` as `filename` in `user_id`'s bucket, overwriting any
    /// image of the same name.
    fn upload(
        &self,
        user_id: &str,
        filename: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Return one sorted page of `user_id`'s images.
    fn list(
        &self,
        user_id: &str,
        request: ListRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ImageListing, StoreError>> + Send + '_>>;

    /// Remove `filename` from `user_id`'s bucket.
    fn delete(
        &self,
        user_id: &str,
        filename: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Total images across all buckets divided by the bucket count; 0 when
    /// there are no buckets.
    fn average_images_per_user(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<f64, StoreError>> + Send + '_>>;
}
