//! Image storage engine.
//!
//! The [`backend::ImageStore`] trait is what handlers talk to.  The only
//! implementation, [`local::LocalImageStore`], keeps one directory per
//! user under a root and computes every listing live from the filesystem.

pub mod backend;
pub mod error;
pub mod listing;
pub mod local;
pub mod locks;
pub mod validation;

pub use backend::{ImageListing, ImageStore, StoredImage};
pub use error::{Rejection, StoreError};
pub use listing::{ListRequest, SortKey};
pub use local::LocalImageStore;
