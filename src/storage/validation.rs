//! Upload validation.
//!
//! The image type check is a pluggable [`ImageValidator`] so a stricter
//! content-sniffing implementation can replace the extension allow-list
//! without touching the upload flow.  Path-component checks guard the
//! `root/<user>/<filename>` join against traversal.

use super::error::Rejection;

/// Extensions accepted by [`ExtensionAllowList::default`].
pub const DEFAULT_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Decides whether an uploaded file is an acceptable image.
pub trait ImageValidator: Send + Sync + 'static {
    /// Return `true` if `filename` (with content `data`) may be stored.
    fn is_allowed(&self, filename: &str, data: &[u8]) -> bool;
}

/// Accepts files whose extension is in a fixed, case-sensitive list.
#[derive(Debug, Clone)]
pub struct ExtensionAllowList {
    extensions: Vec<String>,
}

impl ExtensionAllowList {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for ExtensionAllowList {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().copied())
    }
}

impl ImageValidator for ExtensionAllowList {
    fn is_allowed(&self, filename: &str, _data: &[u8]) -> bool {
        let ext = extension(filename);
        self.extensions.iter().any(|allowed| allowed == ext)
    }
}

/// Substring after the last `.`; the whole name when there is no dot.
pub fn extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext,
        None => filename,
    }
}

/// Validate a user ID used as a bucket directory name.
///
/// Names starting with `.` are reserved for engine-internal directories.
pub fn check_user_id(user_id: &str) -> Result<(), Rejection> {
    if user_id.is_empty() {
        return Err(Rejection::MissingUser);
    }
    if !is_single_component(user_id) || user_id.starts_with('.') {
        return Err(Rejection::InvalidUser);
    }
    Ok(())
}

/// Validate a filename used inside a bucket.
pub fn check_filename(filename: &str) -> Result<(), Rejection> {
    if !is_single_component(filename) {
        return Err(Rejection::InvalidFileName);
    }
    Ok(())
}

fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
