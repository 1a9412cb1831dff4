//! Permission checks.
//!
//! The scanner asks before it reads. A missing capability is reported as
//! `PermissionDenied` instead of an empty library, so callers can tell
//! "no songs" from "can't look".

/// Host capability checks.
///
/// # Platform Notes
///
/// - **Android**: `READ_MEDIA_AUDIO` / `READ_MEDIA_IMAGES` on API 33+,
///   `READ_EXTERNAL_STORAGE` before that
/// - **Desktop**: usually always granted
#[cfg_attr(test, mockall::automock)]
pub trait PermissionProvider: Send + Sync {
    /// Whether the audio index may be read.
    fn has_audio_permission(&self) -> bool;

    /// Whether image files next to the audio may be read.
    fn has_image_permission(&self) -> bool;

    /// Whether the platform splits media permissions by type, making folder
    /// cover lookup depend on [`has_image_permission`](Self::has_image_permission).
    fn uses_scoped_media_permissions(&self) -> bool {
        false
    }
}
