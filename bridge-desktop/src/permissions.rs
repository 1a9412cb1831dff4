use bridge_traits::permissions::PermissionProvider;

/// Permission answers fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    pub audio: bool,
    pub images: bool,
    pub scoped_media: bool,
}

impl StaticPermissions {
    /// Everything granted; the usual desktop situation.
    pub fn granted() -> Self {
        Self {
            audio: true,
            images: true,
            scoped_media: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            audio: false,
            images: false,
            scoped_media: true,
        }
    }
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self::granted()
    }
}

impl PermissionProvider for StaticPermissions {
    fn has_audio_permission(&self) -> bool {
        self.audio
    }

    fn has_image_permission(&self) -> bool {
        self.images
    }

    fn uses_scoped_media_permissions(&self) -> bool {
        self.scoped_media
    }
}
