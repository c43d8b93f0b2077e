use thiserror::Error;

/// Failure of a block device operation.
///
/// Argument problems carry structure so callers can fix them; device-side failures
/// are collapsed into [`StorageError::Device`] with a rendered cause. Drivers keep
/// their typed internal taxonomies (transport vs. protocol and so on) for their own
/// diagnostics; this boundary only reports that the operation failed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("buffer of {len} bytes does not cover {sector_count} sectors of {sector_size} bytes")]
    BufferSizeMismatch {
        len: usize,
        sector_count: u32,
        sector_size: u32,
    },

    #[error("sector count {sector_count} exceeds the per-command limit of {max}")]
    SectorCountTooLarge { sector_count: u32, max: u32 },

    #[error("device failed: {0}")]
    Device(String),
}
