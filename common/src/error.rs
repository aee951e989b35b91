use thiserror::Error;

/// Failure code reported by a raw block device. Mirrors the integer status
/// returned by platform flash drivers, where `0` means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("block device error code {0}")]
pub struct DeviceError(pub i32);

/// The flash window or its block sizes could not be established. Any of
/// these leaves the store in RAM-only mode for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("flash limits unavailable (start 0x{start_address:08X}, available {available_size} bytes)")]
    GeometryUnavailable {
        start_address: u32,
        available_size: u32,
    },

    #[error("flash sector size unavailable")]
    InvalidSectorSize,

    #[error("invalid block sizes (program {program_size}, erase {erase_size})")]
    InvalidBlockSizes { program_size: u32, erase_size: u32 },

    #[error("not enough flash for settings (need {needed} bytes, have {available})")]
    InsufficientSpace { needed: u32, available: u32 },

    #[error("failed to open block device: {0}")]
    OpenFailed(DeviceError),
}

/// A block-device call was rejected before or while touching the flash.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("{op} at offset {offset} len {len} is not aligned to {unit} bytes")]
    Misaligned {
        op: &'static str,
        offset: u32,
        len: u32,
        unit: u32,
    },

    #[error("{op} at offset {offset} len {len} exceeds region of {size} bytes")]
    OutOfBounds {
        op: &'static str,
        offset: u32,
        len: u32,
        size: u32,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Reasons a stored record is not trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record truncated ({len} of {expected} bytes)")]
    Truncated { len: usize, expected: usize },

    #[error("bad magic 0x{found:08X}")]
    BadMagic { found: u32 },

    #[error("schema version {found}, expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },

    #[error("checksum 0x{stored:04X} does not match computed 0x{computed:04X}")]
    ChecksumMismatch { stored: u16, computed: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("persistence disabled for this session")]
    PersistenceUnavailable,

    #[error("stored record absent or corrupt: {0}")]
    RecordAbsentOrCorrupt(#[from] RecordError),

    #[error("flash read failed: {0}")]
    ReadFailed(RegionError),

    #[error("flash erase failed: {0}")]
    EraseFailed(RegionError),

    #[error("flash program failed: {0}")]
    ProgramFailed(RegionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("unknown settings field '{0}'")]
    UnknownField(String),

    #[error("field {field} expects a {expected} value")]
    KindMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field {0} does not start a schedule point")]
    NotScheduleHour(&'static str),
}
