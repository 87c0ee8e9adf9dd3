#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    #[error("Cannot consume {requested} bytes, only {available} available")]
    ConsumedPastEnd { requested: usize, available: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum Ac3Error {
    #[error("Invalid AC-3 sync word. Read {0:#06X}")]
    InvalidSyncWord(u16),

    #[error("Unsupported bitstream id {0}")]
    UnsupportedBsid(u8),

    #[error("Reserved sample rate code {0}")]
    InvalidSampleRateCode(u8),

    #[error("Invalid frame size code {0}")]
    InvalidFrameSizeCode(u8),

    #[error("Reserved E-AC-3 stream type")]
    ReservedStreamType,

    #[error("Frame declares {needed} bytes, buffer holds {available}")]
    FrameTooShort { needed: usize, available: usize },

    #[error("Not enough data for an AC-3 header: {0} bytes")]
    HeaderTooShort(usize),

    #[error("CRC check failed on AC-3 frame")]
    ChecksumMismatch,
}

#[derive(thiserror::Error, Debug)]
pub enum TrueHdError {
    #[error("Invalid format_sync, Read {0:#010X}")]
    InvalidFormatSync(u32),

    #[error("Invalid audio sampling frequency code {0:#03X}")]
    InvalidSampleRate(u8),

    #[error("Invalid signature in major_sync_info. Read {0:#06X}, expected 0xB752")]
    InvalidSignature(u16),

    #[error("Invalid major_sync_info, CRC failed. Calculated {calculated:#06X}, Read {read:#06X}")]
    MajorSyncCrcMismatch { calculated: u16, read: u16 },

    #[error("Access unit nibble parity check failed. Calculated {0:#X}")]
    ParityCheckFailed(u8),

    #[error("Invalid access unit length {0}")]
    InvalidAccessUnitLength(usize),

    #[error("Not enough data for a TrueHD header: {0} bytes")]
    HeaderTooShort(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum Av1Error {
    #[error("OBU forbidden bit is set")]
    ForbiddenBit,

    #[error("OBU reserved bit is set")]
    ReservedBit,

    #[error("Reserved OBU type {0}")]
    ReservedObuType(u8),

    #[error("OBUs without a size field are not supported")]
    ObuWithoutSizeField,

    #[error("Parsing was aborted after an unsupported-input error")]
    Aborted,

    #[error("OBU size {0} exceeds the supported maximum")]
    ObuTooLarge(u64),

    #[error("leb128() value without a terminating byte")]
    UnterminatedLeb128,

    #[error("Invalid sequence profile {0}")]
    InvalidSequenceProfile(u8),

    #[error("Frame header without a preceding sequence header")]
    NoSequenceHeader,

    #[error("Truncated OBU: {0}")]
    Truncated(&'static str),
}

#[derive(thiserror::Error, Debug)]
pub enum NalError {
    #[error("NAL unit forbidden_zero_bit is set")]
    ForbiddenZeroBit,

    #[error("NAL unit is too short for its header")]
    TruncatedHeader,

    #[error("Referenced {kind} id {id} was never defined")]
    MissingParameterSet { kind: &'static str, id: u32 },

    #[error("{field} out of range: {value}")]
    ValueOutOfRange { field: &'static str, value: i64 },

    #[error("NALU size length must be 1 to 4 bytes, got {0}")]
    InvalidNaluSizeLength(u8),

    #[error("NAL unit of {size} bytes does not fit a {length} byte size prefix")]
    NaluTooLarge { size: usize, length: u8 },

    #[error("Length prefixed NAL unit overruns the frame by {0} bytes")]
    TruncatedNalUnit(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum Vc1Error {
    #[error("Only the advanced profile is supported, found profile {0}")]
    NotAdvancedProfile(u8),

    #[error("Reserved level {0}")]
    InvalidLevel(u8),

    #[error("Picture header without a preceding sequence header")]
    MissingSequenceHeader,

    #[error("Start code is followed by too little data")]
    Truncated,
}

#[derive(thiserror::Error, Debug)]
pub enum TimestampError {
    #[error("Sample rate must not be zero")]
    ZeroSampleRate,

    #[error("Invalid timecode sync bytes")]
    InvalidSyncBytes,

    #[error("Timecode digit is not BCD")]
    InvalidBcdDigit,
}
