//! Numeric constants shared by the codecs, grounded in the real system's
//! field-width and scale tables. Bit widths and scales that are themselves
//! part of a file's format-information block (and therefore can vary file
//! to file) live on [`crate::header::FormatInfo`] instead; the constants
//! here are the ones the format treats as fixed.

/// Maximum number of waveform channels per shot (7 shallow + infrared + deep).
pub const CHANNELS: usize = 9;

/// Maximum number of digitized packets per channel per shot.
pub const MAX_PACKETS: usize = 15;

/// Number of digitized samples in one waveform packet.
pub const PACKET_SAMPLES: usize = 64;

/// Maximum number of returns the point format can record per channel.
pub const MAX_RETURNS: usize = 31;

/// Index of the central shallow-water channel, used as the reference signal
/// for the waveform compressor's cross-channel difference scheme.
pub const CENTRAL_SHALLOW_CHANNEL: usize = 3;

/// Channel index of the infrared channel.
pub const INFRARED_CHANNEL: usize = 7;

/// Channel index of the deep channel.
pub const DEEP_CHANNEL: usize = 8;

/// Scale applied to scan/off-nadir angles (ten-thousandths of a degree).
pub const ANGLE_SCALE: f64 = 10_000.0;

/// Scale applied to reference and absolute latitude/longitude fields
/// (20,000ths of an arcsecond).
pub const LATLON_SCALE: f64 = 72_000_000.0;

/// Scale applied to latitude/longitude *difference* fields (10,000ths of an
/// arcsecond, before any cosine adjustment on longitude).
pub const LATLON_DIFF_SCALE: f64 = 36_000_000.0;

/// Number of bits used for a reference (absolute) latitude or longitude.
pub const LATLON_BITS: u32 = 28;

/// Number of bits used for a latitude/longitude difference field.
pub const LATLON_DIFF_BITS: u32 = 18;

/// Scale applied to elevation fields (millimeters).
pub const ELEVATION_SCALE: f64 = 1000.0;

/// Number of bits used for an elevation field.
pub const ELEVATION_BITS: u32 = 22;

/// Scale applied to horizontal/vertical uncertainty fields.
pub const UNCERTAINTY_SCALE: f64 = 1000.0;

/// Number of bits used for an uncertainty field.
pub const UNCERTAINTY_BITS: u32 = 14;

/// Scale applied to reflectance fields.
pub const REFLECTANCE_SCALE: f64 = 10_000.0;

/// Number of bits used for a reflectance field.
pub const REFLECTANCE_BITS: u32 = 14;

/// Number of bits used for a classification field.
pub const CLASSIFICATION_BITS: u32 = 8;

/// Number of bits used for a return-status bitfield.
pub const STATUS_BITS: u32 = 8;

/// Number of bits used for an off-nadir angle field.
pub const OFF_NADIR_BITS: u32 = 21;

/// Scale applied to interest-point fields.
pub const INTEREST_POINT_SCALE: f64 = 100.0;

/// Scale applied to a diffuse attenuation coefficient (Kd) field.
pub const KD_SCALE: f64 = 10_000.0;

/// Number of bits used for a Kd field.
pub const KD_BITS: u32 = 14;

/// Scale applied to laser energy fields.
pub const ENERGY_SCALE: f64 = 10_000.0;

/// Number of bits used for a laser-energy field.
pub const ENERGY_BITS: u32 = 16;

/// Scale applied to detection-probability fields.
pub const PROBABILITY_SCALE: f64 = 10_000.0;

/// Number of bits used for a detection-probability field.
pub const PROBABILITY_BITS: u32 = 14;

/// Number of bits used for a filter-reason code.
pub const FILTER_REASON_BITS: u32 = 6;

/// Number of bits used for a processing-mode code.
pub const PROCESSING_MODE_BITS: u32 = 6;

/// Number of bits used for a per-return detection index.
pub const DETECTION_INDEX_BITS: u32 = 10;

/// Number of bits used for a cube-detection index.
pub const CUBE_DETECTION_INDEX_BITS: u32 = 10;

/// Number of bits used for a waveform range field.
pub const CWF_RANGE_BITS: u32 = 10;

/// Scale applied to waveform range fields.
pub const CWF_RANGE_SCALE: f64 = 16.0;

/// Number of bits used to digitize one waveform sample.
pub const CWF_SAMPLE_BITS: u32 = 10;

/// Number of bits used for a packet index within a channel-header.
pub const CWF_PACKET_NUMBER_BITS: u32 = 7;

/// Number of bits used for the waveform compressor's scheme tag.
pub const CWF_SCHEME_TAG_BITS: u32 = 3;

/// Number of bits used for a delta width field within a compressed packet
/// header.
pub const CWF_DELTA_WIDTH_BITS: u32 = 4;

/// Number of bits used for scheme 1/2/3 start and offset fields.
pub const CWF_START_BITS: u32 = 10;

/// Number of bits used for scheme 1/2/3 delta-offset fields.
pub const CWF_OFFSET_BITS: u32 = 11;

/// Number of bits used for a shot identifier field within a CWF record.
pub const CWF_SHOT_ID_BITS: u32 = 25;

/// Number of bits used for a per-channel waveform validity-reason code.
pub const CWF_VALIDITY_BITS: u32 = 4;

/// Number of bits used for the microsecond time-offset field shared by
/// CWF, CPF, and CSF records.
pub const TIME_OFFSET_BITS: u32 = 32;

/// Number of bits used for a CSF latitude/longitude offset field.
pub const CSF_LATLON_BITS: u32 = 27;

/// Number of bits used for a CSF altitude field.
pub const CSF_ALTITUDE_BITS: u32 = 22;

/// Number of bits used for CSF roll/pitch fields.
pub const CSF_ATTITUDE_BITS: u32 = 20;

/// Number of bits used for a CSF heading field.
pub const CSF_HEADING_BITS: u32 = 22;

/// Scale applied to CSF roll/pitch/heading fields.
pub const CSF_ATTITUDE_SCALE: f64 = 10_000.0;

/// Number of bits used for a CSF per-channel range field.
pub const CSF_RANGE_BITS: u32 = 21;

/// Scale applied to CSF range fields.
pub const CSF_RANGE_SCALE: f64 = 1000.0;

/// Number of bits used for a CSF per-channel intensity field.
pub const CSF_INTENSITY_BITS: u32 = 14;

/// Scale applied to CSF intensity fields.
pub const CSF_INTENSITY_SCALE: f64 = 10_000.0;

/// Default number of bits used to store a CIF byte offset.
pub const CIF_DEFAULT_OFFSET_BITS: u32 = 40;

/// Default number of bits used to store a CIF record size.
pub const CIF_DEFAULT_SIZE_BITS: u32 = 16;

/// I/O buffer size, in bytes, used for every file handle's underlying
/// `BufReader`/`BufWriter`.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 1 << 20;

/// Amount of time, in microseconds, substituted for a shot timestamp that
/// would otherwise regress relative to the previous shot.
pub const TIME_REGRESSION_NUDGE_MICROS: i64 = 100;
