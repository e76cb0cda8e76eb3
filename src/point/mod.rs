//! The point file (`CPF`): per-shot arrays of post-processed returns.

mod file;

pub use file::{OpenMode, PointFile};

use crate::bitstream::{bit_width, BitReader, BitWriter};
use crate::channel::Channel;
use crate::constants::{
    CHANNELS, CLASSIFICATION_BITS, CUBE_DETECTION_INDEX_BITS, DETECTION_INDEX_BITS, ELEVATION_BITS,
    ELEVATION_SCALE, ENERGY_BITS, ENERGY_SCALE, FILTER_REASON_BITS, INFRARED_CHANNEL,
    INTEREST_POINT_SCALE, KD_BITS, KD_SCALE, LATLON_BITS, LATLON_DIFF_BITS, LATLON_DIFF_SCALE,
    LATLON_SCALE, MAX_RETURNS, OFF_NADIR_BITS, PROBABILITY_BITS, PROBABILITY_SCALE,
    PROCESSING_MODE_BITS, REFLECTANCE_BITS, REFLECTANCE_SCALE, STATUS_BITS, TIME_OFFSET_BITS,
    UNCERTAINTY_BITS, UNCERTAINTY_SCALE,
};
use crate::error::{Error, Result};
use crate::scale;

/// One digitized return: a detected surface or sub-surface reflection
/// within a channel's waveform.
#[derive(Clone, Debug, PartialEq)]
pub struct Return {
    /// Latitude offset from the shot's reference position, in degrees.
    pub latitude_diff_degrees: f64,
    /// Longitude offset from the shot's reference position, in degrees.
    pub longitude_diff_degrees: f64,
    /// Elevation, in meters, or `None` if this return has no elevation
    /// solution.
    pub elevation_meters: Option<f64>,
    /// Reflectance estimate.
    pub reflectance: f64,
    /// Horizontal positional uncertainty, in meters.
    pub horizontal_uncertainty_meters: f64,
    /// Vertical positional uncertainty, in meters.
    pub vertical_uncertainty_meters: f64,
    /// Opaque per-return status bits, interpreted by the processing and
    /// editing applications.
    pub status: u8,
    /// The point classification code.
    pub classification: u8,
    /// The detected interest point (confidence) value.
    pub interest_point: f64,
    /// Whether this return was judged to lie above the water surface.
    /// Earlier format revisions encoded this bit with two different,
    /// mutually exclusive meanings depending on file version; this crate
    /// always presents the resolved boolean.
    pub is_non_water_surface: bool,
    /// Detection probability.
    pub probability: f64,
    /// Why this return was filtered, `0` meaning "not filtered."
    pub filter_reason: u8,
    /// This return's index within CUBE's detection output, if any.
    pub detection_index: u16,
}

/// A bare-earth solution computed for one of the seven shallow channels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BareEarth {
    /// Latitude offset from the shot's reference position, in degrees.
    pub latitude_diff_degrees: f64,
    /// Longitude offset from the shot's reference position, in degrees.
    pub longitude_diff_degrees: f64,
    /// Bare-earth elevation, in meters.
    pub elevation_meters: f64,
}

/// One point-file record: a shot's reference position and per-channel
/// return arrays.
#[derive(Clone, Debug)]
pub struct PointRecord {
    /// Microseconds since the file's start timestamp.
    pub time_offset_micros: u32,
    /// The shot's off-nadir angle, in degrees.
    pub off_nadir_angle_degrees: f64,
    /// The shot's reference latitude, in degrees (absolute).
    pub reference_latitude_degrees: f64,
    /// The shot's reference longitude, in degrees (absolute).
    pub reference_longitude_degrees: f64,
    /// Estimated water-surface elevation, in meters.
    pub water_level_elevation_meters: f64,
    /// Offset applied for the file's local vertical datum, in meters.
    pub local_vertical_datum_offset_meters: f64,
    /// Opaque per-shot user data, passed through unchanged.
    pub user_data: u8,
    /// Per-channel return arrays, shallow[0..7], infrared, deep.
    pub returns: [Vec<Return>; CHANNELS],
    /// Per-shallow-channel bare-earth solutions, if computed.
    pub bare_earth: [Option<BareEarth>; INFRARED_CHANNEL],
    /// Diffuse attenuation coefficient estimated for this shot.
    pub kd: f64,
    /// Laser output energy for this shot.
    pub laser_energy: f64,
    /// The trigger (T0) waveform's interest point.
    pub trigger_interest_point: f64,
    /// Per-channel processing-mode code.
    pub processing_mode: [u8; CHANNELS],
    /// This shot's index within CUBE's detection output, if any.
    pub cube_detection_index: u16,
}

fn write_return(
    writer: &mut BitWriter,
    r: &Return,
    reference_latitude_degrees: f64,
) -> Result<()> {
    let diff_offset = (1u64 << LATLON_DIFF_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(r.latitude_diff_degrees, LATLON_DIFF_SCALE, diff_offset, LATLON_DIFF_BITS)?,
        LATLON_DIFF_BITS,
    )?;
    writer.write_bits(
        scale::encode_longitude_diff(r.longitude_diff_degrees, reference_latitude_degrees, LATLON_DIFF_SCALE, diff_offset, LATLON_DIFF_BITS)?,
        LATLON_DIFF_BITS,
    )?;
    match r.elevation_meters {
        Some(elevation) => {
            let offset = (1u64 << ELEVATION_BITS) as f64 / 2.0;
            let code = scale::encode(elevation, ELEVATION_SCALE, offset, ELEVATION_BITS)?;
            writer.write_bits(code, ELEVATION_BITS)?;
        }
        None => writer.write_bits(scale::null_code(ELEVATION_BITS), ELEVATION_BITS)?,
    }
    writer.write_bits(scale::encode(r.reflectance, REFLECTANCE_SCALE, 0.0, REFLECTANCE_BITS)?, REFLECTANCE_BITS)?;
    writer.write_bits(
        scale::encode(r.horizontal_uncertainty_meters, UNCERTAINTY_SCALE, 0.0, UNCERTAINTY_BITS)?,
        UNCERTAINTY_BITS,
    )?;
    writer.write_bits(
        scale::encode(r.vertical_uncertainty_meters, UNCERTAINTY_SCALE, 0.0, UNCERTAINTY_BITS)?,
        UNCERTAINTY_BITS,
    )?;
    writer.write_bits(r.status as u64, STATUS_BITS)?;
    writer.write_bits(r.classification as u64, CLASSIFICATION_BITS)?;
    writer.write_bits(scale::encode(r.interest_point, INTEREST_POINT_SCALE, 0.0, 16)?, 16)?;
    writer.write_bits(r.is_non_water_surface as u64, 1)?;
    Ok(())
}

fn read_return(reader: &mut BitReader, reference_latitude_degrees: f64) -> Result<Return> {
    let diff_offset = (1u64 << LATLON_DIFF_BITS) as f64 / 2.0;
    let latitude_diff_degrees = scale::decode(reader.read_bits(LATLON_DIFF_BITS)?, LATLON_DIFF_SCALE, diff_offset);
    let longitude_diff_degrees = scale::decode_longitude_diff(
        reader.read_bits(LATLON_DIFF_BITS)?,
        reference_latitude_degrees,
        LATLON_DIFF_SCALE,
        diff_offset,
    );
    let elevation_code = reader.read_bits(ELEVATION_BITS)?;
    let elevation_meters = if elevation_code == scale::null_code(ELEVATION_BITS) {
        None
    } else {
        let offset = (1u64 << ELEVATION_BITS) as f64 / 2.0;
        Some(scale::decode(elevation_code, ELEVATION_SCALE, offset))
    };
    let reflectance = scale::decode(reader.read_bits(REFLECTANCE_BITS)?, REFLECTANCE_SCALE, 0.0);
    let horizontal_uncertainty_meters = scale::decode(reader.read_bits(UNCERTAINTY_BITS)?, UNCERTAINTY_SCALE, 0.0);
    let vertical_uncertainty_meters = scale::decode(reader.read_bits(UNCERTAINTY_BITS)?, UNCERTAINTY_SCALE, 0.0);
    let status = reader.read_bits(STATUS_BITS)? as u8;
    let classification = reader.read_bits(CLASSIFICATION_BITS)? as u8;
    let interest_point = scale::decode(reader.read_bits(16)?, INTEREST_POINT_SCALE, 0.0);
    let is_non_water_surface = reader.read_bits(1)? == 1;
    Ok(Return {
        latitude_diff_degrees,
        longitude_diff_degrees,
        elevation_meters,
        reflectance,
        horizontal_uncertainty_meters,
        vertical_uncertainty_meters,
        status,
        classification,
        interest_point,
        is_non_water_surface,
        probability: 0.0,
        filter_reason: 0,
        detection_index: 0,
    })
}

/// Encodes `record`'s body (everything after the leading record-size
/// field) into `buffer`, returning the number of bytes written.
pub fn encode_body(record: &PointRecord, buffer: &mut [u8]) -> Result<usize> {
    for returns in &record.returns {
        if returns.len() > MAX_RETURNS {
            return Err(Error::TooManyReturns { found: returns.len(), max: MAX_RETURNS });
        }
    }

    let mut writer = BitWriter::new(buffer);
    let count_bits = bit_width(MAX_RETURNS as u64);
    for returns in &record.returns {
        writer.write_bits(returns.len() as u64, count_bits)?;
    }

    writer.write_bits(record.time_offset_micros as u64, TIME_OFFSET_BITS)?;
    let angle_offset = (1u64 << OFF_NADIR_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(record.off_nadir_angle_degrees, crate::constants::ANGLE_SCALE, angle_offset, OFF_NADIR_BITS)?,
        OFF_NADIR_BITS,
    )?;
    writer.write_bits(
        scale::encode(record.reference_latitude_degrees, LATLON_SCALE, (1u64 << LATLON_BITS) as f64 / 2.0, LATLON_BITS)?,
        LATLON_BITS,
    )?;
    writer.write_bits(
        scale::encode(record.reference_longitude_degrees, LATLON_SCALE, (1u64 << LATLON_BITS) as f64 / 2.0, LATLON_BITS)?,
        LATLON_BITS,
    )?;
    writer.write_bits(
        scale::encode(record.water_level_elevation_meters, ELEVATION_SCALE, (1u64 << ELEVATION_BITS) as f64 / 2.0, ELEVATION_BITS)?,
        ELEVATION_BITS,
    )?;
    writer.write_bits(
        scale::encode(
            record.local_vertical_datum_offset_meters,
            ELEVATION_SCALE,
            (1u64 << ELEVATION_BITS) as f64 / 2.0,
            ELEVATION_BITS,
        )?,
        ELEVATION_BITS,
    )?;
    writer.write_bits(record.user_data as u64, 8)?;

    let reference_latitude = record.reference_latitude_degrees;
    for returns in &record.returns {
        for r in returns {
            write_return(&mut writer, r, reference_latitude)?;
        }
    }

    let bare_earth_offset = (1u64 << LATLON_DIFF_BITS) as f64 / 2.0;
    let elevation_offset = (1u64 << ELEVATION_BITS) as f64 / 2.0;
    for bare_earth in &record.bare_earth {
        match bare_earth {
            Some(be) => {
                writer.write_bits(scale::encode(be.latitude_diff_degrees, LATLON_DIFF_SCALE, bare_earth_offset, LATLON_DIFF_BITS)?, LATLON_DIFF_BITS)?;
                writer.write_bits(
                    scale::encode_longitude_diff(be.longitude_diff_degrees, reference_latitude, LATLON_DIFF_SCALE, bare_earth_offset, LATLON_DIFF_BITS)?,
                    LATLON_DIFF_BITS,
                )?;
                writer.write_bits(scale::encode(be.elevation_meters, ELEVATION_SCALE, elevation_offset, ELEVATION_BITS)?, ELEVATION_BITS)?;
            }
            None => {
                writer.write_bits(scale::null_code(LATLON_DIFF_BITS), LATLON_DIFF_BITS)?;
                writer.write_bits(scale::null_code(LATLON_DIFF_BITS), LATLON_DIFF_BITS)?;
                writer.write_bits(scale::null_code(ELEVATION_BITS), ELEVATION_BITS)?;
            }
        }
    }

    writer.write_bits(scale::encode(record.kd, KD_SCALE, 0.0, KD_BITS)?, KD_BITS)?;
    writer.write_bits(scale::encode(record.laser_energy, ENERGY_SCALE, 0.0, ENERGY_BITS)?, ENERGY_BITS)?;
    writer.write_bits(scale::encode(record.trigger_interest_point, INTEREST_POINT_SCALE, 0.0, 16)?, 16)?;

    for mode in &record.processing_mode {
        writer.write_bits(*mode as u64, PROCESSING_MODE_BITS)?;
    }
    for returns in &record.returns {
        for r in returns {
            writer.write_bits(scale::encode(r.probability, PROBABILITY_SCALE, 0.0, PROBABILITY_BITS)?, PROBABILITY_BITS)?;
            writer.write_bits(r.filter_reason as u64, FILTER_REASON_BITS)?;
        }
    }

    writer.write_bits(record.cube_detection_index as u64, CUBE_DETECTION_INDEX_BITS)?;
    for returns in &record.returns {
        for r in returns {
            writer.write_bits(r.detection_index as u64, DETECTION_INDEX_BITS)?;
        }
    }

    Ok(writer.byte_len())
}

/// Decodes a point record's body from `buffer`.
pub fn decode_body(buffer: &[u8]) -> Result<PointRecord> {
    let mut reader = BitReader::new(buffer);
    let count_bits = bit_width(MAX_RETURNS as u64);
    let mut counts = [0usize; CHANNELS];
    for count in counts.iter_mut() {
        *count = reader.read_bits(count_bits)? as usize;
    }

    let time_offset_micros = reader.read_bits(TIME_OFFSET_BITS)? as u32;
    let angle_offset = (1u64 << OFF_NADIR_BITS) as f64 / 2.0;
    let off_nadir_angle_degrees = scale::decode(reader.read_bits(OFF_NADIR_BITS)?, crate::constants::ANGLE_SCALE, angle_offset);
    let reference_latitude_degrees = scale::decode(reader.read_bits(LATLON_BITS)?, LATLON_SCALE, (1u64 << LATLON_BITS) as f64 / 2.0);
    let reference_longitude_degrees = scale::decode(reader.read_bits(LATLON_BITS)?, LATLON_SCALE, (1u64 << LATLON_BITS) as f64 / 2.0);
    let water_level_elevation_meters = scale::decode(reader.read_bits(ELEVATION_BITS)?, ELEVATION_SCALE, (1u64 << ELEVATION_BITS) as f64 / 2.0);
    let local_vertical_datum_offset_meters =
        scale::decode(reader.read_bits(ELEVATION_BITS)?, ELEVATION_SCALE, (1u64 << ELEVATION_BITS) as f64 / 2.0);
    let user_data = reader.read_bits(8)? as u8;

    let mut returns: [Vec<Return>; CHANNELS] = std::array::from_fn(|_| Vec::new());
    for (channel_index, count) in counts.iter().enumerate() {
        for _ in 0..*count {
            returns[channel_index].push(read_return(&mut reader, reference_latitude_degrees)?);
        }
    }

    let mut bare_earth: [Option<BareEarth>; INFRARED_CHANNEL] = [None; INFRARED_CHANNEL];
    for slot in bare_earth.iter_mut() {
        let lat_code = reader.read_bits(LATLON_DIFF_BITS)?;
        let lon_code = reader.read_bits(LATLON_DIFF_BITS)?;
        let elev_code = reader.read_bits(ELEVATION_BITS)?;
        if elev_code != scale::null_code(ELEVATION_BITS) {
            let diff_offset = (1u64 << LATLON_DIFF_BITS) as f64 / 2.0;
            let elevation_offset = (1u64 << ELEVATION_BITS) as f64 / 2.0;
            *slot = Some(BareEarth {
                latitude_diff_degrees: scale::decode(lat_code, LATLON_DIFF_SCALE, diff_offset),
                longitude_diff_degrees: scale::decode_longitude_diff(lon_code, reference_latitude_degrees, LATLON_DIFF_SCALE, diff_offset),
                elevation_meters: scale::decode(elev_code, ELEVATION_SCALE, elevation_offset),
            });
        }
    }

    let kd = scale::decode(reader.read_bits(KD_BITS)?, KD_SCALE, 0.0);
    let laser_energy = scale::decode(reader.read_bits(ENERGY_BITS)?, ENERGY_SCALE, 0.0);
    let trigger_interest_point = scale::decode(reader.read_bits(16)?, INTEREST_POINT_SCALE, 0.0);

    let mut processing_mode = [0u8; CHANNELS];
    for mode in processing_mode.iter_mut() {
        *mode = reader.read_bits(PROCESSING_MODE_BITS)? as u8;
    }
    for (channel_index, count) in counts.iter().enumerate() {
        for i in 0..*count {
            let probability = scale::decode(reader.read_bits(PROBABILITY_BITS)?, PROBABILITY_SCALE, 0.0);
            let filter_reason = reader.read_bits(FILTER_REASON_BITS)? as u8;
            returns[channel_index][i].probability = probability;
            returns[channel_index][i].filter_reason = filter_reason;
        }
    }

    let cube_detection_index = reader.read_bits(CUBE_DETECTION_INDEX_BITS)? as u16;
    for (channel_index, count) in counts.iter().enumerate() {
        for i in 0..*count {
            returns[channel_index][i].detection_index = reader.read_bits(DETECTION_INDEX_BITS)? as u16;
        }
    }

    Ok(PointRecord {
        time_offset_micros,
        off_nadir_angle_degrees,
        reference_latitude_degrees,
        reference_longitude_degrees,
        water_level_elevation_meters,
        local_vertical_datum_offset_meters,
        user_data,
        returns,
        bare_earth,
        kd,
        laser_energy,
        trigger_interest_point,
        processing_mode,
        cube_detection_index,
    })
}

/// Returns the return array for `channel`.
pub fn returns_for<'a>(record: &'a PointRecord, channel: Channel) -> &'a [Return] {
    &record.returns[channel.as_index()]
}
