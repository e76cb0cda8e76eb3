//! The trajectory file (`CSF`): one fixed-length smoothed best-estimated
//! trajectory sample per shot.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bitstream::{BitReader, BitWriter};
use crate::constants::{
    CHANNELS, CSF_ALTITUDE_BITS, CSF_ATTITUDE_BITS, CSF_ATTITUDE_SCALE, CSF_HEADING_BITS,
    CSF_INTENSITY_BITS, CSF_INTENSITY_SCALE, CSF_LATLON_BITS, CSF_RANGE_BITS, CSF_RANGE_SCALE,
    ELEVATION_SCALE, LATLON_DIFF_SCALE, OFF_NADIR_BITS, TIME_OFFSET_BITS,
};
use crate::error::{Error, Result};
use crate::header::{FileKind, Header};
use crate::manager;
use crate::scale;

/// One smoothed best-estimated trajectory sample.
#[derive(Clone, Debug, PartialEq)]
pub struct TrajectoryRecord {
    /// Microseconds since the file's start timestamp.
    pub time_offset_micros: u32,
    /// The platform's scan/off-nadir angle at this sample, in degrees.
    pub scan_angle_degrees: f64,
    /// Latitude offset from the header's base position, in degrees.
    pub latitude_offset_degrees: f64,
    /// Longitude offset from the header's base position, in degrees.
    pub longitude_offset_degrees: f64,
    /// Platform altitude, in meters.
    pub altitude_meters: f64,
    /// Platform roll, in degrees.
    pub roll_degrees: f64,
    /// Platform pitch, in degrees.
    pub pitch_degrees: f64,
    /// Platform heading, in degrees.
    pub heading_degrees: f64,
    /// Per-channel slant range, in meters.
    pub range_meters: [f64; CHANNELS],
    /// Per-channel slant range measured from the water surface, in meters.
    pub range_in_water_meters: [f64; CHANNELS],
    /// Per-channel return intensity.
    pub intensity: [f64; CHANNELS],
    /// Per-channel return intensity measured from the water surface.
    pub intensity_in_water: [f64; CHANNELS],
}

const BIAS: f64 = 0.0;

fn record_byte_len() -> usize {
    let bits = TIME_OFFSET_BITS
        + OFF_NADIR_BITS
        + 2 * CSF_LATLON_BITS
        + CSF_ALTITUDE_BITS
        + 2 * CSF_ATTITUDE_BITS
        + CSF_HEADING_BITS
        + (CHANNELS as u32) * (2 * CSF_RANGE_BITS + 2 * CSF_INTENSITY_BITS);
    bits.div_ceil(8) as usize
}

fn encode_record(record: &TrajectoryRecord, buffer: &mut [u8]) -> Result<()> {
    let mut writer = BitWriter::new(buffer);
    writer.write_bits(record.time_offset_micros as u64, TIME_OFFSET_BITS)?;
    let angle_offset = (1u64 << OFF_NADIR_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(record.scan_angle_degrees, crate::constants::ANGLE_SCALE, angle_offset, OFF_NADIR_BITS)?,
        OFF_NADIR_BITS,
    )?;
    let latlon_offset = (1u64 << CSF_LATLON_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(record.latitude_offset_degrees, LATLON_DIFF_SCALE, latlon_offset, CSF_LATLON_BITS)?,
        CSF_LATLON_BITS,
    )?;
    writer.write_bits(
        scale::encode(record.longitude_offset_degrees, LATLON_DIFF_SCALE, latlon_offset, CSF_LATLON_BITS)?,
        CSF_LATLON_BITS,
    )?;
    let altitude_offset = (1u64 << CSF_ALTITUDE_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(record.altitude_meters, ELEVATION_SCALE, altitude_offset, CSF_ALTITUDE_BITS)?,
        CSF_ALTITUDE_BITS,
    )?;
    let attitude_offset = (1u64 << CSF_ATTITUDE_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(record.roll_degrees, CSF_ATTITUDE_SCALE, attitude_offset, CSF_ATTITUDE_BITS)?,
        CSF_ATTITUDE_BITS,
    )?;
    writer.write_bits(
        scale::encode(record.pitch_degrees, CSF_ATTITUDE_SCALE, attitude_offset, CSF_ATTITUDE_BITS)?,
        CSF_ATTITUDE_BITS,
    )?;
    let heading_offset = (1u64 << CSF_HEADING_BITS) as f64 / 2.0;
    writer.write_bits(
        scale::encode(record.heading_degrees, CSF_ATTITUDE_SCALE, heading_offset, CSF_HEADING_BITS)?,
        CSF_HEADING_BITS,
    )?;
    for i in 0..CHANNELS {
        writer.write_bits(scale::encode(record.range_meters[i], CSF_RANGE_SCALE, BIAS, CSF_RANGE_BITS)?, CSF_RANGE_BITS)?;
        writer.write_bits(
            scale::encode(record.range_in_water_meters[i], CSF_RANGE_SCALE, BIAS, CSF_RANGE_BITS)?,
            CSF_RANGE_BITS,
        )?;
    }
    for i in 0..CHANNELS {
        writer.write_bits(
            scale::encode(record.intensity[i], CSF_INTENSITY_SCALE, BIAS, CSF_INTENSITY_BITS)?,
            CSF_INTENSITY_BITS,
        )?;
        writer.write_bits(
            scale::encode(record.intensity_in_water[i], CSF_INTENSITY_SCALE, BIAS, CSF_INTENSITY_BITS)?,
            CSF_INTENSITY_BITS,
        )?;
    }
    Ok(())
}

fn decode_record(buffer: &[u8]) -> Result<TrajectoryRecord> {
    let mut reader = BitReader::new(buffer);
    let time_offset_micros = reader.read_bits(TIME_OFFSET_BITS)? as u32;
    let angle_offset = (1u64 << OFF_NADIR_BITS) as f64 / 2.0;
    let scan_angle_degrees = scale::decode(reader.read_bits(OFF_NADIR_BITS)?, crate::constants::ANGLE_SCALE, angle_offset);
    let latlon_offset = (1u64 << CSF_LATLON_BITS) as f64 / 2.0;
    let latitude_offset_degrees = scale::decode(reader.read_bits(CSF_LATLON_BITS)?, LATLON_DIFF_SCALE, latlon_offset);
    let longitude_offset_degrees = scale::decode(reader.read_bits(CSF_LATLON_BITS)?, LATLON_DIFF_SCALE, latlon_offset);
    let altitude_offset = (1u64 << CSF_ALTITUDE_BITS) as f64 / 2.0;
    let altitude_meters = scale::decode(reader.read_bits(CSF_ALTITUDE_BITS)?, ELEVATION_SCALE, altitude_offset);
    let attitude_offset = (1u64 << CSF_ATTITUDE_BITS) as f64 / 2.0;
    let roll_degrees = scale::decode(reader.read_bits(CSF_ATTITUDE_BITS)?, CSF_ATTITUDE_SCALE, attitude_offset);
    let pitch_degrees = scale::decode(reader.read_bits(CSF_ATTITUDE_BITS)?, CSF_ATTITUDE_SCALE, attitude_offset);
    let heading_offset = (1u64 << CSF_HEADING_BITS) as f64 / 2.0;
    let heading_degrees = scale::decode(reader.read_bits(CSF_HEADING_BITS)?, CSF_ATTITUDE_SCALE, heading_offset);
    let mut range_meters = [0.0; CHANNELS];
    let mut range_in_water_meters = [0.0; CHANNELS];
    for i in 0..CHANNELS {
        range_meters[i] = scale::decode(reader.read_bits(CSF_RANGE_BITS)?, CSF_RANGE_SCALE, BIAS);
        range_in_water_meters[i] = scale::decode(reader.read_bits(CSF_RANGE_BITS)?, CSF_RANGE_SCALE, BIAS);
    }
    let mut intensity = [0.0; CHANNELS];
    let mut intensity_in_water = [0.0; CHANNELS];
    for i in 0..CHANNELS {
        intensity[i] = scale::decode(reader.read_bits(CSF_INTENSITY_BITS)?, CSF_INTENSITY_SCALE, BIAS);
        intensity_in_water[i] = scale::decode(reader.read_bits(CSF_INTENSITY_BITS)?, CSF_INTENSITY_SCALE, BIAS);
    }
    Ok(TrajectoryRecord {
        time_offset_micros,
        scan_angle_degrees,
        latitude_offset_degrees,
        longitude_offset_degrees,
        altitude_meters,
        roll_degrees,
        pitch_degrees,
        heading_degrees,
        range_meters,
        range_in_water_meters,
        intensity,
        intensity_in_water,
    })
}

/// How a trajectory file is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Random access by ordinal.
    ReadOnly,
    /// Forward-only access via [`TrajectoryFile::read_next`].
    ReadOnlySequential,
}

/// An open trajectory file.
pub struct TrajectoryFile {
    header: Header,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    record_len: usize,
    closed: bool,
    sequential: bool,
}

impl TrajectoryFile {
    /// Creates a new, empty trajectory file at `path`. The file is
    /// registered with the crash-cleanup registry until [`Self::close`] is
    /// called.
    pub fn create(path: impl AsRef<Path>, base_position: (f64, f64)) -> Result<TrajectoryFile> {
        let path = path.as_ref().to_path_buf();
        let header = Header::builder(FileKind::Trajectory).base_position(base_position.0, base_position.1).build();
        let mut writer = BufWriter::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::create(&path)?);
        writer.write_all(&crate::header::emit(&header)?)?;
        writer.flush()?;
        manager::register_creating(&path)?;
        log::info!("created trajectory file {}", path.display());
        Ok(TrajectoryFile {
            header,
            reader: None,
            writer: Some(writer),
            path,
            record_len: record_byte_len(),
            closed: false,
            sequential: false,
        })
    }

    /// Opens an existing trajectory file for reading. [`OpenMode::ReadOnly`]
    /// supports [`Self::read_record`] at any ordinal;
    /// [`OpenMode::ReadOnlySequential`] only supports [`Self::read_next`].
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<TrajectoryFile> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::open(&path)?);
        let mut header_buffer = vec![0u8; peek_header_size(&path)?];
        reader.read_exact(&mut header_buffer)?;
        let header = crate::header::parse(&header_buffer)?;
        if header.file_type() != FileKind::Trajectory {
            return Err(Error::NotADatasetFile(path));
        }
        Ok(TrajectoryFile {
            header,
            reader: Some(reader),
            writer: None,
            path,
            record_len: record_byte_len(),
            closed: false,
            sequential: mode == OpenMode::ReadOnlySequential,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable access to this file's header, for `add_field`/`update_field`/
    /// `delete_field`. The revised header is written out on [`Self::close`]
    /// for a handle opened with [`Self::create`]; edits made on a handle
    /// opened read-only do not persist.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Appends `record` as the sample at `ordinal`, which must equal the
    /// current record count: this format is append-only, and `ordinal` is
    /// validated as a sanity check against the caller's own bookkeeping,
    /// not used to seek. Only valid on a handle opened with [`Self::create`].
    pub fn write_record(&mut self, ordinal: u64, record: &TrajectoryRecord) -> Result<()> {
        let next = self.header.record_count();
        if ordinal != next {
            return Err(Error::OrdinalOutOfBounds { ordinal, len: next });
        }
        let writer = self.writer.as_mut().ok_or(Error::AlreadyClosed)?;
        let mut buffer = vec![0u8; self.record_len];
        encode_record(record, &mut buffer)?;
        writer.write_all(&buffer)?;
        self.header.set_record_count(next + 1);
        Ok(())
    }

    /// Reads the trajectory sample at `ordinal`. Requires a handle opened
    /// with [`OpenMode::ReadOnly`].
    pub fn read_record(&mut self, ordinal: u64) -> Result<TrajectoryRecord> {
        if self.sequential {
            return Err(Error::Inconsistent("read_record requires a handle opened with OpenMode::ReadOnly".to_string()));
        }
        if ordinal >= self.header.record_count() {
            return Err(Error::OrdinalOutOfBounds { ordinal, len: self.header.record_count() });
        }
        let reader = self.reader.as_mut().ok_or(Error::AlreadyClosed)?;
        let offset = self.header.header_size() as u64 + ordinal * self.record_len as u64;
        reader.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.record_len];
        reader.read_exact(&mut buffer)?;
        decode_record(&buffer)
    }

    /// Reads `count` consecutive samples starting at `ordinal`.
    pub fn read_record_array(&mut self, ordinal: u64, count: u64) -> Result<Vec<TrajectoryRecord>> {
        (ordinal..ordinal + count).map(|i| self.read_record(i)).collect()
    }

    /// Reads the next sample in file order, or `None` at end of file. Works
    /// on a handle opened with either [`OpenMode::ReadOnly`] or
    /// [`OpenMode::ReadOnlySequential`].
    pub fn read_next(&mut self) -> Result<Option<TrajectoryRecord>> {
        let reader = self.reader.as_mut().ok_or(Error::AlreadyClosed)?;
        let mut buffer = vec![0u8; self.record_len];
        match reader.read_exact(&mut buffer) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        decode_record(&buffer).map(Some)
    }

    /// Finalizes the file, rewriting its header with the final record
    /// count if the handle was open for create.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            let header_bytes = crate::header::emit(&self.header)?;
            let mut file = writer.get_mut();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header_bytes)?;
            file.flush()?;
            manager::finalize(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for TrajectoryFile {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("error finalizing trajectory file {}: {e}", self.path.display());
        }
    }
}

fn peek_header_size(path: &Path) -> Result<usize> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut probe = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        probe.extend_from_slice(&chunk[..read]);
        if probe.windows(b"[END OF HEADER]".len()).any(|w| w == b"[END OF HEADER]") {
            break;
        }
        if probe.len() > 1 << 20 {
            break;
        }
    }
    let text = String::from_utf8_lossy(&probe);
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("[HEADER SIZE] = ") {
            if let Ok(size) = rest.trim().parse::<usize>() {
                return Ok(size);
            }
        }
    }
    Ok(probe.len())
}
