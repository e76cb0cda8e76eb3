use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::header::{FileKind, Header};
use crate::index::IndexFile;
use crate::manager;

use super::{decode_body, encode_body, PointRecord};

/// How a point file is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Random access by ordinal, consulting (and regenerating, if needed)
    /// the index file.
    ReadOnly,
    /// Forward-only access via [`PointFile::read_next`]. The index file is
    /// never opened or regenerated.
    ReadOnlySequential,
    /// Read access plus [`PointFile::update_record`] and
    /// [`PointFile::update_return_status`].
    Update,
}

/// An open point file.
pub struct PointFile {
    header: Header,
    reader: Option<BufReader<File>>,
    append_writer: Option<BufWriter<File>>,
    update_file: Option<File>,
    index: Option<IndexFile>,
    path: PathBuf,
    creating: bool,
    closed: bool,
    sequential: bool,
}

impl PointFile {
    /// Creates a new point file at `path`, appending `CPF` records in
    /// lockstep with an index file that was created alongside an existing
    /// waveform file at `cif_path`.
    pub fn create(path: impl AsRef<Path>, cif_path: impl AsRef<Path>, base_position: (f64, f64)) -> Result<PointFile> {
        let path = path.as_ref().to_path_buf();
        let header = Header::builder(FileKind::Point).base_position(base_position.0, base_position.1).build();
        let mut writer = BufWriter::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::create(&path)?);
        writer.write_all(&crate::header::emit(&header)?)?;
        writer.flush()?;
        manager::register_creating(&path)?;
        let index = IndexFile::open(&cif_path)?;
        log::info!("created point file {}", path.display());
        Ok(PointFile {
            header,
            reader: None,
            append_writer: Some(writer),
            update_file: None,
            index: Some(index),
            path,
            creating: true,
            closed: false,
            sequential: false,
        })
    }

    /// Opens an existing point file. [`OpenMode::ReadOnly`] and
    /// [`OpenMode::Update`] consult (and transparently regenerate, if
    /// necessary) its index file and peer waveform file;
    /// [`OpenMode::ReadOnlySequential`] skips the index entirely and only
    /// supports [`Self::read_next`].
    pub fn open(path: impl AsRef<Path>, cif_path: impl AsRef<Path>, cwf_path: impl AsRef<Path>, mode: OpenMode) -> Result<PointFile> {
        let path = path.as_ref().to_path_buf();
        let mut header_reader = BufReader::new(File::open(&path)?);
        let mut header_buffer = vec![0u8; peek_header_size(&mut header_reader)?];
        header_reader.seek(SeekFrom::Start(0))?;
        header_reader.read_exact(&mut header_buffer)?;
        let header = crate::header::parse(&header_buffer)?;
        if header.file_type() != FileKind::Point {
            return Err(Error::NotADatasetFile(path));
        }
        let sequential = mode == OpenMode::ReadOnlySequential;
        let index = if sequential { None } else { Some(IndexFile::open_or_regenerate(&cif_path, cwf_path, &path)?) };

        let (mut reader, update_file) = match mode {
            OpenMode::ReadOnly | OpenMode::ReadOnlySequential => {
                (Some(BufReader::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::open(&path)?)), None)
            }
            OpenMode::Update => (
                Some(BufReader::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::open(&path)?)),
                Some(OpenOptions::new().read(true).write(true).open(&path)?),
            ),
        };
        if let Some(reader) = reader.as_mut() {
            reader.seek(SeekFrom::Start(header_buffer.len() as u64))?;
        }

        Ok(PointFile {
            header,
            reader,
            append_writer: None,
            update_file,
            index,
            path,
            creating: false,
            closed: false,
            sequential,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable access to this file's header, for `add_field`/`update_field`/
    /// `delete_field`. The revised header is written out on [`Self::close`]
    /// for a handle opened with [`Self::create`]; edits made on a handle
    /// opened with [`Self::open`] do not persist.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// The number of shots recorded so far.
    pub fn len(&self) -> u64 {
        self.header.record_count()
    }

    /// True if no records have been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `record` at `ordinal`: appends it if `ordinal` is the next
    /// free slot, or rewrites the existing record at `ordinal` in place if
    /// its new encoded length matches the stored one. Only valid on a
    /// handle opened with [`Self::create`]. Unlike [`Self::update_record`],
    /// this replaces the entire record, including position and elevation.
    pub fn write_record(&mut self, ordinal: u64, record: &PointRecord) -> Result<()> {
        let next = self.header.record_count();
        match ordinal.cmp(&next) {
            std::cmp::Ordering::Equal => {
                let writer = self.append_writer.as_mut().ok_or(Error::AlreadyClosed)?;
                let offset = writer.stream_position()?;
                let mut body = vec![0u8; estimate_body_len(record)];
                let body_len = encode_body(record, &mut body)?;
                let total_len = body_len + 4;
                writer.write_u32::<LittleEndian>(total_len as u32)?;
                writer.write_all(&body[..body_len])?;

                let index = self.index.as_mut().ok_or(Error::AlreadyClosed)?;
                index.set_point(ordinal, offset, total_len as u32)?;
                self.header.set_record_count(ordinal + 1);
                Ok(())
            }
            std::cmp::Ordering::Less => {
                let index_record =
                    self.index.as_ref().ok_or(Error::AlreadyClosed)?.get(ordinal).ok_or(Error::OrdinalOutOfBounds { ordinal, len: next })?;
                let writer = self.append_writer.as_mut().ok_or(Error::AlreadyClosed)?;
                let mut body = vec![0u8; (index_record.cpf_size as usize - 4).max(estimate_body_len(record))];
                let body_len = encode_body(record, &mut body)?;
                if body_len + 4 != index_record.cpf_size as usize {
                    return Err(Error::Inconsistent(
                        "write_record's in-place rewrite produced a different encoded length than the stored record".to_string(),
                    ));
                }
                let resume_at = writer.stream_position()?;
                writer.seek(SeekFrom::Start(index_record.cpf_offset + 4))?;
                writer.write_all(&body[..body_len])?;
                writer.seek(SeekFrom::Start(resume_at))?;
                Ok(())
            }
            std::cmp::Ordering::Greater => Err(Error::OrdinalOutOfBounds { ordinal, len: next }),
        }
    }

    /// Reads the point record at `ordinal`. Requires a handle opened with
    /// [`OpenMode::ReadOnly`] or [`OpenMode::Update`].
    pub fn read_record(&mut self, ordinal: u64) -> Result<PointRecord> {
        let index = self.index.as_ref().ok_or(Error::AlreadyClosed)?;
        let index_record = index.get(ordinal).ok_or(Error::OrdinalOutOfBounds { ordinal, len: index.len() })?;
        let reader = self.reader.as_mut().ok_or(Error::AlreadyClosed)?;
        reader.seek(SeekFrom::Start(index_record.cpf_offset + 4))?;
        let mut buffer = vec![0u8; index_record.cpf_size as usize - 4];
        reader.read_exact(&mut buffer)?;
        decode_body(&buffer)
    }

    /// Reads `count` consecutive records starting at `ordinal`.
    pub fn read_record_array(&mut self, ordinal: u64, count: u64) -> Result<Vec<PointRecord>> {
        (ordinal..ordinal + count).map(|i| self.read_record(i)).collect()
    }

    /// Reads the next record in file order, or `None` at end of file.
    /// Works on a handle opened with [`OpenMode::ReadOnly`],
    /// [`OpenMode::ReadOnlySequential`], or [`OpenMode::Update`]; never
    /// consults the index.
    pub fn read_next(&mut self) -> Result<Option<PointRecord>> {
        let reader = self.reader.as_mut().ok_or(Error::AlreadyClosed)?;
        let total_len = match reader.read_u32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut buffer = vec![0u8; total_len as usize - 4];
        reader.read_exact(&mut buffer)?;
        decode_body(&buffer).map(Some)
    }

    /// Overwrites the modifiable fields of the record at `ordinal` in
    /// place: `kd`, `laser_energy`, `trigger_interest_point`, the
    /// bare-earth solutions, and, per return, reflectance, uncertainty,
    /// status, classification, interest point, probability, filter reason,
    /// and detection index. Position and elevation fields are left
    /// untouched, since recomputing them from caller-supplied floats would
    /// risk aliasing drift against the originally digitized geometry.
    ///
    /// Returns [`Error::Inconsistent`] if `record`'s per-channel return
    /// counts do not match the stored record's, since that would change
    /// the record's encoded length.
    pub fn update_record(&mut self, ordinal: u64, record: &PointRecord) -> Result<()> {
        let mut stored = self.read_record(ordinal)?;
        for (channel_index, returns) in record.returns.iter().enumerate() {
            if returns.len() != stored.returns[channel_index].len() {
                return Err(Error::Inconsistent(format!(
                    "update_record cannot change channel {channel_index}'s return count from {} to {}",
                    stored.returns[channel_index].len(),
                    returns.len()
                )));
            }
            for (i, r) in returns.iter().enumerate() {
                let target = &mut stored.returns[channel_index][i];
                target.reflectance = r.reflectance;
                target.horizontal_uncertainty_meters = r.horizontal_uncertainty_meters;
                target.vertical_uncertainty_meters = r.vertical_uncertainty_meters;
                target.status = r.status;
                target.classification = r.classification;
                target.interest_point = r.interest_point;
                target.is_non_water_surface = r.is_non_water_surface;
                target.probability = r.probability;
                target.filter_reason = r.filter_reason;
                target.detection_index = r.detection_index;
            }
        }
        stored.bare_earth = record.bare_earth;
        stored.kd = record.kd;
        stored.laser_energy = record.laser_energy;
        stored.trigger_interest_point = record.trigger_interest_point;
        stored.processing_mode = record.processing_mode;
        stored.cube_detection_index = record.cube_detection_index;
        self.rewrite_in_place(ordinal, &stored)
    }

    /// A narrower update covering only status, classification, filter
    /// reason, and user data for one return, for editing applications that
    /// only revise those fields.
    pub fn update_return_status(
        &mut self,
        ordinal: u64,
        channel: Channel,
        return_index: usize,
        status: u8,
        classification: u8,
        filter_reason: u8,
        user_data: u8,
    ) -> Result<()> {
        let mut stored = self.read_record(ordinal)?;
        let returns = &mut stored.returns[channel.as_index()];
        let target = returns
            .get_mut(return_index)
            .ok_or_else(|| Error::Inconsistent(format!("no return {return_index} on channel {}", channel.as_index())))?;
        target.status = status;
        target.classification = classification;
        target.filter_reason = filter_reason;
        stored.user_data = user_data;
        self.rewrite_in_place(ordinal, &stored)
    }

    fn rewrite_in_place(&mut self, ordinal: u64, record: &PointRecord) -> Result<()> {
        let index = self.index.as_ref().ok_or(Error::AlreadyClosed)?;
        let index_record = index.get(ordinal).ok_or(Error::OrdinalOutOfBounds { ordinal, len: index.len() })?;
        let file = self.update_file.as_mut().ok_or(Error::AlreadyClosed)?;
        let mut body = vec![0u8; (index_record.cpf_size as usize - 4).max(estimate_body_len(record))];
        let body_len = encode_body(record, &mut body)?;
        if body_len + 4 != index_record.cpf_size as usize {
            return Err(Error::Inconsistent(
                "update_record produced a different encoded length than the stored record".to_string(),
            ));
        }
        file.seek(SeekFrom::Start(index_record.cpf_offset + 4))?;
        file.write_all(&body[..body_len])?;
        file.flush()?;
        Ok(())
    }

    /// Finalizes the file. On a handle opened with [`Self::create`], this
    /// flushes the index and rewrites the header with the final record
    /// count.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.creating {
            if let Some(writer) = self.append_writer.as_mut() {
                writer.flush()?;
                let header_bytes = crate::header::emit(&self.header)?;
                let file = writer.get_mut();
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&header_bytes)?;
                file.flush()?;
            }
            if let Some(index) = self.index.as_mut() {
                index.flush()?;
            }
            manager::finalize(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for PointFile {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("error finalizing point file {}: {e}", self.path.display());
        }
    }
}

fn estimate_body_len(record: &PointRecord) -> usize {
    let total_returns: usize = record.returns.iter().map(|r| r.len()).sum();
    4096 + total_returns * 128
}

fn peek_header_size(reader: &mut BufReader<File>) -> Result<usize> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CHANNELS, INFRARED_CHANNEL};
    use crate::point::Return;

    fn sample_return() -> Return {
        Return {
            latitude_diff_degrees: 0.0001,
            longitude_diff_degrees: -0.0002,
            elevation_meters: Some(-3.2),
            reflectance: 0.4,
            horizontal_uncertainty_meters: 0.1,
            vertical_uncertainty_meters: 0.15,
            status: 1,
            classification: 9,
            interest_point: 0.6,
            is_non_water_surface: false,
            probability: 0.7,
            filter_reason: 0,
            detection_index: 1,
        }
    }

    fn sample_record() -> PointRecord {
        let mut returns: [Vec<Return>; CHANNELS] = std::array::from_fn(|_| Vec::new());
        returns[3] = vec![sample_return()];
        PointRecord {
            time_offset_micros: 10,
            off_nadir_angle_degrees: 1.0,
            reference_latitude_degrees: 34.5,
            reference_longitude_degrees: -120.1,
            water_level_elevation_meters: 0.2,
            local_vertical_datum_offset_meters: 0.0,
            user_data: 0,
            returns,
            bare_earth: [None; INFRARED_CHANNEL],
            kd: 0.1,
            laser_energy: 1.0,
            trigger_interest_point: 0.99,
            processing_mode: [0; CHANNELS],
            cube_detection_index: 0,
        }
    }

    #[test]
    fn create_write_read_and_update() {
        let dir = std::env::temp_dir().join(format!("czmil-cpf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cif_path = dir.join("test.cif");
        let cpf_path = dir.join("test.cpf");
        let cwf_path = dir.join("test.cwf");
        std::fs::write(&cwf_path, b"").ok();

        {
            let mut index = IndexFile::create(&cif_path, crate::header::FormatInfo::default()).unwrap();
            index.push_waveform(0, 64);
            index.flush().unwrap();
        }

        let record = sample_record();
        {
            let mut file = PointFile::create(&cpf_path, &cif_path, (34.5, -120.1)).unwrap();
            file.write_record(0, &record).unwrap();
            file.close().unwrap();
        }

        let mut file = PointFile::open(&cpf_path, &cif_path, &cwf_path, OpenMode::Update).unwrap();
        assert_eq!(file.len(), 1);
        let decoded = file.read_record(0).unwrap();
        assert_eq!(decoded.returns[3].len(), 1);

        let mut updated = decoded.clone();
        updated.returns[3][0].classification = 2;
        file.update_record(0, &updated).unwrap();
        let reread = file.read_record(0).unwrap();
        assert_eq!(reread.returns[3][0].classification, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn write_record_rewrites_an_earlier_ordinal_in_place() {
        let dir = std::env::temp_dir().join(format!("czmil-cpf-rewrite-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cif_path = dir.join("test.cif");
        let cpf_path = dir.join("test.cpf");
        let cwf_path = dir.join("test.cwf");
        std::fs::write(&cwf_path, b"").ok();

        {
            let mut index = IndexFile::create(&cif_path, crate::header::FormatInfo::default()).unwrap();
            index.push_waveform(0, 64);
            index.push_waveform(64, 64);
            index.flush().unwrap();
        }

        let record = sample_record();
        let mut file = PointFile::create(&cpf_path, &cif_path, (34.5, -120.1)).unwrap();
        file.write_record(0, &record).unwrap();
        file.write_record(1, &record).unwrap();
        assert_eq!(file.len(), 2);

        let mut rewritten = record.clone();
        rewritten.returns[3][0].reflectance = 0.9;
        file.write_record(0, &rewritten).unwrap();
        assert_eq!(file.len(), 2);

        assert!(matches!(file.write_record(5, &record), Err(Error::OrdinalOutOfBounds { ordinal: 5, len: 2 })));

        file.close().unwrap();

        let mut file = PointFile::open(&cpf_path, &cif_path, &cwf_path, OpenMode::ReadOnly).unwrap();
        let array = file.read_record_array(0, 2).unwrap();
        assert_eq!(array.len(), 2);
        assert!((array[0].returns[3][0].reflectance - 0.9).abs() < 1e-6);
        assert!((array[1].returns[3][0].reflectance - record.returns[3][0].reflectance).abs() < 1e-6);

        std::fs::remove_dir_all(&dir).ok();
    }
}
