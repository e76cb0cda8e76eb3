use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::constants::TIME_REGRESSION_NUDGE_MICROS;
use crate::error::{Error, Result};
use crate::header::{FileKind, FormatInfo, Header};
use crate::index::IndexFile;
use crate::manager;

use super::record::{decode_body, encode_body, Validity, WaveformRecord};

/// How a waveform file is opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpenMode {
    /// Random access by ordinal, consulting (and regenerating, if needed)
    /// the index file.
    ReadOnly,
    /// Forward-only access via [`WaveformFile::read_next`]. The index file
    /// is never opened or regenerated, so this mode is cheaper to open on
    /// a large file when only a single linear pass is needed.
    ReadOnlySequential,
}

/// An open waveform file.
pub struct WaveformFile {
    header: Header,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    index: Option<IndexFile>,
    path: PathBuf,
    last_time_offset: Option<u32>,
    creating: bool,
    closed: bool,
    sequential: bool,
}

impl WaveformFile {
    /// Creates a new waveform file at `path`, along with a fresh index file
    /// at `cif_path`.
    pub fn create(path: impl AsRef<Path>, cif_path: impl AsRef<Path>) -> Result<WaveformFile> {
        let path = path.as_ref().to_path_buf();
        let header = Header::builder(FileKind::Waveform).build();
        let mut writer = BufWriter::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::create(&path)?);
        writer.write_all(&crate::header::emit(&header)?)?;
        writer.flush()?;
        manager::register_creating(&path)?;
        let index = IndexFile::create(cif_path, FormatInfo::default())?;
        log::info!("created waveform file {}", path.display());
        Ok(WaveformFile {
            header,
            reader: None,
            writer: Some(writer),
            index: Some(index),
            path,
            last_time_offset: None,
            creating: true,
            closed: false,
            sequential: false,
        })
    }

    /// Opens an existing waveform file. [`OpenMode::ReadOnly`] consults (and
    /// transparently regenerates, if necessary) its index file for random
    /// access by ordinal; [`OpenMode::ReadOnlySequential`] skips the index
    /// entirely and only supports [`Self::read_next`].
    pub fn open(path: impl AsRef<Path>, cif_path: impl AsRef<Path>, cpf_path: impl AsRef<Path>, mode: OpenMode) -> Result<WaveformFile> {
        let path = path.as_ref().to_path_buf();
        let mut header_reader = BufReader::new(File::open(&path)?);
        let mut header_buffer = vec![0u8; peek_header_size(&mut header_reader)?];
        header_reader.seek(SeekFrom::Start(0))?;
        header_reader.read_exact(&mut header_buffer)?;
        let header = crate::header::parse(&header_buffer)?;
        if header.file_type() != FileKind::Waveform {
            return Err(Error::NotADatasetFile(path));
        }
        let sequential = mode == OpenMode::ReadOnlySequential;
        let index = if sequential { None } else { Some(IndexFile::open_or_regenerate(cif_path, &path, cpf_path)?) };
        let mut reader = BufReader::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::open(&path)?);
        reader.seek(SeekFrom::Start(header_buffer.len() as u64))?;
        Ok(WaveformFile {
            header,
            reader: Some(reader),
            writer: None,
            index,
            path,
            last_time_offset: None,
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

    /// Appends `record` as the next shot's waveform data.
    ///
    /// If `record.time_offset_micros` does not exceed the previous shot's,
    /// it is silently nudged forward by a small, fixed amount and the shot
    /// is flagged with [`Validity::TimeRegression`] on every channel that
    /// was not already flagged, per this format's policy of never failing
    /// a create on a timing glitch.
    pub fn write_record(&mut self, mut record: WaveformRecord) -> Result<()> {
        if let Some(previous) = self.last_time_offset {
            if record.time_offset_micros <= previous {
                log::warn!(
                    "shot {} time offset {} did not advance past {previous}, nudging forward",
                    record.shot_id,
                    record.time_offset_micros
                );
                record.time_offset_micros = previous.saturating_add(TIME_REGRESSION_NUDGE_MICROS as u32);
                for channel in record.channels.iter_mut() {
                    if channel.validity == Validity::Valid {
                        channel.validity = Validity::TimeRegression;
                    }
                }
            }
        }
        self.last_time_offset = Some(record.time_offset_micros);

        let writer = self.writer.as_mut().ok_or(Error::AlreadyClosed)?;
        let offset = writer.stream_position()?;
        let mut body = vec![0u8; estimate_body_len(&record)];
        let body_len = encode_body(&record, &mut body)?;
        let total_len = body_len + 4;
        writer.write_u32::<LittleEndian>(total_len as u32)?;
        writer.write_all(&body[..body_len])?;

        let index = self.index.as_mut().ok_or(Error::AlreadyClosed)?;
        index.push_waveform(offset, total_len as u32);
        self.header.set_record_count(self.header.record_count() + 1);
        Ok(())
    }

    /// Reads the waveform record at `ordinal`. Requires a handle opened
    /// with [`OpenMode::ReadOnly`].
    pub fn read_record(&mut self, ordinal: u64) -> Result<WaveformRecord> {
        if self.sequential {
            return Err(Error::Inconsistent("read_record requires a handle opened with OpenMode::ReadOnly".to_string()));
        }
        let index = self.index.as_ref().ok_or(Error::AlreadyClosed)?;
        let index_record = index.get(ordinal).ok_or(Error::OrdinalOutOfBounds { ordinal, len: index.len() })?;
        let reader = self.reader.as_mut().ok_or(Error::AlreadyClosed)?;
        reader.seek(SeekFrom::Start(index_record.cwf_offset + 4))?;
        let mut buffer = vec![0u8; index_record.cwf_size as usize - 4];
        reader.read_exact(&mut buffer)?;
        decode_body(&buffer)
    }

    /// Reads `count` consecutive records starting at `ordinal`.
    pub fn read_record_array(&mut self, ordinal: u64, count: u64) -> Result<Vec<WaveformRecord>> {
        (ordinal..ordinal + count).map(|i| self.read_record(i)).collect()
    }

    /// Reads the next record in file order, or `None` at end of file.
    /// Works on a handle opened with either [`OpenMode::ReadOnly`] or
    /// [`OpenMode::ReadOnlySequential`], and never consults the index.
    pub fn read_next(&mut self) -> Result<Option<WaveformRecord>> {
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

    /// Finalizes the file, and, on a handle opened with [`Self::create`],
    /// its sibling index file.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.creating {
            if let Some(writer) = self.writer.as_mut() {
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

impl Drop for WaveformFile {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("error finalizing waveform file {}: {e}", self.path.display());
        }
    }
}

fn estimate_body_len(record: &WaveformRecord) -> usize {
    let total_packets: usize = record.channels.iter().map(|c| c.packets.len()).sum();
    2048 + total_packets * 96
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
    use crate::constants::{CHANNELS, PACKET_SAMPLES};
    use crate::waveform::{ChannelWaveform, Packet};

    fn sample_record(shot_id: u32, time_offset_micros: u32) -> WaveformRecord {
        let channels = std::array::from_fn(|i| ChannelWaveform {
            packets: vec![Packet {
                index: 0,
                range: 100.0,
                samples: [200 + i as u16; PACKET_SAMPLES],
            }],
            validity: Validity::Valid,
        });
        WaveformRecord {
            shot_id,
            time_offset_micros,
            scan_angle_degrees: 2.0,
            channels,
            trigger: [300; PACKET_SAMPLES],
        }
    }

    #[test]
    fn create_write_close_then_read() {
        let dir = std::env::temp_dir().join(format!("czmil-cwf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cwf_path = dir.join("test.cwf");
        let cif_path = dir.join("test.cif");
        let cpf_path = dir.join("test.cpf");
        std::fs::write(&cpf_path, b"").ok();

        {
            let mut file = WaveformFile::create(&cwf_path, &cif_path).unwrap();
            file.write_record(sample_record(0, 100)).unwrap();
            file.write_record(sample_record(1, 200)).unwrap();
            file.close().unwrap();
        }

        let mut file = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, OpenMode::ReadOnly).unwrap();
        assert_eq!(file.len(), 2);
        let record = file.read_record(1).unwrap();
        assert_eq!(record.shot_id, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn nudges_regressing_timestamps() {
        let dir = std::env::temp_dir().join(format!("czmil-cwf-regress-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cwf_path = dir.join("test.cwf");
        let cif_path = dir.join("test.cif");
        let cpf_path = dir.join("test.cpf");
        std::fs::write(&cpf_path, b"").ok();

        {
            let mut file = WaveformFile::create(&cwf_path, &cif_path).unwrap();
            file.write_record(sample_record(0, 1000)).unwrap();
            file.write_record(sample_record(1, 900)).unwrap();
            file.close().unwrap();
        }

        let mut file = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, OpenMode::ReadOnly).unwrap();
        let record = file.read_record(1).unwrap();
        assert!(record.time_offset_micros > 1000);
        assert_eq!(record.channels[0].validity, Validity::TimeRegression);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn read_record_array_matches_individual_reads_and_sequential_mode_forbids_ordinal_access() {
        let dir = std::env::temp_dir().join(format!("czmil-cwf-array-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cwf_path = dir.join("test.cwf");
        let cif_path = dir.join("test.cif");
        let cpf_path = dir.join("test.cpf");
        std::fs::write(&cpf_path, b"").ok();

        {
            let mut file = WaveformFile::create(&cwf_path, &cif_path).unwrap();
            file.write_record(sample_record(0, 100)).unwrap();
            file.write_record(sample_record(1, 200)).unwrap();
            file.write_record(sample_record(2, 300)).unwrap();
            file.close().unwrap();
        }

        let mut file = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, OpenMode::ReadOnly).unwrap();
        let array = file.read_record_array(0, 3).unwrap();
        assert_eq!(array.len(), 3);
        for (i, record) in array.iter().enumerate() {
            assert_eq!(record.shot_id, i as u32);
        }

        let mut sequential = WaveformFile::open(&cwf_path, &cif_path, &cpf_path, OpenMode::ReadOnlySequential).unwrap();
        assert!(sequential.read_record(0).is_err());
        let mut shot_ids = Vec::new();
        while let Some(record) = sequential.read_next().unwrap() {
            shot_ids.push(record.shot_id);
        }
        assert_eq!(shot_ids, vec![0, 1, 2]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
