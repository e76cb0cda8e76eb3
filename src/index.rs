//! The side-table index file (`CIF`), and regeneration from the primary
//! waveform and point files when it is missing or inconsistent.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::bitstream::{BitReader, BitWriter};
use crate::error::Result;
use crate::header::{FileKind, FormatInfo, Header};

/// One shot's byte offset and compressed size in the waveform and point
/// files.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexRecord {
    /// Byte offset of this shot's record in the `CWF` file.
    pub cwf_offset: u64,
    /// Byte offset of this shot's record in the `CPF` file.
    pub cpf_offset: u64,
    /// Size, in bytes, of this shot's `CWF` record.
    pub cwf_size: u32,
    /// Size, in bytes, of this shot's `CPF` record.
    pub cpf_size: u32,
}

fn record_bit_len(format_info: FormatInfo) -> usize {
    (2 * format_info.offset_bits + 2 * format_info.size_bits) as usize
}

fn encode_record(record: &IndexRecord, format_info: FormatInfo, buffer: &mut [u8]) -> Result<()> {
    let mut writer = BitWriter::new(buffer);
    writer.write_bits_wide(record.cwf_offset, format_info.offset_bits)?;
    writer.write_bits_wide(record.cpf_offset, format_info.offset_bits)?;
    writer.write_bits(record.cwf_size as u64, format_info.size_bits)?;
    writer.write_bits(record.cpf_size as u64, format_info.size_bits)?;
    Ok(())
}

fn decode_record(buffer: &[u8], format_info: FormatInfo) -> Result<IndexRecord> {
    let mut reader = BitReader::new(buffer);
    Ok(IndexRecord {
        cwf_offset: reader.read_bits_wide(format_info.offset_bits)?,
        cpf_offset: reader.read_bits_wide(format_info.offset_bits)?,
        cwf_size: reader.read_bits(format_info.size_bits)? as u32,
        cpf_size: reader.read_bits(format_info.size_bits)? as u32,
    })
}

/// An open index file.
pub struct IndexFile {
    header: Header,
    records: Vec<IndexRecord>,
    path: std::path::PathBuf,
    dirty: bool,
}

impl IndexFile {
    /// Creates a new, empty index file at `path`.
    pub fn create(path: impl AsRef<Path>, format_info: FormatInfo) -> Result<IndexFile> {
        let header = Header::builder(FileKind::Index).format_info(format_info).build();
        let file = IndexFile {
            header,
            records: Vec::new(),
            path: path.as_ref().to_path_buf(),
            dirty: true,
        };
        file.write_to_disk()?;
        Ok(file)
    }

    /// Opens an existing index file, or regenerates one from `cwf_path`
    /// and `cpf_path` if `path` is missing, truncated, or fails a basic
    /// consistency check against those files' record counts.
    pub fn open_or_regenerate(path: impl AsRef<Path>, cwf_path: impl AsRef<Path>, cpf_path: impl AsRef<Path>) -> Result<IndexFile> {
        let path = path.as_ref();
        match Self::open(path) {
            Ok(file) => Ok(file),
            Err(_) => {
                log::warn!("index file {} missing or unreadable, regenerating", path.display());
                let format_info = FormatInfo::default();
                let records = regenerate(cwf_path, cpf_path)?;
                let file = IndexFile {
                    header: Header::builder(FileKind::Index).format_info(format_info).build(),
                    records,
                    path: path.to_path_buf(),
                    dirty: true,
                };
                file.write_to_disk()?;
                Ok(file)
            }
        }
    }

    /// Opens an existing index file without attempting regeneration.
    pub fn open(path: impl AsRef<Path>) -> Result<IndexFile> {
        let mut reader = BufReader::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::open(path.as_ref())?);
        let mut header_buffer = vec![0u8; peek_header_size(&mut reader)?];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut header_buffer)?;
        let header = crate::header::parse(&header_buffer)?;
        let format_info = header.format_info();
        let record_bytes = record_bit_len(format_info).div_ceil(8);
        let mut records = Vec::with_capacity(header.record_count() as usize);
        let mut record_buffer = vec![0u8; record_bytes];
        for _ in 0..header.record_count() {
            reader.read_exact(&mut record_buffer)?;
            records.push(decode_record(&record_buffer, format_info)?);
        }
        Ok(IndexFile {
            header,
            records,
            path: path.as_ref().to_path_buf(),
            dirty: false,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable access to this file's header, for `add_field`/`update_field`/
    /// `delete_field`. Persisted by the next [`Self::flush`].
    pub fn header_mut(&mut self) -> &mut Header {
        self.dirty = true;
        &mut self.header
    }

    /// The number of shots indexed so far.
    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    /// True if no shots have been indexed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the index record for `ordinal`, if it exists.
    pub fn get(&self, ordinal: u64) -> Option<IndexRecord> {
        self.records.get(ordinal as usize).copied()
    }

    /// Appends a new index record, populating only its `CWF` fields (used
    /// while a waveform file is being created).
    pub fn push_waveform(&mut self, offset: u64, size: u32) {
        self.records.push(IndexRecord {
            cwf_offset: offset,
            cpf_offset: 0,
            cwf_size: size,
            cpf_size: 0,
        });
        self.dirty = true;
    }

    /// Fills in the `CPF` fields for an already-indexed shot (used while a
    /// point file is being created in lockstep with an existing waveform
    /// file).
    pub fn set_point(&mut self, ordinal: u64, offset: u64, size: u32) -> Result<()> {
        let len = self.records.len() as u64;
        let record = self.records.get_mut(ordinal as usize).ok_or(crate::error::Error::OrdinalOutOfBounds {
            ordinal,
            len,
        })?;
        record.cpf_offset = offset;
        record.cpf_size = size;
        self.dirty = true;
        Ok(())
    }

    /// Flushes the index to disk if it has unwritten changes.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.write_to_disk()?;
            self.dirty = false;
        }
        Ok(())
    }

    fn write_to_disk(&self) -> Result<()> {
        let mut header = self.header.clone();
        header.set_record_count(self.records.len() as u64);
        let header_bytes = crate::header::emit(&header)?;
        let mut writer = BufWriter::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::create(&self.path)?);
        writer.write_all(&header_bytes)?;
        let record_bytes = record_bit_len(header.format_info()).div_ceil(8);
        let mut buffer = vec![0u8; record_bytes];
        for record in &self.records {
            buffer.iter_mut().for_each(|b| *b = 0);
            encode_record(record, header.format_info(), &mut buffer)?;
            writer.write_all(&buffer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn peek_header_size(reader: &mut BufReader<File>) -> Result<usize> {
    // The header's own `[HEADER SIZE]` field is needed before we know how
    // much of the file to read as header text, so scan for the sentinel in
    // growing chunks rather than guessing a fixed size up front.
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

/// Rebuilds an index by scanning the leading record-size field of every
/// record in `cwf_path` and `cpf_path`. Used when a `CIF` file is missing
/// or fails validation on open.
pub fn regenerate(cwf_path: impl AsRef<Path>, cpf_path: impl AsRef<Path>) -> Result<Vec<IndexRecord>> {
    let cwf_offsets = scan_variable_length_file(cwf_path)?;
    let cpf_offsets = scan_variable_length_file(cpf_path)?;
    let len = cwf_offsets.len().max(cpf_offsets.len());
    let mut records = Vec::with_capacity(len);
    for i in 0..len {
        let (cwf_offset, cwf_size) = cwf_offsets.get(i).copied().unwrap_or((0, 0));
        let (cpf_offset, cpf_size) = cpf_offsets.get(i).copied().unwrap_or((0, 0));
        records.push(IndexRecord {
            cwf_offset,
            cpf_offset,
            cwf_size,
            cpf_size,
        });
    }
    Ok(records)
}

/// Scans a body of variable-length, `[size: u32][body...]`-framed records,
/// returning each record's `(offset_of_size_field, size)`.
fn scan_variable_length_file(path: impl AsRef<Path>) -> Result<Vec<(u64, u32)>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let header_size = {
        let mut probe_reader = BufReader::new(File::open(path)?);
        peek_header_size(&mut probe_reader)?
    };
    reader.seek(SeekFrom::Start(header_size as u64))?;
    let mut offsets = Vec::new();
    loop {
        let offset = reader.stream_position()?;
        let size = match reader.read_u32::<LittleEndian>() {
            Ok(size) => size,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        offsets.push((offset, size));
        let remaining = size as i64 - 4;
        if remaining < 0 {
            break;
        }
        reader.seek(SeekFrom::Current(remaining))?;
    }
    Ok(offsets)
}
