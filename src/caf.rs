//! The audit file (`CAF`): an append-only log of editing decisions applied
//! to a point file, replayed onto a reprocessed point file later. Unlike
//! the other four files it is not bit-packed, since its record rate is low
//! enough that byte alignment costs nothing and it keeps the format easy to
//! inspect with a hex viewer.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::header::{FileKind, Header};
use crate::manager;

/// One audit-log entry: an editing decision applied to a single shot's
/// return.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AuditRecord {
    /// The edited shot's ordinal.
    pub shot_ordinal: i32,
    /// The channel the edited return belongs to.
    pub channel: u8,
    /// The processing mode applied.
    pub processing_mode: u8,
    /// The edited return's interest point value.
    pub interest_point: f32,
    /// The edited return's index within its channel.
    pub return_index: u8,
    /// The channel's total return count at the time of the edit.
    pub return_count: u8,
}

const RECORD_LEN: usize = 4 + 1 + 1 + 4 + 1 + 1;

fn encode_record(record: &AuditRecord, buffer: &mut [u8]) -> Result<()> {
    let mut cursor = std::io::Cursor::new(buffer);
    cursor.write_i32::<LittleEndian>(record.shot_ordinal)?;
    cursor.write_u8(record.channel)?;
    cursor.write_u8(record.processing_mode)?;
    cursor.write_f32::<LittleEndian>(record.interest_point)?;
    cursor.write_u8(record.return_index)?;
    cursor.write_u8(record.return_count)?;
    Ok(())
}

fn decode_record(buffer: &[u8]) -> Result<AuditRecord> {
    let mut cursor = std::io::Cursor::new(buffer);
    Ok(AuditRecord {
        shot_ordinal: cursor.read_i32::<LittleEndian>()?,
        channel: cursor.read_u8()?,
        processing_mode: cursor.read_u8()?,
        interest_point: cursor.read_f32::<LittleEndian>()?,
        return_index: cursor.read_u8()?,
        return_count: cursor.read_u8()?,
    })
}

/// An open audit file.
pub struct AuditFile {
    header: Header,
    reader: Option<BufReader<File>>,
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    read_position: u64,
    closed: bool,
}

impl AuditFile {
    /// Creates a new, empty audit file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<AuditFile> {
        let path = path.as_ref().to_path_buf();
        let header = Header::builder(FileKind::Audit).build();
        let mut writer = BufWriter::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::create(&path)?);
        writer.write_all(&crate::header::emit(&header)?)?;
        writer.flush()?;
        manager::register_creating(&path)?;
        Ok(AuditFile {
            header,
            reader: None,
            writer: Some(writer),
            path,
            read_position: 0,
            closed: false,
        })
    }

    /// Opens an existing audit file for sequential reading.
    pub fn open(path: impl AsRef<Path>) -> Result<AuditFile> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::with_capacity(crate::constants::DEFAULT_IO_BUFFER_SIZE, File::open(&path)?);
        let mut header_buffer = vec![0u8; peek_header_size(&mut reader)?];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut header_buffer)?;
        let header = crate::header::parse(&header_buffer)?;
        if header.file_type() != FileKind::Audit {
            return Err(Error::NotADatasetFile(path));
        }
        Ok(AuditFile {
            header,
            reader: Some(reader),
            writer: None,
            path,
            read_position: 0,
            closed: false,
        })
    }

    /// This file's header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Mutable access to this file's header, for `add_field`/`update_field`/
    /// `delete_field`. The revised header is written out on [`Self::close`]
    /// for a handle opened with [`Self::create`]; edits made on a handle
    /// opened for reading do not persist.
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Appends one audit record.
    pub fn write_next(&mut self, record: &AuditRecord) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::AlreadyClosed)?;
        let mut buffer = [0u8; RECORD_LEN];
        encode_record(record, &mut buffer)?;
        writer.write_all(&buffer)?;
        self.header.set_record_count(self.header.record_count() + 1);
        Ok(())
    }

    /// Reads the next audit record in sequence, returning `None` at
    /// end-of-file.
    pub fn read_next(&mut self) -> Result<Option<AuditRecord>> {
        if self.read_position >= self.header.record_count() {
            return Ok(None);
        }
        let reader = self.reader.as_mut().ok_or(Error::AlreadyClosed)?;
        let mut buffer = [0u8; RECORD_LEN];
        reader.read_exact(&mut buffer)?;
        self.read_position += 1;
        Ok(Some(decode_record(&buffer)?))
    }

    /// Finalizes the file.
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
            let file = writer.get_mut();
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header_bytes)?;
            file.flush()?;
            manager::finalize(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for AuditFile {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("error finalizing audit file {}: {e}", self.path.display());
        }
    }
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

    #[test]
    fn write_then_read_back_sequentially() {
        let dir = std::env::temp_dir().join(format!("czmil-caf-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("test.caf");
        let record = AuditRecord {
            shot_ordinal: 7,
            channel: 3,
            processing_mode: 2,
            interest_point: 0.75,
            return_index: 1,
            return_count: 2,
        };
        {
            let mut file = AuditFile::create(&path).unwrap();
            file.write_next(&record).unwrap();
            file.close().unwrap();
        }
        let mut file = AuditFile::open(&path).unwrap();
        let read_back = file.read_next().unwrap().unwrap();
        assert_eq!(read_back, record);
        assert!(file.read_next().unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
