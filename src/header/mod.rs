//! The ASCII tagged header shared by all five file types.

pub mod builder;
mod format;

pub use builder::Builder;
pub use format::{emit, parse};

use chrono::{DateTime, Utc};

use crate::constants::{CIF_DEFAULT_OFFSET_BITS, CIF_DEFAULT_SIZE_BITS};
use crate::error::{Error, Result};

/// Which of the five coordinated files a header belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// The waveform file.
    Waveform,
    /// The point file.
    Point,
    /// The trajectory file.
    Trajectory,
    /// The index file.
    Index,
    /// The audit file.
    Audit,
}

impl FileKind {
    /// The tag written into a header's `[FILE TYPE]` field.
    pub fn tag(self) -> &'static str {
        match self {
            FileKind::Waveform => "CWF",
            FileKind::Point => "CPF",
            FileKind::Trajectory => "CSF",
            FileKind::Index => "CIF",
            FileKind::Audit => "CAF",
        }
    }

    /// The conventional file extension, without a leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Waveform => "cwf",
            FileKind::Point => "cpf",
            FileKind::Trajectory => "csf",
            FileKind::Index => "cif",
            FileKind::Audit => "caf",
        }
    }

    /// Parses a `[FILE TYPE]` tag value back into a `FileKind`.
    pub fn from_tag(tag: &str) -> Result<FileKind> {
        match tag {
            "CWF" => Ok(FileKind::Waveform),
            "CPF" => Ok(FileKind::Point),
            "CSF" => Ok(FileKind::Trajectory),
            "CIF" => Ok(FileKind::Index),
            "CAF" => Ok(FileKind::Audit),
            other => Err(Error::InvalidHeaderField {
                field: "FILE TYPE".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// The highest format version this library understands.
pub const SUPPORTED_VERSION: (u16, u16) = (1, 0);

/// Bit widths that are not fixed by this crate's constants table and are
/// instead recorded per file, in the header's format-information section.
/// Only the index file's address width varies in practice (a decade of
/// flightlines can outgrow a 32-bit byte offset), but the block is carried
/// on every header so that a reader never needs file-type-specific parsing
/// logic to find it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FormatInfo {
    /// Number of bits used to store a CIF byte offset.
    pub offset_bits: u32,
    /// Number of bits used to store a CIF record size.
    pub size_bits: u32,
}

impl Default for FormatInfo {
    fn default() -> FormatInfo {
        FormatInfo {
            offset_bits: CIF_DEFAULT_OFFSET_BITS,
            size_bits: CIF_DEFAULT_SIZE_BITS,
        }
    }
}

/// An opaque, order-preserving `tag = value` pair that the library passes
/// through unchanged. Applications use these to stash bookkeeping the
/// library does not otherwise understand.
pub type Field = (String, String);

/// The tagged header present at the start of every CZMIL dataset file.
#[derive(Clone, Debug)]
pub struct Header {
    pub(crate) version: (u16, u16),
    pub(crate) file_type: FileKind,
    pub(crate) created: DateTime<Utc>,
    pub(crate) modified: DateTime<Utc>,
    pub(crate) record_count: u64,
    pub(crate) header_size: usize,
    pub(crate) base_latitude: Option<f64>,
    pub(crate) base_longitude: Option<f64>,
    pub(crate) min_latitude: Option<f64>,
    pub(crate) max_latitude: Option<f64>,
    pub(crate) min_longitude: Option<f64>,
    pub(crate) max_longitude: Option<f64>,
    pub(crate) min_elevation: Option<f64>,
    pub(crate) max_elevation: Option<f64>,
    pub(crate) local_vertical_datum: Option<String>,
    pub(crate) wkt: Option<String>,
    pub(crate) format_info: FormatInfo,
    pub(crate) fields: Vec<Field>,
}

impl Header {
    /// Starts building a new header for `file_type`.
    pub fn builder(file_type: FileKind) -> Builder {
        Builder::new(file_type)
    }

    /// The file format version.
    pub fn version(&self) -> (u16, u16) {
        self.version
    }

    /// Which of the five file types this header describes.
    pub fn file_type(&self) -> FileKind {
        self.file_type
    }

    /// When the file was created.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// When the file was last modified.
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// The number of records currently in the file's body.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// The fixed size, in bytes, reserved for this header.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// The reference position that `CPF`/`CSF` lat/lon differences are
    /// measured from, if this header carries one.
    pub fn base_position(&self) -> Option<(f64, f64)> {
        match (self.base_latitude, self.base_longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// The geospatial bounding box recorded in this header, if any.
    pub fn bounds(&self) -> Option<Bounds> {
        Some(Bounds {
            min_latitude: self.min_latitude?,
            max_latitude: self.max_latitude?,
            min_longitude: self.min_longitude?,
            max_longitude: self.max_longitude?,
            min_elevation: self.min_elevation?,
            max_elevation: self.max_elevation?,
        })
    }

    /// The local vertical datum description, if any.
    pub fn local_vertical_datum(&self) -> Option<&str> {
        self.local_vertical_datum.as_deref()
    }

    /// The well-known-text coordinate system description, if any.
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// This header's format-information block.
    pub fn format_info(&self) -> FormatInfo {
        self.format_info
    }

    /// Looks up an application-defined field by tag.
    pub fn field(&self, tag: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates over all application-defined fields, in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(t, v)| (t.as_str(), v.as_str()))
    }

    /// Adds a new application-defined field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateHeaderField`] if a field with this tag
    /// already exists.
    pub fn add_field(&mut self, tag: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let tag = tag.into();
        if self.field(&tag).is_some() {
            return Err(Error::DuplicateHeaderField(tag));
        }
        self.fields.push((tag, normalize_newlines(&value.into())));
        self.touch();
        Ok(())
    }

    /// Updates an existing application-defined field, or adds it if absent.
    pub fn update_field(&mut self, tag: impl Into<String>, value: impl Into<String>) {
        let tag = tag.into();
        let value = normalize_newlines(&value.into());
        if let Some(entry) = self.fields.iter_mut().find(|(t, _)| *t == tag) {
            entry.1 = value;
        } else {
            self.fields.push((tag, value));
        }
        self.touch();
    }

    /// Removes an application-defined field, returning its prior value.
    pub fn delete_field(&mut self, tag: &str) -> Option<String> {
        let index = self.fields.iter().position(|(t, _)| t == tag)?;
        self.touch();
        Some(self.fields.remove(index).1)
    }

    pub(crate) fn set_record_count(&mut self, count: u64) {
        self.record_count = count;
        self.touch();
    }

    fn touch(&mut self) {
        self.modified = Utc::now();
    }
}

/// A geospatial and vertical bounding box recorded in a `CPF` or `CSF`
/// header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    /// Minimum latitude, in degrees.
    pub min_latitude: f64,
    /// Maximum latitude, in degrees.
    pub max_latitude: f64,
    /// Minimum longitude, in degrees.
    pub min_longitude: f64,
    /// Maximum longitude, in degrees.
    pub max_longitude: f64,
    /// Minimum elevation, in meters.
    pub min_elevation: f64,
    /// Maximum elevation, in meters.
    pub max_elevation: f64,
}

fn normalize_newlines(value: &str) -> String {
    value.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_field_rejects_duplicates() {
        let mut header = Header::builder(FileKind::Point).build();
        header.add_field("OPERATOR", "jane").unwrap();
        assert!(header.add_field("OPERATOR", "john").is_err());
    }

    #[test]
    fn update_field_adds_when_absent() {
        let mut header = Header::builder(FileKind::Point).build();
        header.update_field("OPERATOR", "jane");
        assert_eq!(header.field("OPERATOR"), Some("jane"));
    }

    #[test]
    fn normalizes_crlf_to_lf() {
        let mut header = Header::builder(FileKind::Point).build();
        header.add_field("NOTES", "line one\r\nline two\r").unwrap();
        assert_eq!(header.field("NOTES"), Some("line one\nline two\n"));
    }

    #[test]
    fn delete_field_removes_entry() {
        let mut header = Header::builder(FileKind::Point).build();
        header.add_field("OPERATOR", "jane").unwrap();
        assert_eq!(header.delete_field("OPERATOR"), Some("jane".to_string()));
        assert_eq!(header.field("OPERATOR"), None);
    }
}
