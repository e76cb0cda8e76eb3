use chrono::Utc;

use super::{FileKind, FormatInfo, Header};

/// Builds a [`Header`] for a newly created file.
///
/// # Examples
///
/// ```
/// use czmil::header::{FileKind, Header};
/// let header = Header::builder(FileKind::Point)
///     .base_position(34.5, -120.1)
///     .build();
/// assert_eq!(header.file_type(), FileKind::Point);
/// ```
#[derive(Clone, Debug)]
pub struct Builder {
    file_type: FileKind,
    header_size: usize,
    base_latitude: Option<f64>,
    base_longitude: Option<f64>,
    local_vertical_datum: Option<String>,
    wkt: Option<String>,
    format_info: FormatInfo,
    fields: Vec<(String, String)>,
}

/// The default reserved header sizes, in bytes, for each file type. Chosen
/// generously enough that the application-field and WKT sections rarely
/// force a larger header, while keeping each file type's header a round
/// number for easy inspection with a hex viewer.
fn default_header_size(file_type: FileKind) -> usize {
    match file_type {
        FileKind::Waveform => 4096,
        FileKind::Point => 8192,
        FileKind::Trajectory => 4096,
        FileKind::Index => 2048,
        FileKind::Audit => 2048,
    }
}

impl Builder {
    /// Starts a new builder for `file_type`, with this crate's default
    /// header size and format-information block.
    pub fn new(file_type: FileKind) -> Builder {
        Builder {
            file_type,
            header_size: default_header_size(file_type),
            base_latitude: None,
            base_longitude: None,
            local_vertical_datum: None,
            wkt: None,
            format_info: FormatInfo::default(),
            fields: Vec::new(),
        }
    }

    /// Overrides the reserved header size. Must be large enough to hold
    /// every field once emitted, or [`crate::Error::HeaderTooLarge`] is
    /// returned when the file is created.
    pub fn header_size(mut self, size: usize) -> Builder {
        self.header_size = size;
        self
    }

    /// Sets the reference position that lat/lon differences in `CPF`/`CSF`
    /// records are measured from.
    pub fn base_position(mut self, latitude: f64, longitude: f64) -> Builder {
        self.base_latitude = Some(latitude);
        self.base_longitude = Some(longitude);
        self
    }

    /// Sets the local vertical datum description.
    pub fn local_vertical_datum(mut self, datum: impl Into<String>) -> Builder {
        self.local_vertical_datum = Some(datum.into());
        self
    }

    /// Sets the well-known-text coordinate system description.
    pub fn wkt(mut self, wkt: impl Into<String>) -> Builder {
        self.wkt = Some(wkt.into());
        self
    }

    /// Overrides the index file's address and size bit widths. Only
    /// meaningful for [`FileKind::Index`] headers.
    pub fn format_info(mut self, format_info: FormatInfo) -> Builder {
        self.format_info = format_info;
        self
    }

    /// Adds an application-defined field.
    pub fn field(mut self, tag: impl Into<String>, value: impl Into<String>) -> Builder {
        self.fields.push((tag.into(), value.into()));
        self
    }

    /// Builds the header.
    pub fn build(self) -> Header {
        let now = Utc::now();
        Header {
            version: super::SUPPORTED_VERSION,
            file_type: self.file_type,
            created: now,
            modified: now,
            record_count: 0,
            header_size: self.header_size,
            base_latitude: self.base_latitude,
            base_longitude: self.base_longitude,
            min_latitude: None,
            max_latitude: None,
            min_longitude: None,
            max_longitude: None,
            min_elevation: None,
            max_elevation: None,
            local_vertical_datum: self.local_vertical_datum,
            wkt: self.wkt,
            format_info: self.format_info,
            fields: self.fields,
        }
    }
}
