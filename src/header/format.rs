//! Parsing and emitting the line-oriented ASCII tagged header.
//!
//! Single-line fields look like `[TAG] = value`; fields whose value may
//! contain embedded newlines are written as a block, `{TAG =` followed by
//! one value line per line of content and a closing `}`. The header ends
//! with a sentinel line, after which the fixed-size header region is
//! padded with `\0` out to `header_size`.

use chrono::{DateTime, Utc};

use super::{FileKind, FormatInfo, Header};
use crate::error::{Error, Result};

const SENTINEL: &str = "[END OF HEADER]";

const KNOWN_METADATA_TAGS: &[&str] = &[
    "VERSION",
    "FILE TYPE",
    "CREATED",
    "MODIFIED",
    "RECORD COUNT",
    "HEADER SIZE",
    "BASE LATITUDE",
    "BASE LONGITUDE",
    "MIN LATITUDE",
    "MAX LATITUDE",
    "MIN LONGITUDE",
    "MAX LONGITUDE",
    "MIN ELEVATION",
    "MAX ELEVATION",
    "LOCAL VERTICAL DATUM",
    "CIF OFFSET BITS",
    "CIF SIZE BITS",
    "WKT",
];

/// Emits `header` as a `\0`-padded buffer exactly `header.header_size()`
/// bytes long.
///
/// # Errors
///
/// Returns [`Error::HeaderTooLarge`] if the emitted text does not fit.
pub fn emit(header: &Header) -> Result<Vec<u8>> {
    let mut text = String::new();
    write_line(&mut text, "VERSION", &format!("{}.{}", header.version.0, header.version.1));
    write_line(&mut text, "FILE TYPE", header.file_type.tag());
    write_line(&mut text, "CREATED", &header.created.to_rfc3339());
    write_line(&mut text, "MODIFIED", &header.modified.to_rfc3339());
    write_line(&mut text, "RECORD COUNT", &header.record_count.to_string());
    write_line(&mut text, "HEADER SIZE", &header.header_size.to_string());
    if let Some(lat) = header.base_latitude {
        write_line(&mut text, "BASE LATITUDE", &lat.to_string());
    }
    if let Some(lon) = header.base_longitude {
        write_line(&mut text, "BASE LONGITUDE", &lon.to_string());
    }
    if let Some(v) = header.min_latitude {
        write_line(&mut text, "MIN LATITUDE", &v.to_string());
    }
    if let Some(v) = header.max_latitude {
        write_line(&mut text, "MAX LATITUDE", &v.to_string());
    }
    if let Some(v) = header.min_longitude {
        write_line(&mut text, "MIN LONGITUDE", &v.to_string());
    }
    if let Some(v) = header.max_longitude {
        write_line(&mut text, "MAX LONGITUDE", &v.to_string());
    }
    if let Some(v) = header.min_elevation {
        write_line(&mut text, "MIN ELEVATION", &v.to_string());
    }
    if let Some(v) = header.max_elevation {
        write_line(&mut text, "MAX ELEVATION", &v.to_string());
    }
    if let Some(datum) = &header.local_vertical_datum {
        write_line(&mut text, "LOCAL VERTICAL DATUM", datum);
    }
    write_line(&mut text, "CIF OFFSET BITS", &header.format_info.offset_bits.to_string());
    write_line(&mut text, "CIF SIZE BITS", &header.format_info.size_bits.to_string());
    if let Some(wkt) = &header.wkt {
        write_field(&mut text, "WKT", wkt);
    }
    for (tag, value) in &header.fields {
        write_field(&mut text, tag, value);
    }
    text.push_str(SENTINEL);
    text.push('\n');

    if text.len() > header.header_size {
        return Err(Error::HeaderTooLarge {
            size: text.len(),
            max: header.header_size,
        });
    }
    let mut bytes = text.into_bytes();
    bytes.resize(header.header_size, 0);
    Ok(bytes)
}

fn write_line(text: &mut String, tag: &str, value: &str) {
    if value.contains('\n') {
        write_field(text, tag, value);
    } else {
        text.push_str(&format!("[{tag}] = {value}\n"));
    }
}

fn write_field(text: &mut String, tag: &str, value: &str) {
    if value.contains('\n') {
        text.push_str(&format!("{{{tag} =\n"));
        for line in value.lines() {
            text.push_str(line);
            text.push('\n');
        }
        text.push_str("}\n");
    } else {
        write_line(text, tag, value);
    }
}

/// Parses a tagged header from `buffer`, which may include the trailing
/// `\0` padding out to the reserved header size.
pub fn parse(buffer: &[u8]) -> Result<Header> {
    let text = std::str::from_utf8(buffer).map_err(|_| {
        Error::InvalidHeaderField {
            field: "(header)".to_string(),
            value: "non-UTF-8 bytes".to_string(),
        }
    })?;
    let text = text.split('\0').next().unwrap_or(text);
    if !text.contains(SENTINEL) {
        return Err(Error::NotADatasetFile(std::path::PathBuf::new()));
    }

    let mut metadata: Vec<(String, String)> = Vec::new();
    let mut fields: Vec<(String, String)> = Vec::new();

    let mut lines = text.lines().peekable();
    while let Some(line) = lines.next() {
        let line = line.trim_end_matches('\r');
        if line == SENTINEL {
            break;
        }
        if let Some(rest) = line.strip_prefix('[') {
            let Some(close) = rest.find(']') else { continue };
            let tag = rest[..close].to_string();
            let value = rest[close + 1..].trim_start_matches(" =").trim().to_string();
            if KNOWN_METADATA_TAGS.contains(&tag.as_str()) {
                metadata.push((tag, value));
            } else {
                fields.push((tag, value));
            }
        } else if let Some(rest) = line.strip_prefix('{') {
            let Some(eq) = rest.strip_suffix(" =") else { continue };
            let tag = eq.to_string();
            let mut value = String::new();
            for block_line in lines.by_ref() {
                let block_line = block_line.trim_end_matches('\r');
                if block_line == "}" {
                    break;
                }
                value.push_str(block_line);
                value.push('\n');
            }
            if KNOWN_METADATA_TAGS.contains(&tag.as_str()) {
                metadata.push((tag, value));
            } else {
                fields.push((tag, value));
            }
        }
    }

    let get = |tag: &str| -> Option<String> {
        metadata.iter().find(|(t, _)| t == tag).map(|(_, v)| v.clone())
    };
    let required = |tag: &str| -> Result<String> {
        get(tag).ok_or_else(|| Error::MissingHeaderField(tag.to_string()))
    };
    let parse_num = |tag: &str, value: &str| -> Result<f64> {
        value.trim().parse().map_err(|_| Error::InvalidHeaderField {
            field: tag.to_string(),
            value: value.to_string(),
        })
    };

    let version_str = required("VERSION")?;
    let (major_str, minor_str) = version_str
        .split_once('.')
        .ok_or_else(|| Error::InvalidHeaderField {
            field: "VERSION".to_string(),
            value: version_str.clone(),
        })?;
    let version = (
        major_str.parse().map_err(|_| Error::InvalidHeaderField {
            field: "VERSION".to_string(),
            value: version_str.clone(),
        })?,
        minor_str.parse().map_err(|_| Error::InvalidHeaderField {
            field: "VERSION".to_string(),
            value: version_str.clone(),
        })?,
    );
    if version > super::SUPPORTED_VERSION {
        return Err(Error::UnsupportedVersion {
            found: format!("{}.{}", version.0, version.1),
            supported: format!("{}.{}", super::SUPPORTED_VERSION.0, super::SUPPORTED_VERSION.1),
        });
    }

    let file_type = FileKind::from_tag(required("FILE TYPE")?.trim())?;
    let created = parse_timestamp("CREATED", &required("CREATED")?)?;
    let modified = parse_timestamp("MODIFIED", &required("MODIFIED")?)?;
    let record_count: u64 = required("RECORD COUNT")?
        .trim()
        .parse()
        .map_err(|_| Error::InvalidHeaderField {
            field: "RECORD COUNT".to_string(),
            value: get("RECORD COUNT").unwrap_or_default(),
        })?;
    let header_size: usize = required("HEADER SIZE")?
        .trim()
        .parse()
        .map_err(|_| Error::InvalidHeaderField {
            field: "HEADER SIZE".to_string(),
            value: get("HEADER SIZE").unwrap_or_default(),
        })?;

    let base_latitude = get("BASE LATITUDE").map(|v| parse_num("BASE LATITUDE", &v)).transpose()?;
    let base_longitude = get("BASE LONGITUDE").map(|v| parse_num("BASE LONGITUDE", &v)).transpose()?;
    let min_latitude = get("MIN LATITUDE").map(|v| parse_num("MIN LATITUDE", &v)).transpose()?;
    let max_latitude = get("MAX LATITUDE").map(|v| parse_num("MAX LATITUDE", &v)).transpose()?;
    let min_longitude = get("MIN LONGITUDE").map(|v| parse_num("MIN LONGITUDE", &v)).transpose()?;
    let max_longitude = get("MAX LONGITUDE").map(|v| parse_num("MAX LONGITUDE", &v)).transpose()?;
    let min_elevation = get("MIN ELEVATION").map(|v| parse_num("MIN ELEVATION", &v)).transpose()?;
    let max_elevation = get("MAX ELEVATION").map(|v| parse_num("MAX ELEVATION", &v)).transpose()?;
    let local_vertical_datum = get("LOCAL VERTICAL DATUM").map(|v| v.trim_end_matches('\n').to_string());
    let wkt = get("WKT").map(|v| v.trim_end_matches('\n').to_string());

    let offset_bits = get("CIF OFFSET BITS")
        .map(|v| v.trim().parse::<u32>())
        .transpose()
        .map_err(|_| Error::InvalidHeaderField {
            field: "CIF OFFSET BITS".to_string(),
            value: get("CIF OFFSET BITS").unwrap_or_default(),
        })?
        .unwrap_or(FormatInfo::default().offset_bits);
    let size_bits = get("CIF SIZE BITS")
        .map(|v| v.trim().parse::<u32>())
        .transpose()
        .map_err(|_| Error::InvalidHeaderField {
            field: "CIF SIZE BITS".to_string(),
            value: get("CIF SIZE BITS").unwrap_or_default(),
        })?
        .unwrap_or(FormatInfo::default().size_bits);

    Ok(Header {
        version,
        file_type,
        created,
        modified,
        record_count,
        header_size,
        base_latitude,
        base_longitude,
        min_latitude,
        max_latitude,
        min_longitude,
        max_longitude,
        min_elevation,
        max_elevation,
        local_vertical_datum,
        wkt,
        format_info: FormatInfo { offset_bits, size_bits },
        fields,
    })
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidHeaderField {
            field: field.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_header() {
        let mut header = Header::builder(FileKind::Point)
            .base_position(34.5, -120.1)
            .wkt("GEOGCS[\"WGS 84\"]")
            .build();
        header.add_field("OPERATOR", "jane doe").unwrap();
        let bytes = emit(&header).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.file_type(), FileKind::Point);
        assert_eq!(parsed.base_position(), Some((34.5, -120.1)));
        assert_eq!(parsed.wkt(), Some("GEOGCS[\"WGS 84\"]"));
        assert_eq!(parsed.field("OPERATOR"), Some("jane doe"));
    }

    #[test]
    fn round_trips_multiline_field() {
        let mut header = Header::builder(FileKind::Waveform).build();
        header.add_field("NOTES", "first line\nsecond line").unwrap();
        let bytes = emit(&header).unwrap();
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.field("NOTES"), Some("first line\nsecond line\n"));
    }

    #[test]
    fn rejects_header_too_large() {
        let header = Header::builder(FileKind::Index).header_size(8).build();
        assert!(emit(&header).is_err());
    }

    #[test]
    fn rejects_non_dataset_bytes() {
        let buffer = vec![0u8; 64];
        assert!(parse(&buffer).is_err());
    }

    #[test]
    fn rejects_future_version() {
        let mut header = Header::builder(FileKind::Index).build();
        let bytes = emit(&header).unwrap();
        let mut text = String::from_utf8(bytes).unwrap();
        text = text.replacen("[VERSION] = 1.0", "[VERSION] = 99.0", 1);
        header.header_size = text.len() + 64;
        let mut bytes = text.into_bytes();
        bytes.resize(header.header_size, 0);
        assert!(matches!(parse(&bytes), Err(Error::UnsupportedVersion { .. })));
    }
}
