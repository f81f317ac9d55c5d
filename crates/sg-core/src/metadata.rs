//! Structured header parsing: image dimensions and EXIF IFD0 tags.
//!
//! Absence of metadata is a successful [`MetadataOutcome::NoStructuredData`];
//! only malformed structures inside a recognized format are errors.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
const EXIF_PREFIX: &[u8] = b"Exif\0\0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub format: String,
    pub fields: Vec<MetadataField>,
}

impl MetadataRecord {
    fn new(format: &str) -> Self {
        Self { format: format.to_string(), fields: Vec::new() }
    }

    fn push(&mut self, name: &str, value: impl ToString) {
        self.fields.push(MetadataField { name: name.to_string(), value: value.to_string() });
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetadataOutcome {
    Record(MetadataRecord),
    NoStructuredData,
}

/// Parse the leading bytes of a file.
pub fn parse_metadata(header: &[u8]) -> EngineResult<MetadataOutcome> {
    let record = if header.starts_with(PNG_MAGIC) {
        parse_png(header)?
    } else if header.starts_with(b"GIF87a") || header.starts_with(b"GIF89a") {
        parse_gif(header)?
    } else if header.starts_with(&[0xFF, 0xD8]) {
        parse_jpeg(header)?
    } else if header.starts_with(b"BM") && header.len() >= 30 {
        parse_bmp(header)?
    } else {
        return Ok(MetadataOutcome::NoStructuredData);
    };
    Ok(MetadataOutcome::Record(record))
}

fn truncated(what: &str) -> EngineError {
    EngineError::Backend(format!("truncated {what}"))
}

fn be_u16(b: &[u8], at: usize) -> Option<u16> {
    b.get(at..at + 2).map(|s| u16::from_be_bytes([s[0], s[1]]))
}

fn be_u32(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 4).map(|s| u32::from_be_bytes([s[0], s[1], s[2], s[3]]))
}

fn le_u16(b: &[u8], at: usize) -> Option<u16> {
    b.get(at..at + 2).map(|s| u16::from_le_bytes([s[0], s[1]]))
}

fn le_u32(b: &[u8], at: usize) -> Option<u32> {
    b.get(at..at + 4).map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

fn parse_png(h: &[u8]) -> EngineResult<MetadataRecord> {
    if h.get(12..16) != Some(b"IHDR".as_slice()) {
        return Err(truncated("PNG header (missing IHDR)"));
    }
    let width = be_u32(h, 16).ok_or_else(|| truncated("PNG IHDR"))?;
    let height = be_u32(h, 20).ok_or_else(|| truncated("PNG IHDR"))?;
    let depth = *h.get(24).ok_or_else(|| truncated("PNG IHDR"))?;
    let color = *h.get(25).ok_or_else(|| truncated("PNG IHDR"))?;

    let color_name = match color {
        0 => "grayscale",
        2 => "RGB",
        3 => "indexed",
        4 => "grayscale+alpha",
        6 => "RGBA",
        _ => "unknown",
    };

    let mut record = MetadataRecord::new("PNG");
    record.push("width", width);
    record.push("height", height);
    record.push("bit_depth", depth);
    record.push("color_type", color_name);
    Ok(record)
}

fn parse_gif(h: &[u8]) -> EngineResult<MetadataRecord> {
    let width = le_u16(h, 6).ok_or_else(|| truncated("GIF screen descriptor"))?;
    let height = le_u16(h, 8).ok_or_else(|| truncated("GIF screen descriptor"))?;
    let mut record = MetadataRecord::new("GIF");
    record.push("version", String::from_utf8_lossy(&h[3..6]));
    record.push("width", width);
    record.push("height", height);
    Ok(record)
}

fn parse_bmp(h: &[u8]) -> EngineResult<MetadataRecord> {
    let dib_size = le_u32(h, 14).ok_or_else(|| truncated("BMP header"))?;
    let width = le_u32(h, 18).ok_or_else(|| truncated("BMP header"))? as i32;
    let height = le_u32(h, 22).ok_or_else(|| truncated("BMP header"))? as i32;
    let bpp = le_u16(h, 28).ok_or_else(|| truncated("BMP header"))?;
    let mut record = MetadataRecord::new("BMP");
    record.push("dib_header_size", dib_size);
    record.push("width", width);
    // Negative height means a top-down bitmap.
    record.push("height", height.unsigned_abs());
    record.push("bits_per_pixel", bpp);
    Ok(record)
}

fn parse_jpeg(h: &[u8]) -> EngineResult<MetadataRecord> {
    let mut record = MetadataRecord::new("JPEG");
    let mut pos = 2;

    // Walk marker segments until the scan starts or the header runs out.
    while pos + 4 <= h.len() {
        if h[pos] != 0xFF {
            return Err(EngineError::Backend(format!("JPEG marker expected at 0x{pos:X}")));
        }
        let marker = h[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        if marker == 0xD9 || marker == 0xDA {
            break;
        }

        let len = be_u16(h, pos + 2).ok_or_else(|| truncated("JPEG segment"))? as usize;
        if len < 2 {
            return Err(EngineError::Backend(format!("JPEG segment length {len} at 0x{pos:X}")));
        }
        let body_end = (pos + 2 + len).min(h.len());
        let body = &h[pos + 4..body_end];

        match marker {
            0xE1 if body.starts_with(EXIF_PREFIX) => {
                parse_exif(&body[EXIF_PREFIX.len()..], &mut record)?;
            }
            0xC0..=0xCF if marker != 0xC4 && marker != 0xC8 && marker != 0xCC => {
                if let (Some(&precision), Some(height), Some(width), Some(&components)) =
                    (body.first(), be_u16(body, 1), be_u16(body, 3), body.get(5))
                {
                    record.push("width", width);
                    record.push("height", height);
                    record.push("precision", precision);
                    record.push("components", components);
                }
            }
            _ => {}
        }

        pos += 2 + len;
    }

    Ok(record)
}

/// Reads TIFF integers in the byte order declared by the EXIF header.
struct Tiff<'a> {
    data: &'a [u8],
    little: bool,
}

impl Tiff<'_> {
    fn u16(&self, at: usize) -> EngineResult<u16> {
        let v = if self.little { le_u16(self.data, at) } else { be_u16(self.data, at) };
        v.ok_or_else(|| truncated("EXIF data"))
    }

    fn u32(&self, at: usize) -> EngineResult<u32> {
        let v = if self.little { le_u32(self.data, at) } else { be_u32(self.data, at) };
        v.ok_or_else(|| truncated("EXIF data"))
    }
}

const EXIF_ASCII_TAGS: &[(u16, &str)] = &[
    (0x010F, "make"),
    (0x0110, "model"),
    (0x0131, "software"),
    (0x0132, "date_time"),
    (0x013B, "artist"),
    (0x8298, "copyright"),
];
const TAG_ORIENTATION: u16 = 0x0112;
const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;

fn parse_exif(data: &[u8], record: &mut MetadataRecord) -> EngineResult<()> {
    let little = match data.get(0..2) {
        Some(b"II") => true,
        Some(b"MM") => false,
        _ => return Err(EngineError::Backend("EXIF byte order marker missing".into())),
    };
    let tiff = Tiff { data, little };
    if tiff.u16(2)? != 42 {
        return Err(EngineError::Backend("EXIF TIFF magic mismatch".into()));
    }

    let ifd = tiff.u32(4)? as usize;
    let count = tiff.u16(ifd)? as usize;
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        let tag = tiff.u16(entry)?;
        let kind = tiff.u16(entry + 2)?;
        let n = tiff.u32(entry + 4)? as usize;

        if tag == TAG_ORIENTATION && kind == TYPE_SHORT {
            record.push("orientation", tiff.u16(entry + 8)?);
            continue;
        }
        let Some(&(_, name)) = EXIF_ASCII_TAGS.iter().find(|(t, _)| *t == tag) else {
            continue;
        };
        if kind != TYPE_ASCII {
            continue;
        }
        // Values of four bytes or fewer are stored inline.
        let start = if n <= 4 { entry + 8 } else { tiff.u32(entry + 8)? as usize };
        let raw = data.get(start..start + n).ok_or_else(|| truncated("EXIF string"))?;
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_end_matches('\0').trim();
        if !text.is_empty() {
            record.push(name, text);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut h = PNG_MAGIC.to_vec();
        h.extend_from_slice(&13u32.to_be_bytes());
        h.extend_from_slice(b"IHDR");
        h.extend_from_slice(&width.to_be_bytes());
        h.extend_from_slice(&height.to_be_bytes());
        h.extend_from_slice(&[8, 6, 0, 0, 0]);
        h
    }

    /// Big-endian EXIF block with Make="Acme" (inline) and Model="Spyglass 9".
    fn exif_block() -> Vec<u8> {
        let mut t = b"MM".to_vec();
        t.extend_from_slice(&42u16.to_be_bytes());
        t.extend_from_slice(&8u32.to_be_bytes());
        t.extend_from_slice(&3u16.to_be_bytes());
        let value_area = 8 + 2 + 3 * 12 + 4;
        // Make: 4 bytes inline ("Acm\0")
        t.extend_from_slice(&0x010Fu16.to_be_bytes());
        t.extend_from_slice(&TYPE_ASCII.to_be_bytes());
        t.extend_from_slice(&4u32.to_be_bytes());
        t.extend_from_slice(b"Acm\0");
        // Model: 11 bytes at value_area
        t.extend_from_slice(&0x0110u16.to_be_bytes());
        t.extend_from_slice(&TYPE_ASCII.to_be_bytes());
        t.extend_from_slice(&11u32.to_be_bytes());
        t.extend_from_slice(&(value_area as u32).to_be_bytes());
        // Orientation = 6
        t.extend_from_slice(&TAG_ORIENTATION.to_be_bytes());
        t.extend_from_slice(&TYPE_SHORT.to_be_bytes());
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&[0, 6, 0, 0]);
        t.extend_from_slice(&0u32.to_be_bytes());
        t.extend_from_slice(b"Spyglass 9\0");
        t
    }

    fn jpeg_with_exif() -> Vec<u8> {
        let exif = exif_block();
        let mut h = vec![0xFF, 0xD8, 0xFF, 0xE1];
        h.extend_from_slice(&((2 + EXIF_PREFIX.len() + exif.len()) as u16).to_be_bytes());
        h.extend_from_slice(EXIF_PREFIX);
        h.extend_from_slice(&exif);
        // SOF0: precision 8, 480x640, 3 components
        h.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 8, 0x01, 0xE0, 0x02, 0x80, 3]);
        h.extend_from_slice(&[0u8; 9]);
        h.extend_from_slice(&[0xFF, 0xDA]);
        h
    }

    fn expect_record(outcome: MetadataOutcome) -> MetadataRecord {
        match outcome {
            MetadataOutcome::Record(r) => r,
            MetadataOutcome::NoStructuredData => panic!("expected a record"),
        }
    }

    #[test]
    fn png_dimensions() {
        let record = expect_record(parse_metadata(&png_header(640, 480)).unwrap());
        assert_eq!(record.format, "PNG");
        assert_eq!(record.get("width"), Some("640"));
        assert_eq!(record.get("height"), Some("480"));
        assert_eq!(record.get("color_type"), Some("RGBA"));
    }

    #[test]
    fn truncated_png_is_backend_error() {
        let header = &png_header(1, 1)[..20];
        assert!(matches!(parse_metadata(header), Err(EngineError::Backend(_))));
    }

    #[test]
    fn gif_screen_size() {
        let mut h = b"GIF89a".to_vec();
        h.extend_from_slice(&[0x20, 0x00, 0x10, 0x00]);
        let record = expect_record(parse_metadata(&h).unwrap());
        assert_eq!(record.get("version"), Some("89a"));
        assert_eq!(record.get("width"), Some("32"));
        assert_eq!(record.get("height"), Some("16"));
    }

    #[test]
    fn jpeg_exif_and_sof() {
        let record = expect_record(parse_metadata(&jpeg_with_exif()).unwrap());
        assert_eq!(record.format, "JPEG");
        assert_eq!(record.get("make"), Some("Acm"));
        assert_eq!(record.get("model"), Some("Spyglass 9"));
        assert_eq!(record.get("orientation"), Some("6"));
        assert_eq!(record.get("width"), Some("640"));
        assert_eq!(record.get("height"), Some("480"));
    }

    #[test]
    fn jpeg_without_exif_still_yields_record() {
        let h = [0xFF, 0xD8, 0xFF, 0xDA, 0x00, 0x00];
        let record = expect_record(parse_metadata(&h).unwrap());
        assert_eq!(record.format, "JPEG");
        assert!(record.fields.is_empty());
    }

    #[test]
    fn unknown_format_is_not_an_error() {
        assert_eq!(parse_metadata(b"plain text file").unwrap(), MetadataOutcome::NoStructuredData);
        assert_eq!(parse_metadata(&[]).unwrap(), MetadataOutcome::NoStructuredData);
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(MetadataOutcome::NoStructuredData).unwrap();
        assert_eq!(json["kind"], "no_structured_data");
    }
}
