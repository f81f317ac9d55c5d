//! Byte formatting tables for the hex grid.

/// Glyphs drawn for bytes whose chunk has not arrived yet. They must never
/// look like a real byte, in particular not like `00` / `.`.
pub const PLACEHOLDER_HEX: &str = "··";
pub const PLACEHOLDER_CHAR: char = '·';

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Uppercase hex pair for a byte.
pub fn hex_pair(byte: u8) -> [char; 2] {
    [
        HEX_DIGITS[(byte >> 4) as usize] as char,
        HEX_DIGITS[(byte & 0x0F) as usize] as char,
    ]
}

pub fn hex_pair_string(byte: u8) -> String {
    hex_pair(byte).iter().collect()
}

/// Printable ASCII maps to itself, everything else to `.`.
pub fn ascii_char(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '.'
    }
}

/// Offset column width: 8 digits, 16 for files beyond 4 GiB.
pub fn offset_digits(file_size: u64) -> usize {
    if file_size > u32::MAX as u64 { 16 } else { 8 }
}

pub fn format_offset(offset: u64, digits: usize) -> String {
    format!("{:0width$X}", offset, width = digits)
}

/// Parse a go-to-offset input: decimal, `0x` hex, or hex with an `h` suffix.
pub fn parse_offset(text: &str) -> Option<u64> {
    let text = text.trim().replace('_', "");
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = text.strip_suffix('h').or_else(|| text.strip_suffix('H')) {
        return u64::from_str_radix(hex, 16).ok();
    }
    text.parse().ok()
}
