use std::fmt::Write;

use aws_lc_rs::rand::{SecureRandom, SystemRandom};

/// Parse a UUID string (with or without dashes) into 16 bytes.
///
/// Any version is accepted, the identity is only ever compared byte for byte.
#[inline]
pub fn parse_uuid(uuid_str: &str) -> std::io::Result<[u8; 16]> {
    let mut bytes = [0u8; 16];
    let mut len = 0usize;
    let mut first_nibble: Option<u8> = None;
    for &c in uuid_str.trim().as_bytes() {
        let hex = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            b'-' => continue,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid uuid: {uuid_str}"),
                ));
            }
        };
        if let Some(first) = first_nibble.take() {
            if len == bytes.len() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid uuid: {uuid_str}"),
                ));
            }
            bytes[len] = (first << 4) | hex;
            len += 1;
        } else {
            first_nibble = Some(hex);
        }
    }
    if first_nibble.is_some() || len != 16 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid uuid: {uuid_str}"),
        ));
    }

    Ok(bytes)
}

/// Formats 16 bytes in the canonical 8-4-4-4-12 form.
pub fn format_uuid(bytes: &[u8; 16]) -> String {
    let mut s = String::with_capacity(36);
    for (i, &b) in bytes.iter().enumerate() {
        if i == 4 || i == 6 || i == 8 || i == 10 {
            s.push('-');
        }
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a random UUID v4 and return it as a formatted string.
#[inline]
pub fn generate_uuid() -> std::io::Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes)
        .map_err(|_| std::io::Error::other("system RNG failed"))?;

    // Set version (4) in bits 12-15 of byte 6
    bytes[6] = (bytes[6] & 0x0f) | 0x40;

    // Set variant (RFC 4122) in bits 6-7 of byte 8
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Ok(format_uuid(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_format() {
        let uuid = generate_uuid().unwrap();
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.chars().nth(8), Some('-'));
        assert_eq!(uuid.chars().nth(13), Some('-'));
        assert_eq!(uuid.chars().nth(18), Some('-'));
        assert_eq!(uuid.chars().nth(23), Some('-'));
        assert_eq!(uuid.chars().nth(14), Some('4'));
    }

    #[test]
    fn test_generate_uuid_roundtrip() {
        let uuid = generate_uuid().unwrap();
        let bytes = parse_uuid(&uuid).unwrap();
        assert_eq!(format_uuid(&bytes), uuid);
    }

    #[test]
    fn test_parse_uuid_with_and_without_dashes() {
        let with_dashes = parse_uuid("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let without_dashes = parse_uuid("550E8400E29B41D4A716446655440000").unwrap();
        assert_eq!(with_dashes, without_dashes);
        assert_eq!(with_dashes[0], 0x55);
        assert_eq!(with_dashes[15], 0x00);
    }

    #[test]
    fn test_parse_uuid_accepts_any_version() {
        assert!(parse_uuid("550e8400-e29b-11d4-c716-446655440000").is_ok());
    }

    #[test]
    fn test_parse_uuid_rejects_bad_input() {
        assert!(parse_uuid("550e8400-e29b-41d4-a716-4466554400").is_err());
        assert!(parse_uuid("550e8400-e29b-41d4-a716-44665544000000").is_err());
        assert!(parse_uuid("550e8400-e29b-41d4-a716-44665544000g").is_err());
        assert!(parse_uuid("550e8400-e29b-41d4-a716-44665544000").is_err());
    }
}
