//! 0-RTT early data carried in the `Sec-WebSocket-Protocol` request header.

use base64::engine::{Engine as _, general_purpose::STANDARD_NO_PAD};
use bytes::Bytes;

/// Decodes a URL-safe base64 early data value.
///
/// `-` and `_` are mapped back to the standard alphabet and padding is optional. A missing
/// or empty value is not an error and yields `None`.
pub fn decode_early_data(encoded: Option<&str>) -> std::io::Result<Option<Bytes>> {
    let encoded = match encoded.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(None),
    };

    let standard: String = encoded
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();

    let decoded = STANDARD_NO_PAD.decode(standard.as_bytes()).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid early data: {e}"),
        )
    })?;

    if decoded.is_empty() {
        return Ok(None);
    }
    Ok(Some(Bytes::from(decoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_or_empty() {
        assert!(decode_early_data(None).unwrap().is_none());
        assert!(decode_early_data(Some("")).unwrap().is_none());
        assert!(decode_early_data(Some("  ")).unwrap().is_none());
    }

    #[test]
    fn test_decode_two_bytes() {
        // [0x01, 0x02] is "AQI=" in standard base64.
        let decoded = decode_early_data(Some("AQI")).unwrap().unwrap();
        assert_eq!(&decoded[..], &[0x01, 0x02]);

        let decoded = decode_early_data(Some("AQI=")).unwrap().unwrap();
        assert_eq!(&decoded[..], &[0x01, 0x02]);
    }

    #[test]
    fn test_url_safe_alphabet() {
        // [0xfb, 0xff] is "+/8=" in standard base64 and "-_8" in the URL-safe form.
        let decoded = decode_early_data(Some("-_8")).unwrap().unwrap();
        assert_eq!(&decoded[..], &[0xfb, 0xff]);

        let decoded = decode_early_data(Some("+/8=")).unwrap().unwrap();
        assert_eq!(&decoded[..], &[0xfb, 0xff]);
    }

    #[test]
    fn test_invalid() {
        let e = decode_early_data(Some("not base64!")).unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_padding_only_at_the_end() {
        let e = decode_early_data(Some("AQ=I")).unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
    }
}
