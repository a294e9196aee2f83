//! IEEE 488.2 arbitrary block data.
//!
//! Definite form: `#<n><len><data>` where `<n>` is the number of digits of
//! `<len>`. Indefinite form: `#0<data>` terminated by the line end.

use crate::error::{ScpiError, ScpiResult};

/// Parsed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeader {
    /// Length-prefixed payload.
    Definite {
        /// Bytes of `#`, digit count and length field.
        header_len: usize,
        /// Payload length in bytes.
        data_len: usize,
    },
    /// `#0`: payload runs to the terminator.
    Indefinite,
}

/// Encode `data` as a definite length block.
pub fn encode_block(data: &[u8]) -> Vec<u8> {
    let len = data.len().to_string();
    let mut out = Vec::with_capacity(2 + len.len() + data.len());
    out.push(b'#');
    out.extend_from_slice(len.len().to_string().as_bytes());
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(data);
    out
}

/// Number of header bytes needed after `#` and the digit count.
pub fn length_digits(digit: u8) -> ScpiResult<usize> {
    if digit.is_ascii_digit() {
        Ok((digit - b'0') as usize)
    } else {
        Err(ScpiError::BinaryBlock(format!(
            "invalid length digit '{}'",
            digit.escape_ascii()
        )))
    }
}

/// Parse the header at the start of `bytes`.
///
/// `bytes` must contain at least the full header.
pub fn parse_block_header(bytes: &[u8]) -> ScpiResult<BlockHeader> {
    match bytes.first() {
        Some(b'#') => {}
        Some(other) => {
            return Err(ScpiError::BinaryBlock(format!(
                "expected '#', found '{}'",
                other.escape_ascii()
            )))
        }
        None => return Err(ScpiError::BinaryBlock("empty block".into())),
    }
    let digits = length_digits(
        *bytes
            .get(1)
            .ok_or_else(|| ScpiError::BinaryBlock("missing length digit".into()))?,
    )?;
    if digits == 0 {
        return Ok(BlockHeader::Indefinite);
    }
    let len_bytes = bytes
        .get(2..2 + digits)
        .ok_or_else(|| ScpiError::BinaryBlock("truncated length field".into()))?;
    let data_len = parse_length(len_bytes)?;
    Ok(BlockHeader::Definite {
        header_len: 2 + digits,
        data_len,
    })
}

/// Parse the ASCII length field of a definite block.
pub fn parse_length(len_bytes: &[u8]) -> ScpiResult<usize> {
    std::str::from_utf8(len_bytes)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| {
            ScpiError::BinaryBlock(format!(
                "invalid length field '{}'",
                len_bytes.escape_ascii()
            ))
        })
}

/// Extract the payload of a complete block held in memory.
pub fn decode_block(bytes: &[u8]) -> ScpiResult<&[u8]> {
    match parse_block_header(bytes)? {
        BlockHeader::Definite {
            header_len,
            data_len,
        } => bytes
            .get(header_len..header_len + data_len)
            .ok_or_else(|| {
                ScpiError::BinaryBlock(format!(
                    "expected {} data bytes, got {}",
                    data_len,
                    bytes.len().saturating_sub(header_len)
                ))
            }),
        BlockHeader::Indefinite => {
            let data = &bytes[2..];
            Ok(data.strip_suffix(b"\n").unwrap_or(data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_block() {
        assert_eq!(encode_block(b"ABC"), b"#13ABC".to_vec());
        let big = vec![0u8; 1200];
        assert!(encode_block(&big).starts_with(b"#41200"));
        assert_eq!(encode_block(b""), b"#10".to_vec());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_block_header(b"#210..........").unwrap(),
            BlockHeader::Definite {
                header_len: 4,
                data_len: 10
            }
        );
        assert_eq!(parse_block_header(b"#0abc").unwrap(), BlockHeader::Indefinite);
        assert!(parse_block_header(b"12").is_err());
        assert!(parse_block_header(b"#x").is_err());
        assert!(parse_block_header(b"#3 1").is_err());
    }

    #[test]
    fn test_decode_block() {
        assert_eq!(decode_block(b"#15hello\n").unwrap(), b"hello");
        assert_eq!(decode_block(b"#0raw bytes\n").unwrap(), b"raw bytes");
        assert!(decode_block(b"#15hel").is_err());
    }
}
