//! VLESS request header decoding.
//!
//! ```text
//! version(1) | user id(16) | addons length N(1) | addons(N) | command(1) | port(2, BE)
//!   | address type(1) | address
//! ```
//!
//! The address is 4 bytes for IPv4, a length byte plus UTF-8 for a domain name, and 16
//! bytes for IPv6. Addon bytes are skipped without being interpreted.

use std::net::{Ipv4Addr, Ipv6Addr};

use subtle::ConstantTimeEq;

use crate::address::{Address, NetLocation};
use crate::uuid_util::format_uuid;

// VLESS protocol command types
pub const COMMAND_TCP: u8 = 1;
pub const COMMAND_UDP: u8 = 2;
pub const COMMAND_MUX: u8 = 3;

pub const ADDRESS_TYPE_IPV4: u8 = 1;
pub const ADDRESS_TYPE_DOMAIN: u8 = 2;
pub const ADDRESS_TYPE_IPV6: u8 = 3;

/// version + user id + addons length
pub const FIXED_PREFIX_LEN: usize = 18;

/// Upper bound for buffering a header that arrives over several messages. The largest
/// valid header (255 addon bytes and a 255 byte domain) is 534 bytes.
pub const MAX_HEADER_LEN: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub version: u8,
    pub user_id: [u8; 16],
    pub addons_length: u8,
    pub command: u8,
    pub location: NetLocation,
    /// Number of bytes consumed by the header; the payload starts here.
    pub header_len: usize,
}

#[derive(Debug)]
pub enum DecodeError {
    /// The buffer ends before the header does.
    Incomplete,
    Authentication { user_id: String },
    UnsupportedCommand(u8),
    UnsupportedAddressFamily(u8),
    InvalidHostname(std::str::Utf8Error),
}

impl DecodeError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, DecodeError::Incomplete)
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Incomplete => write!(f, "incomplete VLESS header"),
            DecodeError::Authentication { user_id } => write!(f, "unknown user id: {user_id}"),
            DecodeError::UnsupportedCommand(command) => {
                let name = match *command {
                    COMMAND_UDP => " (udp)",
                    COMMAND_MUX => " (mux)",
                    _ => "",
                };
                write!(f, "unsupported command {command}{name}")
            }
            DecodeError::UnsupportedAddressFamily(address_type) => {
                write!(f, "unsupported address type: {address_type}")
            }
            DecodeError::InvalidHostname(e) => write!(f, "failed to decode address: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::InvalidHostname(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for std::io::Error {
    fn from(e: DecodeError) -> Self {
        let kind = match e {
            DecodeError::Incomplete => std::io::ErrorKind::UnexpectedEof,
            DecodeError::Authentication { .. } => std::io::ErrorKind::PermissionDenied,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, e)
    }
}

struct HeaderReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> HeaderReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.data.get(self.offset).ok_or(DecodeError::Incomplete)?;
        self.offset += 1;
        Ok(b)
    }

    fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.offset + len;
        if end > self.data.len() {
            return Err(DecodeError::Incomplete);
        }
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }
}

/// Decodes a VLESS request header from the start of `data`.
///
/// Fields are checked in wire order, so a bad user id is reported before the command, and
/// an unsupported command before any address byte is looked at.
pub fn decode_request_header(
    data: &[u8],
    expected_user_id: &[u8; 16],
) -> Result<RequestHeader, DecodeError> {
    let mut reader = HeaderReader::new(data);

    let version = reader.read_u8()?;

    let mut user_id = [0u8; 16];
    user_id.copy_from_slice(reader.read_slice(16)?);
    if expected_user_id[..].ct_eq(&user_id[..]).unwrap_u8() == 0 {
        return Err(DecodeError::Authentication {
            user_id: format_uuid(&user_id),
        });
    }

    let addons_length = reader.read_u8()?;
    reader.read_slice(addons_length as usize)?;

    let command = reader.read_u8()?;
    if command != COMMAND_TCP {
        return Err(DecodeError::UnsupportedCommand(command));
    }

    let port = reader.read_u16_be()?;
    let address_type = reader.read_u8()?;
    let address = match address_type {
        ADDRESS_TYPE_IPV4 => {
            let b = reader.read_slice(4)?;
            Address::Ipv4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        ADDRESS_TYPE_DOMAIN => {
            let domain_name_len = reader.read_u8()?;
            let domain_name_bytes = reader.read_slice(domain_name_len as usize)?;
            let domain_name =
                std::str::from_utf8(domain_name_bytes).map_err(DecodeError::InvalidHostname)?;
            Address::Hostname(domain_name.to_string())
        }
        ADDRESS_TYPE_IPV6 => {
            let b = reader.read_slice(16)?;
            let mut segments = [0u16; 8];
            for (i, segment) in segments.iter_mut().enumerate() {
                *segment = u16::from_be_bytes([b[i * 2], b[i * 2 + 1]]);
            }
            Address::Ipv6(Ipv6Addr::from(segments))
        }
        unknown => return Err(DecodeError::UnsupportedAddressFamily(unknown)),
    };

    Ok(RequestHeader {
        version,
        user_id,
        addons_length,
        command,
        location: NetLocation::new(address, port),
        header_len: reader.offset,
    })
}
