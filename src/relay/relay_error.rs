use crate::address::NetLocation;
use crate::vless::DecodeError;

/// Why a tunneled connection, or one attempt of it, ended badly.
#[derive(Debug)]
pub enum RelayError {
    /// The request header was rejected. Never retried.
    Header(DecodeError),
    /// The header never completed: too long, timed out, or the caller went away first.
    MalformedHeader(String),
    /// Connect or write failure, or the destination closed before sending a byte. Handled
    /// by moving on to the next candidate.
    DestinationUnreachable {
        location: NetLocation,
        reason: std::io::Error,
    },
    /// The caller's connection closed or failed. Ends the attempt without fallback.
    TransportClosed(std::io::Error),
}

impl RelayError {
    pub fn destination_unreachable(location: &NetLocation, reason: std::io::Error) -> Self {
        RelayError::DestinationUnreachable {
            location: location.clone(),
            reason,
        }
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::Header(e) => write!(f, "invalid request header: {e}"),
            RelayError::MalformedHeader(reason) => write!(f, "malformed request header: {reason}"),
            RelayError::DestinationUnreachable { location, reason } => {
                write!(f, "destination {location} unreachable: {reason}")
            }
            RelayError::TransportClosed(reason) => write!(f, "caller connection closed: {reason}"),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Header(e) => Some(e),
            RelayError::MalformedHeader(_) => None,
            RelayError::DestinationUnreachable { reason, .. } => Some(reason),
            RelayError::TransportClosed(reason) => Some(reason),
        }
    }
}

impl From<DecodeError> for RelayError {
    fn from(e: DecodeError) -> Self {
        RelayError::Header(e)
    }
}

impl From<RelayError> for std::io::Error {
    fn from(e: RelayError) -> Self {
        let kind = match &e {
            RelayError::Header(DecodeError::Authentication { .. }) => {
                std::io::ErrorKind::PermissionDenied
            }
            RelayError::Header(_) | RelayError::MalformedHeader(_) => {
                std::io::ErrorKind::InvalidData
            }
            RelayError::DestinationUnreachable { reason, .. } => reason.kind(),
            RelayError::TransportClosed(_) => std::io::ErrorKind::ConnectionAborted,
        };
        std::io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;

    #[test]
    fn test_io_error_kinds() {
        let e: std::io::Error = RelayError::Header(DecodeError::UnsupportedAddressFamily(9)).into();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);

        let location = NetLocation::new(Address::Hostname("example.com".to_string()), 443);
        let e: std::io::Error = RelayError::destination_unreachable(
            &location,
            std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        )
        .into();
        assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused);
        assert!(e.to_string().contains("example.com:443"));

        let e: std::io::Error =
            RelayError::TransportClosed(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
                .into();
        assert_eq!(e.kind(), std::io::ErrorKind::ConnectionAborted);
    }
}
