//! Packet error types.

use crate::IpProtocol;
use thiserror::Error;

/// Errors raised when constructing or parsing packet values.
///
/// These indicate a programming error in the caller, not agent behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Transport header does not agree with the IP protocol field.
    #[error("transport header is {transport} but IP protocol is {ip}")]
    ProtocolMismatch {
        /// Protocol declared by the IP packet.
        ip: IpProtocol,
        /// Protocol of the transport header supplied.
        transport: IpProtocol,
    },

    /// Malformed MAC address string.
    #[error("invalid MAC address: {0}")]
    InvalidMacAddress(String),

    /// Malformed IPv4 address or mask.
    #[error("invalid IPv4 address: {0}")]
    InvalidIpAddress(String),

    /// Unknown port name or out-of-range number.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Unknown protocol name.
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),
}
