use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use uuid::Uuid;

use crate::error::TransportError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifier of a cluster node.
pub type NodeId = SocketAddr;

/// Token a node reports for its current schema. Nodes agree when tokens are equal.
pub type SchemaVersion = Uuid;

/// Message opcodes of the native protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x00 => Opcode::Error,
            0x01 => Opcode::Startup,
            0x02 => Opcode::Ready,
            0x03 => Opcode::Authenticate,
            0x05 => Opcode::Options,
            0x06 => Opcode::Supported,
            0x07 => Opcode::Query,
            0x08 => Opcode::Result,
            0x09 => Opcode::Prepare,
            0x0A => Opcode::Execute,
            0x0B => Opcode::Register,
            0x0C => Opcode::Event,
            0x0D => Opcode::Batch,
            0x0E => Opcode::AuthChallenge,
            0x0F => Opcode::AuthResponse,
            0x10 => Opcode::AuthSuccess,
            _ => return None,
        };
        Some(opcode)
    }
}

/// A protocol message: opcode plus body. Header fields (version, stream id,
/// flags, length) belong to the framing layer beneath the transport.
#[derive(Debug, Clone)]
pub struct Frame {
    pub opcode: Opcode,
    pub body: Bytes,
}

impl Frame {
    pub fn new(opcode: Opcode, body: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            body: body.into(),
        }
    }
}

/// Request/response access to cluster nodes.
///
/// The engine doesn't know how connections are established, pooled or
/// authenticated; for the engine a cluster is just this trait. Dropping a
/// returned future must abandon the request without leaking the connection.
pub trait Transport: Send + Sync {
    /// Send a request frame to `node` and wait for its response frame.
    fn send(&self, node: NodeId, frame: Frame) -> BoxFuture<'_, Result<Frame, TransportError>>;

    /// Nodes currently known to the topology layer.
    fn known_nodes(&self) -> Vec<NodeId>;

    /// Schema version currently reported by `node`.
    fn schema_version(&self, node: NodeId) -> BoxFuture<'_, Result<SchemaVersion, TransportError>>;
}

/// Chooses the coordinator for one request.
pub trait LoadBalancer: Send + Sync {
    fn pick(&self, nodes: &[NodeId]) -> Option<NodeId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0u8..=0x10 {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(Opcode::from_u8(0x04), None);
        assert_eq!(Opcode::from_u8(0x11), None);
    }
}
