//! Boundary to the command dispatcher
//!
//! The dispatcher decodes a command frame and writes a response frame. The
//! adapter treats both as opaque bytes.

/// Identifies the peer a command came from
pub type PeerHandle = u32;

/// Peer handle used for every command that arrived over MQTT
pub const PEER_MQTT: PeerHandle = 0xFFFF_0001;

/// Size of the response buffer handed to the dispatcher per command
pub const RESPONSE_BUFFER_SIZE: usize = 256;

/// Command dispatcher consumed by the adapter
pub trait Dispatcher: Send {
    /// Process `request` from `peer`, writing the reply into `response`.
    ///
    /// Returns the number of bytes written; `0` means there is nothing to send back.
    fn ingest(&mut self, peer: PeerHandle, request: &[u8], response: &mut [u8]) -> usize;
}

impl<F> Dispatcher for F
where
    F: FnMut(PeerHandle, &[u8], &mut [u8]) -> usize + Send,
{
    fn ingest(&mut self, peer: PeerHandle, request: &[u8], response: &mut [u8]) -> usize {
        self(peer, request, response)
    }
}

/// Copy `reply` into `response`, truncating to its capacity. Returns the copied length.
pub fn write_reply(response: &mut [u8], reply: &[u8]) -> usize {
    let len = reply.len().min(response.len());
    response[..len].copy_from_slice(&reply[..len]);
    len
}
