use bytes::Bytes;

/// Opaque handle of the socket a datagram is sent through.
///
/// The emulator never interprets it; it is handed back to the
/// [`Transmit`](crate::transmit::Transmit) collaborator unchanged. On unix the
/// built-in [`SocketTransmitter`](crate::transmit::SocketTransmitter) treats it
/// as a raw file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SocketHandle(pub i64);

#[cfg(unix)]
impl<T: std::os::fd::AsRawFd> From<&T> for SocketHandle {
    fn from(socket: &T) -> Self {
        SocketHandle(socket.as_raw_fd() as i64)
    }
}

/// A datagram held by the emulator between admission and dispatch.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Admission order id. Unique per emulator, diagnostic only.
    pub id: u64,
    pub socket: SocketHandle,
    /// Platform send flags, passed through untouched.
    pub flags: i32,
    /// Destination address bytes, passed through untouched.
    pub destination: Bytes,
    /// Owned copy of the caller's payload.
    pub payload: Bytes,
}

impl Packet {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
