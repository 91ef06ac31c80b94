//! # Transmit Collaborator
//!
//! The emulator never touches the network itself. Every dispatched packet
//! (and every duplicate) is handed to a [`Transmit`] implementation, which
//! performs the real datagram send.

use anyhow::Result;

use crate::packet::Packet;

/// Real datagram send performed when a packet's delay runs out.
///
/// Errors are logged and counted by the dispatcher, never retried and never
/// reported back to the original sender.
pub trait Transmit: Send + Sync {
    /// Sends `packet` once. Returns the number of bytes written.
    fn transmit(&self, packet: &Packet) -> Result<usize>;
}

impl<F> Transmit for F
where
    F: Fn(&Packet) -> Result<usize> + Send + Sync,
{
    fn transmit(&self, packet: &Packet) -> Result<usize> {
        self(packet)
    }
}

#[cfg(unix)]
pub use self::unix::{sockaddr_bytes, SocketTransmitter};

#[cfg(unix)]
mod unix {
    use std::io;
    use std::mem;
    use std::net::SocketAddr;

    use anyhow::{anyhow, bail, Result};
    use bytes::Bytes;

    use super::Transmit;
    use crate::packet::Packet;

    /// `sendto(2)` on the raw descriptor carried in the packet's
    /// [`SocketHandle`](crate::packet::SocketHandle).
    ///
    /// The destination bytes are passed as the `sockaddr` argument verbatim;
    /// build them with [`sockaddr_bytes`]. An empty destination sends on a
    /// connected socket.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SocketTransmitter;

    impl Transmit for SocketTransmitter {
        fn transmit(&self, packet: &Packet) -> Result<usize> {
            let fd = libc::c_int::try_from(packet.socket.0)
                .map_err(|_| anyhow!("socket handle {} is not a descriptor", packet.socket.0))?;

            let addr_len = packet.destination.len();
            if addr_len > mem::size_of::<libc::sockaddr_storage>() {
                bail!("destination address too long ({addr_len} bytes)");
            }

            // SAFETY: all-zero is a valid sockaddr_storage.
            let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
            // SAFETY: addr_len fits in storage (checked above); copying into
            // sockaddr_storage fixes the alignment of the caller's bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    packet.destination.as_ptr(),
                    (&mut storage as *mut libc::sockaddr_storage).cast::<u8>(),
                    addr_len,
                );
            }
            let addr_ptr = if addr_len == 0 {
                std::ptr::null()
            } else {
                (&storage as *const libc::sockaddr_storage).cast::<libc::sockaddr>()
            };

            // SAFETY: payload and address pointers are valid for the lengths
            // passed and outlive the call.
            let sent = unsafe {
                libc::sendto(
                    fd,
                    packet.payload.as_ptr().cast::<libc::c_void>(),
                    packet.payload.len(),
                    packet.flags,
                    addr_ptr,
                    addr_len as libc::socklen_t,
                )
            };
            if sent < 0 {
                return Err(io::Error::last_os_error().into());
            }
            Ok(sent as usize)
        }
    }

    /// Encodes `addr` as raw `sockaddr_in` / `sockaddr_in6` bytes, the
    /// destination format [`SocketTransmitter`] expects.
    pub fn sockaddr_bytes(addr: SocketAddr) -> Bytes {
        match addr {
            SocketAddr::V4(v4) => {
                // SAFETY: all-zero is a valid sockaddr_in.
                let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
                raw_bytes(&sin)
            }
            SocketAddr::V6(v6) => {
                // SAFETY: all-zero is a valid sockaddr_in6.
                let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                sin6.sin6_scope_id = v6.scope_id();
                raw_bytes(&sin6)
            }
        }
    }

    fn raw_bytes<T>(value: &T) -> Bytes {
        // SAFETY: only called with zero-initialised C address structs, so
        // every byte (padding included) is initialised.
        let raw = unsafe {
            std::slice::from_raw_parts((value as *const T).cast::<u8>(), mem::size_of::<T>())
        };
        Bytes::copy_from_slice(raw)
    }
}
