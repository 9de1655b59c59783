//! Framed packet I/O over one byte stream.
//!
//! Each packet is the fixed 17-byte header followed by the payload; the
//! channel computes and verifies the payload CRC and assigns the monotonic
//! per-direction packet id on send. The module is generic over the stream
//! type, so the same logic runs over TCP sockets and the in-memory duplex
//! pairs used in tests.
//!
//! Reads and writes are serialized by `&mut` ownership: the dialog driver
//! owns the write half, its read task owns the read half, so packets hit
//! the wire in submission order and arrive in wire order.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{lookup_host, TcpStream};
use tracing::trace;

use extio_wire::{crc32, PacketHeader, PacketType, HEADER_LEN, MAX_PAYLOAD_SIZE};

use crate::error::ChannelError;

/// A fully received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Framed channel owning the whole stream. [`split`](Self::split) it when a
/// reader task and a writer need to run concurrently.
pub struct PacketChannel<S> {
    stream: S,
    next_id: u64,
}

impl<S> std::fmt::Debug for PacketChannel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketChannel")
            .field("next_id", &self.next_id)
            .finish()
    }
}

/// Receiving half of a split [`PacketChannel`].
pub struct PacketReader<R> {
    reader: R,
}

/// Sending half of a split [`PacketChannel`]. Carries the packet-id counter.
pub struct PacketWriter<W> {
    writer: W,
    next_id: u64,
}

impl PacketChannel<TcpStream> {
    /// Resolve `host`, pick the first IPv4 endpoint, connect, and enable
    /// TCP keep-alive.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ChannelError> {
        trace!(host, port, "resolving");
        let addr = lookup_host((host, port))
            .await?
            .find(|a| a.is_ipv4())
            .ok_or(ChannelError::NoAddress)?;

        trace!(%addr, "connecting");
        let stream = TcpStream::connect(addr).await?;
        set_keep_alive(&stream)?;
        Ok(Self::new(stream))
    }
}

impl<S> PacketChannel<S> {
    /// Adopt an already connected stream (an accepted socket, a duplex pipe).
    pub fn new(stream: S) -> Self {
        Self { stream, next_id: 0 }
    }
}

impl<S: AsyncRead + AsyncWrite> PacketChannel<S> {
    /// Split into independently owned read and write halves.
    pub fn split(self) -> (PacketReader<ReadHalf<S>>, PacketWriter<WriteHalf<S>>) {
        let (r, w) = tokio::io::split(self.stream);
        (
            PacketReader { reader: r },
            PacketWriter {
                writer: w,
                next_id: self.next_id,
            },
        )
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketChannel<S> {
    /// Send one packet; returns the id it was assigned.
    pub async fn send(&mut self, kind: PacketType, payload: &[u8]) -> Result<u64, ChannelError> {
        write_packet(&mut self.stream, &mut self.next_id, kind, payload).await
    }

    /// Receive one packet. `Ok(None)` means the peer closed the connection
    /// cleanly at a packet boundary.
    pub async fn recv(&mut self) -> Result<Option<Packet>, ChannelError> {
        read_packet(&mut self.stream).await
    }

    /// [`recv`](Self::recv) bounded by a timer; `Ok(None)` on expiry.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Packet>, ChannelError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .unwrap_or(Ok(None))
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub async fn recv(&mut self) -> Result<Option<Packet>, ChannelError> {
        read_packet(&mut self.reader).await
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub async fn send(&mut self, kind: PacketType, payload: &[u8]) -> Result<u64, ChannelError> {
        write_packet(&mut self.writer, &mut self.next_id, kind, payload).await
    }
}

async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    next_id: &mut u64,
    kind: PacketType,
    payload: &[u8],
) -> Result<u64, ChannelError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ChannelError::PayloadTooLarge(payload.len() as u32));
    }

    let id = *next_id;
    *next_id += 1;

    let header = PacketHeader {
        kind,
        size: payload.len() as u32,
        crc: crc32(payload),
        id,
    };
    writer.write_all(&header.encode()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(id)
}

async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Packet>, ChannelError> {
    let mut head = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader.read(&mut head[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("eof after {filled} header bytes"),
            )));
        }
        filled += n;
    }

    let header = PacketHeader::decode(&head).map_err(ChannelError::BadPacketType)?;
    if header.size as usize > MAX_PAYLOAD_SIZE {
        return Err(ChannelError::PayloadTooLarge(header.size));
    }

    let mut payload = vec![0u8; header.size as usize];
    reader.read_exact(&mut payload).await?;

    let actual = crc32(&payload);
    if actual != header.crc {
        trace!(
            kind = ?header.kind,
            size = header.size,
            id = header.id,
            expected = header.crc,
            actual,
            "packet crc error"
        );
        return Err(ChannelError::CrcMismatch {
            expected: header.crc,
            actual,
        });
    }

    Ok(Some(Packet {
        kind: header.kind,
        id: header.id,
        payload,
    }))
}

/// Enable SO_KEEPALIVE on a connected socket.
#[cfg(unix)]
pub fn set_keep_alive<F: std::os::fd::AsRawFd>(socket: &F) -> std::io::Result<()> {
    let on: libc::c_int = 1;
    // Safety: the fd is a valid open socket for the duration of the call.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_keep_alive<F>(_socket: &F) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn packet_roundtrip_with_increasing_ids() {
        let (a, b) = duplex(64 * 1024);
        let mut tx = PacketChannel::new(a);
        let mut rx = PacketChannel::new(b);

        for expected_id in 0..3u64 {
            let payload = vec![expected_id as u8; 16];
            let id = tx.send(PacketType::Message, &payload).await.unwrap();
            assert_eq!(id, expected_id);

            let pkt = rx.recv().await.unwrap().expect("expected packet");
            assert_eq!(pkt.kind, PacketType::Message);
            assert_eq!(pkt.id, expected_id);
            assert_eq!(pkt.payload, payload);
        }
    }

    #[tokio::test]
    async fn zero_length_payload_is_delivered() {
        let (a, b) = duplex(1024);
        let mut tx = PacketChannel::new(a);
        let mut rx = PacketChannel::new(b);

        tx.send(PacketType::RawData, &[]).await.unwrap();
        let pkt = rx.recv().await.unwrap().expect("expected packet");
        assert_eq!(pkt.kind, PacketType::RawData);
        assert!(pkt.payload.is_empty());
    }

    #[tokio::test]
    async fn max_payload_accepted_oversize_rejected() {
        let (a, b) = duplex(4 * 1024 * 1024);
        let mut tx = PacketChannel::new(a);
        let mut rx = PacketChannel::new(b);

        let max = vec![0x5A; MAX_PAYLOAD_SIZE];
        tx.send(PacketType::Message, &max).await.unwrap();
        let pkt = rx.recv().await.unwrap().expect("expected packet");
        assert_eq!(pkt.payload.len(), MAX_PAYLOAD_SIZE);

        let over = vec![0; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            tx.send(PacketType::Message, &over).await,
            Err(ChannelError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn oversize_header_announcement_is_rejected() {
        let (mut raw, b) = duplex(1024);
        let mut rx = PacketChannel::new(b);

        let header = PacketHeader {
            kind: PacketType::Message,
            size: (MAX_PAYLOAD_SIZE + 1) as u32,
            crc: 0,
            id: 0,
        };
        tokio::io::AsyncWriteExt::write_all(&mut raw, &header.encode())
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Err(ChannelError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn bad_type_byte_is_rejected() {
        let (mut raw, b) = duplex(1024);
        let mut rx = PacketChannel::new(b);

        let mut bytes = PacketHeader {
            kind: PacketType::Message,
            size: 0,
            crc: 0,
            id: 0,
        }
        .encode();
        bytes[0] = 0x42;
        tokio::io::AsyncWriteExt::write_all(&mut raw, &bytes)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Err(ChannelError::BadPacketType(0x42))
        ));
    }

    #[tokio::test]
    async fn crc_mismatch_is_rejected() {
        let (mut raw, b) = duplex(1024);
        let mut rx = PacketChannel::new(b);

        let payload = b"iq samples";
        let header = PacketHeader {
            kind: PacketType::Message,
            size: payload.len() as u32,
            crc: crc32(payload) ^ 1,
            id: 0,
        };
        tokio::io::AsyncWriteExt::write_all(&mut raw, &header.encode())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut raw, payload)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await,
            Err(ChannelError::CrcMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn clean_eof_returns_none_partial_header_errors() {
        let (raw, b) = duplex(1024);
        let mut rx = PacketChannel::new(b);
        drop(raw);
        assert!(rx.recv().await.unwrap().is_none());

        let (mut raw, b) = duplex(1024);
        let mut rx = PacketChannel::new(b);
        tokio::io::AsyncWriteExt::write_all(&mut raw, &[1, 2, 3])
            .await
            .unwrap();
        drop(raw);
        match rx.recv().await {
            Err(ChannelError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected eof error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recv_timeout_expires_quietly() {
        let (_raw, b) = duplex(1024);
        let mut rx = PacketChannel::new(b);
        let got = rx.recv_timeout(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn split_halves_share_the_id_sequence() {
        let (a, b) = duplex(1024);
        let mut whole = PacketChannel::new(a);
        whole.send(PacketType::Message, b"first").await.unwrap();

        let (_reader, mut writer) = whole.split();
        let id = writer.send(PacketType::Message, b"second").await.unwrap();
        assert_eq!(id, 1);

        let mut rx = PacketChannel::new(b);
        assert_eq!(rx.recv().await.unwrap().unwrap().id, 0);
        assert_eq!(rx.recv().await.unwrap().unwrap().id, 1);
    }
}
