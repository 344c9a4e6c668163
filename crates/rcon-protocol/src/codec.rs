//! `tokio_util` codec adapter over a `BytesMut` read buffer.
//!
//! The decoder buffers partial reads until a whole frame is available and
//! validates the size prefix before reserving space for the rest of it.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::packet::{decode, frame_size, write_frame, CodecError, Packet, Role, HEADER_LEN};

/// Frame codec for one side of an RCON stream.
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    /// Who writes through this codec. The peer is the opposite role.
    local: Role,
}

impl PacketCodec {
    /// Codec for a console client: encodes requests, decodes server replies.
    pub const fn client() -> Self {
        Self { local: Role::Client }
    }

    /// Codec for a game server: encodes replies, decodes client requests.
    pub const fn server() -> Self {
        Self { local: Role::Server }
    }

    /// Role of the local endpoint.
    pub const fn role(&self) -> Role {
        self.local
    }

    const fn peer(&self) -> Role {
        match self.local {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::client()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        let Some(header) = src
            .get(..HEADER_LEN)
            .and_then(|h| <[u8; HEADER_LEN]>::try_from(h).ok())
        else {
            return Ok(None);
        };

        let size = frame_size(header)?;
        let total = HEADER_LEN + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total);
        let (_, body) = frame.split_at(HEADER_LEN);
        let packet = decode(header, body, self.peer())?;

        trace!(
            request_id = packet.request_id,
            packet_type = ?packet.packet_type,
            size = packet.size,
            "Decoded packet"
        );

        Ok(Some(packet))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        write_frame(
            dst,
            item.request_id,
            item.packet_type,
            &item.body,
            self.local.max_body_len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn encoded(codec: &mut PacketCodec, packet: Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let mut server = PacketCodec::server();
        let mut client = PacketCodec::client();
        let frame = encoded(&mut server, Packet::new(4, PacketType::ResponseValue, "hello"));

        let mut src = BytesMut::new();
        src.extend_from_slice(&frame[..2]);
        assert!(client.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame[2..9]);
        assert!(client.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&frame[9..]);
        let packet = client.decode(&mut src).unwrap().unwrap();
        assert_eq!(packet.request_id, 4);
        assert_eq!(packet.body, b"hello");
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_two_frames_in_one_buffer() {
        let mut server = PacketCodec::server();
        let mut client = PacketCodec::client();
        let mut src = encoded(&mut server, Packet::new(1, PacketType::ResponseValue, "a"));
        src.extend_from_slice(&encoded(
            &mut server,
            Packet::new(1, PacketType::ResponseValue, "b"),
        ));

        assert_eq!(client.decode(&mut src).unwrap().unwrap().body, b"a");
        assert!(!src.is_empty());
        assert_eq!(client.decode(&mut src).unwrap().unwrap().body, b"b");
        assert!(src.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_size_before_buffering() {
        let mut client = PacketCodec::client();
        let mut src = BytesMut::from(&i32::MAX.to_le_bytes()[..]);
        let err = client.decode(&mut src).unwrap_err();
        assert!(matches!(err, CodecError::InvalidSize(i32::MAX)));
        assert!(src.capacity() < 1024);
    }

    #[test]
    fn test_roles_disambiguate_type_two() {
        let mut client = PacketCodec::client();
        let mut server = PacketCodec::server();

        // A client EXEC_COMMAND is read by the server as EXEC_COMMAND...
        let mut src = encoded(&mut client, Packet::new(2, PacketType::ExecCommand, "status"));
        let packet = server.decode(&mut src).unwrap().unwrap();
        assert_eq!(packet.packet_type, PacketType::ExecCommand);

        // ...and the same value from a server is an AUTH_RESPONSE.
        let mut src = encoded(&mut server, Packet::new(2, PacketType::AuthResponse, ""));
        let packet = client.decode(&mut src).unwrap().unwrap();
        assert_eq!(packet.packet_type, PacketType::AuthResponse);
    }

    #[test]
    fn test_body_limit_follows_role() {
        let long = vec![b'x'; 1000];
        let mut buf = BytesMut::new();
        assert!(matches!(
            PacketCodec::client().encode(
                Packet::new(1, PacketType::ExecCommand, long.clone()),
                &mut buf
            ),
            Err(CodecError::CommandTooLarge { .. })
        ));
        assert!(PacketCodec::server()
            .encode(Packet::new(1, PacketType::ResponseValue, long), &mut buf)
            .is_ok());
    }

    #[tokio::test]
    async fn test_decode_over_split_writes() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut codec = PacketCodec::client();

        let frame = encoded(
            &mut PacketCodec::server(),
            Packet::new(9, PacketType::ResponseValue, "split across writes"),
        );
        let (first, second) = frame.split_at(6);
        let (first, second) = (first.to_vec(), second.to_vec());

        tokio::spawn(async move {
            tx.write_all(&first).await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(&second).await.unwrap();
        });

        let mut buf = BytesMut::new();
        let packet = loop {
            if let Some(packet) = codec.decode(&mut buf).unwrap() {
                break packet;
            }
            assert!(rx.read_buf(&mut buf).await.unwrap() > 0);
        };
        assert_eq!(packet.body_text(), "split across writes");
    }
}
