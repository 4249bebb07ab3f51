//! HELLO / WELCOME / BYE exchange run when a subscriber connects.
//!
//! The subscriber sends HELLO naming its topics (and its public key on a
//! secured channel). The publisher answers WELCOME once the peer is
//! registered, sealing it when secured so the subscriber can check it holds
//! the right server key, or BYE with a reason.

use crate::transport::TransportError;
use bytes::{Bytes, BytesMut};
use topicnet_wire::{
    get_meta_bytes, get_meta_str, get_meta_str_list, get_meta_u32, parse_meta, ChannelCipher,
    Frame, FrameBuilder, FrameDecoder, FrameKind, DEFAULT_MAX_FRAME_SIZE, KEY_LEN, WIRE_VERSION,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

const WELCOME_TOKEN: &[u8] = b"topicnet-welcome";

/// HELLO message data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version
    pub version: u8,
    /// Topics the subscriber wants
    pub topics: Vec<String>,
    /// Subscriber public key on secured channels
    pub public_key: Option<[u8; KEY_LEN]>,
}

/// Send a HELLO frame to open a subscription
pub async fn send_hello<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    topics: &[String],
    public_key: Option<&[u8; KEY_LEN]>,
) -> Result<(), TransportError> {
    let mut builder = FrameBuilder::new(FrameKind::Hello)
        .meta_insert_u32("version", WIRE_VERSION as u32)
        .meta_insert_str_list("topics", topics);
    if let Some(key) = public_key {
        builder = builder.meta_insert_bytes("public_key", key);
    }

    let frame_bytes = builder.build(DEFAULT_MAX_FRAME_SIZE)?;
    writer.write_all(&frame_bytes).await?;
    debug!("Sent HELLO for {} topic(s)", topics.len());
    Ok(())
}

/// Read any frame from the socket
pub async fn recv_any_frame<R: AsyncReadExt + Unpin>(
    mut reader: R,
    decoder: &mut FrameDecoder,
    buffer: &mut BytesMut,
) -> Result<Frame, TransportError> {
    loop {
        if let Some(frame) = decoder.decode(buffer)? {
            return Ok(frame);
        }

        let bytes_read = reader.read_buf(buffer).await?;
        if bytes_read == 0 {
            return Err(TransportError::Closed);
        }

        trace!(
            "Read {} bytes, buffer now has {} bytes",
            bytes_read,
            buffer.len()
        );
    }
}

/// Parse a HELLO frame
pub fn parse_hello(frame: &Frame) -> Result<Hello, TransportError> {
    if frame.kind != FrameKind::Hello {
        return Err(TransportError::Handshake(format!(
            "expected HELLO, got {:?}",
            frame.kind
        )));
    }

    let meta = parse_meta(&frame.meta_raw)?;
    let version = get_meta_u32(&meta, "version").unwrap_or(WIRE_VERSION as u32) as u8;
    let topics = get_meta_str_list(&meta, "topics")
        .ok_or_else(|| TransportError::Handshake("HELLO without topics".to_string()))?;

    let public_key = match get_meta_bytes(&meta, "public_key") {
        Some(raw) => Some(<[u8; KEY_LEN]>::try_from(raw.as_slice()).map_err(|_| {
            TransportError::Handshake(format!("public key must be {} bytes", KEY_LEN))
        })?),
        None => None,
    };

    Ok(Hello {
        version,
        topics,
        public_key,
    })
}

/// Accept the subscriber, sealing the token when the channel is secured
pub async fn send_welcome<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    cipher: Option<&mut ChannelCipher>,
) -> Result<(), TransportError> {
    let builder = FrameBuilder::new(FrameKind::Welcome);
    let builder = match cipher {
        Some(cipher) => builder.sealed().payload(cipher.seal(&[], WELCOME_TOKEN)?),
        None => builder.payload(Bytes::from_static(WELCOME_TOKEN)),
    };

    writer.write_all(&builder.build(DEFAULT_MAX_FRAME_SIZE)?).await?;
    Ok(())
}

/// Refuse or end a connection with a reason
pub async fn send_bye<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    reason: &str,
) -> Result<(), TransportError> {
    let frame_bytes = FrameBuilder::new(FrameKind::Bye)
        .meta_insert_str("reason", reason)
        .build(DEFAULT_MAX_FRAME_SIZE)?;
    writer.write_all(&frame_bytes).await?;
    Ok(())
}

/// Reason carried by a BYE frame
pub fn bye_reason(frame: &Frame) -> String {
    parse_meta(&frame.meta_raw)
        .ok()
        .and_then(|meta| get_meta_str(&meta, "reason"))
        .unwrap_or_else(|| "no reason given".to_string())
}

/// Check the publisher's answer to HELLO
pub fn check_welcome(frame: &Frame, cipher: Option<&mut ChannelCipher>) -> Result<(), TransportError> {
    match frame.kind {
        FrameKind::Welcome => {}
        FrameKind::Bye => return Err(TransportError::Rejected(bye_reason(frame))),
        other => {
            return Err(TransportError::Handshake(format!(
                "expected WELCOME, got {:?}",
                other
            )))
        }
    }

    match (cipher, frame.is_sealed()) {
        (Some(cipher), true) => {
            let token = cipher.open(&[], &frame.payload).map_err(|_| {
                TransportError::Handshake("WELCOME did not open; server key mismatch".to_string())
            })?;
            if token.as_ref() != WELCOME_TOKEN {
                return Err(TransportError::Handshake("unexpected WELCOME token".to_string()));
            }
            Ok(())
        }
        (Some(_), false) => Err(TransportError::Handshake(
            "publisher answered a secured HELLO in the clear".to_string(),
        )),
        (None, true) => Err(TransportError::Handshake(
            "publisher requires a secured subscription".to_string(),
        )),
        (None, false) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use topicnet_wire::{shared_key, public_from_secret, Role};

    async fn read_back(buffer: Vec<u8>) -> Frame {
        let mut decoder = FrameDecoder::new();
        let mut read_buf = BytesMut::new();
        recv_any_frame(Cursor::new(buffer), &mut decoder, &mut read_buf)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let topics = vec!["robot".to_string(), "arm".to_string()];
        let key = [7u8; KEY_LEN];

        let mut buffer = Vec::new();
        send_hello(&mut buffer, &topics, Some(&key)).await.unwrap();

        let hello = parse_hello(&read_back(buffer).await).unwrap();
        assert_eq!(hello.version, WIRE_VERSION);
        assert_eq!(hello.topics, topics);
        assert_eq!(hello.public_key, Some(key));
    }

    #[tokio::test]
    async fn test_eof_is_closed() {
        let mut decoder = FrameDecoder::new();
        let mut read_buf = BytesMut::new();
        let err = recv_any_frame(Cursor::new(Vec::new()), &mut decoder, &mut read_buf)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_bye_is_rejection() {
        let mut buffer = Vec::new();
        send_bye(&mut buffer, "topic is not secured").await.unwrap();

        let err = check_welcome(&read_back(buffer).await, None).unwrap_err();
        match err {
            TransportError::Rejected(reason) => assert_eq!(reason, "topic is not secured"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sealed_welcome_checks_server_key() {
        let server_secret = [1u8; KEY_LEN];
        let client_secret = [2u8; KEY_LEN];
        let wrong_secret = [3u8; KEY_LEN];

        let server_key =
            shared_key(&server_secret, &public_from_secret(&client_secret)).unwrap();
        let mut server = ChannelCipher::new(&server_key, Role::Publisher);

        let mut buffer = Vec::new();
        send_welcome(&mut buffer, Some(&mut server)).await.unwrap();
        let frame = read_back(buffer).await;

        let good = shared_key(&client_secret, &public_from_secret(&server_secret)).unwrap();
        let mut client = ChannelCipher::new(&good, Role::Subscriber);
        check_welcome(&frame, Some(&mut client)).unwrap();

        let bad = shared_key(&client_secret, &public_from_secret(&wrong_secret)).unwrap();
        let mut client = ChannelCipher::new(&bad, Role::Subscriber);
        assert!(matches!(
            check_welcome(&frame, Some(&mut client)),
            Err(TransportError::Handshake(_))
        ));

        assert!(check_welcome(&frame, None).is_err());
    }
}
