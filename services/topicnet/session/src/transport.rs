//! Transport seam and its TCP implementation.
//!
//! A publisher binds a listener and fans data frames out to every peer that
//! asked for the frame's topic. A subscriber connects, runs the handshake and
//! hands every inbound data frame to the channel it was given.

use crate::endpoint::Endpoint;
use crate::handshake::{
    bye_reason, check_welcome, parse_hello, recv_any_frame, send_bye, send_hello, send_welcome,
};
use crate::keys::{KeyPair, PublicKey};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use topicnet_wire::{
    shared_key, ChannelCipher, CodecError, CryptoError, FrameBuilder,
    FrameDecoder, FrameKind, Role, WireError, DEFAULT_MAX_FRAME_SIZE,
};
use tracing::{debug, info, warn};

/// Time a peer has to complete the handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames queued per accepted peer before the peer is dropped as stalled
pub const PEER_QUEUE_DEPTH: usize = 1024;

/// Transport failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame on the wire
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Frame or metadata encoding failure
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Sealing or key agreement failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Peer broke the handshake protocol
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Publisher refused the subscription
    #[error("rejected by publisher: {0}")]
    Rejected(String),

    /// Link or connection already closed
    #[error("connection closed")]
    Closed,
}

/// Key material a subscriber needs for a secured connection
#[derive(Debug, Clone)]
pub struct ClientSecurity {
    /// Publisher's public key
    pub server_key: PublicKey,
    /// This process's key pair
    pub keys: KeyPair,
}

/// Event handed from a subscriber connection to its delivery task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A data frame, opened if the channel is secured
    Message {
        /// Publisher the frame came from
        endpoint: Endpoint,
        /// Topic the frame was published on
        topic: String,
        /// Encoded payload
        payload: Bytes,
    },
    /// A data frame that failed authentication
    Corrupt {
        /// Publisher the frame came from
        endpoint: Endpoint,
        /// Topic the frame was published on
        topic: String,
    },
}

/// Opens publisher and subscriber links
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind a publisher; `keys` makes every accepted channel secured
    async fn bind(
        &self,
        endpoint: &Endpoint,
        keys: Option<&KeyPair>,
    ) -> Result<Box<dyn PublisherLink>, TransportError>;

    /// Connect a subscriber for `topics`; returns once the publisher accepted
    async fn connect(
        &self,
        endpoint: &Endpoint,
        topics: &[String],
        security: Option<&ClientSecurity>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Box<dyn SubscriberLink>, TransportError>;
}

/// Bound publisher
#[async_trait]
pub trait PublisherLink: Send + Sync {
    /// Port actually bound
    fn local_port(&self) -> u16;

    /// Send an encoded payload to every peer subscribed to `topic`
    async fn send(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Stop accepting and drop all peers
    fn close(&self);
}

/// Connected subscriber
pub trait SubscriberLink: Send + Sync {
    /// Endpoint this link is connected to
    fn endpoint(&self) -> &Endpoint;

    /// Close the connection
    fn close(&self);
}

/// TCP transport
#[derive(Debug, Clone)]
pub struct TcpTransport {
    handshake_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport with the default handshake timeout
    pub fn new() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    /// Create a transport with a custom handshake timeout
    pub fn with_handshake_timeout(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

type Outbound = (String, Bytes);

struct Peer {
    topics: HashSet<String>,
    tx: mpsc::Sender<Outbound>,
}

struct PublisherShared {
    peers: DashMap<u64, Peer>,
    next_peer_id: AtomicU64,
    secret: Option<[u8; 32]>,
    handshake_timeout: Duration,
    queue_depth: usize,
    closed: AtomicBool,
}

impl PublisherShared {
    /// Queue a frame for every peer subscribed to `topic`; returns how many
    /// peers took it. Peers whose queue is full are dropped.
    fn fan_out(&self, topic: &str, payload: &Bytes) -> usize {
        let mut queued = 0;
        let mut stalled = Vec::new();
        for peer in self.peers.iter() {
            if !peer.topics.contains(topic) {
                continue;
            }
            match peer.tx.try_send((topic.to_string(), payload.clone())) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => stalled.push(*peer.key()),
                // Peer task is already exiting
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        for peer_id in stalled {
            warn!(
                "Dropping peer {}: {} frames queued and not written",
                peer_id, self.queue_depth
            );
            self.peers.remove(&peer_id);
        }
        queued
    }
}

struct TcpPublisherLink {
    port: u16,
    shared: Arc<PublisherShared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl PublisherLink for TcpPublisherLink {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn send(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        self.shared.fan_out(topic, &payload);
        Ok(())
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self
            .accept_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        // Dropping the senders ends every peer task.
        self.shared.peers.clear();
        info!("Closed publisher on port {}", self.port);
    }
}

impl Drop for TcpPublisherLink {
    fn drop(&mut self) {
        self.close();
    }
}

struct TcpSubscriberLink {
    endpoint: Endpoint,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriberLink for TcpSubscriberLink {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn close(&self) {
        if let Some(task) = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            debug!("Closed subscriber connection to {}", self.endpoint);
        }
    }
}

impl Drop for TcpSubscriberLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn bind(
        &self,
        endpoint: &Endpoint,
        keys: Option<&KeyPair>,
    ) -> Result<Box<dyn PublisherLink>, TransportError> {
        let listener = TcpListener::bind((endpoint.host(), endpoint.port())).await?;
        let port = listener.local_addr()?.port();
        info!(
            "Publisher listening on {}:{} ({})",
            endpoint.host(),
            port,
            if keys.is_some() { "secured" } else { "unsecured" }
        );

        let shared = Arc::new(PublisherShared {
            peers: DashMap::new(),
            next_peer_id: AtomicU64::new(1),
            secret: keys.map(|k| *k.secret_bytes()),
            handshake_timeout: self.handshake_timeout,
            queue_depth: PEER_QUEUE_DEPTH,
            closed: AtomicBool::new(false),
        });

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        let shared = accept_shared.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_peer(shared, stream).await {
                                debug!("Peer {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept failed on port {}: {}", port, e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        });

        Ok(Box::new(TcpPublisherLink {
            port,
            shared,
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        topics: &[String],
        security: Option<&ClientSecurity>,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Result<Box<dyn SubscriberLink>, TransportError> {
        let mut stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        stream.set_nodelay(true)?;

        let mut cipher = match security {
            Some(security) => {
                let key = shared_key(
                    security.keys.secret_bytes(),
                    security.server_key.as_bytes(),
                )?;
                Some(ChannelCipher::new(&key, Role::Subscriber))
            }
            None => None,
        };

        let own_public = security.map(|s| *s.keys.public_key().as_bytes());
        send_hello(&mut stream, topics, own_public.as_ref()).await?;

        let mut decoder = FrameDecoder::new();
        let mut buffer = BytesMut::with_capacity(64 * 1024);
        let answer = tokio::time::timeout(
            self.handshake_timeout,
            recv_any_frame(&mut stream, &mut decoder, &mut buffer),
        )
        .await
        .map_err(|_| TransportError::Handshake("timed out waiting for WELCOME".to_string()))??;
        check_welcome(&answer, cipher.as_mut())?;

        info!(
            "Subscribed to {} topic(s) at {}{}",
            topics.len(),
            endpoint,
            if cipher.is_some() { " (secured)" } else { "" }
        );

        let peer = endpoint.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                let frame = match recv_any_frame(&mut stream, &mut decoder, &mut buffer).await {
                    Ok(frame) => frame,
                    Err(TransportError::Closed) => {
                        debug!("Publisher {} closed the connection", peer);
                        break;
                    }
                    Err(e) => {
                        warn!("Connection to {} failed: {}", peer, e);
                        break;
                    }
                };

                let event = match frame.kind {
                    FrameKind::Data => match (cipher.as_mut(), frame.is_sealed()) {
                        (Some(cipher), true) => {
                            match cipher.open(frame.topic.as_bytes(), &frame.payload) {
                                Ok(payload) => Inbound::Message {
                                    endpoint: peer.clone(),
                                    topic: frame.topic,
                                    payload,
                                },
                                Err(_) => Inbound::Corrupt {
                                    endpoint: peer.clone(),
                                    topic: frame.topic,
                                },
                            }
                        }
                        (None, false) => Inbound::Message {
                            endpoint: peer.clone(),
                            topic: frame.topic,
                            payload: frame.payload,
                        },
                        _ => Inbound::Corrupt {
                            endpoint: peer.clone(),
                            topic: frame.topic,
                        },
                    },
                    FrameKind::Bye => {
                        info!("Publisher {} said BYE: {}", peer, bye_reason(&frame));
                        break;
                    }
                    other => {
                        debug!("Ignoring {:?} frame from {}", other, peer);
                        continue;
                    }
                };

                if inbound.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(Box::new(TcpSubscriberLink {
            endpoint: endpoint.clone(),
            reader_task: Mutex::new(Some(reader_task)),
        }))
    }
}

/// Run the handshake and the send loop for one accepted peer
async fn serve_peer(
    shared: Arc<PublisherShared>,
    mut stream: TcpStream,
) -> Result<(), TransportError> {
    stream.set_nodelay(true)?;
    let mut decoder = FrameDecoder::new();
    let mut buffer = BytesMut::with_capacity(4 * 1024);

    let frame = tokio::time::timeout(
        shared.handshake_timeout,
        recv_any_frame(&mut stream, &mut decoder, &mut buffer),
    )
    .await
    .map_err(|_| TransportError::Handshake("timed out waiting for HELLO".to_string()))??;
    let hello = parse_hello(&frame)?;

    let mut cipher = match (&shared.secret, hello.public_key) {
        (Some(secret), Some(peer_public)) => match shared_key(secret, &peer_public) {
            Ok(key) => Some(ChannelCipher::new(&key, Role::Publisher)),
            Err(e) => {
                send_bye(&mut stream, "unusable public key").await?;
                return Err(e.into());
            }
        },
        (Some(_), None) => {
            send_bye(&mut stream, "secured publisher requires a public key").await?;
            return Err(TransportError::Handshake("missing public key".to_string()));
        }
        (None, Some(_)) => {
            send_bye(&mut stream, "topic is not secured").await?;
            return Err(TransportError::Handshake("unexpected public key".to_string()));
        }
        (None, None) => None,
    };

    let peer_id = shared.next_peer_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel::<Outbound>(shared.queue_depth);
    shared.peers.insert(
        peer_id,
        Peer {
            topics: hello.topics.iter().cloned().collect(),
            tx,
        },
    );
    debug!("Registered peer {} for {:?}", peer_id, hello.topics);

    if shared.closed.load(Ordering::Acquire) {
        shared.peers.remove(&peer_id);
        send_bye(&mut stream, "publisher closed").await?;
        return Ok(());
    }

    let result = peer_loop(&mut stream, cipher.as_mut(), rx, decoder, buffer, peer_id).await;

    shared.peers.remove(&peer_id);
    debug!("Removed peer {}", peer_id);
    result
}

/// Forward outbound frames to one accepted peer until either side leaves
async fn peer_loop(
    stream: &mut TcpStream,
    mut cipher: Option<&mut ChannelCipher>,
    mut rx: mpsc::Receiver<Outbound>,
    mut decoder: FrameDecoder,
    mut buffer: BytesMut,
    peer_id: u64,
) -> Result<(), TransportError> {
    send_welcome(&mut *stream, cipher.as_deref_mut()).await?;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some((topic, payload)) = outbound else {
                    let _ = send_bye(&mut *stream, "publisher closed").await;
                    return Ok(());
                };
                let builder = FrameBuilder::new(FrameKind::Data).topic(&topic);
                let builder = match cipher.as_deref_mut() {
                    Some(cipher) => builder.sealed().payload(cipher.seal(topic.as_bytes(), &payload)?),
                    None => builder.payload(payload),
                };
                let frame_bytes = builder.build(DEFAULT_MAX_FRAME_SIZE)?;
                stream.write_all(&frame_bytes).await?;
            }
            frame = recv_any_frame(&mut *stream, &mut decoder, &mut buffer) => {
                match frame {
                    Ok(frame) if frame.kind == FrameKind::Bye => return Ok(()),
                    Ok(frame) => debug!("Ignoring {:?} frame from peer {}", frame.kind, peer_id),
                    Err(TransportError::Closed) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
