//! A single peer connection: framed I/O, the packet pump, and key state.
//!
//! [`Connection`] is a cheap `Clone` handle. One reader task per connection
//! demultiplexes inbound packets: replies go to the matching pending wait,
//! everything else is queued for [`Connection::read_package`] or the
//! registered [`PackageHandler`].
//!
//! ```text
//!   socket ──► reader task ──┬─ reply bit set ──► pending wait (oneshot)
//!                            └─ otherwise ──────► inbound queue ──► drain ──► handler
//! ```

use crate::config::TransportConfig;
use crate::core::envelope::Envelope;
use crate::core::packet::Packet;
use crate::core::sequence::{SequenceGenerator, REPLY_BIT};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{Command, CommandBody, Identity, Package};
use crate::transport::channel::{self, AsyncStream, FrameReader, FrameWriter, ReadEvent};
use crate::transport::pump::{InboundQueue, PendingWaits};
use crate::utils::crypto::{self, EccKeyPair, SessionCipher};
use crate::utils::metrics::global_metrics;
use p256::PublicKey;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, instrument, trace, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Receives unsolicited packages from a connection's drain worker.
///
/// A returned body is sent back as the reply to the package.
pub trait PackageHandler: Send + Sync + 'static {
    fn handle(&self, conn: &Connection, package: Package) -> Result<Option<CommandBody>>;

    /// Called once when the connection closes
    fn on_closed(&self, _conn: &Connection) {}
}

impl<F> PackageHandler for F
where
    F: Fn(&Connection, Package) -> Result<Option<CommandBody>> + Send + Sync + 'static,
{
    fn handle(&self, conn: &Connection, package: Package) -> Result<Option<CommandBody>> {
        self(conn, package)
    }
}

struct KeyState {
    local: EccKeyPair,
    peer_public: Option<PublicKey>,
    session: Option<SessionCipher>,
}

struct Inner {
    id: u64,
    peer: Option<SocketAddr>,
    writer: AsyncMutex<Option<FrameWriter>>,
    reader: Mutex<Option<FrameReader>>,
    sequence: SequenceGenerator,
    waits: PendingWaits,
    queue: InboundQueue,
    keys: RwLock<KeyState>,
    identity: RwLock<Option<Identity>>,
    handler: RwLock<Option<Arc<dyn PackageHandler>>>,
    last_send: Mutex<Instant>,
    last_receive: Mutex<Instant>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn touch(stamp: &Mutex<Instant>) {
    *stamp.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Wrap an established stream. The reader is not started.
    pub fn from_stream<S: AsyncStream>(
        stream: S,
        peer: Option<SocketAddr>,
        config: &TransportConfig,
    ) -> Self {
        let (reader, writer) = channel::split(stream, config);
        let (closed_tx, _) = watch::channel(false);
        let now = Instant::now();
        global_metrics().connection_established();

        Self {
            inner: Arc::new(Inner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer,
                writer: AsyncMutex::new(Some(writer)),
                reader: Mutex::new(Some(reader)),
                sequence: SequenceGenerator::new(),
                waits: PendingWaits::new(),
                queue: InboundQueue::new(),
                keys: RwLock::new(KeyState {
                    local: EccKeyPair::generate(),
                    peer_public: None,
                    session: None,
                }),
                identity: RwLock::new(None),
                handler: RwLock::new(None),
                last_send: Mutex::new(now),
                last_receive: Mutex::new(now),
                closed: AtomicBool::new(false),
                closed_tx,
            }),
        }
    }

    /// Dial `addr` within `timeout`
    #[instrument(skip(timeout, config))]
    pub async fn connect(addr: &str, timeout: Duration, config: &TransportConfig) -> Result<Self> {
        let stream = channel::dial(addr, timeout).await?;
        let peer = stream.peer_addr().ok();
        let conn = Self::from_stream(stream, peer, config);
        info!(id = conn.id(), ?peer, "Connected");
        Ok(conn)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// Next outbound sequence number
    pub fn next_seq(&self) -> u16 {
        self.inner.sequence.next()
    }

    pub fn last_send(&self) -> Instant {
        *self.inner.last_send.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn last_receive(&self) -> Instant {
        *self.inner.last_receive.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn identity(&self) -> Option<Identity> {
        read(&self.inner.identity).clone()
    }

    pub fn set_identity(&self, identity: Identity) {
        *write(&self.inner.identity) = Some(identity);
    }

    /// Hex of the local handshake public key
    pub fn public_key_hex(&self) -> String {
        read(&self.inner.keys).local.public_key_hex()
    }

    pub fn peer_public_key(&self) -> Option<PublicKey> {
        read(&self.inner.keys).peer_public.clone()
    }

    pub fn set_peer_public_key(&self, key: PublicKey) {
        write(&self.inner.keys).peer_public = Some(key);
    }

    pub fn has_session_key(&self) -> bool {
        read(&self.inner.keys).session.is_some()
    }

    /// Install the negotiated session key. A second install is refused.
    pub fn install_session_key(&self, key: &[u8]) -> Result<()> {
        let cipher = SessionCipher::from_slice(key)?;
        let mut keys = write(&self.inner.keys);
        if keys.session.is_some() {
            return Err(ProtocolError::KeyError(constants::ERR_SESSION_KEY_SET.into()));
        }
        keys.session = Some(cipher);
        debug!(id = self.inner.id, "Session key installed");
        Ok(())
    }

    /// Seal a body under the strongest key available: session key, then the
    /// peer's public key, then none.
    fn seal(&self, plain: &[u8]) -> Result<(bool, Vec<u8>)> {
        let keys = read(&self.inner.keys);
        if let Some(cipher) = &keys.session {
            return Ok((true, cipher.random_encrypt(plain)?));
        }
        if let Some(peer) = &keys.peer_public {
            return Ok((true, crypto::ecies_encrypt(peer, plain)?));
        }
        Ok((false, plain.to_vec()))
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let keys = read(&self.inner.keys);
        match &keys.session {
            Some(cipher) => cipher.random_decrypt(sealed),
            None => keys.local.decrypt(sealed),
        }
    }

    /// Build a packet payload from JSON text and extension bytes
    pub fn encode_payload(&self, json: &str, extension: &[u8]) -> Result<Vec<u8>> {
        let (encrypted, body) = self.seal(json.as_bytes())?;
        Envelope::new(encrypted, body, extension.to_vec()).to_bytes()
    }

    /// Unwrap the envelope and open the body of an inbound packet
    pub fn decode_package(&self, packet: &Packet) -> Result<Package> {
        let envelope = Envelope::from_bytes(&packet.payload)?;
        let body = if envelope.encrypted {
            self.open(&envelope.body)?
        } else {
            envelope.body
        };
        let json = String::from_utf8(body)
            .map_err(|e| ProtocolError::InvalidPacket(format!("body is not UTF-8: {e}")))?;

        Ok(Package {
            seq: packet.seq,
            command: Command::from_code(packet.command),
            encrypted: envelope.encrypted,
            json,
            extension: envelope.extension,
        })
    }

    async fn write_packet(&self, packet: Packet) -> Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        writer.write(packet).await
    }

    /// Fire-and-forget send. Returns whether the whole frame was written.
    ///
    /// A write timeout or a broken stream closes the connection. A timed-out
    /// frame may already be partly on the wire.
    pub async fn send(&self, seq: u16, command: Command, payload: Vec<u8>) -> bool {
        let packet = Packet::new(seq, command.code(), payload);
        match self.write_packet(packet).await {
            Ok(()) => {
                touch(&self.inner.last_send);
                true
            }
            Err(e) if matches!(e, ProtocolError::Timeout) || e.is_fatal_transport() => {
                if !self.is_closed() {
                    warn!(id = self.inner.id, seq, %command, error = %e, "Write failed");
                    global_metrics().connection_error();
                    self.close().await;
                }
                false
            }
            Err(e) => {
                warn!(id = self.inner.id, seq, %command, error = %e, "Packet not sent");
                false
            }
        }
    }

    /// Send JSON text with optional extension bytes under the current key policy
    pub async fn send_json(&self, seq: u16, command: Command, json: &str, extension: &[u8]) -> bool {
        match self.encode_payload(json, extension) {
            Ok(payload) => self.send(seq, command, payload).await,
            Err(e) => {
                warn!(id = self.inner.id, seq, %command, error = %e, "Failed to encode package");
                false
            }
        }
    }

    pub async fn send_body(&self, seq: u16, command: Command, body: &CommandBody) -> bool {
        match body.to_json() {
            Ok(json) => self.send_json(seq, command, &json, &[]).await,
            Err(e) => {
                warn!(id = self.inner.id, seq, %command, error = %e, "Failed to serialize body");
                false
            }
        }
    }

    /// Send a request and wait up to `timeout` for the reply carrying
    /// `seq | REPLY_BIT`.
    pub async fn send_and_wait(
        &self,
        seq: u16,
        command: Command,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Option<Packet> {
        let reply_seq = seq | REPLY_BIT;
        let (wait_id, rx) = self.inner.waits.register(reply_seq);

        if !self.send(seq, command, payload).await {
            self.inner.waits.cancel(reply_seq, wait_id);
            return None;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(packet)) => Some(packet),
            Ok(Err(_)) => {
                debug!(id = self.inner.id, seq, "Wait superseded");
                None
            }
            Err(_) => {
                self.inner.waits.cancel(reply_seq, wait_id);
                debug!(id = self.inner.id, seq, ?timeout, "No reply before timeout");
                None
            }
        }
    }

    /// Encode, send and wait, returning the decoded reply package
    pub async fn send_json_and_wait(
        &self,
        seq: u16,
        command: Command,
        json: &str,
        extension: &[u8],
        timeout: Duration,
    ) -> Option<Package> {
        let payload = match self.encode_payload(json, extension) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(id = self.inner.id, seq, %command, error = %e, "Failed to encode package");
                return None;
            }
        };
        let reply = self.send_and_wait(seq, command, payload, timeout).await?;
        self.decode_logged(&reply)
    }

    /// Send a body under a fresh sequence number and wait for the reply body
    pub async fn request(
        &self,
        command: Command,
        body: &CommandBody,
        timeout: Duration,
    ) -> Option<CommandBody> {
        let json = match body.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(id = self.inner.id, %command, error = %e, "Failed to serialize body");
                return None;
            }
        };
        let package = self
            .send_json_and_wait(self.next_seq(), command, &json, &[], timeout)
            .await?;
        match package.body() {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(id = self.inner.id, %command, error = %e, "Malformed reply body");
                global_metrics().decode_error();
                None
            }
        }
    }

    fn decode_logged(&self, packet: &Packet) -> Option<Package> {
        match self.decode_package(packet) {
            Ok(package) => Some(package),
            Err(e) => {
                warn!(id = self.inner.id, seq = packet.seq, error = %e, "Failed to decode package");
                global_metrics().decode_error();
                None
            }
        }
    }

    /// Pop one unsolicited packet. `Duration::ZERO` waits indefinitely.
    pub async fn read_packet(&self, timeout: Duration) -> Option<Packet> {
        self.inner
            .queue
            .pop_wait(timeout, || self.is_closed())
            .await
    }

    /// Pop and decode one unsolicited package
    pub async fn read_package(&self, timeout: Duration) -> Option<Package> {
        let packet = self.read_packet(timeout).await?;
        self.decode_logged(&packet)
    }

    /// Unsolicited packets not yet consumed
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Register the handler for unsolicited packages and drain anything queued
    pub fn set_handler(&self, handler: Arc<dyn PackageHandler>) {
        *write(&self.inner.handler) = Some(handler);
        self.schedule_drain();
    }

    pub fn clear_handler(&self) {
        *write(&self.inner.handler) = None;
    }

    fn handler(&self) -> Option<Arc<dyn PackageHandler>> {
        read(&self.inner.handler).clone()
    }

    /// Start the reader task. A second call is a no-op returning false.
    pub fn start_reader(&self) -> bool {
        let reader = match self.inner.reader.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(reader) = reader else {
            return false;
        };

        let conn = self.clone();
        tokio::spawn(async move { conn.run_reader(reader).await });
        true
    }

    async fn run_reader(self, mut reader: FrameReader) {
        let mut closed_rx = self.inner.closed_tx.subscribe();
        debug!(id = self.inner.id, "Reader started");

        loop {
            let event = tokio::select! {
                _ = closed_rx.wait_for(|closed| *closed) => break,
                event = reader.next_event() => event,
            };

            match event {
                ReadEvent::Packet(packet) => {
                    touch(&self.inner.last_receive);
                    self.route(packet);
                }
                ReadEvent::Idle => {
                    trace!(id = self.inner.id, "Read idle, still waiting");
                }
                ReadEvent::Closed => {
                    debug!(id = self.inner.id, "Peer closed the stream");
                    break;
                }
                ReadEvent::Failed(e) if e.is_fatal_transport() => {
                    warn!(id = self.inner.id, error = %e, "Read failed");
                    global_metrics().connection_error();
                    break;
                }
                ReadEvent::Failed(e) => {
                    debug!(id = self.inner.id, error = %e, "Transient read error");
                }
            }
        }

        drop(reader);
        self.close().await;
    }

    fn route(&self, packet: Packet) {
        if packet.is_reply() {
            if let Some(unclaimed) = self.inner.waits.resolve(packet) {
                debug!(id = self.inner.id, seq = unclaimed.seq, "Dropping unclaimed reply");
                global_metrics().reply_dropped();
            }
            return;
        }

        self.inner.queue.push(packet);
        self.inner.queue.wake();
        self.schedule_drain();
    }

    fn schedule_drain(&self) {
        if self.inner.queue.is_empty() || self.handler().is_none() {
            return;
        }
        if !self.inner.queue.try_begin_drain() {
            return;
        }
        let conn = self.clone();
        tokio::spawn(async move { conn.drain().await });
    }

    async fn drain(self) {
        loop {
            while let Some(handler) = self.handler() {
                let Some(packet) = self.inner.queue.pop() else {
                    break;
                };
                self.dispatch(handler.as_ref(), packet).await;
            }

            self.inner.queue.end_drain();
            // re-check: a push may have landed after the last pop
            if self.inner.queue.is_empty()
                || self.handler().is_none()
                || !self.inner.queue.try_begin_drain()
            {
                break;
            }
        }
    }

    async fn dispatch(&self, handler: &dyn PackageHandler, packet: Packet) {
        let Some(package) = self.decode_logged(&packet) else {
            return;
        };
        let (seq, command) = (package.seq, package.command);

        match handler.handle(self, package) {
            Ok(Some(reply)) => {
                self.send_body(seq | REPLY_BIT, command, &reply).await;
            }
            Ok(None) => {}
            Err(e) => warn!(id = self.inner.id, seq, %command, error = %e, "Handler failed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the connection. Only the first call has any effect.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.closed_tx.send_replace(true);
        self.inner.queue.wake();

        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                trace!(id = self.inner.id, error = %e, "Shutdown after close");
            }
        }

        global_metrics().connection_closed();
        info!(id = self.inner.id, peer = ?self.inner.peer, "Connection closed");

        if let Some(handler) = self.handler() {
            handler.on_closed(self);
        }
    }

    /// Resolves once the connection has closed
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("closed", &self.is_closed())
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}
