//! Relay broker: rooms of replicated maps, presence and the spend ledger.
//!
//! Every write is stamped with a relay-wide monotonically increasing
//! version and fanned out to all clients of the room, so replicas converge
//! on the latest version of each key. Deletes are kept as tombstones so a
//! late-joining client learns about them from its snapshot.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::wire::{decode_frame, encode_frame, ClientFrame, EntryRecord, LedgerOp, ServerFrame};
use crate::config::RELAY_PERSIST_INTERVAL_SECS;
use crate::engine::{LedgerSnapshot, MemoryLedger};
use crate::error::{MarketError, MarketResult};

#[derive(Debug, Clone)]
struct Versioned {
    value: Option<Value>,
    version: u64,
}

struct Client {
    peer: String,
    outbound: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Default)]
struct Room {
    /// (collection, key) -> latest value or tombstone
    entries: HashMap<(String, String), Versioned>,
    presence: HashMap<String, bool>,
    clients: HashMap<u64, Client>,
}

impl Room {
    fn snapshot(&self) -> ServerFrame {
        let mut entries: Vec<EntryRecord> = self
            .entries
            .iter()
            .map(|((collection, key), v)| EntryRecord {
                collection: collection.clone(),
                key: key.clone(),
                value: v.value.clone(),
                version: v.version,
            })
            .collect();
        entries.sort_by_key(|e| e.version);
        let mut presence: Vec<(String, bool)> =
            self.presence.iter().map(|(p, o)| (p.clone(), *o)).collect();
        presence.sort();
        ServerFrame::Snapshot { entries, presence }
    }

    /// Send `frame` to every client; the author gets `author_frame` instead.
    fn broadcast(&self, frame: &ServerFrame, author: Option<(u64, ServerFrame)>) {
        for (id, client) in &self.clients {
            let outgoing = match &author {
                Some((author_id, author_frame)) if author_id == id => author_frame.clone(),
                _ => frame.clone(),
            };
            // A closed channel means the connection is already tearing down.
            let _ = client.outbound.send(outgoing);
        }
    }

    fn set_presence(&mut self, peer: &str, online: bool) {
        if self.presence.get(peer) == Some(&online) {
            return;
        }
        self.presence.insert(peer.to_string(), online);
        self.broadcast(
            &ServerFrame::PresenceChanged {
                peer: peer.to_string(),
                online,
            },
            None,
        );
    }
}

#[derive(Default)]
struct RelayState {
    rooms: HashMap<String, Room>,
    next_version: u64,
    next_client: u64,
    dirty: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRoom {
    name: String,
    entries: Vec<EntryRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedRelay {
    next_version: u64,
    rooms: Vec<PersistedRoom>,
    ledger: LedgerSnapshot,
}

/// Relay report served on `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub rooms: usize,
    pub clients: usize,
    pub spent_states: usize,
    pub uptime_secs: u64,
    pub version: &'static str,
}

pub struct RelayServer {
    state: Mutex<RelayState>,
    ledger: MemoryLedger,
    persistence: Option<PathBuf>,
    started_at: Instant,
}

impl RelayServer {
    /// In-memory relay with no persistence.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            ledger: MemoryLedger::new(),
            persistence: None,
            started_at: Instant::now(),
        }
    }

    /// Relay persisted to `path`, reloading it if the file exists.
    pub fn with_persistence(path: impl Into<PathBuf>) -> MarketResult<Self> {
        let path = path.into();
        let mut relay = Self::new();
        if path.exists() {
            let persisted = load_snapshot(&path)?;
            let mut state = RelayState {
                next_version: persisted.next_version,
                ..RelayState::default()
            };
            let mut entries = 0;
            for persisted_room in persisted.rooms {
                let room = state.rooms.entry(persisted_room.name).or_default();
                for entry in persisted_room.entries {
                    entries += 1;
                    room.entries.insert(
                        (entry.collection, entry.key),
                        Versioned {
                            value: entry.value,
                            version: entry.version,
                        },
                    );
                }
            }
            info!(
                "Loaded relay state from {} ({} rooms, {} entries, {} spends)",
                path.display(),
                state.rooms.len(),
                entries,
                persisted.ledger.spent.len()
            );
            relay.state = Mutex::new(state);
            relay.ledger = MemoryLedger::from_snapshot(persisted.ledger);
        }
        relay.persistence = Some(path);
        Ok(relay)
    }

    pub const fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    pub fn status(&self) -> RelayStatus {
        let state = self.state.lock();
        RelayStatus {
            status: "ok",
            service: "market-relay",
            rooms: state.rooms.len(),
            clients: state.rooms.values().map(|r| r.clients.len()).sum(),
            spent_states: self.ledger.spent_count(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Bind `addr` and serve until `shutdown`; returns the bound address.
    pub async fn spawn(
        self: Arc<Self>,
        addr: &str,
        shutdown: CancellationToken,
    ) -> MarketResult<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MarketError::Config(format!("Cannot bind relay on {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| MarketError::Config(format!("Relay listener has no address: {e}")))?;
        info!("Relay listening on {}", local);
        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener, shutdown).await {
                error!("Relay stopped: {}", e);
            }
        });
        Ok((local, handle))
    }

    /// Accept connections until `shutdown`, flushing persistence periodically
    /// and once more on the way out.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> MarketResult<()> {
        let mut flush = tokio::time::interval(Duration::from_secs(RELAY_PERSIST_INTERVAL_SECS));
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    debug!("Connection from {}", remote);
                    let relay = self.clone();
                    let cancel = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = relay.handle_connection(socket, cancel).await {
                            warn!("Connection from {} ended: {}", remote, e);
                        }
                    });
                }
                _ = flush.tick() => {
                    if let Err(e) = self.flush_if_dirty() {
                        error!("Persisting relay state failed: {}", e);
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }
        self.flush_if_dirty()
    }

    async fn handle_connection(
        self: Arc<Self>,
        socket: TcpStream,
        shutdown: CancellationToken,
    ) -> MarketResult<()> {
        let (rd, mut wr) = socket.into_split();
        let mut lines = BufReader::new(rd).lines();

        let first = tokio::select! {
            line = lines.next_line() => line,
            () = shutdown.cancelled() => return Ok(()),
        };
        let first = first
            .map_err(|e| MarketError::SubstrateUnavailable(format!("Read failed: {e}")))?
            .ok_or_else(|| MarketError::SubstrateUnavailable("Closed before join".into()))?;
        let ClientFrame::Join { room, peer } = decode_frame::<ClientFrame>(&first)? else {
            return Err(MarketError::InvalidState(
                "First frame must be a join".into(),
            ));
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
        let client_id = self.join(&room, &peer, tx);
        info!("Peer '{}' joined room '{}' (client {})", peer, room, client_id);

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let line = match encode_frame(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Dropping unencodable frame: {}", e);
                        continue;
                    }
                };
                if wr.write_all(&line).await.is_err() {
                    break;
                }
            }
            let _ = wr.shutdown().await;
        });

        let result = loop {
            let line = tokio::select! {
                line = lines.next_line() => line,
                () = shutdown.cancelled() => break Ok(()),
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => {
                    break Err(MarketError::SubstrateUnavailable(format!("Read failed: {e}")))
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_frame::<ClientFrame>(&line) {
                Ok(frame) => self.apply(&room, client_id, &peer, frame),
                Err(e) => {
                    warn!("Bad frame from '{}': {}", peer, e);
                    self.send_to(&room, client_id, ServerFrame::Error {
                        message: e.to_string(),
                    });
                }
            }
        };

        self.leave(&room, client_id, &peer);
        info!("Peer '{}' left room '{}'", peer, room);
        // Dropping the room's sender closes the writer once it drained.
        let _ = writer.await;
        result
    }

    fn join(&self, room_name: &str, peer: &str, outbound: mpsc::UnboundedSender<ServerFrame>) -> u64 {
        let mut state = self.state.lock();
        state.next_client += 1;
        let client_id = state.next_client;
        let room = state.rooms.entry(room_name.to_string()).or_default();
        room.set_presence(peer, true);
        let _ = outbound.send(room.snapshot());
        let _ = outbound.send(ServerFrame::Synced);
        room.clients.insert(
            client_id,
            Client {
                peer: peer.to_string(),
                outbound,
            },
        );
        client_id
    }

    fn leave(&self, room_name: &str, client_id: u64, peer: &str) {
        let mut state = self.state.lock();
        let Some(room) = state.rooms.get_mut(room_name) else {
            return;
        };
        room.clients.remove(&client_id);
        let still_connected = room.clients.values().any(|c| c.peer == peer);
        if !still_connected {
            room.set_presence(peer, false);
        }
    }

    fn send_to(&self, room_name: &str, client_id: u64, frame: ServerFrame) {
        let state = self.state.lock();
        if let Some(client) = state
            .rooms
            .get(room_name)
            .and_then(|room| room.clients.get(&client_id))
        {
            let _ = client.outbound.send(frame);
        }
    }

    fn apply(&self, room_name: &str, client_id: u64, peer: &str, frame: ClientFrame) {
        match frame {
            ClientFrame::Join { .. } => {
                self.send_to(room_name, client_id, ServerFrame::Error {
                    message: "Already joined".into(),
                });
            }
            ClientFrame::Set {
                seq,
                collection,
                key,
                value,
            } => self.write(room_name, client_id, seq, collection, key, Some(value)),
            ClientFrame::Delete {
                seq,
                collection,
                key,
            } => self.write(room_name, client_id, seq, collection, key, None),
            ClientFrame::Presence { online } => {
                let mut state = self.state.lock();
                if let Some(room) = state.rooms.get_mut(room_name) {
                    room.set_presence(peer, online);
                }
            }
            ClientFrame::Ledger { request_id, op } => {
                let ok = match op {
                    LedgerOp::Register { token_id } => self.ledger.register_sync(&token_id),
                    LedgerOp::Commit {
                        state_hash,
                        transfer_hash,
                    } => self.ledger.commit_sync(&state_hash, &transfer_hash),
                    LedgerOp::IsSpent { state_hash } => self.ledger.is_spent_sync(&state_hash),
                    LedgerOp::IsCommitted {
                        state_hash,
                        transfer_hash,
                    } => self.ledger.is_committed_sync(&state_hash, &transfer_hash),
                };
                self.state.lock().dirty = true;
                self.send_to(room_name, client_id, ServerFrame::LedgerReply {
                    request_id,
                    ok: Some(ok),
                    error: None,
                });
            }
        }
    }

    fn write(
        &self,
        room_name: &str,
        client_id: u64,
        seq: u64,
        collection: String,
        key: String,
        value: Option<Value>,
    ) {
        let mut state = self.state.lock();
        state.next_version += 1;
        state.dirty = true;
        let version = state.next_version;
        let Some(room) = state.rooms.get_mut(room_name) else {
            return;
        };
        room.entries.insert(
            (collection.clone(), key.clone()),
            Versioned {
                value: value.clone(),
                version,
            },
        );
        let entry = EntryRecord {
            collection,
            key,
            value,
            version,
        };
        let echo = ServerFrame::Changed {
            entry: entry.clone(),
            echo: Some(seq),
        };
        room.broadcast(
            &ServerFrame::Changed { entry, echo: None },
            Some((client_id, echo)),
        );
    }

    fn flush_if_dirty(&self) -> MarketResult<()> {
        let Some(path) = &self.persistence else {
            return Ok(());
        };
        let persisted = {
            let mut state = self.state.lock();
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            let mut rooms: Vec<PersistedRoom> = state
                .rooms
                .iter()
                .map(|(name, room)| {
                    let mut entries: Vec<EntryRecord> = room
                        .entries
                        .iter()
                        .map(|((collection, key), v)| EntryRecord {
                            collection: collection.clone(),
                            key: key.clone(),
                            value: v.value.clone(),
                            version: v.version,
                        })
                        .collect();
                    entries.sort_by_key(|e| e.version);
                    PersistedRoom {
                        name: name.clone(),
                        entries,
                    }
                })
                .collect();
            rooms.sort_by(|a, b| a.name.cmp(&b.name));
            PersistedRelay {
                next_version: state.next_version,
                rooms,
                ledger: self.ledger.snapshot(),
            }
        };
        store_snapshot(path, &persisted)?;
        debug!("Relay state persisted to {}", path.display());
        Ok(())
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

fn load_snapshot(path: &Path) -> MarketResult<PersistedRelay> {
    let file = std::fs::File::open(path).map_err(|e| {
        MarketError::Config(format!("Cannot open relay state {}: {e}", path.display()))
    })?;
    ciborium::de::from_reader(std::io::BufReader::new(file)).map_err(|e| {
        MarketError::Serialization(format!("Corrupt relay state {}: {e}", path.display()))
    })
}

fn store_snapshot(path: &Path, persisted: &PersistedRelay) -> MarketResult<()> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(persisted, &mut buf)
        .map_err(|e| MarketError::Serialization(format!("Cannot encode relay state: {e}")))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &buf).map_err(|e| {
        MarketError::Config(format!("Cannot write relay state {}: {e}", tmp.display()))
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        MarketError::Config(format!("Cannot replace relay state {}: {e}", path.display()))
    })
}
