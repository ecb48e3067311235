//! [`ReplicatedStore`] backed by a relay connection.
//!
//! The store keeps a full local replica of its room. Reads never touch the
//! network; writes apply locally, notify local observers immediately and
//! are sent to the relay, which stamps them with a version and echoes them
//! to every client. A remote change is applied only if it carries a newer
//! version than the replica holds and no local write to the same key is
//! still waiting for its echo.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::wire::{decode_frame, encode_frame, ClientFrame, EntryRecord, LedgerOp, ServerFrame};
use crate::config::ORACLE_TIMEOUT_SECS;
use crate::error::{MarketError, MarketResult};
use crate::traits::{ChangeAction, ChangeBatch, ChangeStream, KeyChange, ReplicatedStore};

#[derive(Debug, Clone)]
struct Entry {
    value: Option<Value>,
    version: u64,
}

#[derive(Debug, Default)]
struct Replica {
    maps: HashMap<String, BTreeMap<String, Entry>>,
    /// (collection, key) -> sequence number of the latest unechoed local write
    pending: HashMap<(String, String), u64>,
}

type LedgerReply = Result<bool, String>;

struct ClientInner {
    peer: String,
    replica: Mutex<Replica>,
    presence: RwLock<HashMap<String, bool>>,
    observers: Mutex<Vec<(String, mpsc::UnboundedSender<ChangeBatch>)>>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    synced: watch::Sender<bool>,
    connected: AtomicBool,
    disconnected: CancellationToken,
    shutdown: CancellationToken,
    next_seq: AtomicU64,
    next_request: AtomicU64,
    ledger_requests: Mutex<HashMap<u64, oneshot::Sender<LedgerReply>>>,
    oracle_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One peer's connection to a relay room.
#[derive(Clone)]
pub struct RelayStore {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RelayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStore")
            .field("peer", &self.inner.peer)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn action_for(previous: bool, next: bool) -> Option<ChangeAction> {
    match (previous, next) {
        (false, true) => Some(ChangeAction::Add),
        (true, true) => Some(ChangeAction::Update),
        (true, false) => Some(ChangeAction::Delete),
        (false, false) => None,
    }
}

impl RelayStore {
    /// Connect to the relay at `addr` and join `room` as `peer`.
    ///
    /// Returns once the connection is up; the initial snapshot arrives in
    /// the background and [`ReplicatedStore::wait_synced`] resolves when it
    /// has been applied.
    pub async fn connect(addr: &str, room: &str, peer: &str) -> MarketResult<Self> {
        Self::connect_with_timeout(addr, room, peer, Duration::from_secs(ORACLE_TIMEOUT_SECS)).await
    }

    pub async fn connect_with_timeout(
        addr: &str,
        room: &str,
        peer: &str,
        oracle_timeout: Duration,
    ) -> MarketResult<Self> {
        let socket = TcpStream::connect(addr).await.map_err(|e| {
            MarketError::SubstrateUnavailable(format!("Cannot reach relay at {addr}: {e}"))
        })?;
        let (rd, mut wr) = socket.into_split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (synced, _) = watch::channel(false);

        let store = Self {
            inner: Arc::new(ClientInner {
                peer: peer.to_string(),
                replica: Mutex::new(Replica::default()),
                presence: RwLock::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
                outbound,
                synced,
                connected: AtomicBool::new(true),
                disconnected: CancellationToken::new(),
                shutdown: CancellationToken::new(),
                next_seq: AtomicU64::new(0),
                next_request: AtomicU64::new(0),
                ledger_requests: Mutex::new(HashMap::new()),
                oracle_timeout,
                tasks: Mutex::new(Vec::new()),
            }),
        };
        store.send(ClientFrame::Join {
            room: room.to_string(),
            peer: peer.to_string(),
        })?;

        let shutdown = store.inner.shutdown.clone();
        let writer = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = rx.recv() => frame,
                    () = shutdown.cancelled() => {
                        // Flush what was queued before close, then hang up.
                        while let Ok(frame) = rx.try_recv() {
                            if write_frame(&mut wr, &frame).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                };
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut wr, &frame).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
            }
            let _ = wr.shutdown().await;
        });

        let reader_store = store.clone();
        let shutdown = store.inner.shutdown.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(rd).lines();
            loop {
                let line = tokio::select! {
                    line = lines.next_line() => line,
                    () = shutdown.cancelled() => break,
                };
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match decode_frame::<ServerFrame>(&line) {
                        Ok(frame) => reader_store.handle_frame(frame),
                        Err(e) => warn!("Ignoring bad frame from relay: {}", e),
                    },
                    Ok(None) => {
                        warn!("Relay closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("Relay read failed: {}", e);
                        break;
                    }
                }
            }
            reader_store.mark_disconnected();
        });

        store.inner.tasks.lock().extend([writer, reader]);
        info!("Connected to relay {} as '{}' in room '{}'", addr, peer, room);
        Ok(store)
    }

    pub fn peer_name(&self) -> &str {
        &self.inner.peer
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn ensure_connected(&self) -> MarketResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MarketError::SubstrateUnavailable(
                "Relay connection lost".into(),
            ))
        }
    }

    fn send(&self, frame: ClientFrame) -> MarketResult<()> {
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| MarketError::SubstrateUnavailable("Relay connection closed".into()))
    }

    fn mark_disconnected(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.disconnected.cancel();
        // Dropping the reply senders fails every in-flight oracle call.
        self.inner.ledger_requests.lock().clear();
    }

    fn notify(&self, batches: Vec<ChangeBatch>) {
        if batches.is_empty() {
            return;
        }
        let mut observers = self.inner.observers.lock();
        observers.retain(|(_, tx)| !tx.is_closed());
        for batch in batches {
            for (observed, tx) in observers.iter() {
                if *observed == batch.collection {
                    let _ = tx.send(batch.clone());
                }
            }
        }
    }

    /// Apply a local write and send it to the relay.
    fn write(&self, collection: &str, key: &str, value: Option<Value>) -> MarketResult<bool> {
        self.ensure_connected()?;
        let change = {
            let mut replica = self.inner.replica.lock();
            let existed = replica
                .maps
                .get(collection)
                .and_then(|m| m.get(key))
                .is_some_and(|e| e.value.is_some());
            if value.is_none() && !existed {
                return Ok(false);
            }

            let seq = self.inner.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let frame = match &value {
                Some(value) => ClientFrame::Set {
                    seq,
                    collection: collection.to_string(),
                    key: key.to_string(),
                    value: value.clone(),
                },
                None => ClientFrame::Delete {
                    seq,
                    collection: collection.to_string(),
                    key: key.to_string(),
                },
            };
            // Sent under the replica lock so the echo cannot be applied first.
            self.send(frame)?;

            replica
                .pending
                .insert((collection.to_string(), key.to_string()), seq);
            let next = value.is_some();
            let maps = replica.maps.entry(collection.to_string()).or_default();
            let version = maps.get(key).map_or(0, |e| e.version);
            maps.insert(key.to_string(), Entry { value, version });
            (existed, action_for(existed, next))
        };

        if let (existed, Some(action)) = change {
            self.notify(vec![ChangeBatch {
                collection: collection.to_string(),
                changes: vec![KeyChange::new(key, action)],
            }]);
            return Ok(existed);
        }
        Ok(change.0)
    }

    /// Merge remote entries into the replica, returning the visible changes.
    fn merge(&self, entries: Vec<EntryRecord>, echo: Option<u64>) -> Vec<ChangeBatch> {
        let mut changed: BTreeMap<String, Vec<KeyChange>> = BTreeMap::new();
        {
            let mut replica = self.inner.replica.lock();
            for entry in entries {
                let id = (entry.collection.clone(), entry.key.clone());
                match (echo, replica.pending.get(&id).copied()) {
                    (Some(seq), Some(pending)) if seq == pending => {
                        replica.pending.remove(&id);
                    }
                    // Superseded by a later local write still in flight.
                    (_, Some(_)) => continue,
                    _ => {}
                }

                let maps = replica.maps.entry(entry.collection.clone()).or_default();
                let current = maps.get(&entry.key);
                if current.is_some_and(|c| c.version >= entry.version) {
                    continue;
                }
                let previous = current.and_then(|c| c.value.clone());
                let action = action_for(previous.is_some(), entry.value.is_some());
                let unchanged = previous == entry.value;
                maps.insert(
                    entry.key.clone(),
                    Entry {
                        value: entry.value,
                        version: entry.version,
                    },
                );
                if let (Some(action), false) = (action, unchanged) {
                    changed
                        .entry(entry.collection)
                        .or_default()
                        .push(KeyChange::new(entry.key, action));
                }
            }
        }
        changed
            .into_iter()
            .map(|(collection, changes)| ChangeBatch {
                collection,
                changes,
            })
            .collect()
    }

    fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Snapshot { entries, presence } => {
                debug!("Snapshot with {} entries", entries.len());
                *self.inner.presence.write() = presence.into_iter().collect();
                let batches = self.merge(entries, None);
                self.notify(batches);
            }
            ServerFrame::Synced => {
                self.inner.synced.send_replace(true);
            }
            ServerFrame::Changed { entry, echo } => {
                let batches = self.merge(vec![entry], echo);
                self.notify(batches);
            }
            ServerFrame::PresenceChanged { peer, online } => {
                debug!("Presence of '{}' is now {}", peer, online);
                self.inner.presence.write().insert(peer, online);
            }
            ServerFrame::LedgerReply {
                request_id,
                ok,
                error,
            } => {
                let Some(reply) = self.inner.ledger_requests.lock().remove(&request_id) else {
                    debug!("Late ledger reply {} dropped", request_id);
                    return;
                };
                let result = match (ok, error) {
                    (Some(ok), _) => Ok(ok),
                    (None, Some(error)) => Err(error),
                    (None, None) => Err("Empty ledger reply".to_string()),
                };
                let _ = reply.send(result);
            }
            ServerFrame::Error { message } => warn!("Relay reported an error: {}", message),
        }
    }

    /// One oracle round-trip through the relay's ledger.
    pub(crate) async fn ledger_request(&self, op: LedgerOp) -> MarketResult<bool> {
        if !self.is_connected() {
            return Err(MarketError::OracleUnavailable(
                "Relay connection lost".into(),
            ));
        }
        let request_id = self.inner.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.inner.ledger_requests.lock().insert(request_id, tx);
        if self.send(ClientFrame::Ledger { request_id, op }).is_err() {
            self.inner.ledger_requests.lock().remove(&request_id);
            return Err(MarketError::OracleUnavailable(
                "Relay connection closed".into(),
            ));
        }

        match tokio::time::timeout(self.inner.oracle_timeout, rx).await {
            Ok(Ok(Ok(ok))) => Ok(ok),
            Ok(Ok(Err(message))) => Err(MarketError::OracleUnavailable(message)),
            Ok(Err(_)) => Err(MarketError::OracleUnavailable(
                "Relay connection lost during ledger request".into(),
            )),
            Err(_) => {
                self.inner.ledger_requests.lock().remove(&request_id);
                Err(MarketError::OracleUnavailable(format!(
                    "No ledger reply within {}s",
                    self.inner.oracle_timeout.as_secs()
                )))
            }
        }
    }
}

async fn write_frame(
    wr: &mut tokio::net::tcp::OwnedWriteHalf,
    frame: &ClientFrame,
) -> MarketResult<()> {
    let line = encode_frame(frame)?;
    wr.write_all(&line)
        .await
        .map_err(|e| MarketError::SubstrateUnavailable(format!("Relay write failed: {e}")))
}

#[async_trait]
impl ReplicatedStore for RelayStore {
    fn get(&self, collection: &str, key: &str) -> MarketResult<Option<Value>> {
        Ok(self
            .inner
            .replica
            .lock()
            .maps
            .get(collection)
            .and_then(|m| m.get(key))
            .and_then(|e| e.value.clone()))
    }

    fn set(&self, collection: &str, key: &str, value: Value) -> MarketResult<()> {
        self.write(collection, key, Some(value)).map(|_| ())
    }

    fn delete(&self, collection: &str, key: &str) -> MarketResult<bool> {
        self.write(collection, key, None)
    }

    fn entries(&self, collection: &str) -> MarketResult<Vec<(String, Value)>> {
        Ok(self
            .inner
            .replica
            .lock()
            .maps
            .get(collection)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, e)| e.value.clone().map(|v| (k.clone(), v)))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn observe(&self, collection: &str) -> MarketResult<ChangeStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .observers
            .lock()
            .push((collection.to_string(), tx));
        Ok(rx)
    }

    fn is_online(&self, peer_name: &str) -> Option<bool> {
        self.inner.presence.read().get(peer_name).copied()
    }

    fn online_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .inner
            .presence
            .read()
            .iter()
            .filter(|(_, online)| **online)
            .map(|(peer, _)| peer.clone())
            .collect();
        peers.sort();
        peers
    }

    fn set_presence(&self, online: bool) -> MarketResult<()> {
        self.ensure_connected()?;
        self.send(ClientFrame::Presence { online })?;
        self.inner
            .presence
            .write()
            .insert(self.inner.peer.clone(), online);
        Ok(())
    }

    async fn wait_synced(&self) -> MarketResult<bool> {
        let mut synced = self.inner.synced.subscribe();
        tokio::select! {
            result = synced.wait_for(|s| *s) => result
                .map(|_| true)
                .map_err(|_| MarketError::SubstrateUnavailable("Relay store dropped".into())),
            () = self.inner.disconnected.cancelled() => Err(MarketError::SubstrateUnavailable(
                "Relay connection lost before initial sync".into(),
            )),
        }
    }

    async fn close(&self) -> MarketResult<()> {
        self.inner.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Relay task failed: {}", e);
            }
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        info!("Relay connection of '{}' closed", self.inner.peer);
        Ok(())
    }
}
