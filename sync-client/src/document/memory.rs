//! In-memory last-writer-wins map, used as the reference document.
//!
//! Every edit is an operation identified by `(client, clock)`. The value of a
//! key is the operation with the highest `(clock, client)`, so replicas that
//! hold the same set of operations agree regardless of arrival order.

use std::collections::{BTreeMap, HashMap, HashSet};

use sealed_sync_types::{Bucket, ClientMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{CrdtDocument, DocumentError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Op {
    client: u64,
    clock: u64,
    key: String,
    /// `None` removes the key.
    value: Option<String>,
}

impl Op {
    fn id(&self) -> (u64, u64) {
        (self.client, self.clock)
    }
}

/// Reference [`CrdtDocument`]: a string map with last-writer-wins keys and
/// per-client awareness state.
#[derive(Debug)]
pub struct MemoryDocument {
    client_id: u64,
    clock: u64,
    ops: HashMap<(u64, u64), Op>,
    awareness: HashMap<u64, Vec<u8>>,
    local: Option<mpsc::UnboundedSender<ClientMessage>>,
}

impl MemoryDocument {
    /// Create an empty document for the given client.
    pub fn new(client_id: u64) -> Self {
        Self {
            client_id,
            clock: 0,
            ops: HashMap::new(),
            awareness: HashMap::new(),
            local: None,
        }
    }

    /// This replica's client id.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Set `key` to `value`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.edit(key.into(), Some(value.into()));
    }

    /// Remove `key`.
    pub fn remove(&mut self, key: impl Into<String>) {
        self.edit(key.into(), None);
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.winner(key).and_then(|op| op.value.clone())
    }

    /// Current key/value pairs.
    pub fn entries(&self) -> BTreeMap<String, String> {
        let keys: HashSet<&str> = self.ops.values().map(|op| op.key.as_str()).collect();
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect()
    }

    /// Number of operations held.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Publish this client's ephemeral presence state.
    pub fn set_awareness(&mut self, state: Vec<u8>) {
        let mut operation = self.client_id.to_le_bytes().to_vec();
        operation.extend_from_slice(&state);
        self.emit(ClientMessage::awareness(operation));
    }

    /// Latest awareness state received from another client.
    pub fn awareness_of(&self, client_id: u64) -> Option<&[u8]> {
        self.awareness.get(&client_id).map(Vec::as_slice)
    }

    fn edit(&mut self, key: String, value: Option<String>) {
        self.clock += 1;
        let op = Op {
            client: self.client_id,
            clock: self.clock,
            key,
            value,
        };
        self.ops.insert(op.id(), op.clone());
        match encode_ops(&[op]) {
            Ok(message) => self.emit(message),
            Err(err) => tracing::warn!(error = %err, "failed to encode local edit"),
        }
    }

    fn emit(&mut self, message: ClientMessage) {
        if let Some(sender) = &self.local {
            if sender.send(message).is_err() {
                self.local = None;
            }
        }
    }

    fn winner(&self, key: &str) -> Option<&Op> {
        self.ops
            .values()
            .filter(|op| op.key == key)
            .max_by_key(|op| (op.clock, op.client))
    }
}

enum Decoded {
    Ops(Vec<Op>),
    Awareness(u64, Vec<u8>),
}

fn encode_ops(ops: &[Op]) -> Result<ClientMessage, DocumentError> {
    rmp_serde::to_vec(ops)
        .map(ClientMessage::doc)
        .map_err(|e| DocumentError::EncodingFailed(e.to_string()))
}

fn decode(message: &ClientMessage) -> Result<Decoded, DocumentError> {
    match message.bucket {
        Bucket::Doc => rmp_serde::from_slice(&message.operation)
            .map(Decoded::Ops)
            .map_err(|e| DocumentError::InvalidUpdate(e.to_string())),
        Bucket::Awareness => {
            if message.operation.len() < 8 {
                return Err(DocumentError::InvalidUpdate(
                    "awareness update without client id".into(),
                ));
            }
            let (client, state) = message.operation.split_at(8);
            let mut id = [0u8; 8];
            id.copy_from_slice(client);
            Ok(Decoded::Awareness(u64::from_le_bytes(id), state.to_vec()))
        }
    }
}

impl CrdtDocument for MemoryDocument {
    fn apply_remote_updates(&mut self, updates: &[ClientMessage]) -> Result<(), DocumentError> {
        // Decode everything first so a bad update applies nothing
        let decoded = updates.iter().map(decode).collect::<Result<Vec<_>, _>>()?;
        for item in decoded {
            match item {
                Decoded::Ops(ops) => {
                    for op in ops {
                        self.clock = self.clock.max(op.clock);
                        self.ops.insert(op.id(), op);
                    }
                }
                Decoded::Awareness(client, state) if client != self.client_id => {
                    self.awareness.insert(client, state);
                }
                Decoded::Awareness(..) => {}
            }
        }
        Ok(())
    }

    fn encode_snapshot(&self) -> Result<Vec<ClientMessage>, DocumentError> {
        let mut ops: Vec<Op> = self.ops.values().cloned().collect();
        ops.sort_by_key(|op| (op.clock, op.client));
        Ok(vec![encode_ops(&ops)?])
    }

    fn diff_against(
        &self,
        remote: &[ClientMessage],
    ) -> Result<Option<ClientMessage>, DocumentError> {
        let mut known = HashSet::new();
        for message in remote {
            if let Decoded::Ops(ops) = decode(message)? {
                known.extend(ops.iter().map(Op::id));
            }
        }

        let mut missing: Vec<Op> = self
            .ops
            .values()
            .filter(|op| !known.contains(&op.id()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(None);
        }
        missing.sort_by_key(|op| (op.clock, op.client));
        encode_ops(&missing).map(Some)
    }

    fn subscribe_local_updates(&mut self) -> mpsc::UnboundedReceiver<ClientMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.local = Some(sender);
        receiver
    }
}
