//! JSON-lines TCP ledger client.
//!
//! One request per connection: a JSON object terminated by `\n`, answered by
//! one JSON line carrying `"ok": true` and the result, or `"ok": false` and
//! an `"error"` string.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::trace;

use shroud_core::FieldElement;
use shroud_state::{CommitmentEvent, NullifierEvent, PublicKeyEvent, StatusFlaggedEvent};

use crate::error::LedgerError;
use crate::ledger::{BlockRange, LedgerClient};

/// Ledger reached over the node's line-delimited JSON RPC.
pub struct RpcClient {
    addr: String,
    auth: Option<String>,
    pool: String,
    registry: String,
}

impl RpcClient {
    /// Client for the node at `addr`, querying the given contracts.
    pub fn new(addr: &str, auth: Option<String>, pool: &str, registry: &str) -> Self {
        Self {
            addr: addr.to_string(),
            auth,
            pool: pool.to_string(),
            registry: registry.to_string(),
        }
    }

    fn send(&self, req: Value) -> Result<Value, LedgerError> {
        let mut stream = TcpStream::connect(&self.addr)?;
        let mut req = req;
        if let Some(token) = &self.auth {
            req["auth"] = json!(token);
        }
        let line = req.to_string();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        let mut reader = BufReader::new(stream);
        let mut resp = String::new();
        reader.read_line(&mut resp)?;
        let v: Value = serde_json::from_str(&resp)?;
        if v.get("ok").and_then(|o| o.as_bool()) != Some(true) {
            let err = v
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown error")
                .to_string();
            return Err(LedgerError::Rpc(err));
        }
        trace!(method = %req["method"], "rpc ok");
        Ok(v)
    }

    fn field<T: DeserializeOwned>(v: &Value, name: &str) -> Result<T, LedgerError> {
        let raw = v
            .get(name)
            .cloned()
            .ok_or_else(|| LedgerError::Rpc(format!("response missing `{name}`")))?;
        Ok(serde_json::from_value(raw)?)
    }

    fn events<T: DeserializeOwned>(
        &self,
        method: &str,
        contract: &str,
        range: BlockRange,
    ) -> Result<Vec<T>, LedgerError> {
        let v = self.send(json!({
            "method": method,
            "contract": contract,
            "from_block": range.from,
            "to_block": range.to,
        }))?;
        Self::field(&v, "events")
    }
}

impl LedgerClient for RpcClient {
    fn latest_block(&self) -> Result<u64, LedgerError> {
        let v = self.send(json!({"method": "get_block_number"}))?;
        Self::field(&v, "block")
    }

    fn commitment_events(&self, range: BlockRange) -> Result<Vec<CommitmentEvent>, LedgerError> {
        self.events("get_commitment_events", &self.pool, range)
    }

    fn nullifier_events(&self, range: BlockRange) -> Result<Vec<NullifierEvent>, LedgerError> {
        self.events("get_nullifier_events", &self.pool, range)
    }

    fn public_key_events(&self, range: BlockRange) -> Result<Vec<PublicKeyEvent>, LedgerError> {
        self.events("get_public_key_events", &self.pool, range)
    }

    fn status_flagged_events(&self, range: BlockRange) -> Result<Vec<StatusFlaggedEvent>, LedgerError> {
        self.events("get_status_flagged_events", &self.registry, range)
    }

    fn last_root(&self) -> Result<FieldElement, LedgerError> {
        let v = self.send(json!({"method": "get_last_root", "contract": self.pool}))?;
        Self::field(&v, "root")
    }

    fn is_known_root(&self, root: &FieldElement) -> Result<bool, LedgerError> {
        let v = self.send(json!({
            "method": "is_known_root",
            "contract": self.pool,
            "root": root,
        }))?;
        Self::field(&v, "known")
    }
}
