//! Unspent-set reconstruction.
//!
//! Every commitment event is trial-decrypted with the wallet key. Payloads
//! addressed to someone else fail to decrypt; that is the normal case and is
//! skipped silently. Decrypted notes whose recomputed commitment does not
//! match the event are dropped as tampered. The rest are kept unless their
//! nullifier appears anywhere in the snapshot.

use hashbrown::HashMap;
use tracing::{debug, trace, warn};

use shroud_core::{ComplianceMode, CryptoProvider, Keypair, PoolConfig};
use shroud_state::{Ancestry, CommitmentEvent, Utxo};

use crate::error::WalletError;
use crate::ledger::LedgerSnapshot;

fn open_ancestry(
    crypto: &dyn CryptoProvider,
    keypair: &Keypair,
    ev: &CommitmentEvent,
    config: &PoolConfig,
) -> Ancestry {
    if config.compliance_mode == ComplianceMode::None {
        return Ancestry::None;
    }
    let Some(blob) = &ev.encrypted_chain_state else {
        warn!(index = ev.index, "note carries no chain state");
        return Ancestry::None;
    };
    let decoded = keypair
        .decrypt(crypto, blob)
        .map_err(WalletError::from)
        .and_then(|plain| {
            Ancestry::from_payload(config.compliance_mode, &plain, config.bloom_filter_bits)
                .map_err(WalletError::from)
        });
    match decoded {
        Ok(ancestry) => ancestry,
        Err(e) => {
            warn!(index = ev.index, error = %e, "unreadable chain state");
            Ancestry::None
        }
    }
}

/// Notes owned by `keypair` in `snapshot`, spent or not, in observation order.
pub fn owned_notes(
    crypto: &dyn CryptoProvider,
    keypair: &Keypair,
    snapshot: &LedgerSnapshot,
    config: &PoolConfig,
) -> Vec<Utxo> {
    let mut out = Vec::new();
    for ev in &snapshot.commitments {
        let utxo = match Utxo::decrypt(crypto, keypair, &ev.encrypted_output, ev.index) {
            Ok(u) => u,
            Err(e) if Utxo::is_foreign_payload(&e) => {
                trace!(index = ev.index, "not ours");
                continue;
            }
            Err(e) => {
                debug!(index = ev.index, error = %e, "undecodable payload");
                continue;
            }
        };
        if utxo.commitment(crypto) != ev.commitment {
            warn!(index = ev.index, "decrypted note does not match its commitment");
            continue;
        }
        out.push(utxo.with_ancestry(open_ancestry(crypto, keypair, ev, config)));
    }
    out
}

/// Unspent notes owned by `keypair`, in the order their commitments appeared.
pub fn unspent_notes(
    crypto: &dyn CryptoProvider,
    keypair: &Keypair,
    snapshot: &LedgerSnapshot,
    config: &PoolConfig,
) -> Result<Vec<Utxo>, WalletError> {
    let spent = snapshot.nullifier_set();
    let mut out = Vec::new();
    for utxo in owned_notes(crypto, keypair, snapshot, config) {
        if !spent.contains(&utxo.nullifier(crypto)?) {
            out.push(utxo);
        }
    }
    debug!(unspent = out.len(), "reconstructed unspent set");
    Ok(out)
}

/// Ledger account → registered shielded address.
#[derive(Clone, Debug, Default)]
pub struct PublicKeyDirectory {
    entries: HashMap<String, Keypair>,
}

impl PublicKeyDirectory {
    /// Directory over `snapshot`'s registrations; later ones win.
    pub fn from_snapshot(snapshot: &LedgerSnapshot) -> Self {
        let mut entries = HashMap::new();
        for ev in &snapshot.public_keys {
            match Keypair::from_address(&ev.address) {
                Ok(kp) => {
                    entries.insert(ev.owner.clone(), kp);
                }
                Err(e) => warn!(owner = %ev.owner, error = %e, "invalid registered address"),
            }
        }
        Self { entries }
    }

    /// Viewing-only keypair registered by `owner`.
    pub fn lookup(&self, owner: &str) -> Option<&Keypair> {
        self.entries.get(owner)
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nobody registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
