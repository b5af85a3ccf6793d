//! Masked-commitment registry.
//!
//! One row per depositor address, created when the first deposit from that
//! address lands and reused by every later deposit. Wallets only read: a
//! deposit carries a [`pending`](MaskedCommitmentRegistry::pending) record
//! and the ledger [`insert`](MaskedCommitmentRegistry::insert)s it on
//! acceptance. The only other write is `mark_flagged` (false to true, never
//! back).

use std::collections::BTreeMap;
use std::path::Path;

use borsh::{BorshDeserialize, BorshSerialize};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shroud_core::{from_bytes, to_bytes, CryptoProvider, FieldElement};
use shroud_state::MaskedAncestor;

use crate::error::ComplianceError;

const TREE_RECORDS: &str = "masked_records";
const TREE_ADDRESSES: &str = "masked_addresses";
const TREE_META: &str = "meta";
const META_NEXT_ID: &str = "next_id";

/// Per-depositor masked identity.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct MaskedCommitmentRecord {
    /// Registry id; doubles as the status-tree key.
    pub id: u64,
    /// Ledger address of the depositor.
    pub depositor: String,
    /// Commitment of the depositor's first deposit.
    pub commitment: FieldElement,
    /// Blinding of the depositor's first deposit.
    pub blinding: FieldElement,
    /// `H(commitment, blinding)`.
    pub masked_commitment: FieldElement,
    /// Set once the authority flags the depositor.
    pub flagged: bool,
}

impl MaskedCommitmentRecord {
    /// Fresh unflagged record.
    pub fn new(
        crypto: &dyn CryptoProvider,
        id: u64,
        depositor: &str,
        commitment: FieldElement,
        blinding: FieldElement,
    ) -> Self {
        Self {
            id,
            depositor: depositor.to_string(),
            commitment,
            blinding,
            masked_commitment: crypto.hash(&[commitment, blinding]),
            flagged: false,
        }
    }

    /// Ancestry marker for notes funded by this depositor.
    pub fn ancestor(&self) -> MaskedAncestor {
        MaskedAncestor {
            id: self.id,
            masked_commitment: self.masked_commitment,
        }
    }
}

/// Storage for masked-commitment records.
pub trait MaskedCommitmentRegistry: Send + Sync {
    /// Record owned by `depositor`.
    fn get_by_address(&self, depositor: &str) -> Result<Option<MaskedCommitmentRecord>, ComplianceError>;

    /// Record with registry id `id`.
    fn get_by_id(&self, id: u64) -> Result<Option<MaskedCommitmentRecord>, ComplianceError>;

    /// Id the next new record receives.
    fn next_id(&self) -> Result<u64, ComplianceError>;

    /// Persist `record` for a landed deposit.
    ///
    /// Returns `false` when the depositor's row already holds this record,
    /// `true` when a new row was written. A different record for the same
    /// depositor, or an id other than [`next_id`](Self::next_id), is refused.
    fn insert(&self, record: &MaskedCommitmentRecord) -> Result<bool, ComplianceError>;

    /// Flag record `id`. Returns `false` when it was already flagged.
    fn mark_flagged(&self, id: u64) -> Result<bool, ComplianceError>;

    /// All records ordered by id.
    fn records(&self) -> Result<Vec<MaskedCommitmentRecord>, ComplianceError>;

    /// Record a deposit from `depositor` would carry, without writing it.
    fn pending(
        &self,
        crypto: &dyn CryptoProvider,
        depositor: &str,
        commitment: FieldElement,
        blinding: FieldElement,
    ) -> Result<MaskedCommitmentRecord, ComplianceError> {
        if let Some(existing) = self.get_by_address(depositor)? {
            debug!(id = existing.id, depositor, "reusing masked commitment");
            return Ok(existing);
        }
        let id = self.next_id()?;
        Ok(MaskedCommitmentRecord::new(crypto, id, depositor, commitment, blinding))
    }

    /// Records the authority still has to screen.
    fn unflagged(&self) -> Result<Vec<MaskedCommitmentRecord>, ComplianceError> {
        Ok(self.records()?.into_iter().filter(|r| !r.flagged).collect())
    }
}

fn check_insert(
    existing: Option<MaskedCommitmentRecord>,
    next_id: u64,
    record: &MaskedCommitmentRecord,
) -> Result<bool, ComplianceError> {
    if let Some(existing) = existing {
        if existing.id == record.id && existing.masked_commitment == record.masked_commitment {
            return Ok(false);
        }
        return Err(ComplianceError::AlreadyRegistered(record.depositor.clone()));
    }
    if record.id != next_id {
        return Err(ComplianceError::IdConflict {
            expected: next_id,
            got: record.id,
        });
    }
    Ok(true)
}

#[derive(Default)]
struct MemoryInner {
    by_id: BTreeMap<u64, MaskedCommitmentRecord>,
    by_address: HashMap<String, u64>,
}

/// In-process registry.
#[derive(Default)]
pub struct MemoryRegistry {
    inner: RwLock<MemoryInner>,
}

impl MemoryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether no depositor registered yet.
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

impl MaskedCommitmentRegistry for MemoryRegistry {
    fn get_by_address(&self, depositor: &str) -> Result<Option<MaskedCommitmentRecord>, ComplianceError> {
        let inner = self.inner.read();
        Ok(inner
            .by_address
            .get(depositor)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    fn get_by_id(&self, id: u64) -> Result<Option<MaskedCommitmentRecord>, ComplianceError> {
        Ok(self.inner.read().by_id.get(&id).cloned())
    }

    fn next_id(&self) -> Result<u64, ComplianceError> {
        Ok(self.inner.read().by_id.len() as u64)
    }

    fn insert(&self, record: &MaskedCommitmentRecord) -> Result<bool, ComplianceError> {
        let mut inner = self.inner.write();
        let existing = inner
            .by_address
            .get(&record.depositor)
            .and_then(|id| inner.by_id.get(id))
            .cloned();
        if !check_insert(existing, inner.by_id.len() as u64, record)? {
            return Ok(false);
        }
        inner.by_address.insert(record.depositor.clone(), record.id);
        inner.by_id.insert(record.id, record.clone());
        info!(id = record.id, depositor = %record.depositor, "registered masked commitment");
        Ok(true)
    }

    fn mark_flagged(&self, id: u64) -> Result<bool, ComplianceError> {
        let mut inner = self.inner.write();
        let record = inner
            .by_id
            .get_mut(&id)
            .ok_or(ComplianceError::UnknownRecord(id))?;
        if record.flagged {
            return Ok(false);
        }
        record.flagged = true;
        Ok(true)
    }

    fn records(&self) -> Result<Vec<MaskedCommitmentRecord>, ComplianceError> {
        Ok(self.inner.read().by_id.values().cloned().collect())
    }
}

/// Registry persisted in sled, records Borsh-encoded.
pub struct SledRegistry {
    db: sled::Db,
    records: sled::Tree,
    addresses: sled::Tree,
    meta: sled::Tree,
}

impl SledRegistry {
    /// Open (or create) the registry at `path`.
    pub fn open(path: &Path) -> Result<Self, ComplianceError> {
        Self::from_db(sled::open(path)?)
    }

    /// Use an already-open database.
    pub fn from_db(db: sled::Db) -> Result<Self, ComplianceError> {
        Ok(Self {
            records: db.open_tree(TREE_RECORDS)?,
            addresses: db.open_tree(TREE_ADDRESSES)?,
            meta: db.open_tree(TREE_META)?,
            db,
        })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), ComplianceError> {
        self.db.flush()?;
        Ok(())
    }

    fn put(&self, record: &MaskedCommitmentRecord) -> Result<(), ComplianceError> {
        self.records
            .insert(record.id.to_be_bytes(), to_bytes(record)?)?;
        Ok(())
    }
}

impl MaskedCommitmentRegistry for SledRegistry {
    fn get_by_address(&self, depositor: &str) -> Result<Option<MaskedCommitmentRecord>, ComplianceError> {
        match self.addresses.get(depositor.as_bytes())? {
            Some(id) => {
                let id = from_bytes::<u64>(&id)?;
                self.get_by_id(id)
            }
            None => Ok(None),
        }
    }

    fn get_by_id(&self, id: u64) -> Result<Option<MaskedCommitmentRecord>, ComplianceError> {
        match self.records.get(id.to_be_bytes())? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn next_id(&self) -> Result<u64, ComplianceError> {
        match self.meta.get(META_NEXT_ID)? {
            Some(bytes) => Ok(from_bytes::<u64>(&bytes)?),
            None => Ok(0),
        }
    }

    fn insert(&self, record: &MaskedCommitmentRecord) -> Result<bool, ComplianceError> {
        let existing = self.get_by_address(&record.depositor)?;
        if !check_insert(existing, self.next_id()?, record)? {
            return Ok(false);
        }
        self.put(record)?;
        self.addresses
            .insert(record.depositor.as_bytes(), to_bytes(&record.id)?)?;
        self.meta.insert(META_NEXT_ID, to_bytes(&(record.id + 1))?)?;
        info!(id = record.id, depositor = %record.depositor, "registered masked commitment");
        Ok(true)
    }

    fn mark_flagged(&self, id: u64) -> Result<bool, ComplianceError> {
        let mut record = self
            .get_by_id(id)?
            .ok_or(ComplianceError::UnknownRecord(id))?;
        if record.flagged {
            return Ok(false);
        }
        record.flagged = true;
        self.put(&record)?;
        Ok(true)
    }

    fn records(&self) -> Result<Vec<MaskedCommitmentRecord>, ComplianceError> {
        let mut out = Vec::new();
        for item in self.records.iter() {
            let (_, v) = item?;
            out.push(from_bytes(&v)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_core::Blake3Provider;

    fn register(
        reg: &dyn MaskedCommitmentRegistry,
        depositor: &str,
        commitment: u64,
        blinding: u64,
    ) -> MaskedCommitmentRecord {
        let record = reg
            .pending(
                &Blake3Provider,
                depositor,
                FieldElement::from(commitment),
                FieldElement::from(blinding),
            )
            .expect("pending");
        reg.insert(&record).expect("insert");
        record
    }

    fn exercise(reg: &dyn MaskedCommitmentRegistry) {
        let c = Blake3Provider;
        let staged = reg
            .pending(&c, "0xalice", FieldElement::from(10), FieldElement::from(1))
            .expect("pending");
        assert!(reg.records().expect("records").is_empty(), "pending writes nothing");
        assert_eq!(reg.next_id().expect("next"), 0);

        let first = register(reg, "0xalice", 10, 1);
        assert_eq!(first, staged);
        let again = register(reg, "0xalice", 20, 2);
        assert_eq!(first, again);
        assert!(!reg.insert(&again).expect("reinsert"));
        assert_eq!(
            first.masked_commitment,
            c.hash(&[FieldElement::from(10), FieldElement::from(1)])
        );
        let rival = MaskedCommitmentRecord::new(&c, 1, "0xalice", FieldElement::from(3), FieldElement::from(3));
        assert!(matches!(
            reg.insert(&rival),
            Err(ComplianceError::AlreadyRegistered(_))
        ));

        let bob = register(reg, "0xbob", 11, 4);
        assert_ne!(bob.id, first.id);
        assert_eq!(reg.records().expect("records").len(), 2);

        assert!(reg.mark_flagged(bob.id).expect("flag"));
        assert!(!reg.mark_flagged(bob.id).expect("idempotent"));
        assert!(reg.get_by_id(bob.id).expect("get").expect("some").flagged);
        assert!(!reg.insert(&bob).expect("flagged row still matches"));
        let unflagged = reg.unflagged().expect("unflagged");
        assert_eq!(unflagged.len(), 1);
        assert_eq!(unflagged[0].depositor, "0xalice");

        assert!(matches!(
            reg.mark_flagged(99),
            Err(ComplianceError::UnknownRecord(99))
        ));
    }

    #[test]
    fn stale_pending_record_is_refused() {
        let reg = MemoryRegistry::new();
        let c = Blake3Provider;
        let carol = reg
            .pending(&c, "0xcarol", FieldElement::from(5), FieldElement::from(6))
            .expect("pending");
        let dave = reg
            .pending(&c, "0xdave", FieldElement::from(7), FieldElement::from(8))
            .expect("pending");
        assert_eq!(carol.id, dave.id);
        assert!(reg.insert(&carol).expect("insert"));
        assert!(matches!(
            reg.insert(&dave),
            Err(ComplianceError::IdConflict { expected: 1, got: 0 })
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn memory_registry_semantics() {
        let reg = MemoryRegistry::new();
        exercise(&reg);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn sled_registry_semantics_and_persistence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry");
        {
            let reg = SledRegistry::open(&path).expect("open");
            exercise(&reg);
            reg.flush().expect("flush");
        }
        let reg = SledRegistry::open(&path).expect("reopen");
        let alice = reg.get_by_address("0xalice").expect("get").expect("some");
        assert!(!alice.flagged);
        assert_eq!(reg.unflagged().expect("unflagged").len(), 1);
        assert_eq!(reg.next_id().expect("next"), 2);
        let carol = register(&reg, "0xcarol", 5, 6);
        assert_eq!(carol.id, 2);
    }
}
