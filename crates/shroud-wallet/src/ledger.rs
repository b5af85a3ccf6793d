//! Ledger access and event ingestion.
//!
//! [`EventFetcher`] splits the configured block span into pages, fetches
//! pages concurrently (bounded by `max_parallel_fetches`), joins every page
//! and only then sorts the result into a [`LedgerSnapshot`]. Spent/unspent
//! decisions are made on the complete snapshot: a nullifier can land in a
//! later page than its commitment.

use std::thread;

use tracing::debug;

use shroud_compliance::{BloomScreen, ComplianceError, StatusTree};
use shroud_core::{FieldElement, PoolConfig, SharedCrypto};
use shroud_state::{
    sort_events, CommitmentEvent, MerkleTree, NullifierEvent, NullifierSet, PublicKeyEvent,
    StateError, StatusFlaggedEvent,
};

use crate::error::LedgerError;

/// Inclusive block interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockRange {
    /// First block.
    pub from: u64,
    /// Last block.
    pub to: u64,
}

impl BlockRange {
    /// Split `[from, to]` into pages of at most `page` blocks; `None` is one page.
    pub fn pages(from: u64, to: u64, page: Option<u64>) -> Vec<BlockRange> {
        if from > to {
            return Vec::new();
        }
        let step = match page {
            Some(p) if p > 0 => p,
            _ => return vec![BlockRange { from, to }],
        };
        let mut out = Vec::new();
        let mut start = from;
        loop {
            let end = start.saturating_add(step - 1).min(to);
            out.push(BlockRange { from: start, to: end });
            if end == to {
                break;
            }
            start = end + 1;
        }
        out
    }

    /// Whether `block` lies in the range.
    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }
}

/// Read access to the pool and registry contracts.
pub trait LedgerClient: Send + Sync {
    /// Latest block number.
    fn latest_block(&self) -> Result<u64, LedgerError>;

    /// `NewCommitment` events in `range`.
    fn commitment_events(&self, range: BlockRange) -> Result<Vec<CommitmentEvent>, LedgerError>;

    /// `NewNullifier` events in `range`.
    fn nullifier_events(&self, range: BlockRange) -> Result<Vec<NullifierEvent>, LedgerError>;

    /// `PublicKey` registrations in `range`.
    fn public_key_events(&self, range: BlockRange) -> Result<Vec<PublicKeyEvent>, LedgerError>;

    /// `StatusFlagged` events in `range`.
    fn status_flagged_events(&self, range: BlockRange) -> Result<Vec<StatusFlaggedEvent>, LedgerError>;

    /// Most recently published commitment-tree root.
    fn last_root(&self) -> Result<FieldElement, LedgerError>;

    /// Whether the pool accepts proofs against `root`.
    fn is_known_root(&self, root: &FieldElement) -> Result<bool, LedgerError>;
}

/// Complete, ordered view of the ledger up to `latest_block`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Block the snapshot was taken at.
    pub latest_block: u64,
    /// Commitment events in ledger order.
    pub commitments: Vec<CommitmentEvent>,
    /// Nullifier events in ledger order.
    pub nullifiers: Vec<NullifierEvent>,
    /// Public key registrations in ledger order.
    pub public_keys: Vec<PublicKeyEvent>,
    /// Status flags in ledger order.
    pub flags: Vec<StatusFlaggedEvent>,
}

impl LedgerSnapshot {
    /// Spent nullifiers.
    pub fn nullifier_set(&self) -> NullifierSet {
        NullifierSet::from_events(&self.nullifiers)
    }

    /// Commitment tree rebuilt from the snapshot.
    pub fn commitment_tree(&self, crypto: SharedCrypto, height: u8) -> Result<MerkleTree, StateError> {
        MerkleTree::from_events(crypto, height, &self.commitments)
    }

    /// Status tree rebuilt from the snapshot.
    pub fn status_tree(&self, crypto: SharedCrypto, height: u8) -> Result<StatusTree, ComplianceError> {
        StatusTree::from_events(crypto, height, &self.flags)
    }

    /// Bloom screen over the flagged masked commitments.
    pub fn bloom_screen(&self, crypto: SharedCrypto, bits: usize) -> BloomScreen {
        BloomScreen::from_events(crypto, bits, &self.flags)
    }
}

#[derive(Default)]
struct Page {
    commitments: Vec<CommitmentEvent>,
    nullifiers: Vec<NullifierEvent>,
    public_keys: Vec<PublicKeyEvent>,
    flags: Vec<StatusFlaggedEvent>,
}

fn fetch_page(ledger: &dyn LedgerClient, range: BlockRange) -> Result<Page, LedgerError> {
    let page = Page {
        commitments: ledger.commitment_events(range)?,
        nullifiers: ledger.nullifier_events(range)?,
        public_keys: ledger.public_key_events(range)?,
        flags: ledger.status_flagged_events(range)?,
    };
    debug!(
        from = range.from,
        to = range.to,
        commitments = page.commitments.len(),
        nullifiers = page.nullifiers.len(),
        "fetched page"
    );
    Ok(page)
}

/// Paginated, bounded-parallel event fetcher.
pub struct EventFetcher<'a> {
    ledger: &'a dyn LedgerClient,
    start_block: u64,
    page_size: Option<u64>,
    max_parallel: usize,
}

impl<'a> EventFetcher<'a> {
    /// Fetcher following `config`'s start block, page size and parallelism.
    pub fn new(ledger: &'a dyn LedgerClient, config: &PoolConfig) -> Self {
        Self {
            ledger,
            start_block: config.start_block,
            page_size: config.block_page_size,
            max_parallel: config.max_parallel_fetches.max(1),
        }
    }

    /// Fetch every event from the start block to the latest block.
    pub fn fetch(&self) -> Result<LedgerSnapshot, LedgerError> {
        let latest = self.ledger.latest_block()?;
        let ranges = BlockRange::pages(self.start_block, latest, self.page_size);
        let mut snapshot = LedgerSnapshot {
            latest_block: latest,
            ..LedgerSnapshot::default()
        };

        for batch in ranges.chunks(self.max_parallel) {
            let pages = thread::scope(|s| {
                let handles: Vec<_> = batch
                    .iter()
                    .map(|range| {
                        let ledger = self.ledger;
                        let range = *range;
                        s.spawn(move || fetch_page(ledger, range))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().map_err(|_| LedgerError::FetchWorker)?)
                    .collect::<Result<Vec<Page>, LedgerError>>()
            })?;
            for page in pages {
                snapshot.commitments.extend(page.commitments);
                snapshot.nullifiers.extend(page.nullifiers);
                snapshot.public_keys.extend(page.public_keys);
                snapshot.flags.extend(page.flags);
            }
        }

        sort_events(&mut snapshot.commitments);
        sort_events(&mut snapshot.nullifiers);
        sort_events(&mut snapshot.public_keys);
        sort_events(&mut snapshot.flags);
        debug!(
            latest,
            pages = ranges.len(),
            commitments = snapshot.commitments.len(),
            nullifiers = snapshot.nullifiers.len(),
            flags = snapshot.flags.len(),
            "ledger snapshot complete"
        );
        Ok(snapshot)
    }
}
