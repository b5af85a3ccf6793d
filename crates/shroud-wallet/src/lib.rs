#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Shroud shielded wallet.
//!
//! Responsibilities:
//! - Ledger access: the client trait, paginated event fetching, an RPC
//!   client and an in-process ledger
//! - Reconstructing the unspent note set from a ledger snapshot
//! - Coin selection under the circuits' fixed input arity
//! - Transaction preparation with compliance screening
//! - Password-protected key storage
//!
//! Prepared transactions are returned to the caller; submission is external.

use std::sync::Arc;

use tracing::debug;

use shroud_compliance::MaskedCommitmentRegistry;
use shroud_core::{Keypair, PoolConfig, Prover, SharedCrypto};
use shroud_state::Utxo;

pub mod error;
pub mod keystore;
pub mod ledger;
pub mod memory;
pub mod prepare;
pub mod rpc_client;
pub mod scan;
pub mod select;

pub use error::*;
pub use keystore::Keystore;
pub use ledger::*;
pub use memory::*;
pub use prepare::*;
pub use rpc_client::RpcClient;
pub use scan::*;
pub use select::*;

/// One account's view of the shielded pool.
pub struct ShieldedWallet {
    config: PoolConfig,
    crypto: SharedCrypto,
    keypair: Keypair,
    account: String,
    ledger: Arc<dyn LedgerClient>,
    preparer: TransactionPreparer,
}

impl ShieldedWallet {
    /// Wallet for `keypair`, paying in from ledger account `account`.
    pub fn new(
        config: PoolConfig,
        crypto: SharedCrypto,
        keypair: Keypair,
        account: &str,
        ledger: Arc<dyn LedgerClient>,
        prover: Arc<dyn Prover>,
        registry: Option<Arc<dyn MaskedCommitmentRegistry>>,
    ) -> Result<Self, WalletError> {
        let preparer = TransactionPreparer::new(config.clone(), crypto.clone(), prover, registry)?;
        Ok(Self {
            config,
            crypto,
            keypair,
            account: account.to_string(),
            ledger,
            preparer,
        })
    }

    /// Shielded address of this wallet.
    pub fn address(&self) -> String {
        self.keypair.address()
    }

    /// Spending keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Complete ledger snapshot.
    pub fn snapshot(&self) -> Result<LedgerSnapshot, WalletError> {
        Ok(EventFetcher::new(self.ledger.as_ref(), &self.config).fetch()?)
    }

    /// Unspent notes as of `snapshot`.
    pub fn unspent_at(&self, snapshot: &LedgerSnapshot) -> Result<Vec<Utxo>, WalletError> {
        unspent_notes(self.crypto.as_ref(), &self.keypair, snapshot, &self.config)
    }

    /// Unspent notes in observation order.
    pub fn unspent(&self) -> Result<Vec<Utxo>, WalletError> {
        self.unspent_at(&self.snapshot()?)
    }

    /// Sum of unspent notes.
    pub fn balance(&self) -> Result<u128, WalletError> {
        Ok(self
            .unspent()?
            .iter()
            .map(|u| u128::from(u.amount()))
            .sum())
    }

    /// Deposit `amount` from the wallet's ledger account into a new note.
    ///
    /// The registry is only read here; a first deposit's record is written
    /// by the ledger when the deposit lands.
    pub fn deposit(&self, amount: u64) -> Result<PreparedTransaction, WalletError> {
        let snapshot = self.snapshot()?;
        self.preparer.prepare(
            TxRequest::Deposit {
                depositor: self.account.clone(),
                owner: self.keypair.clone(),
                amount,
            },
            &snapshot,
            self.ledger.as_ref(),
        )
    }

    /// Pay `amount` to `recipient` inside the pool; change returns here.
    pub fn transfer(
        &self,
        amount: u64,
        recipient: &Keypair,
    ) -> Result<PreparedTransaction, WalletError> {
        let snapshot = self.snapshot()?;
        let inputs = select_inputs(amount, &self.unspent_at(&snapshot)?)?;
        debug!(amount, inputs = inputs.len(), "transfer");
        self.preparer.prepare(
            TxRequest::Transfer {
                inputs,
                recipient: recipient.clone(),
                amount,
                change: self.keypair.clone(),
            },
            &snapshot,
            self.ledger.as_ref(),
        )
    }

    /// Pay `amount` to whichever shielded address ledger account `owner` registered.
    pub fn transfer_to_owner(
        &self,
        amount: u64,
        owner: &str,
    ) -> Result<PreparedTransaction, WalletError> {
        let snapshot = self.snapshot()?;
        let directory = PublicKeyDirectory::from_snapshot(&snapshot);
        let recipient = directory
            .lookup(owner)
            .cloned()
            .ok_or_else(|| WalletError::UnknownRecipient(owner.to_string()))?;
        self.transfer(amount, &recipient)
    }

    /// Withdraw `amount` to public ledger address `recipient`.
    pub fn withdraw(&self, amount: u64, recipient: &str) -> Result<PreparedTransaction, WalletError> {
        let snapshot = self.snapshot()?;
        let inputs = select_inputs(amount, &self.unspent_at(&snapshot)?)?;
        debug!(amount, inputs = inputs.len(), "withdrawal");
        self.preparer.prepare(
            TxRequest::Withdrawal {
                inputs,
                recipient: recipient.to_string(),
                amount,
                change: self.keypair.clone(),
            },
            &snapshot,
            self.ledger.as_ref(),
        )
    }
}
