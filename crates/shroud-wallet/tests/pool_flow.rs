use std::sync::Arc;

use shroud_compliance::{
    verify_exclusion, Authority, ComplianceError, MaskedCommitmentRegistry, MemoryRegistry,
    SanctionsList,
};
use shroud_core::{
    Blake3Provider, ComplianceMode, CoreError, DigestProver, FieldElement, Keypair, PoolConfig,
    ProofOutput, Prover, ProverError, SharedCrypto, Witness,
};
use shroud_state::{StatusFlaggedEvent, Utxo};
use shroud_wallet::{
    ComplianceArtifacts, EventFetcher, InMemoryLedger, LedgerClient, LedgerError,
    ShieldedWallet, TransactionPreparer, TxRequest, WalletError,
};

struct Pool {
    crypto: SharedCrypto,
    config: PoolConfig,
    ledger: Arc<InMemoryLedger>,
    registry: Arc<dyn MaskedCommitmentRegistry>,
}

impl Pool {
    fn new(mode: ComplianceMode) -> Self {
        let crypto = Blake3Provider::shared();
        let config = PoolConfig {
            compliance_mode: mode,
            block_page_size: Some(3),
            max_parallel_fetches: 2,
            ..PoolConfig::default()
        };
        let registry: Arc<dyn MaskedCommitmentRegistry> = Arc::new(MemoryRegistry::new());
        let ledger = Arc::new(
            InMemoryLedger::new(crypto.clone(), &config)
                .expect("ledger")
                .with_registry(registry.clone()),
        );
        Self {
            crypto,
            config,
            ledger,
            registry,
        }
    }

    fn wallet(&self, keypair: &Keypair, account: &str) -> ShieldedWallet {
        ShieldedWallet::new(
            self.config.clone(),
            self.crypto.clone(),
            keypair.clone(),
            account,
            self.ledger.clone(),
            Arc::new(DigestProver),
            Some(self.registry.clone()),
        )
        .expect("wallet")
    }

    fn preparer(&self) -> TransactionPreparer {
        TransactionPreparer::new(
            self.config.clone(),
            self.crypto.clone(),
            Arc::new(DigestProver),
            Some(self.registry.clone()),
        )
        .expect("preparer")
    }

    fn published_flags(&self) -> Vec<StatusFlaggedEvent> {
        EventFetcher::new(self.ledger.as_ref(), &self.config)
            .fetch()
            .expect("fetch")
            .flags
    }

    fn authority(&self, sanctioned: &[&str], flags: &[StatusFlaggedEvent]) -> Authority {
        Authority::new(
            self.crypto.clone(),
            self.registry.clone(),
            Arc::new(SanctionsList::new(sanctioned.iter().copied())),
            Arc::new(DigestProver),
            &self.config,
            flags,
        )
        .expect("authority")
    }

    /// Flag with a fresh authority synced to the ledger; returns accepted flags.
    fn flag(&self, sanctioned: &[&str]) -> usize {
        let mut authority = self.authority(sanctioned, &self.published_flags());
        let txs = authority.scan_and_flag().expect("scan");
        txs.iter()
            .filter(|tx| self.ledger.apply_flag(tx).expect("flag accepted").is_some())
            .count()
    }
}

fn keypair(pool: &Pool) -> Keypair {
    Keypair::generate(pool.crypto.as_ref()).expect("keypair")
}

#[test]
fn deposit_transfer_flag_refuse_in_every_mode() {
    for mode in [
        ComplianceMode::None,
        ComplianceMode::ExactSmt,
        ComplianceMode::ProbabilisticBloom,
    ] {
        let pool = Pool::new(mode);
        let alice_kp = keypair(&pool);
        let bob_kp = keypair(&pool);
        let carol_kp = keypair(&pool);
        let alice = pool.wallet(&alice_kp, "0xalice");
        let bob = pool.wallet(&bob_kp, "0xbob");
        let carol = pool.wallet(&carol_kp, "0xcarol");

        let d1 = alice.deposit(10).expect("deposit 10");
        assert_eq!(d1.ext_data.ext_amount, 10);
        assert_eq!(d1.args.public_amount, FieldElement::from(10));
        assert_eq!(d1.args.input_nullifiers.len(), 2);
        pool.ledger.apply(&d1).expect("apply");
        let d2 = alice.deposit(5).expect("deposit 5");
        pool.ledger.apply(&d2).expect("apply");
        let d3 = carol.deposit(7).expect("deposit 7");
        pool.ledger.apply(&d3).expect("apply");

        match (&d1.compliance, &d2.compliance) {
            (
                ComplianceArtifacts::Registration { record: r1 },
                ComplianceArtifacts::Registration { record: r2 },
            ) => {
                assert_eq!(r1.depositor, "0xalice");
                assert_eq!(r1.id, r2.id, "second deposit reuses the record");
            }
            (ComplianceArtifacts::None, ComplianceArtifacts::None) => {
                assert_eq!(mode, ComplianceMode::None)
            }
            other => panic!("unexpected artifacts {other:?}"),
        }
        let expected_records = if mode == ComplianceMode::None { 0 } else { 2 };
        assert_eq!(pool.registry.records().expect("records").len(), expected_records);
        assert_eq!(alice.balance().expect("balance"), 15);

        // Two notes cover 12; change of 3 returns to alice.
        let t1 = alice.transfer(12, &bob_kp).expect("transfer");
        assert_eq!(t1.spent.len(), 2);
        assert_eq!(t1.ext_data.ext_amount, 0);
        assert!(t1.args.public_amount.is_zero());
        match (&t1.compliance, mode) {
            (
                ComplianceArtifacts::Exclusion {
                    status_root,
                    exclusions,
                    proofs,
                },
                ComplianceMode::ExactSmt,
            ) => {
                assert_eq!(exclusions.len(), 1, "both inputs share one ancestor");
                assert_eq!(proofs.len(), 1);
                assert!(verify_exclusion(pool.crypto.as_ref(), &exclusions[0], status_root));
            }
            (ComplianceArtifacts::Screening { report, .. }, ComplianceMode::ProbabilisticBloom) => {
                assert_eq!(report.checked, 0);
                assert_eq!(report.popcount, 2);
            }
            (ComplianceArtifacts::None, ComplianceMode::None) => {}
            other => panic!("unexpected artifacts {other:?}"),
        }
        pool.ledger.apply(&t1).expect("apply");
        assert!(matches!(
            pool.ledger.apply(&t1),
            Err(LedgerError::DoubleSpend(_))
        ));
        assert_eq!(alice.balance().expect("balance"), 3);
        assert_eq!(bob.balance().expect("balance"), 12);

        let flagged = pool.flag(&["0xalice"]);
        assert_eq!(flagged, if mode == ComplianceMode::None { 0 } else { 1 });
        assert_eq!(pool.flag(&["0xalice"]), 0, "flagging is idempotent");

        // Everything descending from alice's deposits is now refused.
        let alice_again = alice.transfer(2, &bob_kp);
        let bob_onward = bob.transfer(4, &carol_kp);
        if mode == ComplianceMode::None {
            alice_again.expect("plain pool ignores flags");
            bob_onward.expect("plain pool ignores flags");
        } else {
            assert!(
                matches!(alice_again, Err(WalletError::TaintedInput { .. })),
                "{mode:?}: {alice_again:?}"
            );
            assert!(
                matches!(bob_onward, Err(WalletError::TaintedInput { .. })),
                "{mode:?}: {bob_onward:?}"
            );
        }

        // Carol's unrelated deposit is still spendable.
        let clean = carol.transfer(7, &bob_kp).expect("clean transfer");
        pool.ledger.apply(&clean).expect("apply");
        assert_eq!(carol.balance().expect("balance"), 0);
    }
}

#[test]
fn withdrawal_reports_negative_ext_amount() {
    let pool = Pool::new(ComplianceMode::ExactSmt);
    let bob_kp = keypair(&pool);
    let bob = pool.wallet(&bob_kp, "0xbob");
    pool.ledger.apply(&bob.deposit(12).expect("deposit")).expect("apply");

    let w = bob.withdraw(5, "0xpublic").expect("withdraw");
    assert_eq!(w.ext_data.ext_amount, -5);
    assert_eq!(w.ext_data.recipient, "0xpublic");
    assert_eq!(w.args.public_amount, FieldElement::from_signed(-5));
    let change: u64 = w.outputs.iter().map(|u| u.amount()).sum();
    assert_eq!(change, 7);
    pool.ledger.apply(&w).expect("apply");
    assert_eq!(bob.balance().expect("balance"), 7);

    assert!(matches!(
        bob.withdraw(8, "0xpublic"),
        Err(WalletError::InsufficientFunds { target: 8, available: 7 })
    ));
}

#[test]
fn many_small_notes_use_the_wide_circuit() {
    let pool = Pool::new(ComplianceMode::None);
    let kp = keypair(&pool);
    let wallet = pool.wallet(&kp, "0xdave");
    for _ in 0..17 {
        pool.ledger.apply(&wallet.deposit(1).expect("deposit")).expect("apply");
    }

    assert!(matches!(
        wallet.withdraw(17, "0xpublic"),
        Err(WalletError::InsufficientInputs { target: 17, available: 16 })
    ));

    let t = wallet.transfer(3, &kp).expect("transfer");
    assert_eq!(t.args.input_nullifiers.len(), 16);
    assert_eq!(t.spent.len(), 16);
    let outs: Vec<u64> = t.outputs.iter().map(|u| u.amount()).collect();
    assert_eq!(outs, vec![3, 13]);
    pool.ledger.apply(&t).expect("apply");
    assert_eq!(wallet.balance().expect("balance"), 17);
    assert_eq!(wallet.unspent().expect("unspent").len(), 3);
}

#[test]
fn recipients_resolve_through_registered_addresses() {
    let pool = Pool::new(ComplianceMode::ProbabilisticBloom);
    let alice_kp = keypair(&pool);
    let bob_kp = keypair(&pool);
    let alice = pool.wallet(&alice_kp, "0xalice");
    let bob = pool.wallet(&bob_kp, "0xbob");
    pool.ledger.register("0xbob", &bob_kp.address());
    pool.ledger.apply(&alice.deposit(9).expect("deposit")).expect("apply");

    assert!(matches!(
        alice.transfer_to_owner(4, "0xnobody"),
        Err(WalletError::UnknownRecipient(_))
    ));
    let t = alice.transfer_to_owner(4, "0xbob").expect("transfer");
    pool.ledger.apply(&t).expect("apply");
    assert_eq!(bob.balance().expect("balance"), 4);
    assert_eq!(alice.balance().expect("balance"), 5);
}

#[test]
fn stale_local_tree_is_rejected() {
    let pool = Pool::new(ComplianceMode::None);
    let kp = keypair(&pool);
    let wallet = pool.wallet(&kp, "0xerin");
    pool.ledger.apply(&wallet.deposit(10).expect("deposit")).expect("apply");
    pool.ledger.apply(&wallet.deposit(5).expect("deposit")).expect("apply");

    let full = EventFetcher::new(pool.ledger.as_ref(), &pool.config)
        .fetch()
        .expect("fetch");
    let inputs = wallet.unspent_at(&full).expect("unspent");

    // Three of four leaves: a root the ledger never published.
    let mut partial = full.clone();
    partial.commitments.pop();
    let err = pool
        .preparer()
        .prepare(
            TxRequest::Transfer {
                inputs: inputs.clone(),
                recipient: kp.clone(),
                amount: 15,
                change: kp.clone(),
            },
            &partial,
            pool.ledger.as_ref(),
        )
        .expect_err("stale root");
    assert!(matches!(err, WalletError::RootMismatch(_)), "{err:?}");

    // Two of four leaves: a published root, but the second note is missing.
    let mut older = full.clone();
    older.commitments.truncate(2);
    let err = pool
        .preparer()
        .prepare(
            TxRequest::Transfer {
                inputs,
                recipient: kp.clone(),
                amount: 15,
                change: kp.clone(),
            },
            &older,
            pool.ledger.as_ref(),
        )
        .expect_err("missing input");
    assert!(matches!(err, WalletError::CommitmentNotFoundInTree(_)), "{err:?}");
    assert!(pool.ledger.latest_block().expect("block") >= 2);
}

#[test]
fn compliance_mode_refuses_inputs_without_ancestry() {
    let pool = Pool::new(ComplianceMode::ExactSmt);
    let kp = keypair(&pool);
    let note = Utxo::with_parts(kp.clone(), 10, FieldElement::from(77), Some(0));
    let snapshot = EventFetcher::new(pool.ledger.as_ref(), &pool.config)
        .fetch()
        .expect("fetch");
    let err = pool
        .preparer()
        .prepare(
            TxRequest::Transfer {
                inputs: vec![note],
                recipient: kp.clone(),
                amount: 10,
                change: kp,
            },
            &snapshot,
            pool.ledger.as_ref(),
        )
        .expect_err("no ancestry");
    assert!(matches!(err, WalletError::MissingAncestry(_)), "{err:?}");
}

#[test]
fn independent_authorities_flag_in_turn() {
    let pool = Pool::new(ComplianceMode::ExactSmt);
    let alice_kp = keypair(&pool);
    let carol_kp = keypair(&pool);
    let alice = pool.wallet(&alice_kp, "0xalice");
    let carol = pool.wallet(&carol_kp, "0xcarol");
    pool.ledger.apply(&alice.deposit(4).expect("deposit")).expect("apply");
    pool.ledger.apply(&carol.deposit(6).expect("deposit")).expect("apply");

    // Synced before alice's flag lands, then left behind.
    let mut behind = pool.authority(&["0xcarol"], &pool.published_flags());

    assert_eq!(pool.flag(&["0xalice"]), 1);
    let late = behind.scan_and_flag().expect("scan");
    assert_eq!(late.len(), 1);
    assert!(matches!(
        pool.ledger.apply_flag(&late[0]),
        Err(LedgerError::StaleStatusRoot { .. })
    ));
    assert!(!pool.registry.get_by_address("0xcarol").expect("get").expect("some").flagged);

    assert_eq!(pool.flag(&["0xcarol"]), 1);
    let snapshot = EventFetcher::new(pool.ledger.as_ref(), &pool.config)
        .fetch()
        .expect("fetch");
    assert_eq!(snapshot.flags.len(), 2);
    let tree = snapshot
        .status_tree(pool.crypto.clone(), pool.config.status_tree_height)
        .expect("status tree");
    assert_eq!(tree.len(), 2);
    assert!(pool.registry.unflagged().expect("unflagged").is_empty());

    assert!(matches!(
        alice.transfer(1, &carol_kp),
        Err(WalletError::TaintedInput { .. })
    ));
    assert!(matches!(
        carol.transfer(1, &alice_kp),
        Err(WalletError::TaintedInput { .. })
    ));
}

#[test]
fn exclusion_proofs_expire_when_a_flag_lands() {
    let pool = Pool::new(ComplianceMode::ExactSmt);
    let alice_kp = keypair(&pool);
    let bob_kp = keypair(&pool);
    let alice = pool.wallet(&alice_kp, "0xalice");
    pool.ledger.apply(&alice.deposit(8).expect("deposit")).expect("apply");

    let queued = alice.transfer(3, &bob_kp).expect("transfer");
    assert_eq!(pool.flag(&["0xalice"]), 1);
    assert!(matches!(
        pool.ledger.apply(&queued),
        Err(LedgerError::StaleStatusRoot { .. })
    ));
    assert_eq!(alice.balance().expect("balance"), 8);
}

struct RefusingProver;

impl Prover for RefusingProver {
    fn prove(&self, witness: &Witness) -> Result<ProofOutput, ProverError> {
        Err(ProverError::Backend(format!("{:?} unavailable", witness.circuit)))
    }
}

#[test]
fn registry_is_written_only_when_a_deposit_lands() {
    for mode in [ComplianceMode::ExactSmt, ComplianceMode::ProbabilisticBloom] {
        let pool = Pool::new(mode);
        let kp = keypair(&pool);
        let failing = ShieldedWallet::new(
            pool.config.clone(),
            pool.crypto.clone(),
            kp.clone(),
            "0xalice",
            pool.ledger.clone(),
            Arc::new(RefusingProver),
            Some(pool.registry.clone()),
        )
        .expect("wallet");
        let err = failing.deposit(10).expect_err("prover refuses");
        assert!(matches!(err, WalletError::Proving(_)), "{err:?}");
        assert!(pool.registry.records().expect("records").is_empty());

        // Prepared but never submitted.
        let alice = pool.wallet(&kp, "0xalice");
        let first = alice.deposit(10).expect("deposit");
        let dropped = pool.wallet(&keypair(&pool), "0xdave").deposit(2).expect("deposit");
        assert!(pool.registry.records().expect("records").is_empty());

        pool.ledger.apply(&first).expect("apply");
        let records = pool.registry.records().expect("records");
        assert_eq!(records.len(), 1);
        match &first.compliance {
            ComplianceArtifacts::Registration { record } => assert_eq!(&records[0], record),
            other => panic!("unexpected artifacts {other:?}"),
        }

        // Staged against an id alice has since taken.
        assert!(matches!(
            pool.ledger.apply(&dropped),
            Err(LedgerError::Compliance(ComplianceError::IdConflict { expected: 1, got: 0 }))
        ));
        assert_eq!(pool.registry.records().expect("records").len(), 1);
        assert_eq!(alice.balance().expect("balance"), 10);
    }
}

#[test]
fn invalid_config_is_refused_up_front() {
    let pool = Pool::new(ComplianceMode::None);
    let config = PoolConfig {
        bloom_filter_bits: 12,
        ..pool.config.clone()
    };
    let result = TransactionPreparer::new(
        config,
        pool.crypto.clone(),
        Arc::new(DigestProver),
        None,
    );
    assert!(matches!(
        result,
        Err(WalletError::Core(CoreError::InvalidConfig(_)))
    ));
}
