//! Coin selection under the circuits' fixed input arity.
//!
//! Notes are taken in caller order. While short of the target, notes are
//! added up to sixteen. Once the target is reached the selection is topped
//! up to two notes if it holds fewer; a selection of three to fifteen keeps
//! absorbing notes up to sixteen so the input count does not reveal the
//! minimal covering set. Sixteen notes that still fall short is an error;
//! notes are never merged or truncated to make a payment fit.

use tracing::debug;

use shroud_core::{LARGE_INPUT_ARITY, SMALL_INPUT_ARITY};
use shroud_state::Utxo;

use crate::error::WalletError;

/// Pick inputs covering `target` from `unspent`.
pub fn select_inputs(target: u64, unspent: &[Utxo]) -> Result<Vec<Utxo>, WalletError> {
    let mut selected: Vec<Utxo> = Vec::new();
    let mut total: u128 = 0;

    for utxo in unspent {
        let count = selected.len();
        let keep_going = if total < u128::from(target) {
            count < LARGE_INPUT_ARITY
        } else {
            count < SMALL_INPUT_ARITY || (count > SMALL_INPUT_ARITY && count < LARGE_INPUT_ARITY)
        };
        if !keep_going {
            break;
        }
        total += u128::from(utxo.amount());
        selected.push(utxo.clone());
    }

    if total < u128::from(target) {
        if selected.len() == LARGE_INPUT_ARITY {
            return Err(WalletError::InsufficientInputs {
                target,
                available: total,
            });
        }
        return Err(WalletError::InsufficientFunds {
            target,
            available: total,
        });
    }
    debug!(target, inputs = selected.len(), total, "selected inputs");
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use shroud_core::{Blake3Provider, FieldElement, Keypair, PrivateKey};

    fn notes(amounts: &[u64]) -> Vec<Utxo> {
        let c = Blake3Provider;
        let sk = PrivateKey::from_field(FieldElement::from(5)).expect("key");
        let kp = Keypair::from_private_key(&c, sk).expect("keypair");
        amounts
            .iter()
            .enumerate()
            .map(|(i, a)| Utxo::with_parts(kp.clone(), *a, FieldElement::from(i as u64 + 1), Some(i as u64)))
            .collect()
    }

    fn amounts(sel: &[Utxo]) -> Vec<u64> {
        sel.iter().map(|u| u.amount()).collect()
    }

    #[test]
    fn single_covering_note_is_topped_up_to_two() {
        let sel = select_inputs(5, &notes(&[10, 1, 1, 1])).expect("select");
        assert_eq!(amounts(&sel), vec![10, 1]);
    }

    #[test]
    fn exactly_two_stops() {
        let sel = select_inputs(8, &notes(&[4, 4, 9, 9])).expect("select");
        assert_eq!(sel.len(), 2);
    }

    #[test]
    fn three_or_more_keeps_absorbing_to_sixteen() {
        let unspent = notes(&[1; 20]);
        let sel = select_inputs(3, &unspent).expect("select");
        assert_eq!(sel.len(), 16);
    }

    #[test]
    fn sixteen_short_is_insufficient_inputs() {
        let unspent = notes(&[1; 20]);
        assert!(matches!(
            select_inputs(17, &unspent),
            Err(WalletError::InsufficientInputs { target: 17, available: 16 })
        ));
    }

    #[test]
    fn exhausted_set_is_insufficient_funds() {
        assert!(matches!(
            select_inputs(100, &notes(&[10, 20])),
            Err(WalletError::InsufficientFunds { target: 100, available: 30 })
        ));
    }

    #[test]
    fn lone_note_covers_without_partner() {
        let sel = select_inputs(3, &notes(&[10])).expect("select");
        assert_eq!(sel.len(), 1);
    }

    proptest! {
        #[test]
        fn satisfiable_selection_has_two_to_sixteen_inputs(
            amounts in proptest::collection::vec(0u64..1_000, 2..40),
            target in 0u64..5_000,
        ) {
            let unspent = notes(&amounts);
            match select_inputs(target, &unspent) {
                Ok(sel) => {
                    prop_assert!(sel.len() >= 2 && sel.len() <= 16);
                    let total: u64 = sel.iter().map(|u| u.amount()).sum();
                    prop_assert!(total >= target);
                }
                Err(WalletError::InsufficientInputs { .. }) => {
                    let first16: u64 = amounts.iter().take(16).sum();
                    prop_assert!(first16 < target);
                }
                Err(WalletError::InsufficientFunds { .. }) => {
                    prop_assert!(amounts.len() < 16);
                    prop_assert!(amounts.iter().sum::<u64>() < target);
                }
                Err(e) => prop_assert!(false, "unexpected {e}"),
            }
        }
    }
}
