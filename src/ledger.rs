//! The UTXO debit ledger.
//!
//! One on-chain deposit becomes a decrementing pay-as-you-go balance: the
//! first debit against a `(txid, vout)` asks the chain for the output's
//! authoritative size and creates a ledger record; every later debit
//! decrements the same record, shared across all routes and callers. A
//! debit that would drive the balance negative is rejected and leaves the
//! stored record untouched.
//!
//! Each debit's read-compute-write runs under a per-UTXO async mutex, so
//! two concurrent debits against one output serialize and can never both
//! pass the sufficiency check from the same stale balance.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chain::{ChainError, ChainProvider};
use crate::store::{LedgerStore, StoreError};
use crate::types::{BchAddress, Satoshis, TxId, UnixTimestamp, UtxoId, UtxoLedgerRecord};

/// Errors from a debit attempt.
#[derive(Debug, thiserror::Error)]
pub enum DebitError {
    /// The UTXO (or its remaining balance) cannot cover the charge. Carries
    /// what was available for logging; the stored record, if any, is
    /// unchanged.
    #[error("Insufficient UTXO balance: {available} sat available, {charge} sat required")]
    InsufficientBalance {
        available: Satoshis,
        charge: Satoshis,
    },
    /// The chain oracle could not be consulted.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The ledger store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A successful debit: the record as persisted, and whether this call
/// created it.
#[derive(Debug, Clone)]
pub struct DebitOutcome {
    pub record: UtxoLedgerRecord,
    pub first_touch: bool,
}

/// Tracks how much of each UTXO has been consumed across repeated calls.
pub struct UtxoDebitLedger<S, C> {
    store: S,
    chain: C,
    locks: DashMap<UtxoId, Arc<Mutex<()>>>,
}

impl<S, C> UtxoDebitLedger<S, C>
where
    S: LedgerStore,
    C: ChainProvider,
{
    pub fn new(store: S, chain: C) -> Self {
        UtxoDebitLedger {
            store,
            chain,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, utxo_id: &UtxoId) -> Arc<Mutex<()>> {
        self.locks
            .entry(utxo_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Charge `charge` satoshis against `(txid, vout)` on behalf of
    /// `payer`.
    ///
    /// First touch consults the chain oracle for the output's true size and
    /// creates the record; a first touch that fails sufficiency creates
    /// nothing, so a later, smaller charge can still succeed. Repeat
    /// touches decrement the stored balance. The single terminal `put`
    /// means a failure on the oracle or store path leaves the ledger
    /// exactly as it was.
    #[tracing::instrument(skip(self), fields(utxo = %UtxoId::new(txid, vout)))]
    pub async fn debit(
        &self,
        txid: &TxId,
        vout: u32,
        payer: &BchAddress,
        charge: Satoshis,
    ) -> Result<DebitOutcome, DebitError> {
        let utxo_id = UtxoId::new(txid, vout);
        let lock = self.lock_for(&utxo_id);
        let _guard = lock.lock().await;

        match self.store.get(&utxo_id).await? {
            None => {
                let snapshot = self.chain.utxo(txid, vout).await?;
                let remaining = snapshot.amount_sat.checked_sub(charge).ok_or(
                    DebitError::InsufficientBalance {
                        available: snapshot.amount_sat,
                        charge,
                    },
                )?;
                let now = UnixTimestamp::now();
                let record = UtxoLedgerRecord {
                    utxo_id: utxo_id.clone(),
                    txid: txid.clone(),
                    vout,
                    payer_address: payer.clone(),
                    receiver_address: snapshot.receiver_address,
                    transaction_value_sat: snapshot.amount_sat,
                    remaining_balance_sat: remaining,
                    total_debited_sat: charge,
                    first_seen: now,
                    last_updated: now,
                    last_checked: now,
                };
                self.store.put(&utxo_id, &record).await?;
                tracing::info!(
                    payer = %payer,
                    value = %snapshot.amount_sat,
                    remaining = %remaining,
                    "opened ledger record"
                );
                Ok(DebitOutcome {
                    record,
                    first_touch: true,
                })
            }
            Some(record) => {
                let remaining = record.remaining_balance_sat.checked_sub(charge).ok_or(
                    DebitError::InsufficientBalance {
                        available: record.remaining_balance_sat,
                        charge,
                    },
                )?;
                let now = UnixTimestamp::now();
                let updated = UtxoLedgerRecord {
                    remaining_balance_sat: remaining,
                    total_debited_sat: record
                        .total_debited_sat
                        .checked_add(charge)
                        .unwrap_or(record.transaction_value_sat),
                    last_updated: now,
                    last_checked: now,
                    ..record
                };
                self.store.put(&utxo_id, &updated).await?;
                tracing::debug!(payer = %payer, remaining = %remaining, "debited ledger record");
                Ok(DebitOutcome {
                    record: updated,
                    first_touch: false,
                })
            }
        }
    }
}
