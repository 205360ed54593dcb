//! Reward distribution
//!
//! Every block found by the pool leaves a pending payout holding the reward
//! base of its round. Once the block is buried deep enough in the main chain,
//! the income is split among the payees and the cofounders and paid from the
//! pool wallet.
//!
//! Payment is two-phase. All transfers of a round are signed first; the signed
//! transfers and the resulting carryover are then written onto the pending
//! record, and only after that are they submitted. The record is deleted once
//! submission succeeds. A processor that stops anywhere in between resubmits
//! the same transfers, with the same nonces, on its next pass.

use crate::config::{PoolConfig, COFOUNDER_SHARE};
use crate::node::ChainNode;
use crate::store::{PendingPayout, PoolStore, RewardShare};
use crate::utils::round_nano;
use crate::wallet::{to_nano, SignedTransfer, TxSigner};
use crate::{Error, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One planned transfer, in coins
#[derive(Debug, Clone, PartialEq)]
pub struct Payment {
    pub to: String,
    pub amount: f64,
}

/// How the income of one block is split
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub payments: Vec<Payment>,
    /// Income kept for the next block
    pub carryover: f64,
}

/// Split `income` (block income plus the previous carryover) over the reward
/// base. Payees get `income·reward − tx_fee`; each cofounder gets half the
/// collected fee minus `tx_fee`. Whatever is too small to pay, or not owed to
/// anyone, is carried over.
pub fn plan_distribution(
    income: f64,
    reward_base: &[RewardShare],
    cofounders: &[String],
    tx_fee: f64,
) -> Distribution {
    let total: f64 = reward_base.iter().map(|r| r.reward + r.fee).sum();
    if reward_base.is_empty() || total <= 0.0 {
        return Distribution {
            payments: Vec::new(),
            carryover: income,
        };
    }

    let mut payments = Vec::with_capacity(reward_base.len() + cofounders.len());
    let mut carryover = 0.0;

    for share in reward_base {
        let owed = income * share.reward;
        let amount = owed - tx_fee;
        if amount > 0.0 {
            payments.push(Payment {
                to: share.address.clone(),
                amount,
            });
        } else {
            carryover += owed;
        }
    }

    let fee_total: f64 = reward_base.iter().map(|r| r.fee).sum();
    let fee_share = income * fee_total * COFOUNDER_SHARE;
    for cofounder in cofounders {
        let amount = fee_share - tx_fee;
        if amount > 0.0 {
            payments.push(Payment {
                to: cofounder.clone(),
                amount,
            });
        } else {
            carryover += fee_share;
        }
    }
    // fee nobody is entitled to stays with the pool
    let unclaimed = 1.0 - COFOUNDER_SHARE * cofounders.len() as f64;
    if unclaimed > 0.0 {
        carryover += income * fee_total * unclaimed;
    }

    Distribution {
        payments,
        carryover: round_nano(carryover),
    }
}

/// Nonce for the next transfer from `address`
pub async fn next_nonce(node: &dyn ChainNode, address: &str) -> Result<u64> {
    if let Some(pending) = node.pending_nonce(address).await? {
        return Ok(pending + 1);
    }
    Ok(match node.get_account(address).await? {
        Some(account) => account.nonce + 1,
        None => 0,
    })
}

/// Result of looking at one pending payout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutOutcome {
    /// Not enough confirmations yet
    Waiting,
    /// Transfers submitted and the record removed
    Paid,
    /// The block left the main chain; the record was dropped
    Orphaned,
}

/// Polls pending payouts and pays the confirmed ones
pub struct PayoutProcessor {
    config: Arc<PoolConfig>,
    store: Arc<dyn PoolStore>,
    node: Arc<dyn ChainNode>,
    signer: Arc<dyn TxSigner>,
}

impl PayoutProcessor {
    pub fn new(
        config: Arc<PoolConfig>,
        store: Arc<dyn PoolStore>,
        node: Arc<dyn ChainNode>,
        signer: Arc<dyn TxSigner>,
    ) -> Self {
        Self {
            config,
            store,
            node,
            signer,
        }
    }

    /// Look at pending payouts, oldest block first. A failure is logged, keeps
    /// its record and ends the pass: later rounds must not reuse the nonces or
    /// the carryover of a round that is still in flight.
    pub async fn process_pending(&self) -> Result<Vec<(String, PayoutOutcome)>> {
        let mut pending = self.store.pending_payouts().await?;
        pending.sort_by_key(|p| p.height);

        let mut outcomes = Vec::new();
        for payout in pending {
            let hash = payout.block_hash.clone();
            match self.process(payout).await {
                Ok(outcome) => outcomes.push((hash, outcome)),
                Err(e) => {
                    error!(block = %hash, category = e.category(), "Payout failed: {}", e);
                    break;
                }
            }
        }
        Ok(outcomes)
    }

    /// Pay one pending payout if its block is confirmed
    pub async fn process(&self, payout: PendingPayout) -> Result<PayoutOutcome> {
        let status = self.node.get_block_status(&payout.block_hash).await?;
        let height = self
            .node
            .get_block_height(&payout.block_hash)
            .await?
            .unwrap_or(payout.height);
        let tip = self.node.get_blocks_tip().await?;

        let confirmed_at = height + self.config.banker.confirmations;
        if tip.height < confirmed_at {
            debug!(
                block = %payout.block_hash,
                "Waiting for confirmations: tip {} < {}", tip.height, confirmed_at
            );
            return Ok(PayoutOutcome::Waiting);
        }

        if !status.is_main_chain() {
            warn!(block = %payout.block_hash, ?status, "Block orphaned, dropping payout");
            self.store.delete_pending_payout(&payout.block_hash).await?;
            if let Err(e) = self.store.update_mined_block(&payout.block_hash, false).await {
                debug!("Mined block not recorded: {}", e);
            }
            return Ok(PayoutOutcome::Orphaned);
        }

        self.pay(payout).await?;
        Ok(PayoutOutcome::Paid)
    }

    async fn pay(&self, mut payout: PendingPayout) -> Result<()> {
        let carryover = match payout.next_carryover {
            Some(carryover) => {
                info!(
                    block = %payout.block_hash,
                    "Resubmitting {} signed transfers", payout.transfers.len()
                );
                carryover
            }
            None => {
                let (transfers, carryover) = self.sign_round(&payout).await?;
                payout.transfers = transfers;
                payout.next_carryover = Some(carryover);
                self.store.update_pending_payout(payout.clone()).await?;
                self.store.flush().await?;
                carryover
            }
        };

        if !payout.transfers.is_empty() {
            let accepted = self.node.put_txs(&payout.transfers).await?;
            if accepted.len() < payout.transfers.len() {
                warn!(
                    block = %payout.block_hash,
                    "Node accepted {} of {} transfers",
                    accepted.len(),
                    payout.transfers.len()
                );
            }
            self.node.broadcast_txs(&payout.transfers).await?;
        }

        self.store.set_carryover(carryover).await?;
        self.store.delete_pending_payout(&payout.block_hash).await?;
        if let Err(e) = self.store.update_mined_block(&payout.block_hash, true).await {
            debug!("Mined block not recorded: {}", e);
        }
        self.store.flush().await?;

        let paid: f64 = payout.transfers.iter().map(|tx| tx.amount as f64).sum::<f64>() / 1e9;
        info!(
            block = %payout.block_hash,
            height = payout.height,
            "Paid {:.9} to {} payees, carryover {:.9}",
            paid,
            payout.transfers.len(),
            carryover
        );
        Ok(())
    }

    /// Sign every transfer of a round without touching the store
    async fn sign_round(&self, payout: &PendingPayout) -> Result<(Vec<SignedTransfer>, f64)> {
        let banker = &self.config.banker;
        let income = banker.block_income + self.store.carryover().await?;
        let plan = plan_distribution(income, &payout.reward_base, &banker.cofounders, banker.tx_fee);

        let from = self.signer.address();
        let mut nonce = next_nonce(self.node.as_ref(), &from).await?;
        let fee = to_nano(banker.tx_fee);

        let mut transfers = Vec::with_capacity(plan.payments.len());
        for payment in &plan.payments {
            let tx = self
                .signer
                .sign_transfer(&payment.to, to_nano(payment.amount), nonce, fee)
                .map_err(|e| Error::payout(format!("Signing transfer to {}: {}", payment.to, e)))?;
            transfers.push(tx);
            nonce += 1;
        }
        Ok((transfers, plan.carryover))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.intervals.payout);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(account = %self.signer.address(), "Payout processor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.process_pending().await {
                        error!("Failed to load pending payouts: {}", e);
                    }
                }
            }
        }
        info!("Payout processor stopped");
    }
}
