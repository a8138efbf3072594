//! Transaction and block validation.
//!
//! Two levels:
//!
//! - **Structural** ([`validate_transaction_structure`], [`validate_block_structure`]):
//!   context-free format checks. Run before anything touches UTXO state.
//! - **Contextual** ([`check_tx_inputs`], [`check_tx_signatures`]): checks
//!   against a [`UtxoSet`] view. Exposed to the chain and pool through the
//!   [`TxValidator`] trait.

use std::collections::HashSet;

use crate::constants::{COINBASE_MATURITY, MAX_BLOCK_SIZE, MAX_COINBASE_DATA, MAX_TX_SIZE};
use crate::crypto;
use crate::error::{BlockError, TransactionError};
use crate::merkle;
use crate::traits::TxValidator;
use crate::types::{Block, Transaction};
use crate::utxo::UtxoSet;

/// Validate transaction structure (context-free).
///
/// Common checks: non-empty inputs and outputs, non-zero output values, no
/// output-sum overflow, serialized size within [`MAX_TX_SIZE`]. Coinbase
/// transactions carry bounded coinbase data; regular transactions must not
/// reference the null outpoint or spend the same outpoint twice, and each
/// input carries a 64-byte signature and a 32-byte public key.
pub fn validate_transaction_structure(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TransactionError::EmptyInputsOrOutputs);
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value == 0 {
            return Err(TransactionError::ZeroValueOutput(i));
        }
    }

    if tx.total_output_value().is_none() {
        return Err(TransactionError::ValueOverflow);
    }

    let size = tx.serialized_size()?;
    if size > MAX_TX_SIZE {
        return Err(TransactionError::OversizedTransaction {
            size,
            max: MAX_TX_SIZE,
        });
    }

    if tx.is_coinbase() {
        if tx.inputs[0].signature.len() > MAX_COINBASE_DATA {
            return Err(TransactionError::InvalidCoinbase(format!(
                "data too large: {} > {MAX_COINBASE_DATA}",
                tx.inputs[0].signature.len(),
            )));
        }
        return Ok(());
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.previous_output.is_null() {
            return Err(TransactionError::NullOutpointInRegularTx(i));
        }
        if !seen.insert(input.previous_output) {
            return Err(TransactionError::DuplicateInput(
                input.previous_output.to_string(),
            ));
        }
        if input.signature.len() != 64 || input.public_key.len() != 32 {
            return Err(TransactionError::InvalidSignature { index: i });
        }
    }

    Ok(())
}

/// Validate block structure (context-free).
///
/// - At least one transaction, the first and only the first being coinbase
/// - Every transaction passes [`validate_transaction_structure`]
/// - No duplicate txids, and `txs_root` matches the computed merkle root
/// - Serialized size within [`MAX_BLOCK_SIZE`]
pub fn validate_block_structure(block: &Block) -> Result<(), BlockError> {
    let coinbase = block.coinbase().ok_or(BlockError::NoCoinbase)?;
    if !coinbase.is_coinbase() {
        return Err(BlockError::FirstTxNotCoinbase);
    }
    if block.non_coinbase().iter().any(Transaction::is_coinbase) {
        return Err(BlockError::MultipleCoinbase);
    }

    let mut txids = Vec::with_capacity(block.transactions.len());
    let mut seen = HashSet::with_capacity(block.transactions.len());
    for (index, tx) in block.transactions.iter().enumerate() {
        validate_transaction_structure(tx)
            .map_err(|source| BlockError::TransactionError { index, source })?;
        let txid = tx
            .txid()
            .map_err(|source| BlockError::TransactionError { index, source })?;
        if !seen.insert(txid) {
            return Err(BlockError::DuplicateTxid(txid.to_string()));
        }
        txids.push(txid);
    }

    if block.header.txs_root != merkle::merkle_root(&txids) {
        return Err(BlockError::InvalidMerkleRoot);
    }

    let size = bincode::encode_to_vec(block, bincode::config::standard())
        .map_err(|e| BlockError::TransactionError {
            index: 0,
            source: TransactionError::Serialization(e.to_string()),
        })?
        .len();
    if size > MAX_BLOCK_SIZE {
        return Err(BlockError::OversizedBlock {
            size,
            max: MAX_BLOCK_SIZE,
        });
    }

    Ok(())
}

/// Check a non-coinbase transaction's inputs against `view`.
///
/// Every input must resolve to an unspent, mature entry, and total input
/// value must cover total output value. Returns the fee.
pub fn check_tx_inputs(
    view: &UtxoSet,
    tx: &Transaction,
    spend_height: u64,
    coinbase_maturity: u64,
) -> Result<u64, TransactionError> {
    if tx.is_coinbase() {
        return Err(TransactionError::InvalidCoinbase(
            "coinbase has no inputs to validate".into(),
        ));
    }

    let mut total_input: u64 = 0;
    for (index, input) in tx.inputs.iter().enumerate() {
        let outpoint = &input.previous_output;
        let entry = view
            .find_utxo(outpoint)
            .ok_or_else(|| TransactionError::UnknownUtxo(outpoint.to_string()))?;
        if entry.is_spent {
            return Err(TransactionError::SpentOutput(outpoint.to_string()));
        }
        if !entry.is_mature(spend_height, coinbase_maturity) {
            return Err(TransactionError::ImmatureCoinbase { index });
        }
        total_input = total_input
            .checked_add(entry.value())
            .ok_or(TransactionError::ValueOverflow)?;
    }

    let total_output = tx
        .total_output_value()
        .ok_or(TransactionError::ValueOverflow)?;
    total_input
        .checked_sub(total_output)
        .ok_or(TransactionError::InsufficientFunds {
            have: total_input,
            need: total_output,
        })
}

/// Verify every input's Ed25519 signature against the output it spends.
pub fn check_tx_signatures(view: &UtxoSet, tx: &Transaction) -> Result<(), TransactionError> {
    for (index, input) in tx.inputs.iter().enumerate() {
        let entry = view
            .find_utxo(&input.previous_output)
            .ok_or_else(|| TransactionError::UnknownUtxo(input.previous_output.to_string()))?;
        crypto::verify_input(tx, index, &entry.output.pubkey_hash)
            .map_err(|_| TransactionError::InvalidSignature { index })?;
    }
    Ok(())
}

/// Production validator: input checks plus Ed25519 signature verification.
#[derive(Debug, Clone, Copy)]
pub struct SignatureValidator {
    pub coinbase_maturity: u64,
}

impl Default for SignatureValidator {
    fn default() -> Self {
        Self {
            coinbase_maturity: COINBASE_MATURITY,
        }
    }
}

impl TxValidator for SignatureValidator {
    fn validate_inputs(
        &self,
        view: &UtxoSet,
        tx: &Transaction,
        spend_height: u64,
    ) -> Result<u64, TransactionError> {
        check_tx_inputs(view, tx, spend_height, self.coinbase_maturity)
    }

    fn validate_scripts(&self, view: &UtxoSet, tx: &Transaction) -> Result<(), TransactionError> {
        check_tx_signatures(view, tx)
    }
}

/// Test validator: full input checks, but any unlocking data is accepted.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllScripts {
    pub coinbase_maturity: u64,
}

#[cfg(any(test, feature = "testing"))]
impl TxValidator for AcceptAllScripts {
    fn validate_inputs(
        &self,
        view: &UtxoSet,
        tx: &Transaction,
        spend_height: u64,
    ) -> Result<u64, TransactionError> {
        check_tx_inputs(view, tx, spend_height, self.coinbase_maturity)
    }

    fn validate_scripts(&self, _view: &UtxoSet, _tx: &Transaction) -> Result<(), TransactionError> {
        Ok(())
    }
}
