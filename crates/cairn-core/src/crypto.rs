//! Ed25519 input signatures.
//!
//! An input's sighash is the canonical bincode encoding of its transaction
//! with every input's `signature` and `public_key` cleared, followed by the
//! input index, hashed under a BLAKE3 derive-key context. Clearing the
//! witness fields lets inputs be signed independently and in any order.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::CryptoError;
use crate::types::{Hash256, Transaction};

const SIGHASH_CONTEXT: &str = "cairn 2024-06 transaction input sighash";

/// The hash an output's `pubkey_hash` commits to.
pub fn pubkey_hash(public_key: &[u8; 32]) -> Hash256 {
    Hash256(blake3::hash(public_key).into())
}

/// Sighash for input `input_index` of `tx`.
pub fn sighash(tx: &Transaction, input_index: usize) -> Result<Hash256, CryptoError> {
    if input_index >= tx.inputs.len() {
        return Err(CryptoError::InputIndexOutOfBounds { index: input_index, len: tx.inputs.len() });
    }
    let mut stripped = tx.clone();
    for input in &mut stripped.inputs {
        input.signature.clear();
        input.public_key.clear();
    }
    let encoded = stripped.encode().map_err(|e| CryptoError::Encoding(e.to_string()))?;

    let mut hasher = blake3::Hasher::new_derive_key(SIGHASH_CONTEXT);
    hasher.update(&encoded);
    hasher.update(&(input_index as u64).to_le_bytes());
    Ok(Hash256(hasher.finalize().into()))
}

/// Sign input `input_index` in place with `key`.
pub fn sign_input(tx: &mut Transaction, input_index: usize, key: &SigningKey) -> Result<(), CryptoError> {
    let digest = sighash(tx, input_index)?;
    let input = &mut tx.inputs[input_index];
    input.signature = key.sign(digest.as_bytes()).to_bytes().to_vec();
    input.public_key = key.verifying_key().to_bytes().to_vec();
    Ok(())
}

/// Check that input `input_index` carries a key hashing to `owner` and a
/// valid signature by that key.
pub fn verify_input(tx: &Transaction, input_index: usize, owner: &Hash256) -> Result<(), CryptoError> {
    let input = tx.inputs.get(input_index).ok_or(CryptoError::InputIndexOutOfBounds {
        index: input_index,
        len: tx.inputs.len(),
    })?;

    let key_bytes: [u8; 32] = input
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    if pubkey_hash(&key_bytes) != *owner {
        return Err(CryptoError::PubkeyHashMismatch);
    }
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
    let signature =
        Signature::from_slice(&input.signature).map_err(|_| CryptoError::InvalidSignature)?;

    let digest = sighash(tx, input_index)?;
    key.verify(digest.as_bytes(), &signature)
        .map_err(|_| CryptoError::VerificationFailed)
}
