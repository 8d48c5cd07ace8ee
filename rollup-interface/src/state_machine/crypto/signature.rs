//! Recoverable secp256k1 signatures over base-ledger personal messages.
//!
//! A transition is signed by the owner of the account it debits. The signer is recovered from
//! the signature and compared with the account address, so signatures carry no public key.
use borsh::{BorshDeserialize, BorshSerialize};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keccak256;
use crate::{Address, Hash};

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// A compact recoverable signature. `v` is `27 + recovery id`; `0`/`1` are also accepted.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Signature {
    /// The `r` scalar.
    pub r: [u8; 32],
    /// The `s` scalar.
    pub s: [u8; 32],
    /// The recovery byte.
    pub v: u8,
}

/// Failure to recover a signer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// `v` is neither `27`/`28` nor `0`/`1`.
    #[error("invalid recovery byte {0}")]
    InvalidRecoveryByte(u8),
    /// The curve library rejected the signature.
    #[error("malformed signature: {0}")]
    Malformed(#[from] secp256k1::Error),
}

/// The digest that is actually signed: the personal-message hash of `keccak256(payload)`.
pub fn signed_message_digest(payload: &[u8]) -> Hash {
    let mut preimage = Vec::with_capacity(PERSONAL_MESSAGE_PREFIX.len() + 32);
    preimage.extend_from_slice(PERSONAL_MESSAGE_PREFIX);
    preimage.extend_from_slice(&keccak256(payload));
    keccak256(preimage)
}

/// Derives the base-ledger address of a public key.
pub fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let digest = keccak256(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    Address(address)
}

/// Derives the base-ledger address controlled by a secret key.
pub fn address_of_secret(secret_key: &SecretKey) -> Address {
    address_of(&PublicKey::from_secret_key_global(secret_key))
}

impl Signature {
    /// Signs `payload` as a personal message.
    pub fn sign(payload: &[u8], secret_key: &SecretKey) -> Self {
        let message = Message::from_slice(&signed_message_digest(payload))
            .expect("A 32 byte digest is always a valid message");
        let (recovery_id, compact) = SECP256K1
            .sign_ecdsa_recoverable(&message, secret_key)
            .serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        Self {
            r,
            s,
            v: 27 + recovery_id.to_i32() as u8,
        }
    }

    /// Recovers the address that signed `payload`.
    pub fn recover_signer(&self, payload: &[u8]) -> Result<Address, SignatureError> {
        let recovery_id = match self.v {
            27 | 28 => self.v - 27,
            0 | 1 => self.v,
            other => return Err(SignatureError::InvalidRecoveryByte(other)),
        };
        let recovery_id = RecoveryId::from_i32(i32::from(recovery_id))?;

        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        let signature = RecoverableSignature::from_compact(&compact, recovery_id)?;

        let message = Message::from_slice(&signed_message_digest(payload))?;
        let public_key = SECP256K1.recover_ecdsa(&message, &signature)?;
        Ok(address_of(&public_key))
    }
}
