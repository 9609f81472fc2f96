// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A library for multi-party threshold signing.
//!
//! A committee of `n` parties jointly holds a signing key that never exists
//! in one place: key generation produces a `(t, n)` Shamir sharing of it,
//! any `t + 1` parties can sign a message digest, and the committee can be
//! refreshed or replaced without changing the public key. Two signature
//! schemes are supported:
//!
//! - **ECDSA** over short-Weierstrass curves (secp256k1, P-256), following
//!   the Gennaro–Goldfeder protocol: Paillier-based
//!   multiplicative-to-additive conversion, range proofs under each
//!   verifier's ring-Pedersen parameters, and an identifiable-abort phase
//!   that names misbehaving signers.
//! - **EdDSA** over ed25519, as a threshold Schnorr protocol sharing the
//!   same runtime and verifiable secret sharing.
//!
//! # Architecture
//!
//! Each protocol is a state machine implementing [`ProtocolParticipant`].
//! The library does no networking: feeding a participant an incoming
//! [`Message`] via [`Participant::update`] returns a [`ProcessOutcome`]
//! holding any outbound messages (for the caller's transport to deliver)
//! and, on completion, the protocol output — a save bundle for keygen and
//! resharing, a signature for signing. Messages arriving early are buffered
//! and replayed; duplicates are rejected; a message from a different
//! session is refused without state change.
//!
//! ECDSA participants need per-party pre-parameters (a Paillier key over
//! safe primes and ring-Pedersen commitment parameters). These are
//! expensive to create and independent of any committee, so they are
//! produced ahead of time by [`generate_pre_params`] on a worker pool and
//! reused across key generations.
//!
//! # 🔒 Secret handling
//!
//! Secret-bearing types are zeroized on drop. Since big integers live in
//! GMP-managed buffers invisible to Rust, call [`enable_zeroize`] once at
//! startup to install an allocator shim that erases freed GMP memory.

#![allow(non_snake_case)]
#![warn(missing_docs)]

use crate::errors::Result;

macro_rules! serialize {
    ($x:expr) => {{
        bincode::serialize($x).map_err(|_| $crate::errors::InternalError::Serialization)
    }};
}

macro_rules! deserialize {
    ($x:expr) => {{
        bincode::deserialize($x).map_err(|_| {
            $crate::errors::InternalError::CallingApplicationMistake(
                $crate::errors::CallerError::DeserializationFailed,
            )
        })
    }};
}

pub mod curve;
pub mod ed25519;
pub mod eddsa;
pub mod errors;
mod gmp_zeroize;
pub mod k256;
pub mod keygen;
mod local_storage;
mod message_queue;
mod messages;
pub mod p256;
mod paillier;
mod participant;
mod preparams;
mod protocol;
pub mod reshare;
mod ring_pedersen;
pub mod sign;
mod utils;
mod vss;
mod zkp;

pub use gmp_zeroize::enable_zeroize;
pub use messages::{
    EddsaKeygenMessageType, EddsaSignMessageType, KeygenMessageType, Message, MessageType,
    ReshareMessageType, SignMessageType,
};
pub use paillier::{Ciphertext, DecryptionKey, EncryptionKey};
pub use participant::{ProcessOutcome, ProtocolParticipant, Status};
pub use preparams::{generate_pre_params, LocalPreParams, PublicPreParams};
pub use protocol::{
    Identifier, Parameters, Participant, ParticipantIdentifier, PartyId, PeerContext,
    ReshareParameters,
};
pub use ring_pedersen::RingPedersen;
pub use zkp::ProofKind;

/// Convert the outputs of a keygen run into the scalar the committee
/// implicitly shares, by Lagrange interpolation at zero over any quorum of
/// shares.
///
/// This defeats the entire point of threshold signing and must only ever
/// be used in tests and audits of test fixtures. It lives here (rather
/// than in a test module) so integration tests and downstream test
/// harnesses can reach it.
pub fn reconstruct_secret<C: curve::CurveTrait>(
    shares: &[(ParticipantIdentifier, C::Scalar)],
) -> Result<C::Scalar> {
    vss::reconstruct::<C>(shares)
}
