// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Zero-knowledge proofs.
//!
//! Every proof follows the same Fiat-Shamir discipline: the prover and
//! verifier maintain a merlin [`Transcript`](merlin::Transcript) into
//! which the shared protocol context (session, committee, curve), the
//! sender, and the full statement are appended — in that order, before
//! any challenge is drawn. Both sides must agree byte-for-byte, which the
//! canonical length-prefixed encodings guarantee.
//!
//! Verifiers never trust received group elements or residues: everything
//! is range- and membership-checked before the challenge equation is
//! evaluated.

pub(crate) mod piaffg;
pub(crate) mod pienc;
pub(crate) mod pifac;
pub(crate) mod pilog;
pub(crate) mod pimod;
pub(crate) mod piprm;
pub(crate) mod pisch;
pub(crate) mod pist;

use crate::errors::Result;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The proof families used by the protocols. Carried in
/// [`InternalError::FailedProof`](crate::errors::InternalError::FailedProof)
/// so callers can tell what kind of check a culprit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofKind {
    /// Schnorr knowledge of a discrete logarithm.
    Schnorr,
    /// Correctness of ring-Pedersen commitment parameters.
    RingPedersenParams,
    /// The Paillier modulus is a Blum integer free of small factors.
    Modulus,
    /// The factors of a Paillier modulus are large enough.
    Factor,
    /// Range proof for the encrypted multiplicative share.
    EncRange,
    /// Range proof for a multiplicative-to-additive response.
    MtaRange,
    /// Discrete-log equality across two bases.
    DlogEq,
    /// Knowledge of a representation of the signing check values.
    Representation,
    /// The Paillier key pair is well formed.
    PaillierKey,
}

impl Display for ProofKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProofKind::Schnorr => "Schnorr",
            ProofKind::RingPedersenParams => "ring-Pedersen parameter",
            ProofKind::Modulus => "modulus",
            ProofKind::Factor => "factor-size",
            ProofKind::EncRange => "encryption range",
            ProofKind::MtaRange => "MtA range",
            ProofKind::DlogEq => "dlog-equality",
            ProofKind::Representation => "representation",
            ProofKind::PaillierKey => "Paillier key",
        };
        write!(f, "{name}")
    }
}

/// Context bound into a proof transcript before the statement.
///
/// Using the protocol's shared context prevents proofs from being
/// replayed across sessions, committees or curves.
pub(crate) trait ProofContext {
    /// The canonical byte encoding of this context.
    fn as_bytes(&self) -> Result<Vec<u8>>;
}

/// An empty context, for proofs generated outside any protocol run
/// (tests, fixtures).
impl ProofContext for () {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// A non-interactive zero-knowledge proof.
pub(crate) trait Proof: Sized {
    /// Public statement, shared by prover and verifier.
    type CommonInput<'a>;
    /// The prover's witness.
    type ProverSecret<'a>;

    /// Prove the statement.
    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self>;

    /// Verify the proof. Failures carry the proof's [`ProofKind`] with no
    /// culprit; the participant layer attaches the sender.
    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()>;
}
