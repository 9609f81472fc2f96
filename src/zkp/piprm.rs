// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Proof of correct ring-Pedersen parameters.
//!
//! Proves knowledge of an exponent `x` with `target = base^x mod Ñ`,
//! where `base` generates a subgroup whose order the prover knows. Run
//! once per direction (`h₁ → h₂` and `h₂ → h₁`), this shows the two
//! commitment bases generate the same subgroup, which the range proofs
//! built on them require.
//!
//! The argument is the classic binary-challenge Schnorr repetition: each
//! of the [`PIPRM_ITERATIONS`] rounds carries soundness 1/2.

use crate::{
    errors::{InternalError, Result},
    utils::random_positive_bn,
    zkp::{Proof, ProofContext, ProofKind},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

pub(crate) const PIPRM_ITERATIONS: usize = 128;

/// Proof of knowledge of the discrete log between two ring-Pedersen
/// bases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PiPrmProof {
    commitments: Vec<BigNumber>,
    responses: Vec<BigNumber>,
}

/// Public statement: `target = base^x mod modulus` for some `x` the
/// prover knows.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    modulus: &'a BigNumber,
    base: &'a BigNumber,
    target: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(
        modulus: &'a BigNumber,
        base: &'a BigNumber,
        target: &'a BigNumber,
    ) -> Self {
        Self {
            modulus,
            base,
            target,
        }
    }
}

/// The exponent, together with the order of the subgroup the bases live
/// in (known to the prover because it generated the modulus).
pub(crate) struct ProverSecret<'a> {
    exponent: &'a BigNumber,
    subgroup_order: &'a BigNumber,
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(exponent: &'a BigNumber, subgroup_order: &'a BigNumber) -> Self {
        Self {
            exponent,
            subgroup_order,
        }
    }
}

fn append_statement(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput,
) -> Result<()> {
    transcript.append_message(b"PiPrmProof", b"");
    transcript.append_message(b"context", &context.as_bytes()?);
    transcript.append_message(b"modulus", &input.modulus.to_bytes());
    transcript.append_message(b"base", &input.base.to_bytes());
    transcript.append_message(b"target", &input.target.to_bytes());
    Ok(())
}

/// Derive the `PIPRM_ITERATIONS` challenge bits.
fn challenge_bits(transcript: &mut Transcript) -> Vec<bool> {
    let mut bytes = [0u8; PIPRM_ITERATIONS / 8];
    transcript.challenge_bytes(b"challenge bits", &mut bytes);
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |bit| (byte >> bit) & 1 == 1))
        .collect()
}

impl Proof for PiPrmProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        append_statement(transcript, context, &input)?;

        let nonces: Vec<BigNumber> = (0..PIPRM_ITERATIONS)
            .map(|_| random_positive_bn(rng, secret.subgroup_order))
            .collect();
        let commitments: Vec<BigNumber> = nonces
            .iter()
            .map(|nonce| input.base.modpow(nonce, input.modulus))
            .collect();
        for commitment in &commitments {
            transcript.append_message(b"commitment", &commitment.to_bytes());
        }

        let responses = challenge_bits(transcript)
            .into_iter()
            .zip(nonces.iter())
            .map(|(bit, nonce)| {
                if bit {
                    (nonce + secret.exponent).nmod(secret.subgroup_order)
                } else {
                    nonce.clone()
                }
            })
            .collect();

        Ok(Self {
            commitments,
            responses,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        if self.commitments.len() != PIPRM_ITERATIONS
            || self.responses.len() != PIPRM_ITERATIONS
        {
            error!("ring-Pedersen parameter proof has the wrong shape");
            return Err(InternalError::FailedProof(
                ProofKind::RingPedersenParams,
                None,
            ));
        }
        append_statement(transcript, context, &input)?;
        for commitment in &self.commitments {
            if commitment <= &BigNumber::zero() || commitment >= input.modulus {
                return Err(InternalError::FailedProof(
                    ProofKind::RingPedersenParams,
                    None,
                ));
            }
            transcript.append_message(b"commitment", &commitment.to_bytes());
        }

        for ((bit, commitment), response) in challenge_bits(transcript)
            .into_iter()
            .zip(self.commitments.iter())
            .zip(self.responses.iter())
        {
            if response < &BigNumber::zero() || response >= input.modulus {
                return Err(InternalError::FailedProof(
                    ProofKind::RingPedersenParams,
                    None,
                ));
            }
            let lhs = input.base.modpow(response, input.modulus);
            let rhs = if bit {
                (commitment * input.target).nmod(input.modulus)
            } else {
                commitment.clone()
            };
            if lhs != rhs {
                return Err(InternalError::FailedProof(
                    ProofKind::RingPedersenParams,
                    None,
                ));
            }
        }
        Ok(())
    }
}
