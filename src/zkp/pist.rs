// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Proof of knowledge of a representation of the signing check values.
//!
//! After the group commitment `R` is known, each signer publishes
//! `V = s · R + l · G` and `A = ρ · G` and must show it knows the
//! representation `(s, l, ρ)` — otherwise a cheater could publish check
//! values that cancel out its bad signature share. This is a two-base
//! Schnorr argument for `V` combined with a plain one for `A`, under a
//! single challenge.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, Result},
    utils::positive_challenge_from_transcript,
    zkp::{Proof, ProofContext, ProofKind},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Representation proof for `(V, A)` with respect to bases `(R, G)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PiStProof<C: CurveTrait> {
    commitment_v: C,
    commitment_a: C,
    response_s: C::Scalar,
    response_l: C::Scalar,
    response_rho: C::Scalar,
}

/// Public statement: `V = s · R + l · G` and `A = ρ · G`.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    base_r: &'a C,
    v: &'a C,
    a: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    pub(crate) fn new(base_r: &'a C, v: &'a C, a: &'a C) -> Self {
        Self { base_r, v, a }
    }
}

/// The representation `(s, l, ρ)`.
pub(crate) struct ProverSecret<'a, C: CurveTrait> {
    s: &'a C::Scalar,
    l: &'a C::Scalar,
    rho: &'a C::Scalar,
}

impl<'a, C: CurveTrait> ProverSecret<'a, C> {
    pub(crate) fn new(s: &'a C::Scalar, l: &'a C::Scalar, rho: &'a C::Scalar) -> Self {
        Self { s, l, rho }
    }
}

impl<C: CurveTrait> Debug for ProverSecret<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pist::ProverSecret([redacted])")
    }
}

impl<C: CurveTrait> PiStProof<C> {
    fn challenge(
        transcript: &mut Transcript,
        context: &impl ProofContext,
        input: &CommonInput<C>,
        commitment_v: &C,
        commitment_a: &C,
    ) -> Result<C::Scalar> {
        transcript.append_message(b"PiStProof", b"");
        transcript.append_message(b"context", &context.as_bytes()?);
        transcript.append_message(b"R", &input.base_r.to_bytes());
        transcript.append_message(b"V", &input.v.to_bytes());
        transcript.append_message(b"A", &input.a.to_bytes());
        transcript.append_message(b"alpha", &commitment_v.to_bytes());
        transcript.append_message(b"beta", &commitment_a.to_bytes());
        let challenge = positive_challenge_from_transcript(transcript, &C::order())?;
        C::bn_to_scalar(&challenge)
    }
}

impl<C: CurveTrait> Proof for PiStProof<C> {
    type CommonInput<'a> = CommonInput<'a, C>;
    type ProverSecret<'a> = ProverSecret<'a, C>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let nonce_s = C::Scalar::random(rng);
        let nonce_l = C::Scalar::random(rng);
        let nonce_rho = C::Scalar::random(rng);
        let commitment_v = input.base_r.multiply_by_scalar(&nonce_s)
            + C::generator().multiply_by_scalar(&nonce_l);
        let commitment_a = C::generator().multiply_by_scalar(&nonce_rho);

        let challenge =
            Self::challenge(transcript, context, &input, &commitment_v, &commitment_a)?;

        Ok(Self {
            commitment_v,
            commitment_a,
            response_s: ScalarTrait::add(&nonce_s, &challenge.mul(secret.s)),
            response_l: ScalarTrait::add(&nonce_l, &challenge.mul(secret.l)),
            response_rho: ScalarTrait::add(&nonce_rho, &challenge.mul(secret.rho)),
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let challenge = Self::challenge(
            transcript,
            context,
            &input,
            &self.commitment_v,
            &self.commitment_a,
        )?;
        let lhs_v = input.base_r.multiply_by_scalar(&self.response_s)
            + C::generator().multiply_by_scalar(&self.response_l);
        let rhs_v = self.commitment_v + input.v.multiply_by_scalar(&challenge);
        let lhs_a = C::generator().multiply_by_scalar(&self.response_rho);
        let rhs_a = self.commitment_a + input.a.multiply_by_scalar(&challenge);
        if lhs_v == rhs_v && lhs_a == rhs_a {
            Ok(())
        } else {
            Err(InternalError::FailedProof(ProofKind::Representation, None))
        }
    }
}
