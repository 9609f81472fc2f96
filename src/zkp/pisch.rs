// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Schnorr proof of knowledge of a discrete logarithm.
//!
//! Proves knowledge of `x` with `X = x · G`. The keygen protocols use the
//! precommitment flow: the nonce commitment `A = α · G` is fixed (inside a
//! hash commitment) in round one, and the proof is completed rounds later
//! once the transcript context is known, which stops a rushing adversary
//! from choosing its share as a function of other parties' proofs.

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
use zeroize::Zeroize;

/// Schnorr proof for `X = x · G`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PiSchProof<C: CurveTrait> {
    commitment: C,
    response: C::Scalar,
}

/// The public point.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    x_commitment: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    pub(crate) fn new(x_commitment: &'a C) -> Self {
        Self { x_commitment }
    }
}

/// The discrete logarithm.
pub(crate) struct ProverSecret<'a, C: CurveTrait> {
    x: &'a C::Scalar,
}

impl<'a, C: CurveTrait> ProverSecret<'a, C> {
    pub(crate) fn new(x: &'a C::Scalar) -> Self {
        Self { x }
    }
}

/// A nonce commitment generated ahead of the proof itself.
#[derive(Clone)]
pub(crate) struct PiSchPrecommit<C: CurveTrait> {
    commitment: C,
    nonce: C::Scalar,
}

impl<C: CurveTrait> Debug for PiSchPrecommit<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiSchPrecommit")
            .field("commitment", &self.commitment)
            .field("nonce", &"[redacted]")
            .finish()
    }
}

impl<C: CurveTrait> Drop for PiSchPrecommit<C> {
    fn drop(&mut self) {
        self.nonce.zeroize();
    }
}

impl<C: CurveTrait> PiSchPrecommit<C> {
    /// The nonce commitment `A`, safe to publish.
    pub(crate) fn precommitment(&self) -> &C {
        &self.commitment
    }
}

impl<C: CurveTrait> PiSchProof<C> {
    /// Generate a nonce and its commitment for a later
    /// [`prove_from_precommit`](Self::prove_from_precommit).
    pub(crate) fn precommit<R: RngCore + CryptoRng>(rng: &mut R) -> Result<PiSchPrecommit<C>> {
        let nonce = C::Scalar::random(rng);
        let commitment = C::generator().multiply_by_scalar(&nonce);
        Ok(PiSchPrecommit { commitment, nonce })
    }

    /// Complete a proof over a previously fixed nonce commitment.
    pub(crate) fn prove_from_precommit(
        context: &impl ProofContext,
        precommit: &PiSchPrecommit<C>,
        input: &CommonInput<C>,
        secret: &ProverSecret<C>,
        transcript: &Transcript,
    ) -> Result<Self> {
        let mut transcript = transcript.clone();
        let challenge =
            Self::challenge(&mut transcript, context, input, &precommit.commitment)?;
        let response = ScalarTrait::add(&precommit.nonce, &challenge.mul(secret.x));
        Ok(Self {
            commitment: precommit.commitment,
            response,
        })
    }

    /// Verify, additionally requiring the nonce commitment to equal a
    /// previously revealed value.
    pub(crate) fn verify_with_precommit(
        self,
        input: CommonInput<C>,
        context: &impl ProofContext,
        transcript: &Transcript,
        expected_commitment: &C,
    ) -> Result<()> {
        if &self.commitment != expected_commitment {
            return Err(InternalError::FailedProof(ProofKind::Schnorr, None));
        }
        let mut transcript = transcript.clone();
        self.verify_inner(input, context, &mut transcript)
    }

    fn challenge(
        transcript: &mut Transcript,
        context: &impl ProofContext,
        input: &CommonInput<C>,
        commitment: &C,
    ) -> Result<C::Scalar> {
        transcript.append_message(b"PiSchProof", b"");
        transcript.append_message(b"context", &context.as_bytes()?);
        transcript.append_message(b"X", &input.x_commitment.to_bytes());
        transcript.append_message(b"A", &commitment.to_bytes());
        let challenge = positive_challenge_from_transcript(transcript, &C::order())?;
        C::bn_to_scalar(&challenge)
    }

    fn verify_inner(
        self,
        input: CommonInput<C>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let challenge = Self::challenge(transcript, context, &input, &self.commitment)?;
        let lhs = C::generator().multiply_by_scalar(&self.response);
        let rhs = self.commitment + input.x_commitment.multiply_by_scalar(&challenge);
        if lhs == rhs {
            Ok(())
        } else {
            Err(InternalError::FailedProof(ProofKind::Schnorr, None))
        }
    }
}

impl<C: CurveTrait> Proof for PiSchProof<C> {
    type CommonInput<'a> = CommonInput<'a, C>;
    type ProverSecret<'a> = ProverSecret<'a, C>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let precommit = Self::precommit(rng)?;
        let challenge = Self::challenge(transcript, context, &input, &precommit.commitment)?;
        let response = ScalarTrait::add(&precommit.nonce, &challenge.mul(secret.x));
        Ok(Self {
            commitment: precommit.commitment,
            response,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        self.verify_inner(input, context, transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, ed25519::Ed25519, utils::testing::init_testing};

    fn transcript() -> Transcript {
        Transcript::new(b"pisch test")
    }

    #[test]
    fn pisch_proves_and_rejects_tampering() {
        let mut rng = init_testing();
        let x = <TestCurve as CurveTrait>::Scalar::random(&mut rng);
        let public = TestCurve::generator().multiply_by_scalar(&x);
        let input = CommonInput::new(&public);

        let proof = PiSchProof::<TestCurve>::prove(
            input,
            ProverSecret::new(&x),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.clone().verify(input, &(), &mut transcript()).is_ok());

        // Wrong statement.
        let other = TestCurve::random(&mut rng);
        let wrong = CommonInput::new(&other);
        assert!(proof.clone().verify(wrong, &(), &mut transcript()).is_err());

        // Tampered response.
        let mut tampered = proof;
        tampered.response = ScalarTrait::add(
            &tampered.response,
            &<TestCurve as CurveTrait>::Scalar::one(),
        );
        assert!(tampered.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn precommit_flow_binds_the_commitment() {
        let mut rng = init_testing();
        let x = <TestCurve as CurveTrait>::Scalar::random(&mut rng);
        let public = TestCurve::generator().multiply_by_scalar(&x);
        let input = CommonInput::new(&public);

        let precommit = PiSchProof::<TestCurve>::precommit(&mut rng).unwrap();
        let revealed = *precommit.precommitment();
        let proof = PiSchProof::prove_from_precommit(
            &(),
            &precommit,
            &input,
            &ProverSecret::new(&x),
            &transcript(),
        )
        .unwrap();

        assert!(proof
            .clone()
            .verify_with_precommit(input, &(), &transcript(), &revealed)
            .is_ok());

        // A different revealed commitment must fail even if the proof is
        // self-consistent.
        let other = TestCurve::random(&mut rng);
        assert!(proof
            .verify_with_precommit(input, &(), &transcript(), &other)
            .is_err());
    }

    #[test]
    fn pisch_works_over_the_edwards_curve() {
        let mut rng = init_testing();
        let x = <Ed25519 as CurveTrait>::Scalar::random(&mut rng);
        let public = Ed25519::generator().multiply_by_scalar(&x);
        let input = CommonInput::new(&public);

        let proof = PiSchProof::<Ed25519>::prove(
            input,
            ProverSecret::new(&x),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }
}
