// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Proof of discrete-log equality across two bases.
//!
//! Proves knowledge of `x` with `X = x · G` and `Y = x · H` for public
//! bases `G` (the group generator) and `H`. The signing protocol uses it
//! to show that the blinded check value `U = ρ · V` reuses the exponent
//! of the earlier commitment `A = ρ · G`.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, Result},
    utils::positive_challenge_from_transcript,
    zkp::{Proof, ProofContext, ProofKind},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// Chaum-Pedersen style equality proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PiLogProof<C: CurveTrait> {
    commitment_g: C,
    commitment_h: C,
    response: C::Scalar,
}

/// Public statement: `X = x · G`, `Y = x · H`.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a, C> {
    base_h: &'a C,
    x_commitment: &'a C,
    h_commitment: &'a C,
}

impl<'a, C> CommonInput<'a, C> {
    pub(crate) fn new(base_h: &'a C, x_commitment: &'a C, h_commitment: &'a C) -> Self {
        Self {
            base_h,
            x_commitment,
            h_commitment,
        }
    }
}

/// The shared exponent.
pub(crate) struct ProverSecret<'a, C: CurveTrait> {
    x: &'a C::Scalar,
}

impl<'a, C: CurveTrait> ProverSecret<'a, C> {
    pub(crate) fn new(x: &'a C::Scalar) -> Self {
        Self { x }
    }
}

impl<C: CurveTrait> PiLogProof<C> {
    fn challenge(
        transcript: &mut Transcript,
        context: &impl ProofContext,
        input: &CommonInput<C>,
        commitment_g: &C,
        commitment_h: &C,
    ) -> Result<C::Scalar> {
        transcript.append_message(b"PiLogProof", b"");
        transcript.append_message(b"context", &context.as_bytes()?);
        transcript.append_message(b"H", &input.base_h.to_bytes());
        transcript.append_message(b"X", &input.x_commitment.to_bytes());
        transcript.append_message(b"Y", &input.h_commitment.to_bytes());
        transcript.append_message(b"A", &commitment_g.to_bytes());
        transcript.append_message(b"B", &commitment_h.to_bytes());
        let challenge = positive_challenge_from_transcript(transcript, &C::order())?;
        C::bn_to_scalar(&challenge)
    }
}

impl<C: CurveTrait> Proof for PiLogProof<C> {
    type CommonInput<'a> = CommonInput<'a, C>;
    type ProverSecret<'a> = ProverSecret<'a, C>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let nonce = C::Scalar::random(rng);
        let commitment_g = C::generator().multiply_by_scalar(&nonce);
        let commitment_h = input.base_h.multiply_by_scalar(&nonce);
        let challenge =
            Self::challenge(transcript, context, &input, &commitment_g, &commitment_h)?;
        let response = ScalarTrait::add(&nonce, &challenge.mul(secret.x));
        Ok(Self {
            commitment_g,
            commitment_h,
            response,
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
            &self.commitment_g,
            &self.commitment_h,
        )?;
        let lhs_g = C::generator().multiply_by_scalar(&self.response);
        let rhs_g = self.commitment_g + input.x_commitment.multiply_by_scalar(&challenge);
        let lhs_h = input.base_h.multiply_by_scalar(&self.response);
        let rhs_h = self.commitment_h + input.h_commitment.multiply_by_scalar(&challenge);
        if lhs_g == rhs_g && lhs_h == rhs_h {
            Ok(())
        } else {
            Err(InternalError::FailedProof(ProofKind::DlogEq, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    fn transcript() -> Transcript {
        Transcript::new(b"pilog test")
    }

    #[test]
    fn pilog_proves_equality() {
        let mut rng = init_testing();
        let base_h = TestCurve::random(&mut rng);
        let x = <TestCurve as CurveTrait>::Scalar::random(&mut rng);
        let x_commitment = TestCurve::generator().multiply_by_scalar(&x);
        let h_commitment = base_h.multiply_by_scalar(&x);

        let input = CommonInput::new(&base_h, &x_commitment, &h_commitment);
        let proof = PiLogProof::<TestCurve>::prove(
            input,
            ProverSecret::new(&x),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn pilog_rejects_unequal_exponents() {
        let mut rng = init_testing();
        let base_h = TestCurve::random(&mut rng);
        let x = <TestCurve as CurveTrait>::Scalar::random(&mut rng);
        let y = <TestCurve as CurveTrait>::Scalar::random(&mut rng);
        let x_commitment = TestCurve::generator().multiply_by_scalar(&x);
        // Commitment over H uses a different exponent.
        let h_commitment = base_h.multiply_by_scalar(&y);

        let input = CommonInput::new(&base_h, &x_commitment, &h_commitment);
        let proof = PiLogProof::<TestCurve>::prove(
            input,
            ProverSecret::new(&x),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(
            proof.verify(input, &(), &mut transcript()),
            Err(InternalError::FailedProof(ProofKind::DlogEq, None))
        );
    }
}
