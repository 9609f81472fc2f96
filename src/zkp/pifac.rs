// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Proof that the factors of a Paillier modulus are large.
//!
//! Shows that `N₀ = pq` has no factor smaller than roughly
//! `√N₀ / 2^{ℓ+ε}`, which rules out the moduli a cheater would need to
//! mount small-factor attacks against the MtA range proofs. Commitments
//! are over the verifier's ring-Pedersen parameters.

use crate::{
    errors::{InternalError, Result},
    ring_pedersen::RingPedersen,
    utils::{
        modpow_signed, plusminus_challenge_from_transcript, random_plusminus_scaled,
    },
    zkp::{Proof, ProofContext, ProofKind},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// Soundness parameter: honest factors are within `2^ELL` of `√N₀`.
const ELL: usize = 256;
/// Slack parameter for the masked responses.
const EPSILON: usize = 512;

/// Proof that neither factor of a modulus is small.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PiFacProof {
    p_commitment: BigNumber,
    q_commitment: BigNumber,
    p_mask_commitment: BigNumber,
    q_mask_commitment: BigNumber,
    q_link_commitment: BigNumber,
    sigma: BigNumber,
    z1: BigNumber,
    z2: BigNumber,
    w1: BigNumber,
    w2: BigNumber,
    v: BigNumber,
}

/// Public statement: the modulus whose factors are bounded, under the
/// verifier's commitment parameters.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    verifier_setup: &'a RingPedersen,
    modulus: &'a BigNumber,
    curve_order: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(
        verifier_setup: &'a RingPedersen,
        modulus: &'a BigNumber,
        curve_order: &'a BigNumber,
    ) -> Self {
        Self {
            verifier_setup,
            modulus,
            curve_order,
        }
    }
}

/// The factors.
pub(crate) struct ProverSecret<'a> {
    p: &'a BigNumber,
    q: &'a BigNumber,
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(p: &'a BigNumber, q: &'a BigNumber) -> Self {
        Self { p, q }
    }
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pifac::ProverSecret([redacted])")
    }
}

/// `2^⌈bits(N)/2⌉`, a cheap stand-in for `√N` that only loosens the
/// bound by a factor below two.
fn sqrt_bound(n: &BigNumber) -> BigNumber {
    let bits = n.to_bytes().len() * 8;
    BigNumber::one() << (bits / 2 + 1)
}

fn append_statement(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput,
) -> Result<()> {
    transcript.append_message(b"PiFacProof", b"");
    transcript.append_message(b"context", &context.as_bytes()?);
    transcript.append_message(b"setup", &serialize!(input.verifier_setup)?);
    transcript.append_message(b"N0", &input.modulus.to_bytes());
    transcript.append_message(b"q", &input.curve_order.to_bytes());
    Ok(())
}

impl Proof for PiFacProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let ntilde = input.verifier_setup.modulus();
        let root = sqrt_bound(input.modulus);

        let alpha = random_plusminus_scaled(rng, ELL + EPSILON, &root);
        let beta = random_plusminus_scaled(rng, ELL + EPSILON, &root);
        let mu = random_plusminus_scaled(rng, ELL, ntilde);
        let nu = random_plusminus_scaled(rng, ELL, ntilde);
        let sigma = random_plusminus_scaled(rng, ELL, &(input.modulus * ntilde));
        let r = random_plusminus_scaled(rng, ELL + EPSILON, &(input.modulus * ntilde));
        let x = random_plusminus_scaled(rng, ELL + EPSILON, ntilde);
        let y = random_plusminus_scaled(rng, ELL + EPSILON, ntilde);

        let p_commitment = input.verifier_setup.commit(secret.p, &mu)?;
        let q_commitment = input.verifier_setup.commit(secret.q, &nu)?;
        let p_mask_commitment = input.verifier_setup.commit(&alpha, &x)?;
        let q_mask_commitment = input.verifier_setup.commit(&beta, &y)?;
        let q_link_commitment = {
            let q_to_alpha = modpow_signed(&q_commitment, &alpha, ntilde)?;
            let h2_to_r = modpow_signed(input.verifier_setup.h2(), &r, ntilde)?;
            (q_to_alpha * h2_to_r).nmod(ntilde)
        };

        append_statement(transcript, context, &input)?;
        for (label, value) in [
            (b"P" as &[u8], &p_commitment),
            (b"Q", &q_commitment),
            (b"A", &p_mask_commitment),
            (b"B", &q_mask_commitment),
            (b"T", &q_link_commitment),
            (b"sigma", &sigma),
        ] {
            transcript.append_message(label, &value.to_bytes());
        }
        let challenge = plusminus_challenge_from_transcript(transcript, input.curve_order)?;

        let sigma_hat = &sigma - &nu * secret.p;
        let z1 = &alpha + &challenge * secret.p;
        let z2 = &beta + &challenge * secret.q;
        let w1 = &x + &challenge * &mu;
        let w2 = &y + &challenge * &nu;
        let v = &r + &challenge * &sigma_hat;

        Ok(Self {
            p_commitment,
            q_commitment,
            p_mask_commitment,
            q_mask_commitment,
            q_link_commitment,
            sigma,
            z1,
            z2,
            w1,
            w2,
            v,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let fail = || InternalError::FailedProof(ProofKind::Factor, None);
        let ntilde = input.verifier_setup.modulus();

        // Masked factors must stay within the advertised window; a small
        // factor could not satisfy this together with the equations
        // below.
        let bound = (BigNumber::one() << (ELL + EPSILON + 1)) * sqrt_bound(input.modulus);
        if self.z1 > bound || self.z1 < -bound.clone() || self.z2 > bound || self.z2 < -bound {
            error!("masked factor response exceeds its range bound");
            return Err(fail());
        }

        append_statement(transcript, context, &input)?;
        for (label, value) in [
            (b"P" as &[u8], &self.p_commitment),
            (b"Q", &self.q_commitment),
            (b"A", &self.p_mask_commitment),
            (b"B", &self.q_mask_commitment),
            (b"T", &self.q_link_commitment),
            (b"sigma", &self.sigma),
        ] {
            transcript.append_message(label, &value.to_bytes());
        }
        let challenge = plusminus_challenge_from_transcript(transcript, input.curve_order)?;

        // h1^{z1} h2^{w1} = A * P^e mod Ñ.
        let lhs = input.verifier_setup.commit(&self.z1, &self.w1)?;
        let rhs = (&self.p_mask_commitment
            * modpow_signed(&self.p_commitment, &challenge, ntilde)?)
        .nmod(ntilde);
        if lhs != rhs {
            return Err(fail());
        }

        // h1^{z2} h2^{w2} = B * Q^e mod Ñ.
        let lhs = input.verifier_setup.commit(&self.z2, &self.w2)?;
        let rhs = (&self.q_mask_commitment
            * modpow_signed(&self.q_commitment, &challenge, ntilde)?)
        .nmod(ntilde);
        if lhs != rhs {
            return Err(fail());
        }

        // Q^{z1} h2^{v} = T * (h1^{N0} h2^{sigma})^e mod Ñ.
        let lhs = {
            let q_to_z1 = modpow_signed(&self.q_commitment, &self.z1, ntilde)?;
            let h2_to_v = modpow_signed(input.verifier_setup.h2(), &self.v, ntilde)?;
            (q_to_z1 * h2_to_v).nmod(ntilde)
        };
        let rhs = {
            let linked = input.verifier_setup.commit(input.modulus, &self.sigma)?;
            (&self.q_link_commitment * modpow_signed(&linked, &challenge, ntilde)?).nmod(ntilde)
        };
        if lhs != rhs {
            return Err(fail());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, TestCurve},
        paillier::prime_gen,
        ring_pedersen::RingPedersenSetup,
        utils::testing::init_testing,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"pifac test")
    }

    #[test]
    fn pifac_accepts_honest_moduli() {
        let mut rng = init_testing();
        let setup = RingPedersenSetup::gen_from_pool(&mut rng).unwrap();
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let modulus = &p * &q;
        let order = TestCurve::order();

        let input = CommonInput::new(setup.scheme(), &modulus, &order);
        let proof = PiFacProof::prove(
            input,
            ProverSecret::new(&p, &q),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn pifac_rejects_wrong_factorizations() {
        let mut rng = init_testing();
        let setup = RingPedersenSetup::gen_from_pool(&mut rng).unwrap();
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let (p2, q2) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let modulus = &p * &q;
        let order = TestCurve::order();

        let input = CommonInput::new(setup.scheme(), &modulus, &order);
        // Claiming someone else's factors cannot satisfy the link
        // equation.
        let proof = PiFacProof::prove(
            input,
            ProverSecret::new(&p2, &q2),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn pifac_rejects_small_factors() {
        let mut rng = init_testing();
        let setup = RingPedersenSetup::gen_from_pool(&mut rng).unwrap();
        // A lopsided modulus: one tiny factor. The honest response for
        // the huge cofactor blows the range bound.
        let small = BigNumber::prime(16);
        let big = BigNumber::prime(2032);
        let modulus = &small * &big;
        let order = TestCurve::order();

        let input = CommonInput::new(setup.scheme(), &modulus, &order);
        let proof = PiFacProof::prove(
            input,
            ProverSecret::new(&small, &big),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }
}
