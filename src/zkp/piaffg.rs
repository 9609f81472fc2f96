// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Range proofs for multiplicative-to-additive responses.
//!
//! The responder in an MtA exchange receives `c₁ = Enc_N(k)` under the
//! initiator's key and answers with `c₂ = b ⊙ c₁ ⊕ Enc_N(β′)`, keeping
//! `-β′ mod q` as its additive share. These proofs bound the responder's
//! multiplier (`b ≤ q³`) and mask (`β′ ≤ q⁵`), so a malicious responder
//! cannot push the initiator's decryption out of range.
//!
//! Two variants, mirroring their use in signing:
//! - [`PiAffProof`] for the `γ` exchange, where the multiplier is a
//!   session-local secret;
//! - [`PiAffgProof`] for the key-share exchange, which additionally binds
//!   the multiplier to the signer's public point `B = b · G`.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, Result},
    paillier::{Ciphertext, EncryptionKey, Nonce},
    ring_pedersen::RingPedersen,
    utils::{
        modpow_signed, positive_challenge_from_transcript, random_bn_in_z_star,
        random_positive_bn,
    },
    zkp::{Proof, ProofContext, ProofKind},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// The residue part shared by both variants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ResponderCore {
    z: BigNumber,
    z_prime: BigNumber,
    t: BigNumber,
    v: BigNumber,
    w: BigNumber,
    s: BigNumber,
    s1: BigNumber,
    s2: BigNumber,
    t1: BigNumber,
    t2: BigNumber,
}

/// MtA responder proof without the group binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PiAffProof {
    core: ResponderCore,
}

/// MtA responder proof with the multiplier bound to `B = b · G`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PiAffgProof<C: CurveTrait> {
    core: ResponderCore,
    group_commitment: C,
}

/// Public statement shared by both variants: the initiator's encryption
/// key, both ciphertexts, the verifier's commitment parameters and the
/// curve order.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    initiator_pk: &'a EncryptionKey,
    c1: &'a Ciphertext,
    c2: &'a Ciphertext,
    verifier_setup: &'a RingPedersen,
    curve_order: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(
        initiator_pk: &'a EncryptionKey,
        c1: &'a Ciphertext,
        c2: &'a Ciphertext,
        verifier_setup: &'a RingPedersen,
        curve_order: &'a BigNumber,
    ) -> Self {
        Self {
            initiator_pk,
            c1,
            c2,
            verifier_setup,
            curve_order,
        }
    }
}

/// The responder's multiplier, mask and encryption nonce.
pub(crate) struct ProverSecret<'a> {
    multiplier: &'a BigNumber,
    mask: &'a BigNumber,
    nonce: &'a Nonce,
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(multiplier: &'a BigNumber, mask: &'a BigNumber, nonce: &'a Nonce) -> Self {
        Self {
            multiplier,
            mask,
            nonce,
        }
    }
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("piaffg::ProverSecret([redacted])")
    }
}

/// The prover's ephemerals, kept until the challenge is known.
struct Ephemerals {
    alpha: BigNumber,
    gamma: BigNumber,
    rho: BigNumber,
    rho_prime: BigNumber,
    sigma: BigNumber,
    tau: BigNumber,
    beta: BigNumber,
}

fn append_statement(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput,
) -> Result<()> {
    transcript.append_message(b"PiAffProof", b"");
    transcript.append_message(b"context", &context.as_bytes()?);
    transcript.append_message(b"N", &input.initiator_pk.modulus().to_bytes());
    transcript.append_message(b"c1", &serialize!(input.c1)?);
    transcript.append_message(b"c2", &serialize!(input.c2)?);
    transcript.append_message(b"setup", &serialize!(input.verifier_setup)?);
    transcript.append_message(b"q", &input.curve_order.to_bytes());
    Ok(())
}

impl ResponderCore {
    fn commitments<R: RngCore + CryptoRng>(
        input: &CommonInput,
        secret: &ProverSecret,
        rng: &mut R,
    ) -> Result<(Ephemerals, [BigNumber; 5])> {
        let q = input.curve_order;
        let q3 = q * q * q;
        let q5 = &q3 * q * q;
        let ntilde = input.verifier_setup.modulus();
        let big_n = input.initiator_pk.modulus();
        let nn = big_n * big_n;

        let ephemerals = Ephemerals {
            alpha: random_positive_bn(rng, &q3),
            gamma: random_positive_bn(rng, &q5),
            rho: random_positive_bn(rng, &(q * ntilde)),
            rho_prime: random_positive_bn(rng, &(&q3 * ntilde)),
            sigma: random_positive_bn(rng, &(q * ntilde)),
            tau: random_positive_bn(rng, &(&q3 * ntilde)),
            beta: random_bn_in_z_star(rng, big_n)?,
        };

        let z = input
            .verifier_setup
            .commit(secret.multiplier, &ephemerals.rho)?;
        let z_prime = input
            .verifier_setup
            .commit(&ephemerals.alpha, &ephemerals.rho_prime)?;
        let t = input.verifier_setup.commit(secret.mask, &ephemerals.sigma)?;
        let v = {
            let c1_to_alpha = input.c1.0.modpow(&ephemerals.alpha, &nn);
            let g_to_gamma = (BigNumber::one() + big_n * &ephemerals.gamma).nmod(&nn);
            (c1_to_alpha * g_to_gamma * ephemerals.beta.modpow(big_n, &nn)).nmod(&nn)
        };
        let w = input
            .verifier_setup
            .commit(&ephemerals.gamma, &ephemerals.tau)?;

        Ok((ephemerals, [z, z_prime, t, v, w]))
    }

    fn prove<R: RngCore + CryptoRng>(
        input: &CommonInput,
        secret: &ProverSecret,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
        group_commitments: Option<(&[u8], &[u8])>,
    ) -> Result<Self> {
        let (ephemerals, [z, z_prime, t, v, w]) = Self::commitments(input, secret, rng)?;

        append_statement(transcript, context, input)?;
        if let Some((public, ephemeral)) = group_commitments {
            transcript.append_message(b"B", public);
            transcript.append_message(b"U", ephemeral);
        }
        for (label, value) in [
            (b"z" as &[u8], &z),
            (b"z_prime", &z_prime),
            (b"t", &t),
            (b"v", &v),
            (b"w", &w),
        ] {
            transcript.append_message(label, &value.to_bytes());
        }
        let challenge = positive_challenge_from_transcript(transcript, input.curve_order)?;

        let big_n = input.initiator_pk.modulus();
        let s = (secret.nonce.modpow(&challenge, big_n) * &ephemerals.beta).nmod(big_n);
        let s1 = &challenge * secret.multiplier + &ephemerals.alpha;
        let s2 = &challenge * &ephemerals.rho + &ephemerals.rho_prime;
        let t1 = &challenge * secret.mask + &ephemerals.gamma;
        let t2 = &challenge * &ephemerals.sigma + &ephemerals.tau;

        Ok(Self {
            z,
            z_prime,
            t,
            v,
            w,
            s,
            s1,
            s2,
            t1,
            t2,
        })
    }

    /// Verify the residue equations, returning the challenge so variants
    /// can check their extra equations against it.
    fn verify(
        &self,
        input: &CommonInput,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        group_commitments: Option<(&[u8], &[u8])>,
    ) -> Result<BigNumber> {
        let fail = || InternalError::FailedProof(ProofKind::MtaRange, None);
        let q = input.curve_order;
        let q3 = q * q * q;
        let q5 = &q3 * q * q;
        let ntilde = input.verifier_setup.modulus();
        let big_n = input.initiator_pk.modulus();
        let nn = big_n * big_n;

        // Range claims.
        if self.s1 < BigNumber::zero() || self.s1 > q3 {
            error!("MtA multiplier exceeds its q^3 bound");
            return Err(fail());
        }
        if self.t1 < BigNumber::zero() || self.t1 > q5 {
            error!("MtA mask exceeds its q^5 bound");
            return Err(fail());
        }
        for residue in [&self.z, &self.z_prime, &self.t, &self.w] {
            if residue <= &BigNumber::zero() || residue >= ntilde {
                return Err(fail());
            }
        }
        if self.v <= BigNumber::zero() || self.v >= nn {
            return Err(fail());
        }
        if self.s <= BigNumber::zero() || self.s >= *big_n {
            return Err(fail());
        }

        append_statement(transcript, context, input)?;
        if let Some((public, ephemeral)) = group_commitments {
            transcript.append_message(b"B", public);
            transcript.append_message(b"U", ephemeral);
        }
        for (label, value) in [
            (b"z" as &[u8], &self.z),
            (b"z_prime", &self.z_prime),
            (b"t", &self.t),
            (b"v", &self.v),
            (b"w", &self.w),
        ] {
            transcript.append_message(label, &value.to_bytes());
        }
        let challenge = positive_challenge_from_transcript(transcript, q)?;

        // h1^{s1} h2^{s2} = z^e * z' mod Ñ.
        let lhs = input.verifier_setup.commit(&self.s1, &self.s2)?;
        let rhs = (modpow_signed(&self.z, &challenge, ntilde)? * &self.z_prime).nmod(ntilde);
        if lhs != rhs {
            return Err(fail());
        }

        // h1^{t1} h2^{t2} = t^e * w mod Ñ.
        let lhs = input.verifier_setup.commit(&self.t1, &self.t2)?;
        let rhs = (modpow_signed(&self.t, &challenge, ntilde)? * &self.w).nmod(ntilde);
        if lhs != rhs {
            return Err(fail());
        }

        // c1^{s1} * Enc(t1; s) = c2^e * v mod N^2.
        let lhs = {
            let c1_to_s1 = input.c1.0.modpow(&self.s1, &nn);
            let g_to_t1 = (BigNumber::one() + big_n * &self.t1).nmod(&nn);
            (c1_to_s1 * g_to_t1 * self.s.modpow(big_n, &nn)).nmod(&nn)
        };
        let rhs = (input.c2.0.modpow(&challenge, &nn) * &self.v).nmod(&nn);
        if lhs != rhs {
            return Err(fail());
        }

        Ok(challenge)
    }
}

impl Proof for PiAffProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self {
            core: ResponderCore::prove(&input, &secret, context, transcript, rng, None)?,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let _ = self.core.verify(&input, context, transcript, None)?;
        Ok(())
    }
}

impl<C: CurveTrait> PiAffgProof<C> {
    /// Prove, additionally binding the multiplier to `B = b · G`.
    pub(crate) fn prove_with_commitment<R: RngCore + CryptoRng>(
        input: CommonInput<'_>,
        secret: ProverSecret<'_>,
        public_point: &C,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        // The group ephemeral must be fixed before the challenge, so its
        // nonce is the same alpha used on the residue side.
        let (ephemerals, [z, z_prime, t, v, w]) =
            ResponderCore::commitments(&input, &secret, rng)?;
        let group_commitment =
            C::generator().multiply_by_bignum(&ephemerals.alpha)?;

        append_statement(transcript, context, &input)?;
        transcript.append_message(b"B", &public_point.to_bytes());
        transcript.append_message(b"U", &group_commitment.to_bytes());
        for (label, value) in [
            (b"z" as &[u8], &z),
            (b"z_prime", &z_prime),
            (b"t", &t),
            (b"v", &v),
            (b"w", &w),
        ] {
            transcript.append_message(label, &value.to_bytes());
        }
        let challenge = positive_challenge_from_transcript(transcript, input.curve_order)?;

        let big_n = input.initiator_pk.modulus();
        let s = (secret.nonce.modpow(&challenge, big_n) * &ephemerals.beta).nmod(big_n);
        let s1 = &challenge * secret.multiplier + &ephemerals.alpha;
        let s2 = &challenge * &ephemerals.rho + &ephemerals.rho_prime;
        let t1 = &challenge * secret.mask + &ephemerals.gamma;
        let t2 = &challenge * &ephemerals.sigma + &ephemerals.tau;

        Ok(Self {
            core: ResponderCore {
                z,
                z_prime,
                t,
                v,
                w,
                s,
                s1,
                s2,
                t1,
                t2,
            },
            group_commitment,
        })
    }

    /// Verify, including the binding `s1 · G = e · B + U`.
    pub(crate) fn verify_with_commitment(
        self,
        input: CommonInput<'_>,
        public_point: &C,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let public_bytes = public_point.to_bytes();
        let ephemeral_bytes = self.group_commitment.to_bytes();
        let challenge = self.core.verify(
            &input,
            context,
            transcript,
            Some((public_bytes.as_slice(), ephemeral_bytes.as_slice())),
        )?;

        let lhs = C::generator().multiply_by_bignum(&self.core.s1)?;
        let rhs =
            self.group_commitment + public_point.multiply_by_bignum(&challenge)?;
        if lhs == rhs {
            Ok(())
        } else {
            Err(InternalError::FailedProof(ProofKind::MtaRange, None))
        }
    }
}

#[cfg(test)]
impl<C: CurveTrait> PiAffgProof<C> {
    /// Swap the group ephemeral for garbage, used by abort tests to play
    /// a cheating responder.
    pub(crate) fn corrupt_group_commitment_for_test(mut proof: Self, garbage: C) -> Self {
        proof.group_commitment = garbage;
        proof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, TestCurve},
        paillier::{prime_gen, DecryptionKey},
        ring_pedersen::RingPedersenSetup,
        utils::testing::init_testing,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"piaffg test")
    }

    struct Fixture {
        dk: DecryptionKey,
        pk: EncryptionKey,
        setup: RingPedersenSetup,
        order: BigNumber,
        c1: Ciphertext,
        c2: Ciphertext,
        multiplier: BigNumber,
        mask: BigNumber,
        nonce: Nonce,
    }

    /// Build an honest MtA exchange: c1 = Enc(k), c2 = b*c1 + Enc(mask).
    fn fixture(rng: &mut (impl RngCore + CryptoRng)) -> Fixture {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let dk = DecryptionKey::from_primes(p, q).unwrap();
        let pk = dk.encryption_key();
        let setup = RingPedersenSetup::gen_from_pool(rng).unwrap();
        let order = TestCurve::order();

        let k = random_positive_bn(rng, &order);
        let (c1, _) = pk.encrypt(rng, &k).unwrap();

        let multiplier = random_positive_bn(rng, &order);
        let q3 = &order * &order * &order;
        let mask = random_positive_bn(rng, &q3);
        let scaled = pk.multiply_by_scalar(&c1, &multiplier).unwrap();
        let (masked, nonce) = pk.encrypt(rng, &mask).unwrap();
        let c2 = pk.add(&scaled, &masked).unwrap();

        Fixture {
            dk,
            pk,
            setup,
            order,
            c1,
            c2,
            multiplier,
            mask,
            nonce,
        }
    }

    #[test]
    fn piaff_accepts_honest_responses() {
        let mut rng = init_testing();
        let f = fixture(&mut rng);

        let input = CommonInput::new(&f.pk, &f.c1, &f.c2, f.setup.scheme(), &f.order);
        let proof = PiAffProof::prove(
            input,
            ProverSecret::new(&f.multiplier, &f.mask, &f.nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());

        // Decryption side of the exchange stays in range.
        let plaintext = f.dk.decrypt(&f.c2).unwrap();
        assert!(plaintext < *f.pk.modulus());
    }

    #[test]
    fn piaffg_binds_the_public_point() {
        let mut rng = init_testing();
        let f = fixture(&mut rng);
        let public_point = TestCurve::generator()
            .multiply_by_bignum(&f.multiplier)
            .unwrap();

        let input = CommonInput::new(&f.pk, &f.c1, &f.c2, f.setup.scheme(), &f.order);
        let proof = PiAffgProof::<TestCurve>::prove_with_commitment(
            input,
            ProverSecret::new(&f.multiplier, &f.mask, &f.nonce),
            &public_point,
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof
            .clone()
            .verify_with_commitment(input, &public_point, &(), &mut transcript())
            .is_ok());

        // Binding to a different point fails.
        let other = TestCurve::random(&mut rng);
        assert!(proof
            .verify_with_commitment(input, &other, &(), &mut transcript())
            .is_err());
    }

    #[test]
    fn piaff_rejects_tampered_exchanges() {
        let mut rng = init_testing();
        let f = fixture(&mut rng);

        let input = CommonInput::new(&f.pk, &f.c1, &f.c2, f.setup.scheme(), &f.order);
        let proof = PiAffProof::prove(
            input,
            ProverSecret::new(&f.multiplier, &f.mask, &f.nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();

        // A response computed over a different c2 must not verify.
        let (extra, _) = f.pk.encrypt(&mut rng, &BigNumber::one()).unwrap();
        let mauled = f.pk.add(&f.c2, &extra).unwrap();
        let wrong = CommonInput::new(&f.pk, &f.c1, &mauled, f.setup.scheme(), &f.order);
        assert!(proof.clone().verify(wrong, &(), &mut transcript()).is_err());

        // Oversized multiplier: rebuild an exchange with b > q^3.
        let q3 = &f.order * &f.order * &f.order;
        let oversized = q3.clone() << 8;
        let scaled = f.pk.multiply_by_scalar(&f.c1, &oversized).unwrap();
        let (masked, nonce) = f.pk.encrypt(&mut rng, &f.mask).unwrap();
        let c2 = f.pk.add(&scaled, &masked).unwrap();
        let input = CommonInput::new(&f.pk, &f.c1, &c2, f.setup.scheme(), &f.order);
        let proof = PiAffProof::prove(
            input,
            ProverSecret::new(&oversized, &f.mask, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }
}
