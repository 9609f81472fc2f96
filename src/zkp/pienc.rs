// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Range proof for the encrypted multiplicative share.
//!
//! The first move of the multiplicative-to-additive protocol is the
//! initiator publishing `c = Enc_N(k)` under its own Paillier key. This
//! proof convinces each receiver that `k` is small — bounded by `q³` —
//! so the homomorphic arithmetic downstream cannot be driven out of
//! range. The commitments inside the proof are computed over the
//! *verifier's* ring-Pedersen parameters.

use crate::{
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

/// Proof that a Paillier ciphertext encrypts a value in `[0, q³]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PiEncProof {
    z: BigNumber,
    u: BigNumber,
    w: BigNumber,
    s: BigNumber,
    s1: BigNumber,
    s2: BigNumber,
}

/// Public statement: the prover's encryption key, the ciphertext, the
/// verifier's commitment parameters and the curve order.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    prover_pk: &'a EncryptionKey,
    ciphertext: &'a Ciphertext,
    verifier_setup: &'a RingPedersen,
    curve_order: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(
        prover_pk: &'a EncryptionKey,
        ciphertext: &'a Ciphertext,
        verifier_setup: &'a RingPedersen,
        curve_order: &'a BigNumber,
    ) -> Self {
        Self {
            prover_pk,
            ciphertext,
            verifier_setup,
            curve_order,
        }
    }
}

/// The plaintext and the encryption nonce.
pub(crate) struct ProverSecret<'a> {
    plaintext: &'a BigNumber,
    nonce: &'a Nonce,
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(plaintext: &'a BigNumber, nonce: &'a Nonce) -> Self {
        Self { plaintext, nonce }
    }
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pienc::ProverSecret([redacted])")
    }
}

fn append_statement(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput,
) -> Result<()> {
    transcript.append_message(b"PiEncProof", b"");
    transcript.append_message(b"context", &context.as_bytes()?);
    transcript.append_message(b"N", &input.prover_pk.modulus().to_bytes());
    transcript.append_message(b"ciphertext", &serialize!(input.ciphertext)?);
    transcript.append_message(b"setup", &serialize!(input.verifier_setup)?);
    transcript.append_message(b"q", &input.curve_order.to_bytes());
    Ok(())
}

impl Proof for PiEncProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let q = input.curve_order;
        let q3 = q * q * q;
        let big_n = input.prover_pk.modulus();
        let nn = big_n * big_n;
        let ntilde = input.verifier_setup.modulus();

        let alpha = random_positive_bn(rng, &q3);
        let beta = random_bn_in_z_star(rng, big_n)?;
        let gamma = random_positive_bn(rng, &(&q3 * ntilde));
        let rho = random_positive_bn(rng, &(q * ntilde));

        let z = input.verifier_setup.commit(secret.plaintext, &rho)?;
        let u = {
            let g_to_alpha = (BigNumber::one() + big_n * &alpha).nmod(&nn);
            (g_to_alpha * beta.modpow(big_n, &nn)).nmod(&nn)
        };
        let w = input.verifier_setup.commit(&alpha, &gamma)?;

        append_statement(transcript, context, &input)?;
        transcript.append_message(b"z", &z.to_bytes());
        transcript.append_message(b"u", &u.to_bytes());
        transcript.append_message(b"w", &w.to_bytes());
        let challenge = positive_challenge_from_transcript(transcript, q)?;

        let s = (secret.nonce.modpow(&challenge, big_n) * &beta).nmod(big_n);
        let s1 = &challenge * secret.plaintext + &alpha;
        let s2 = &challenge * &rho + &gamma;

        Ok(Self {
            z,
            u,
            w,
            s,
            s1,
            s2,
        })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let fail = || InternalError::FailedProof(ProofKind::EncRange, None);
        let q = input.curve_order;
        let q3 = q * q * q;
        let big_n = input.prover_pk.modulus();
        let nn = big_n * big_n;

        // The range claim itself.
        if self.s1 < BigNumber::zero() || self.s1 > q3 {
            error!("encrypted share exceeds its q^3 bound");
            return Err(fail());
        }
        for residue in [&self.z, &self.w] {
            if residue <= &BigNumber::zero() || residue >= input.verifier_setup.modulus() {
                return Err(fail());
            }
        }
        if self.u <= BigNumber::zero() || self.u >= nn {
            return Err(fail());
        }
        if self.s <= BigNumber::zero() || self.s >= *big_n {
            return Err(fail());
        }

        append_statement(transcript, context, &input)?;
        transcript.append_message(b"z", &self.z.to_bytes());
        transcript.append_message(b"u", &self.u.to_bytes());
        transcript.append_message(b"w", &self.w.to_bytes());
        let challenge = positive_challenge_from_transcript(transcript, q)?;

        // Paillier side: Enc(s1; s) = u * c^e mod N^2.
        let lhs = {
            let g_to_s1 = (BigNumber::one() + big_n * &self.s1).nmod(&nn);
            (g_to_s1 * self.s.modpow(big_n, &nn)).nmod(&nn)
        };
        let rhs = {
            let c_to_e = input.ciphertext.0.modpow(&challenge, &nn);
            (&self.u * c_to_e).nmod(&nn)
        };
        if lhs != rhs {
            return Err(fail());
        }

        // Commitment side: h1^{s1} h2^{s2} = w * z^e mod Ñ.
        let lhs = input.verifier_setup.commit(&self.s1, &self.s2)?;
        let rhs = {
            let z_to_e = modpow_signed(&self.z, &challenge, input.verifier_setup.modulus())?;
            (&self.w * z_to_e).nmod(input.verifier_setup.modulus())
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
        paillier::DecryptionKey,
        ring_pedersen::RingPedersenSetup,
        utils::testing::init_testing,
    };

    fn transcript() -> Transcript {
        Transcript::new(b"pienc test")
    }

    struct Fixture {
        pk: EncryptionKey,
        setup: RingPedersenSetup,
        order: BigNumber,
    }

    fn fixture(rng: &mut (impl RngCore + CryptoRng)) -> Fixture {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let dk = DecryptionKey::from_primes(p, q).unwrap();
        Fixture {
            pk: dk.encryption_key(),
            setup: RingPedersenSetup::gen_from_pool(rng).unwrap(),
            order: TestCurve::order(),
        }
    }

    #[test]
    fn pienc_accepts_small_plaintexts() {
        let mut rng = init_testing();
        let f = fixture(&mut rng);

        let k = random_positive_bn(&mut rng, &f.order);
        let (ciphertext, nonce) = f.pk.encrypt(&mut rng, &k).unwrap();

        let input = CommonInput::new(&f.pk, &ciphertext, f.setup.scheme(), &f.order);
        let proof = PiEncProof::prove(
            input,
            ProverSecret::new(&k, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn pienc_rejects_oversized_plaintexts() {
        let mut rng = init_testing();
        let f = fixture(&mut rng);

        // A plaintext beyond q^3 (but still < N).
        let q3 = &f.order * &f.order * &f.order;
        let oversized = q3.clone() << 10;
        let (ciphertext, nonce) = f.pk.encrypt(&mut rng, &oversized).unwrap();

        let input = CommonInput::new(&f.pk, &ciphertext, f.setup.scheme(), &f.order);
        let proof = PiEncProof::prove(
            input,
            ProverSecret::new(&oversized, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_err());
    }

    #[test]
    fn pienc_rejects_mismatched_ciphertexts_and_tampering() {
        let mut rng = init_testing();
        let f = fixture(&mut rng);

        let k = random_positive_bn(&mut rng, &f.order);
        let (ciphertext, nonce) = f.pk.encrypt(&mut rng, &k).unwrap();
        let input = CommonInput::new(&f.pk, &ciphertext, f.setup.scheme(), &f.order);
        let proof = PiEncProof::prove(
            input,
            ProverSecret::new(&k, &nonce),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();

        // Same proof against a different ciphertext.
        let (other_ciphertext, _) = f.pk.encrypt(&mut rng, &k).unwrap();
        let other = CommonInput::new(&f.pk, &other_ciphertext, f.setup.scheme(), &f.order);
        assert!(proof.clone().verify(other, &(), &mut transcript()).is_err());

        // Bit-flipped response.
        let mut tampered = proof;
        tampered.s1 = &tampered.s1 + 1;
        assert!(tampered.verify(input, &(), &mut transcript()).is_err());
    }
}
