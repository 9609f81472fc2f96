// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Proof that a Paillier modulus is a well-formed Blum integer.
//!
//! Shows that `N` is an odd composite, square-free, with both prime
//! factors congruent to `3 mod 4` — the structure every safe-prime
//! product has, and the one the rest of the proof system assumes. The
//! prover exhibits, for transcript-derived challenges, both an `N`-th
//! root (possible only when `gcd(N, φ(N)) = 1`) and a fourth root of a
//! sign-and-witness adjusted challenge (possible only for Blum `N`).

use crate::{
    errors::{InternalError, Result},
    paillier::DecryptionKey,
    utils::{jacobi, modinv, positive_challenge_from_transcript, random_positive_bn},
    zkp::{Proof, ProofContext, ProofKind},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;

/// Number of challenge iterations; each contributes one bit-equivalent
/// of soundness against non-Blum moduli.
const PIMOD_ITERATIONS: usize = 80;

/// One challenge's responses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct PiModResponse {
    fourth_root: BigNumber,
    nth_root: BigNumber,
    flip_sign: bool,
    use_witness: bool,
}

/// Proof that `N` is a Blum integer with `gcd(N, φ(N)) = 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PiModProof {
    witness: BigNumber,
    responses: Vec<PiModResponse>,
}

/// Public statement: the modulus.
#[derive(Clone, Copy)]
pub(crate) struct CommonInput<'a> {
    modulus: &'a BigNumber,
}

impl<'a> CommonInput<'a> {
    pub(crate) fn new(modulus: &'a BigNumber) -> Self {
        Self { modulus }
    }
}

/// The prover's decryption key (it holds the factors).
pub(crate) struct ProverSecret<'a> {
    key: &'a DecryptionKey,
}

impl<'a> ProverSecret<'a> {
    pub(crate) fn new(key: &'a DecryptionKey) -> Self {
        Self { key }
    }
}

impl Debug for ProverSecret<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("pimod::ProverSecret([redacted])")
    }
}

fn append_statement(
    transcript: &mut Transcript,
    context: &impl ProofContext,
    input: &CommonInput,
) -> Result<()> {
    transcript.append_message(b"PiModProof", b"");
    transcript.append_message(b"context", &context.as_bytes()?);
    transcript.append_message(b"N", &input.modulus.to_bytes());
    Ok(())
}

/// The Legendre symbol of `a` mod an odd prime `p`, via Euler's
/// criterion.
fn is_quadratic_residue(a: &BigNumber, p: &BigNumber) -> bool {
    let two = BigNumber::from_slice([2u8]);
    let exponent = (p - 1) / &two;
    a.modpow(&exponent, p) == BigNumber::one()
}

/// Square root of a quadratic residue mod a prime `p ≡ 3 mod 4`.
fn sqrt_mod_prime(a: &BigNumber, p: &BigNumber) -> BigNumber {
    let four = BigNumber::from_slice([4u8]);
    let exponent = (p + 1) / &four;
    a.modpow(&exponent, p)
}

/// Fourth root of a fourth-power residue mod a Blum integer, via the
/// factors.
fn fourth_root(a: &BigNumber, p: &BigNumber, q: &BigNumber) -> Result<BigNumber> {
    let n = p * q;
    let root_mod = |prime: &BigNumber| -> BigNumber {
        let mut square_root = sqrt_mod_prime(&a.nmod(prime), prime);
        // Exactly one of ±√a is itself a residue mod a 3-mod-4 prime;
        // pick it so the second square root exists.
        if !is_quadratic_residue(&square_root, prime) {
            square_root = prime - square_root;
        }
        sqrt_mod_prime(&square_root, prime)
    };
    let root_p = root_mod(p);
    let root_q = root_mod(q);

    // CRT-combine the per-prime roots.
    let q_inv = modinv(q, p)?;
    let p_inv = modinv(p, q)?;
    Ok((root_p * q * q_inv + root_q * p * p_inv).nmod(&n))
}

impl Proof for PiModProof {
    type CommonInput<'a> = CommonInput<'a>;
    type ProverSecret<'a> = ProverSecret<'a>;

    fn prove<R: RngCore + CryptoRng>(
        input: Self::CommonInput<'_>,
        secret: Self::ProverSecret<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
        rng: &mut R,
    ) -> Result<Self> {
        let n = input.modulus;
        let (p, q) = secret.key.primes();

        // A witness with Jacobi symbol -1 exists for every Blum integer.
        let witness = loop {
            let candidate = random_positive_bn(rng, n);
            if jacobi(&candidate, n) == -1 {
                break candidate;
            }
        };

        append_statement(transcript, context, &input)?;
        transcript.append_message(b"witness", &witness.to_bytes());

        let nth_root_exponent = modinv(n, secret.key.totient())?;
        let mut responses = Vec::with_capacity(PIMOD_ITERATIONS);
        for _ in 0..PIMOD_ITERATIONS {
            let challenge = positive_challenge_from_transcript(transcript, n)?;
            if challenge.gcd(n) != BigNumber::one() {
                // The challenge revealed a factor of our own modulus;
                // something is deeply wrong.
                error!("transcript challenge shares a factor with the modulus");
                return Err(InternalError::InternalInvariantFailed);
            }

            // Exactly one of ±challenge, ±witness*challenge is a fourth
            // power residue; find it.
            let mut selected = None;
            'search: for use_witness in [false, true] {
                for flip_sign in [false, true] {
                    let mut adjusted = challenge.clone();
                    if use_witness {
                        adjusted = (adjusted * &witness).nmod(n);
                    }
                    if flip_sign {
                        adjusted = (-adjusted).nmod(n);
                    }
                    if is_quadratic_residue(&adjusted.nmod(p), p)
                        && is_quadratic_residue(&adjusted.nmod(q), q)
                    {
                        selected = Some((adjusted, flip_sign, use_witness));
                        break 'search;
                    }
                }
            }
            let (adjusted, flip_sign, use_witness) =
                selected.ok_or(InternalError::InternalInvariantFailed)?;

            responses.push(PiModResponse {
                fourth_root: fourth_root(&adjusted, p, q)?,
                nth_root: challenge.modpow(&nth_root_exponent, n),
                flip_sign,
                use_witness,
            });
        }

        Ok(Self { witness, responses })
    }

    fn verify(
        self,
        input: Self::CommonInput<'_>,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        let fail = || InternalError::FailedProof(ProofKind::Modulus, None);
        let n = input.modulus;
        let two = BigNumber::from_slice([2u8]);
        let four = BigNumber::from_slice([4u8]);

        if self.responses.len() != PIMOD_ITERATIONS {
            return Err(fail());
        }
        if n <= &BigNumber::one() || n.nmod(&two) == BigNumber::zero() {
            error!("modulus is not an odd integer greater than one");
            return Err(fail());
        }
        if n.is_prime() {
            error!("modulus is prime, not an RSA modulus");
            return Err(fail());
        }
        if self.witness <= BigNumber::zero()
            || &self.witness >= n
            || jacobi(&self.witness, n) != -1
        {
            return Err(fail());
        }

        append_statement(transcript, context, &input)?;
        transcript.append_message(b"witness", &self.witness.to_bytes());

        for response in &self.responses {
            let challenge = positive_challenge_from_transcript(transcript, n)?;

            // N-th root: only possible when gcd(N, phi(N)) = 1.
            if response.nth_root <= BigNumber::zero() || &response.nth_root >= n {
                return Err(fail());
            }
            if response.nth_root.modpow(n, n) != challenge {
                return Err(fail());
            }

            // Fourth root of the adjusted challenge: only possible for a
            // Blum integer.
            let mut adjusted = challenge;
            if response.use_witness {
                adjusted = (adjusted * &self.witness).nmod(n);
            }
            if response.flip_sign {
                adjusted = (-adjusted).nmod(n);
            }
            if response.fourth_root <= BigNumber::zero() || &response.fourth_root >= n {
                return Err(fail());
            }
            if response.fourth_root.modpow(&four, n) != adjusted {
                return Err(fail());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{paillier::prime_gen, utils::testing::init_testing};

    fn transcript() -> Transcript {
        Transcript::new(b"pimod test")
    }

    fn test_key(rng: &mut (impl RngCore + CryptoRng)) -> DecryptionKey {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        DecryptionKey::from_primes(p, q).unwrap()
    }

    #[test]
    fn pimod_accepts_safe_prime_products() {
        let mut rng = init_testing();
        let key = test_key(&mut rng);

        let input = CommonInput::new(key.modulus());
        let proof = PiModProof::prove(
            input,
            ProverSecret::new(&key),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        assert!(proof.verify(input, &(), &mut transcript()).is_ok());
    }

    #[test]
    fn pimod_rejects_proofs_for_other_moduli() {
        let mut rng = init_testing();
        let key = test_key(&mut rng);
        let other = loop {
            let candidate = test_key(&mut rng);
            if candidate.modulus() != key.modulus() {
                break candidate;
            }
        };

        let input = CommonInput::new(key.modulus());
        let proof = PiModProof::prove(
            input,
            ProverSecret::new(&key),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();
        let wrong = CommonInput::new(other.modulus());
        assert!(proof.verify(wrong, &(), &mut transcript()).is_err());
    }

    #[test]
    fn pimod_rejects_tampering() {
        let mut rng = init_testing();
        let key = test_key(&mut rng);

        let input = CommonInput::new(key.modulus());
        let proof = PiModProof::prove(
            input,
            ProverSecret::new(&key),
            &(),
            &mut transcript(),
            &mut rng,
        )
        .unwrap();

        let mut tampered = proof.clone();
        tampered.responses[7].fourth_root = &tampered.responses[7].fourth_root + 1;
        assert!(tampered.verify(input, &(), &mut transcript()).is_err());

        let mut tampered = proof;
        tampered.witness = &tampered.witness + 1;
        assert!(tampered.verify(input, &(), &mut transcript()).is_err());
    }
}
