// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Paillier additively-homomorphic encryption over safe-prime moduli.
//!
//! The multiplicative-to-additive protocol at the heart of threshold ECDSA
//! runs on three properties of this scheme: ciphertexts can be added
//! (multiplying them), scaled by a known constant (exponentiation), and
//! opened only by the key owner. Key material is always a product of two
//! safe primes, which the modulus and factor-size proofs in [`crate::zkp`]
//! rely on.

use crate::{
    errors::{CallerError, InternalError, Result},
    utils::{modinv, positive_challenge_from_transcript, random_bn_in_z_star},
    zkp::{ProofContext, ProofKind},
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;
use zeroize::ZeroizeOnDrop;

/// The bit length of each prime factor of a Paillier modulus.
pub(crate) const PRIME_BITS: usize = 1024;

/// Number of challenge/response pairs in the correct-key proof.
const KEY_PROOF_ITERATIONS: usize = 11;

/// A Paillier ciphertext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(pub(crate) BigNumber);

/// The nonce used to produce a ciphertext. Needed by the range proofs,
/// which demonstrate properties of the encrypted value.
pub(crate) type Nonce = BigNumber;

/// A Paillier encryption key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    n: BigNumber,
}

impl EncryptionKey {
    /// The public modulus `N`.
    pub fn modulus(&self) -> &BigNumber {
        &self.n
    }

    fn modulus_squared(&self) -> BigNumber {
        &self.n * &self.n
    }

    /// Encrypt `x ∊ [0, N)` with a fresh nonce. Returns the ciphertext
    /// and the nonce, which the range proofs need.
    pub(crate) fn encrypt<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        x: &BigNumber,
    ) -> Result<(Ciphertext, Nonce)> {
        let nonce = random_bn_in_z_star(rng, &self.n)?;
        let ciphertext = self.encrypt_with_nonce(x, &nonce)?;
        Ok((ciphertext, nonce))
    }

    /// Encrypt `x ∊ [0, N)` with a caller-chosen nonce from `Z_N^*`.
    pub(crate) fn encrypt_with_nonce(
        &self,
        x: &BigNumber,
        nonce: &Nonce,
    ) -> Result<Ciphertext> {
        if x < &BigNumber::zero() || x >= &self.n {
            error!("tried to encrypt a plaintext outside [0, N)");
            return Err(InternalError::InternalInvariantFailed);
        }
        let nn = self.modulus_squared();
        // With generator g = N + 1, g^x mod N^2 is 1 + N*x.
        let g_to_x = (BigNumber::one() + &self.n * x).nmod(&nn);
        let blind = nonce.modpow(&self.n, &nn);
        Ok(Ciphertext((g_to_x * blind).nmod(&nn)))
    }

    /// Homomorphically add the plaintexts of two ciphertexts.
    pub(crate) fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Result<Ciphertext> {
        let nn = self.modulus_squared();
        self.check_ciphertext(c1, &nn)?;
        self.check_ciphertext(c2, &nn)?;
        Ok(Ciphertext((&c1.0 * &c2.0).nmod(&nn)))
    }

    /// Homomorphically multiply the plaintext of a ciphertext by a
    /// non-negative constant.
    pub(crate) fn multiply_by_scalar(
        &self,
        c: &Ciphertext,
        scalar: &BigNumber,
    ) -> Result<Ciphertext> {
        if scalar < &BigNumber::zero() {
            error!("homomorphic scaling expects a non-negative constant");
            return Err(InternalError::InternalInvariantFailed);
        }
        let nn = self.modulus_squared();
        self.check_ciphertext(c, &nn)?;
        Ok(Ciphertext(c.0.modpow(scalar, &nn)))
    }

    fn check_ciphertext(&self, c: &Ciphertext, nn: &BigNumber) -> Result<()> {
        if c.0 <= BigNumber::zero() || &c.0 >= nn {
            error!("ciphertext is outside the valid range");
            Err(CallerError::DeserializationFailed)?;
        }
        Ok(())
    }
}

/// A Paillier decryption key: the safe primes behind the modulus and the
/// precomputed Euler totient.
#[derive(Clone, Serialize, Deserialize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct DecryptionKey {
    p: BigNumber,
    q: BigNumber,
    #[zeroize(skip)]
    n: BigNumber,
    totient: BigNumber,
}

impl Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("p", &"[redacted]")
            .field("q", &"[redacted]")
            .field("n", &self.n)
            .field("totient", &"[redacted]")
            .finish()
    }
}

impl DecryptionKey {
    /// Assemble a key from two distinct odd primes.
    ///
    /// Safe-primality is the caller's contract (checked where the key
    /// enters the system, in
    /// [`LocalPreParams`](crate::preparams::LocalPreParams)); this
    /// constructor enforces the structural requirements decryption
    /// depends on.
    pub(crate) fn from_primes(p: BigNumber, q: BigNumber) -> Result<Self> {
        let two = BigNumber::from_slice([2u8]);
        if p == q
            || p <= BigNumber::one()
            || q <= BigNumber::one()
            || p.nmod(&two) == BigNumber::zero()
            || q.nmod(&two) == BigNumber::zero()
        {
            error!("Paillier primes must be distinct odd primes");
            Err(CallerError::BadInput)?;
        }
        let n = &p * &q;
        let totient = (&p - 1) * (&q - 1);
        if n.gcd(&totient) != BigNumber::one() {
            error!("Paillier modulus shares a factor with its totient");
            Err(CallerError::BadInput)?;
        }
        Ok(Self { p, q, n, totient })
    }

    /// Generate a fresh key from two random safe primes. This is slow;
    /// see [`generate_pre_params`](crate::generate_pre_params) for the
    /// deadline-bounded wrapper used in production.
    #[allow(unused)]
    pub(crate) fn new() -> Result<Self> {
        let p = BigNumber::safe_prime(PRIME_BITS);
        let mut q = BigNumber::safe_prime(PRIME_BITS);
        while p == q {
            q = BigNumber::safe_prime(PRIME_BITS);
        }
        Self::from_primes(p, q)
    }

    /// The corresponding encryption key.
    pub fn encryption_key(&self) -> EncryptionKey {
        EncryptionKey { n: self.n.clone() }
    }

    /// The public modulus `N`.
    pub fn modulus(&self) -> &BigNumber {
        &self.n
    }

    pub(crate) fn primes(&self) -> (&BigNumber, &BigNumber) {
        (&self.p, &self.q)
    }

    pub(crate) fn totient(&self) -> &BigNumber {
        &self.totient
    }

    /// Decrypt a ciphertext, returning the plaintext in `[0, N)`.
    pub(crate) fn decrypt(&self, c: &Ciphertext) -> Result<BigNumber> {
        let nn = &self.n * &self.n;
        if c.0 <= BigNumber::zero() || c.0 >= nn {
            error!("ciphertext is outside the valid range");
            Err(CallerError::DeserializationFailed)?;
        }
        // With g = N + 1: L(c^phi mod N^2) * phi^{-1} mod N, where
        // L(u) = (u - 1) / N.
        let u = c.0.modpow(&self.totient, &nn);
        let ell = (u - BigNumber::one()) / &self.n;
        let totient_inv = modinv(&self.totient, &self.n)?;
        Ok((ell * totient_inv).nmod(&self.n))
    }
}

/// A proof that a Paillier modulus was generated correctly, i.e. that
/// `gcd(N, φ(N)) = 1`.
///
/// Classic Fiat-Shamir argument: the verifier derives challenges in
/// `Z_N`, and the prover — who alone can compute `N⁻¹ mod φ(N)` —
/// responds with their `N`-th roots.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct KeyProof {
    responses: Vec<BigNumber>,
}

impl KeyProof {
    fn append_statement(
        transcript: &mut Transcript,
        context: &impl ProofContext,
        modulus: &BigNumber,
    ) -> Result<()> {
        transcript.append_message(b"PaillierKeyProof", b"");
        transcript.append_message(b"context", &context.as_bytes()?);
        transcript.append_message(b"N", &modulus.to_bytes());
        Ok(())
    }

    pub(crate) fn prove(
        dk: &DecryptionKey,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<Self> {
        Self::append_statement(transcript, context, dk.modulus())?;
        let root_exponent = modinv(dk.modulus(), dk.totient())?;
        let responses = (0..KEY_PROOF_ITERATIONS)
            .map(|_| {
                let challenge = positive_challenge_from_transcript(transcript, dk.modulus())?;
                Ok(challenge.modpow(&root_exponent, dk.modulus()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { responses })
    }

    pub(crate) fn verify(
        &self,
        pk: &EncryptionKey,
        context: &impl ProofContext,
        transcript: &mut Transcript,
    ) -> Result<()> {
        if self.responses.len() != KEY_PROOF_ITERATIONS {
            return Err(InternalError::FailedProof(ProofKind::PaillierKey, None));
        }
        Self::append_statement(transcript, context, pk.modulus())?;
        for response in &self.responses {
            let challenge = positive_challenge_from_transcript(transcript, pk.modulus())?;
            if response <= &BigNumber::zero() || response >= pk.modulus() {
                return Err(InternalError::FailedProof(ProofKind::PaillierKey, None));
            }
            if response.modpow(pk.modulus(), pk.modulus()) != challenge {
                return Err(InternalError::FailedProof(ProofKind::PaillierKey, None));
            }
        }
        Ok(())
    }
}

/// Prime generation, including an insecure pooled variant for tests.
pub(crate) mod prime_gen {
    use super::*;
    use rand::Rng;
    use std::sync::OnceLock;

    /// Find one safe prime of [`PRIME_BITS`] bits.
    pub(crate) fn safe_prime() -> BigNumber {
        BigNumber::safe_prime(PRIME_BITS)
    }

    /// Bit length of pooled test primes. Kept small so the suite runs in
    /// reasonable time; the resulting 1024-bit moduli still comfortably
    /// hold every plaintext the protocols produce.
    const POOL_PRIME_BITS: usize = 512;
    const POOL_SIZE: usize = 8;

    static POOL: OnceLock<Vec<BigNumber>> = OnceLock::new();

    /// Draw a pair of distinct safe primes from a lazily generated,
    /// process-wide pool.
    ///
    /// ⚠️ Pooled primes are shared, undersized, and reused across
    /// callers. Never use outside tests.
    pub(crate) fn get_prime_pair_from_pool_insecure<R: RngCore + CryptoRng>(
        rng: &mut R,
    ) -> Result<(BigNumber, BigNumber)> {
        let pool = POOL.get_or_init(|| {
            (0..POOL_SIZE)
                .map(|_| BigNumber::safe_prime(POOL_PRIME_BITS))
                .collect()
        });
        let i = rng.gen_range(0..pool.len());
        let mut j = rng.gen_range(0..pool.len());
        while j == i {
            j = rng.gen_range(0..pool.len());
        }
        Ok((pool[i].clone(), pool[j].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{protocol::SharedContext, utils::testing::init_testing};

    fn test_key(rng: &mut (impl RngCore + CryptoRng)) -> DecryptionKey {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        DecryptionKey::from_primes(p, q).unwrap()
    }

    #[test]
    fn encryption_decryption_roundtrip() {
        let mut rng = init_testing();
        let dk = test_key(&mut rng);
        let pk = dk.encryption_key();

        let x = BigNumber::from_rng(pk.modulus(), &mut rng);
        let (c, _nonce) = pk.encrypt(&mut rng, &x).unwrap();
        assert_eq!(dk.decrypt(&c).unwrap(), x);
    }

    #[test]
    fn homomorphic_operations_work() {
        let mut rng = init_testing();
        let dk = test_key(&mut rng);
        let pk = dk.encryption_key();

        let bound = BigNumber::one() << 256;
        let a = BigNumber::from_rng(&bound, &mut rng);
        let b = BigNumber::from_rng(&bound, &mut rng);
        let k = BigNumber::from_rng(&bound, &mut rng);

        let (ca, _) = pk.encrypt(&mut rng, &a).unwrap();
        let (cb, _) = pk.encrypt(&mut rng, &b).unwrap();

        let sum = pk.add(&ca, &cb).unwrap();
        assert_eq!(dk.decrypt(&sum).unwrap(), &a + &b);

        let scaled = pk.multiply_by_scalar(&ca, &k).unwrap();
        assert_eq!(dk.decrypt(&scaled).unwrap(), (&a * &k).nmod(pk.modulus()));
    }

    #[test]
    fn plaintexts_out_of_range_are_rejected() {
        let mut rng = init_testing();
        let dk = test_key(&mut rng);
        let pk = dk.encryption_key();

        assert!(pk.encrypt(&mut rng, &(-BigNumber::one())).is_err());
        assert!(pk.encrypt(&mut rng, pk.modulus()).is_err());
    }

    #[test]
    fn mismatched_primes_are_rejected() {
        let p = BigNumber::safe_prime(128);
        assert!(DecryptionKey::from_primes(p.clone(), p).is_err());
    }

    #[test]
    fn key_proof_verifies() {
        let mut rng = init_testing();
        let dk = test_key(&mut rng);
        let context = SharedContext::<crate::curve::TestCurve>::random(&mut rng);

        let mut prover_transcript = Transcript::new(b"key proof test");
        let proof = KeyProof::prove(&dk, &context, &mut prover_transcript).unwrap();

        let mut verifier_transcript = Transcript::new(b"key proof test");
        assert!(proof
            .verify(&dk.encryption_key(), &context, &mut verifier_transcript)
            .is_ok());
    }

    #[test]
    fn key_proof_fails_for_wrong_modulus() {
        let mut rng = init_testing();
        let dk = test_key(&mut rng);
        let other = loop {
            let candidate = test_key(&mut rng);
            if candidate.modulus() != dk.modulus() {
                break candidate;
            }
        };
        let context = SharedContext::<crate::curve::TestCurve>::random(&mut rng);

        let mut prover_transcript = Transcript::new(b"key proof test");
        let proof = KeyProof::prove(&dk, &context, &mut prover_transcript).unwrap();

        let mut verifier_transcript = Transcript::new(b"key proof test");
        assert_eq!(
            proof.verify(
                &other.encryption_key(),
                &context,
                &mut verifier_transcript
            ),
            Err(InternalError::FailedProof(ProofKind::PaillierKey, None))
        );
    }

    #[test]
    fn tampered_key_proof_fails() {
        let mut rng = init_testing();
        let dk = test_key(&mut rng);
        let context = SharedContext::<crate::curve::TestCurve>::random(&mut rng);

        let mut prover_transcript = Transcript::new(b"key proof test");
        let mut proof = KeyProof::prove(&dk, &context, &mut prover_transcript).unwrap();
        proof.responses[0] = &proof.responses[0] + 1;

        let mut verifier_transcript = Transcript::new(b"key proof test");
        assert!(proof
            .verify(&dk.encryption_key(), &context, &mut verifier_transcript)
            .is_err());
    }
}
