// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Sampling and transcript helpers shared across the crate.

use crate::errors::{CallerError, InternalError, Result};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, Rng, RngCore};
use tracing::error;

pub(crate) const CRYPTOGRAPHIC_RETRY_MAX: usize = 500usize;

/// Sample a number uniformly at random from the range `[0, n)`. Suitable
/// for sampling from a prime field `F_p` or the integers modulo `n`.
pub(crate) fn random_positive_bn<R: RngCore + CryptoRng>(rng: &mut R, n: &BigNumber) -> BigNumber {
    BigNumber::from_rng(n, rng)
}

/// Sample a number uniformly at random from the range `[-n, n]`.
pub(crate) fn random_plusminus<R: RngCore + CryptoRng>(rng: &mut R, n: &BigNumber) -> BigNumber {
    // `from_rng()` samples the open interval, so add 1 to get the closed
    // interval for `n`.
    let open_interval_max: BigNumber = n + 1;
    let val = BigNumber::from_rng(&open_interval_max, rng);
    let is_positive: bool = rng.gen();
    match is_positive {
        true => val,
        false => -val,
    }
}

/// Sample a number uniformly at random from the range `[-2^n, 2^n]`.
pub(crate) fn random_plusminus_by_size<R: RngCore + CryptoRng>(rng: &mut R, n: usize) -> BigNumber {
    let range = BigNumber::one() << n;
    random_plusminus(rng, &range)
}

/// Sample a number uniformly at random from the range
/// `[-scale * 2^n, scale * 2^n]`.
pub(crate) fn random_plusminus_scaled<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: usize,
    scale: &BigNumber,
) -> BigNumber {
    let range = (BigNumber::one() << n) * scale;
    random_plusminus(rng, &range)
}

/// Generate a random `BigNumber` in the multiplicative group of integers
/// modulo `n`.
///
/// When `n` is a product of two primes, a draw that shares a factor with
/// `n` would reveal the factorization; the chance is negligible and such
/// elements are dropped anyway.
pub(crate) fn random_bn_in_z_star<R: RngCore + CryptoRng>(
    rng: &mut R,
    n: &BigNumber,
) -> Result<BigNumber> {
    std::iter::repeat_with(|| BigNumber::from_rng(n, rng))
        .take(CRYPTOGRAPHIC_RETRY_MAX)
        .find(|result| result != &BigNumber::zero() && result.gcd(n) == BigNumber::one())
        .ok_or(InternalError::CallingApplicationMistake(
            CallerError::RetryFailed,
        ))
}

/// Derive a deterministic pseudorandom value in `[0, n)` from the
/// [`Transcript`].
///
/// To avoid sampling bias we cannot reduce a challenge mod `n`; instead
/// out-of-range draws are discarded and the transcript re-queried (each
/// query advances the transcript state, so draws differ).
pub(crate) fn positive_challenge_from_transcript(
    transcript: &mut Transcript,
    n: &BigNumber,
) -> Result<BigNumber> {
    let len = n.to_bytes().len();
    let mut t = vec![0u8; len];
    for _ in 0..CRYPTOGRAPHIC_RETRY_MAX {
        transcript.challenge_bytes(b"sampling randomness", t.as_mut_slice());
        let b = BigNumber::from_slice(t.as_slice());
        if &b < n {
            return Ok(b);
        }
    }
    Err(CallerError::RetryFailed)?
}

/// Derive a deterministic pseudorandom value in `[-n, n]` from the
/// [`Transcript`].
pub(crate) fn plusminus_challenge_from_transcript(
    transcript: &mut Transcript,
    n: &BigNumber,
) -> Result<BigNumber> {
    let mut is_neg_byte = vec![0u8; 1];
    transcript.challenge_bytes(b"sampling negation bit", is_neg_byte.as_mut_slice());
    let is_neg: bool = is_neg_byte[0] & 1 == 1;

    // The sampling method samples from the open interval, so add 1 to
    // sample from the closed interval we want here.
    let open_interval_max = n + 1;
    let b = positive_challenge_from_transcript(transcript, &open_interval_max)?;
    Ok(match is_neg {
        true => -b,
        false => b,
    })
}

/// Compute `base^exp mod n` for a possibly negative exponent, using the
/// modular inverse of the base for the negative case.
pub(crate) fn modpow_signed(
    base: &BigNumber,
    exp: &BigNumber,
    n: &BigNumber,
) -> Result<BigNumber> {
    if exp >= &BigNumber::zero() {
        Ok(base.modpow(exp, n))
    } else {
        let inverse = modinv(base, n)?;
        Ok(inverse.modpow(&(-exp.clone()), n))
    }
}

/// Compute the modular inverse `a⁻¹ mod n` by the extended Euclidean
/// algorithm. Fails when `gcd(a, n) ≠ 1`.
pub(crate) fn modinv(a: &BigNumber, n: &BigNumber) -> Result<BigNumber> {
    let zero = BigNumber::zero();
    if n <= &zero {
        error!("modular inverse is only defined for positive moduli");
        return Err(InternalError::InternalInvariantFailed);
    }
    let mut r0 = n.clone();
    let mut r1 = a.nmod(n);
    let mut t0 = BigNumber::zero();
    let mut t1 = BigNumber::one();
    while r1 != zero {
        let quotient = &r0 / &r1;
        let r2 = &r0 - &quotient * &r1;
        r0 = std::mem::replace(&mut r1, r2);
        let t2 = &t0 - &quotient * &t1;
        t0 = std::mem::replace(&mut t1, t2);
    }
    if r0 != BigNumber::one() {
        return Err(InternalError::InternalInvariantFailed);
    }
    Ok(t0.nmod(n))
}

/// Compute the Jacobi symbol `(a / n)` for odd positive `n`.
pub(crate) fn jacobi(a: &BigNumber, n: &BigNumber) -> i32 {
    let zero = BigNumber::zero();
    let one = BigNumber::one();
    let two = BigNumber::from_slice([2u8]);
    let three = BigNumber::from_slice([3u8]);
    let four = BigNumber::from_slice([4u8]);
    let five = BigNumber::from_slice([5u8]);
    let eight = BigNumber::from_slice([8u8]);

    if n <= &zero || n.nmod(&two) == zero {
        error!("jacobi symbol is only defined for odd positive moduli");
        return 0;
    }

    let mut a = a.nmod(n);
    let mut n = n.clone();
    let mut t = 1i32;
    while a != zero {
        while a.nmod(&two) == zero {
            a = &a / &two;
            let r = n.nmod(&eight);
            if r == three || r == five {
                t = -t;
            }
        }
        std::mem::swap(&mut a, &mut n);
        if a.nmod(&four) == three && n.nmod(&four) == three {
            t = -t;
        }
        a = a.nmod(&n);
    }
    if n == one {
        t
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn random_bn_in_range_has_full_length() {
        let mut rng = init_testing();
        let mut max_len = 0;
        let num_bytes = 100;

        for _ in 0..1000 {
            let bn = random_plusminus_by_size(&mut rng, num_bytes * 8);
            let len = bn.to_bytes().len();
            if max_len < len {
                max_len = len;
            }
        }

        assert!(max_len > num_bytes - 2);
    }

    #[test]
    fn challenges_are_in_range_and_deterministic() {
        let n = BigNumber::prime(64);

        let mut transcript_a = Transcript::new(b"challenge test");
        let mut transcript_b = Transcript::new(b"challenge test");
        let a = positive_challenge_from_transcript(&mut transcript_a, &n).unwrap();
        let b = positive_challenge_from_transcript(&mut transcript_b, &n).unwrap();

        assert!(a < n);
        assert!(a >= BigNumber::zero());
        // Same transcript state produces the same challenge.
        assert_eq!(a, b);
    }

    #[test]
    fn modinv_inverts_and_rejects_shared_factors() {
        let mut rng = init_testing();
        let p = BigNumber::prime(128);
        for _ in 0..10 {
            let a = BigNumber::from_rng(&p, &mut rng);
            if a == BigNumber::zero() {
                continue;
            }
            let inv = modinv(&a, &p).unwrap();
            assert_eq!((&a * &inv).nmod(&p), BigNumber::one());
        }

        let q = BigNumber::prime(128);
        let n = &p * &q;
        assert!(modinv(&p, &n).is_err());
    }

    #[test]
    fn jacobi_matches_euler_criterion_for_primes() {
        let mut rng = init_testing();
        // For odd prime p, (a/p) = a^((p-1)/2) mod p.
        let p = BigNumber::prime(128);
        let two = BigNumber::from_slice([2u8]);
        let exponent = (&p - 1) / &two;
        for _ in 0..20 {
            let a = BigNumber::from_rng(&p, &mut rng);
            if a == BigNumber::zero() {
                continue;
            }
            let euler = a.modpow(&exponent, &p);
            let expected = if euler == BigNumber::one() { 1 } else { -1 };
            assert_eq!(jacobi(&a, &p), expected);
        }
    }

    #[test]
    fn jacobi_of_shared_factor_is_zero() {
        let p = BigNumber::prime(64);
        let q = BigNumber::prime(64);
        let n = &p * &q;
        assert_eq!(jacobi(&p, &n), 0);
    }
}

////////////////////////////
// Test Utility Functions //
////////////////////////////

/// Returns an rng to be used for testing. This will print the rng seed to
/// stderr so that if a test fails, the failing seed can be recovered and
/// used for debugging.
#[cfg(test)]
pub(crate) mod testing {
    use crate::enable_zeroize;
    use rand::{
        rngs::{OsRng, StdRng},
        Rng, SeedableRng,
    };
    use tracing_subscriber::{
        filter::Targets, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    };

    /// Initialize any fields necessary for our tests. This should be
    /// called at the top of all our tests. This function is idempotent.
    pub(crate) fn init_testing() -> StdRng {
        enable_zeroize();
        let mut seeder = OsRng;
        let seed = seeder.gen();
        eprintln!(
            "To re-run test with the same randomness, use init_testing_with_seed() with the following seed:"
        );
        eprintln!("\t{seed:?}");
        StdRng::from_seed(seed)
    }

    /// A seeded version of [`init_testing`] that also turns on logging.
    /// Only call this while debugging a failing seed; leaving it in a
    /// normal test run spams the output of unrelated tests.
    #[allow(unused)]
    pub(crate) fn init_testing_with_seed(seed: [u8; 32]) -> StdRng {
        enable_zeroize();
        let logging_level = EnvFilter::from_default_env()
            .max_level_hint()
            .unwrap()
            .into_level()
            .unwrap();

        let targets = Targets::new().with_target("tss_mpc", logging_level);
        let stdout_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_filter(targets);

        // It's okay if this fails. It just means logging has already been
        // set up for this thread.
        let _ = tracing_subscriber::registry().with(stdout_layer).try_init();

        StdRng::from_seed(seed)
    }
}
