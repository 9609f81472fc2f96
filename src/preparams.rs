// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Per-party pre-parameters for the ECDSA protocols.
//!
//! Every ECDSA participant needs a Paillier key pair over safe primes and
//! a ring-Pedersen setup — four safe primes in total, which dominate setup
//! time by far. [`generate_pre_params`] finds them on a worker pool under
//! a caller-supplied deadline; the result is independent of any committee
//! or session and is meant to be generated once, persisted next to the
//! save data, and reused across key generations.

use crate::{
    errors::{CallerError, InternalError, Result},
    paillier::{prime_gen, DecryptionKey, EncryptionKey},
    ring_pedersen::{RingPedersen, RingPedersenSetup},
};
use libpaillier::unknown_order::BigNumber;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};
use tracing::{error, info, instrument};

/// A party's long-lived secret pre-parameters: the Paillier decryption
/// key and the ring-Pedersen setup with its trapdoors.
///
/// # 🔒 Storage requirements
/// This bundle contains the Paillier primes and the ring-Pedersen
/// trapdoors; it must be persisted with the same care as the key share
/// itself and is zeroized when dropped.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalPreParams {
    paillier: DecryptionKey,
    ring_pedersen: RingPedersenSetup,
}

impl Debug for LocalPreParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LocalPreParams([redacted])")
    }
}

impl LocalPreParams {
    /// Assemble pre-parameters from four safe primes: `(p, q)` for the
    /// Paillier modulus and `(p̃, q̃)` for the ring-Pedersen modulus.
    ///
    /// All four values are checked to actually be safe primes; the
    /// Paillier pair additionally carries the primes since v2 of the save
    /// format, so there is no constructor without them.
    pub fn from_safe_primes(
        p: BigNumber,
        q: BigNumber,
        ptilde: BigNumber,
        qtilde: BigNumber,
    ) -> Result<Self> {
        for prime in [&p, &q, &ptilde, &qtilde] {
            if !is_safe_prime(prime) {
                error!("pre-parameter factor is not a safe prime");
                Err(CallerError::BadInput)?;
            }
        }
        let paillier = DecryptionKey::from_primes(p, q)?;
        let ring_pedersen = RingPedersenSetup::generate(ptilde, qtilde, &mut OsRng)?;
        Ok(Self {
            paillier,
            ring_pedersen,
        })
    }

    /// The Paillier encryption key.
    pub fn encryption_key(&self) -> EncryptionKey {
        self.paillier.encryption_key()
    }

    pub(crate) fn decryption_key(&self) -> &DecryptionKey {
        &self.paillier
    }

    pub(crate) fn ring_pedersen(&self) -> &RingPedersenSetup {
        &self.ring_pedersen
    }

    /// The public half of this bundle, as shared with the committee.
    pub fn to_public(&self) -> PublicPreParams {
        PublicPreParams {
            paillier: self.paillier.encryption_key(),
            ring_pedersen: self.ring_pedersen.scheme().clone(),
        }
    }

    /// Build pre-parameters from undersized pooled primes, skipping the
    /// safe-prime validation. Test-only.
    #[cfg(test)]
    pub(crate) fn simulate<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> Result<Self> {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng)?;
        let (ptilde, qtilde) = prime_gen::get_prime_pair_from_pool_insecure(rng)?;
        let paillier = DecryptionKey::from_primes(p, q)?;
        let ring_pedersen = RingPedersenSetup::generate(ptilde, qtilde, rng)?;
        Ok(Self {
            paillier,
            ring_pedersen,
        })
    }
}

/// The public half of a party's pre-parameters, as recorded in every
/// committee member's save data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicPreParams {
    /// The party's Paillier encryption key.
    pub paillier: EncryptionKey,
    /// The party's ring-Pedersen commitment parameters.
    pub ring_pedersen: RingPedersen,
}

fn is_safe_prime(candidate: &BigNumber) -> bool {
    let two = BigNumber::from_slice([2u8]);
    if candidate <= &two || !candidate.is_prime() {
        return false;
    }
    let half = (candidate - 1) / &two;
    half.is_prime()
}

/// Generate fresh [`LocalPreParams`] within a deadline.
///
/// Spreads the safe-prime search over `workers` OS threads and fails with
/// [`InternalError::PreParamsGenerationTimedOut`] if four safe primes are
/// not found before the deadline. Workers observe cancellation between
/// candidates, so threads wind down shortly after the search ends either
/// way.
#[instrument]
pub fn generate_pre_params(deadline: Duration, workers: usize) -> Result<LocalPreParams> {
    if workers == 0 {
        Err(CallerError::BadInput)?;
    }
    if deadline.is_zero() {
        // Don't bother starting a search that cannot finish in time.
        error!("safe-prime search was given a zero deadline");
        return Err(InternalError::PreParamsGenerationTimedOut);
    }
    let started = Instant::now();
    let (sender, receiver) = mpsc::channel::<BigNumber>();
    let stop = Arc::new(AtomicBool::new(false));

    for _ in 0..workers {
        let sender = sender.clone();
        let stop = Arc::clone(&stop);
        let _ = std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let prime = prime_gen::safe_prime();
                if sender.send(prime).is_err() {
                    break;
                }
            }
        });
    }
    drop(sender);

    let mut primes: Vec<BigNumber> = Vec::with_capacity(4);
    while primes.len() < 4 {
        let remaining = match deadline.checked_sub(started.elapsed()) {
            Some(remaining) => remaining,
            None => {
                stop.store(true, Ordering::Relaxed);
                error!("safe-prime search hit the deadline");
                return Err(InternalError::PreParamsGenerationTimedOut);
            }
        };
        match receiver.recv_timeout(remaining) {
            Ok(prime) => {
                // A duplicate would break the CRT structure of its
                // modulus. Vanishingly unlikely, but free to check.
                if !primes.contains(&prime) {
                    primes.push(prime);
                }
            }
            Err(_) => {
                stop.store(true, Ordering::Relaxed);
                error!("safe-prime search hit the deadline");
                return Err(InternalError::PreParamsGenerationTimedOut);
            }
        }
    }
    stop.store(true, Ordering::Relaxed);
    info!(
        "found 4 safe primes in {}ms",
        started.elapsed().as_millis()
    );

    let qtilde = primes.pop().ok_or(InternalError::InternalInvariantFailed)?;
    let ptilde = primes.pop().ok_or(InternalError::InternalInvariantFailed)?;
    let q = primes.pop().ok_or(InternalError::InternalInvariantFailed)?;
    let p = primes.pop().ok_or(InternalError::InternalInvariantFailed)?;
    LocalPreParams::from_safe_primes(p, q, ptilde, qtilde)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn simulated_preparams_are_consistent() {
        let mut rng = init_testing();
        let preparams = LocalPreParams::simulate(&mut rng).unwrap();
        let public = preparams.to_public();

        assert_eq!(
            public.paillier.modulus(),
            preparams.decryption_key().modulus()
        );
        assert!(public.ring_pedersen.check_well_formed().is_ok());

        // h2 really is h1^alpha.
        let setup = preparams.ring_pedersen();
        let scheme = setup.scheme();
        assert_eq!(
            &scheme.h1().modpow(setup.alpha(), scheme.modulus()),
            scheme.h2()
        );
        assert_eq!(
            &scheme.h2().modpow(setup.beta(), scheme.modulus()),
            scheme.h1()
        );
    }

    #[test]
    fn zero_deadline_times_out() {
        assert_eq!(
            generate_pre_params(Duration::from_millis(0), 2),
            Err(InternalError::PreParamsGenerationTimedOut)
        );
    }

    #[test]
    fn zero_workers_is_a_caller_error() {
        assert!(matches!(
            generate_pre_params(Duration::from_secs(1), 0),
            Err(InternalError::CallingApplicationMistake(_))
        ));
    }

    #[test]
    fn non_safe_primes_are_rejected() {
        let mut rng = init_testing();
        // A random (non-safe) prime must be refused.
        let p = BigNumber::prime(512);
        let (a, b) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        let (c, _) = prime_gen::get_prime_pair_from_pool_insecure(&mut rng).unwrap();
        if is_safe_prime(&p) {
            // Astronomically unlikely, but don't fail the test on it.
            return;
        }
        assert!(LocalPreParams::from_safe_primes(p, a, b, c).is_err());
    }
}
