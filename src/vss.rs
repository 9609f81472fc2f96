// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Feldman verifiable secret sharing over a curve group.
//!
//! A dealer samples a degree-`t` polynomial `f` with its secret at
//! `f(0)`, hands party `j` the evaluation `f(x_j)` at that party's share
//! point, and publishes the coefficients in the exponent,
//! `C_k = a_k · G`. Receivers check their share against the commitment
//! vector; any `t + 1` holders can reconstruct `f(0)` by Lagrange
//! interpolation at zero.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{CallerError, InternalError, Result},
    protocol::ParticipantIdentifier,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;
use zeroize::Zeroize;

/// A secret polynomial over the scalar field. Degree `t`, so `t + 1`
/// coefficients, with the shared secret as the constant term.
#[derive(Clone)]
pub(crate) struct Polynomial<C: CurveTrait> {
    coefficients: Vec<C::Scalar>,
}

impl<C: CurveTrait> Debug for Polynomial<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Polynomial([redacted])")
    }
}

impl<C: CurveTrait> Drop for Polynomial<C> {
    fn drop(&mut self) {
        for coefficient in self.coefficients.iter_mut() {
            coefficient.zeroize();
        }
    }
}

impl<C: CurveTrait> Polynomial<C> {
    /// Sample a degree-`degree` polynomial with the given constant term.
    pub(crate) fn random<R: RngCore + CryptoRng>(
        constant: C::Scalar,
        degree: usize,
        rng: &mut R,
    ) -> Self {
        let coefficients = std::iter::once(constant)
            .chain((0..degree).map(|_| C::Scalar::random(rng)))
            .collect();
        Self { coefficients }
    }

    /// Evaluate at `x` by Horner's rule.
    pub(crate) fn evaluate(&self, x: &C::Scalar) -> C::Scalar {
        let mut sum = C::Scalar::zero();
        for coefficient in self.coefficients.iter().rev() {
            sum = sum.mul(x);
            sum = ScalarTrait::add(&sum, coefficient);
        }
        sum
    }

    /// Evaluate at a party's share point.
    pub(crate) fn evaluate_at(&self, pid: ParticipantIdentifier) -> C::Scalar {
        self.evaluate(&pid.share_point::<C>())
    }

    /// The secret constant term.
    pub(crate) fn constant_term(&self) -> &C::Scalar {
        &self.coefficients[0]
    }

    /// The Feldman commitment vector `[a_k · G]`.
    pub(crate) fn commitment(&self) -> CommitmentVector<C> {
        CommitmentVector {
            points: self
                .coefficients
                .iter()
                .map(|coefficient| C::generator().multiply_by_scalar(coefficient))
                .collect(),
        }
    }
}

/// A Feldman commitment vector: the polynomial's coefficients in the
/// exponent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct CommitmentVector<C: CurveTrait> {
    points: Vec<C>,
}

impl<C: CurveTrait> CommitmentVector<C> {
    /// The polynomial degree this vector commits to.
    pub(crate) fn degree(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// The committed constant term, `f(0) · G`.
    pub(crate) fn constant(&self) -> &C {
        &self.points[0]
    }

    /// Evaluate the committed polynomial in the exponent:
    /// `Σ_k x^k · C_k`.
    pub(crate) fn evaluate_in_exponent(&self, x: &C::Scalar) -> C {
        let mut sum = C::identity();
        for point in self.points.iter().rev() {
            sum = sum.multiply_by_scalar(x);
            sum = sum + *point;
        }
        sum
    }

    /// Evaluate at a party's share point.
    pub(crate) fn evaluate_at(&self, pid: ParticipantIdentifier) -> C {
        self.evaluate_in_exponent(&pid.share_point::<C>())
    }

    /// Whether `share · G` matches the committed evaluation at the
    /// party's share point.
    pub(crate) fn is_valid_share(&self, pid: ParticipantIdentifier, share: &C::Scalar) -> bool {
        C::generator().multiply_by_scalar(share) == self.evaluate_at(pid)
    }

    /// Structural check on a received vector: the expected degree and no
    /// identity constant term (an identity would make the dealer's
    /// contribution trivially predictable).
    pub(crate) fn check_degree(&self, expected_degree: usize) -> Result<()> {
        if self.degree() != expected_degree {
            error!(
                "commitment vector has degree {} but the protocol threshold requires {}",
                self.degree(),
                expected_degree
            );
            Err(CallerError::BadInput)?;
        }
        if *self.constant() == C::identity() {
            error!("commitment vector commits to the identity");
            Err(CallerError::BadInput)?;
        }
        Ok(())
    }

    /// Component-wise sum of several dealers' vectors; commits to the sum
    /// of their polynomials.
    pub(crate) fn aggregate(vectors: &[Self]) -> Result<Self> {
        let first = vectors.first().ok_or(InternalError::InternalInvariantFailed)?;
        let length = first.points.len();
        if vectors.iter().any(|vector| vector.points.len() != length) {
            error!("cannot aggregate commitment vectors of different degrees");
            return Err(InternalError::InternalInvariantFailed);
        }
        let points = (0..length)
            .map(|k| {
                vectors
                    .iter()
                    .fold(C::identity(), |sum, vector| sum + vector.points[k])
            })
            .collect();
        Ok(Self { points })
    }
}

/// The Lagrange coefficient for `pid` when interpolating at zero over the
/// share points of `all`.
pub(crate) fn lagrange_at_zero<C: CurveTrait>(
    pid: ParticipantIdentifier,
    all: &[ParticipantIdentifier],
) -> Result<C::Scalar> {
    let my_point = pid.share_point::<C>();
    let mut result = C::Scalar::one();
    for &other in all {
        if other == pid {
            continue;
        }
        let other_point = other.share_point::<C>();
        let numerator = other_point.negate();
        let denominator = my_point.sub(&other_point);
        let inverse = denominator.invert().ok_or_else(|| {
            error!("duplicate share points while computing a Lagrange coefficient");
            InternalError::from(CallerError::ParticipantConfigError)
        })?;
        result = result.mul(&numerator.mul(&inverse));
    }
    Ok(result)
}

/// Reconstruct the secret `f(0)` from a quorum of shares.
pub(crate) fn reconstruct<C: CurveTrait>(
    shares: &[(ParticipantIdentifier, C::Scalar)],
) -> Result<C::Scalar> {
    let pids: Vec<_> = shares.iter().map(|(pid, _)| *pid).collect();
    let mut secret = C::Scalar::zero();
    for (pid, share) in shares {
        let coefficient = lagrange_at_zero::<C>(*pid, &pids)?;
        secret = ScalarTrait::add(&secret, &coefficient.mul(share));
    }
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    fn random_pids(n: usize, rng: &mut (impl RngCore + CryptoRng)) -> Vec<ParticipantIdentifier> {
        (0..n).map(|_| ParticipantIdentifier::random(rng)).collect()
    }

    #[test]
    fn shares_match_commitments() {
        let mut rng = init_testing();
        let secret = Scalar::random(&mut rng);
        let polynomial = Polynomial::<TestCurve>::random(secret, 3, &mut rng);
        let commitment = polynomial.commitment();
        assert_eq!(commitment.degree(), 3);

        for pid in random_pids(5, &mut rng) {
            let share = polynomial.evaluate_at(pid);
            assert!(commitment.is_valid_share(pid, &share));
            // A perturbed share must not validate.
            let bad = ScalarTrait::add(&share, &Scalar::one());
            assert!(!commitment.is_valid_share(pid, &bad));
        }
    }

    #[test]
    fn any_quorum_reconstructs_the_secret() {
        let mut rng = init_testing();
        let secret = Scalar::random(&mut rng);
        let threshold = 2;
        let polynomial = Polynomial::<TestCurve>::random(secret, threshold, &mut rng);
        let pids = random_pids(5, &mut rng);

        let shares: Vec<_> = pids
            .iter()
            .map(|&pid| (pid, polynomial.evaluate_at(pid)))
            .collect();

        // Every window of t + 1 shares recovers the secret.
        for window in shares.windows(threshold + 1) {
            assert_eq!(reconstruct::<TestCurve>(window).unwrap(), secret);
        }
        // t shares do not (they interpolate a different polynomial).
        assert_ne!(
            reconstruct::<TestCurve>(&shares[..threshold]).unwrap(),
            secret
        );
    }

    #[test]
    fn aggregated_vectors_commit_to_summed_polynomials() {
        let mut rng = init_testing();
        let degree = 2;
        let polynomials: Vec<_> = (0..3)
            .map(|_| Polynomial::<TestCurve>::random(Scalar::random(&mut rng), degree, &mut rng))
            .collect();
        let vectors: Vec<_> = polynomials.iter().map(Polynomial::commitment).collect();
        let aggregated = CommitmentVector::aggregate(&vectors).unwrap();

        let pid = ParticipantIdentifier::random(&mut rng);
        let summed_share = polynomials
            .iter()
            .fold(Scalar::zero(), |sum, polynomial| {
                ScalarTrait::add(&sum, &polynomial.evaluate_at(pid))
            });
        assert!(aggregated.is_valid_share(pid, &summed_share));
    }

    #[test]
    fn lagrange_coefficients_sum_interpolates() {
        let mut rng = init_testing();
        // For a degree-0 polynomial (a constant), every share equals the
        // secret, so the coefficients must sum to one.
        let pids = random_pids(4, &mut rng);
        let sum = pids.iter().fold(Scalar::zero(), |sum, &pid| {
            ScalarTrait::add(&sum, &lagrange_at_zero::<TestCurve>(pid, &pids).unwrap())
        });
        assert_eq!(sum, Scalar::one());
    }

    #[test]
    fn degree_checks_reject_malformed_vectors() {
        let mut rng = init_testing();
        let polynomial = Polynomial::<TestCurve>::random(Scalar::random(&mut rng), 2, &mut rng);
        let commitment = polynomial.commitment();
        assert!(commitment.check_degree(2).is_ok());
        assert!(commitment.check_degree(3).is_err());

        let zero_poly = Polynomial::<TestCurve>::random(Scalar::zero(), 2, &mut rng);
        assert!(zero_poly.commitment().check_degree(2).is_err());
    }
}
