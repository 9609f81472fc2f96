// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{curve::CurveTrait, errors::Result, protocol::ParticipantIdentifier};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use zeroize::Zeroize;

/// A participant's private share of the signing key: the aggregated
/// polynomial evaluation at this party's share point.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct KeySharePrivate<C: CurveTrait> {
    x: C::Scalar,
}

impl<C: CurveTrait> Debug for KeySharePrivate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeySharePrivate([redacted])")
    }
}

impl<C: CurveTrait> Drop for KeySharePrivate<C> {
    fn drop(&mut self) {
        self.x.zeroize();
    }
}

impl<C: CurveTrait> KeySharePrivate<C> {
    pub(crate) fn new(x: C::Scalar) -> Self {
        Self { x }
    }

    /// The share as a scalar.
    pub fn as_scalar(&self) -> &C::Scalar {
        &self.x
    }

    /// The corresponding public point `x · G`.
    pub(crate) fn public_point(&self) -> C {
        C::generator().multiply_by_scalar(&self.x)
    }
}

/// A participant's public key share `X = x · G`, tagged with its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub struct KeySharePublic<C: CurveTrait> {
    participant: ParticipantIdentifier,
    X: C,
}

impl<C: CurveTrait> KeySharePublic<C> {
    pub(crate) fn new(participant: ParticipantIdentifier, share: C) -> Self {
        Self {
            participant,
            X: share,
        }
    }

    /// The participant who holds the corresponding private share.
    pub fn participant(&self) -> ParticipantIdentifier {
        self.participant
    }

    /// Reject the identity as a public share; it would make the holder's
    /// contribution predictable.
    pub(crate) fn check_non_identity(&self) -> Result<()> {
        use crate::errors::CallerError;
        if self.X == C::identity() {
            Err(CallerError::BadInput)?;
        }
        Ok(())
    }
}

impl<C: CurveTrait> AsRef<C> for KeySharePublic<C> {
    fn as_ref(&self) -> &C {
        &self.X
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{ScalarTrait, TestCurve},
        utils::testing::init_testing,
    };

    #[test]
    fn private_share_exposes_matching_public_point() {
        let mut rng = init_testing();
        let x = <TestCurve as CurveTrait>::Scalar::random(&mut rng);
        let private = KeySharePrivate::<TestCurve>::new(x);
        assert_eq!(
            private.public_point(),
            TestCurve::generator().multiply_by_scalar(&x)
        );
    }

    #[test]
    fn identity_shares_are_rejected() {
        let mut rng = init_testing();
        let pid = ParticipantIdentifier::random(&mut rng);
        let identity = KeySharePublic::<TestCurve>::new(pid, TestCurve::identity());
        assert!(identity.check_non_identity().is_err());

        let fine = KeySharePublic::<TestCurve>::new(pid, TestCurve::generator());
        assert!(fine.check_non_identity().is_ok());
    }
}
