// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Curve implementation for secp256k1, backed by the `k256` crate.

use crate::{
    curve::{CurveTrait, EcdsaCurve, ScalarTrait, SignatureTrait, VerifyingKeyTrait},
    errors::{CallerError, InternalError, Result},
};
use generic_array::GenericArray;
use k256::{
    ecdsa::VerifyingKey,
    elliptic_curve::{
        bigint::Encoding, group::GroupEncoding, point::AffineCoordinates, scalar::IsHigh,
        AffinePoint, Curve, Field, Group, PrimeField,
    },
    ProjectivePoint, Scalar as K256Scalar,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::error;
use zeroize::{Zeroize, Zeroizing};

/// Wrapper around [`k256::ProjectivePoint`] so that we can define our own
/// serialization/deserialization for it.
///
/// Note that this type derives [`Debug`]; if a [`K256`] is used in a
/// private type, `Debug` should be manually implemented with the field of
/// this type explicitly redacted!
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize)]
pub struct K256(pub(crate) ProjectivePoint);

impl AsRef<K256> for K256 {
    fn as_ref(&self) -> &K256 {
        self
    }
}

impl std::ops::Add for K256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Serialize for K256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let afp = AffinePoint::<k256::Secp256k1>::from(self.0);
        afp.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for K256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = AffinePoint::<k256::Secp256k1>::deserialize(deserializer)?;
        Ok(Self(p.into()))
    }
}

/// The order of the secp256k1 group.
pub(crate) fn k256_order() -> BigNumber {
    let order_bytes: [u8; 32] = k256::Secp256k1::ORDER.to_be_bytes();
    BigNumber::from_slice(order_bytes)
}

impl CurveTrait for K256 {
    type Scalar = K256Scalar;

    fn generator() -> Self {
        Self(ProjectivePoint::GENERATOR)
    }

    fn identity() -> Self {
        Self(ProjectivePoint::IDENTITY)
    }

    fn order() -> BigNumber {
        k256_order()
    }

    fn multiply_by_scalar(&self, scalar: &Self::Scalar) -> Self {
        Self(self.0 * scalar)
    }

    fn bn_to_scalar(x: &BigNumber) -> Result<Self::Scalar> {
        // Take (mod q).
        let x_modded = x % Self::order();

        let bytes = Zeroizing::new(x_modded.to_bytes());
        let mut slice = Zeroizing::new(vec![0u8; 32 - bytes.len()]);
        slice.extend_from_slice(&bytes);

        let mut ret: Self::Scalar = Option::from(<K256Scalar as PrimeField>::from_repr(
            GenericArray::clone_from_slice(&slice),
        ))
        .ok_or_else(|| {
            error!("failed to convert BigNumber into k256::Scalar");
            InternalError::InternalInvariantFailed
        })?;

        // Make sure to negate the scalar if the original input was
        // negative.
        if x < &BigNumber::zero() {
            ret = ret.negate();
        }

        Ok(ret)
    }

    fn scalar_to_bn(x: &Self::Scalar) -> BigNumber {
        let bytes = x.to_repr();
        BigNumber::from_slice(bytes)
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut encoded = self.0.to_affine().to_bytes();
        let bytes = encoded.to_vec();
        encoded.zeroize();
        bytes
    }

    fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut fixed_len_bytes: [u8; 33] = bytes.try_into().map_err(|_| {
            error!("failed to decode bytes as a compressed secp256k1 point");
            CallerError::DeserializationFailed
        })?;

        let point: Option<AffinePoint<k256::Secp256k1>> =
            AffinePoint::<k256::Secp256k1>::from_bytes(&fixed_len_bytes.into()).into();
        fixed_len_bytes.zeroize();

        match point {
            Some(point) => Ok(Self(point.into())),
            None => {
                error!("failed to decode bytes as a compressed secp256k1 point");
                Err(CallerError::DeserializationFailed)?
            }
        }
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(ProjectivePoint::random(rng))
    }
}

impl EcdsaCurve for K256 {
    type VerifyingKey = VerifyingKey;
    type Signature = SignatureK256;

    fn x_projection(&self) -> Result<Self::Scalar> {
        let x_projection = self.0.to_affine().x();

        // The `from_repr` method expects a scalar in the range `[0, q)`;
        // an x-coordinate in `[q, p)` is rejected here, which happens with
        // negligible probability.
        Option::from(<K256Scalar as PrimeField>::from_repr(x_projection)).ok_or_else(|| {
            error!("unable to compute x-projection of curve point: x coordinate is not a canonical scalar");
            InternalError::InternalInvariantFailed
        })
    }

    fn is_high(s: &Self::Scalar) -> bool {
        <K256Scalar as IsHigh>::is_high(s).into()
    }
}

/// ECDSA signature over secp256k1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureK256(pub k256::ecdsa::Signature);

impl SignatureTrait for SignatureK256 {
    fn from_scalars(r: &BigNumber, s: &BigNumber) -> Result<Self> {
        let r_scalar = K256::bn_to_scalar(r)?;
        let s_scalar = K256::bn_to_scalar(s)?;
        let sig = k256::ecdsa::Signature::from_scalars(r_scalar, s_scalar)
            .map_err(|_| InternalError::InternalInvariantFailed)?;
        Ok(SignatureK256(sig))
    }
}

impl std::ops::Deref for SignatureK256 {
    type Target = k256::ecdsa::Signature;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl VerifyingKeyTrait for VerifyingKey {
    type C = K256;

    fn from_point(point: Self::C) -> Result<Self> {
        VerifyingKey::from_sec1_bytes(&point.to_bytes())
            .map_err(|_| InternalError::InternalInvariantFailed)
    }
}

impl ScalarTrait for K256Scalar {
    fn zero() -> Self {
        K256Scalar::ZERO
    }

    fn one() -> Self {
        K256Scalar::ONE
    }

    fn from_u128(x: u128) -> Self {
        K256Scalar::from_u128(x)
    }

    fn add(&self, other: &Self) -> Self {
        k256::Scalar::add(self, other)
    }

    fn sub(&self, other: &Self) -> Self {
        k256::Scalar::sub(self, other)
    }

    fn negate(&self) -> Self {
        k256::Scalar::negate(self)
    }

    fn mul(&self, other: &Self) -> Self {
        k256::Scalar::mul(self, other)
    }

    fn invert(&self) -> Option<Self> {
        K256Scalar::invert(self).into()
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        <K256Scalar as Field>::random(rng)
    }

    fn to_bytes(&self) -> Vec<u8> {
        K256Scalar::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() != 32 {
            Err(CallerError::DeserializationFailed)?;
        }
        Ok(<K256Scalar as PrimeField>::from_repr(GenericArray::clone_from_slice(bytes)).into())
    }
}
