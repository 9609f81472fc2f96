// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Curve implementation for NIST P-256, backed by the `p256` crate.

use crate::{
    curve::{CurveTrait, EcdsaCurve, ScalarTrait, SignatureTrait, VerifyingKeyTrait},
    errors::{CallerError, InternalError, Result},
};
use generic_array::GenericArray;
use libpaillier::unknown_order::BigNumber;
use p256::{
    ecdsa::VerifyingKey,
    elliptic_curve::{
        bigint::Encoding, group::GroupEncoding, point::AffineCoordinates, scalar::IsHigh,
        AffinePoint, Curve, Field, Group, PrimeField,
    },
    ProjectivePoint, Scalar as P256Scalar,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::error;
use zeroize::{Zeroize, Zeroizing};

/// Wrapper around [`p256::ProjectivePoint`] so that we can define our own
/// serialization/deserialization for it.
///
/// Note that this type derives [`Debug`]; if a [`P256`] is used in a
/// private type, `Debug` should be manually implemented with the field of
/// this type explicitly redacted!
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize)]
pub struct P256(pub(crate) ProjectivePoint);

impl AsRef<P256> for P256 {
    fn as_ref(&self) -> &P256 {
        self
    }
}

impl std::ops::Add for P256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Serialize for P256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let afp = AffinePoint::<p256::NistP256>::from(self.0);
        afp.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for P256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = AffinePoint::<p256::NistP256>::deserialize(deserializer)?;
        Ok(Self(p.into()))
    }
}

/// The order of the P-256 group.
pub(crate) fn p256_order() -> BigNumber {
    let order_bytes: [u8; 32] = p256::NistP256::ORDER.to_be_bytes();
    BigNumber::from_slice(order_bytes)
}

impl CurveTrait for P256 {
    type Scalar = P256Scalar;

    fn generator() -> Self {
        Self(ProjectivePoint::GENERATOR)
    }

    fn identity() -> Self {
        Self(ProjectivePoint::IDENTITY)
    }

    fn order() -> BigNumber {
        p256_order()
    }

    fn multiply_by_scalar(&self, scalar: &Self::Scalar) -> Self {
        Self(self.0 * scalar)
    }

    fn bn_to_scalar(x: &BigNumber) -> Result<Self::Scalar> {
        let x_modded = x % Self::order();

        let bytes = Zeroizing::new(x_modded.to_bytes());
        let mut slice = Zeroizing::new(vec![0u8; 32 - bytes.len()]);
        slice.extend_from_slice(&bytes);

        let mut ret: Self::Scalar = Option::from(<P256Scalar as PrimeField>::from_repr(
            GenericArray::clone_from_slice(&slice),
        ))
        .ok_or_else(|| {
            error!("failed to convert BigNumber into p256::Scalar");
            InternalError::InternalInvariantFailed
        })?;

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
            error!("failed to decode bytes as a compressed P-256 point");
            CallerError::DeserializationFailed
        })?;

        let point: Option<AffinePoint<p256::NistP256>> =
            AffinePoint::<p256::NistP256>::from_bytes(&fixed_len_bytes.into()).into();
        fixed_len_bytes.zeroize();

        match point {
            Some(point) => Ok(Self(point.into())),
            None => {
                error!("failed to decode bytes as a compressed P-256 point");
                Err(CallerError::DeserializationFailed)?
            }
        }
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(ProjectivePoint::random(rng))
    }
}

impl EcdsaCurve for P256 {
    type VerifyingKey = VerifyingKey;
    type Signature = SignatureP256;

    fn x_projection(&self) -> Result<Self::Scalar> {
        let x_projection = self.0.to_affine().x();

        Option::from(<P256Scalar as PrimeField>::from_repr(x_projection)).ok_or_else(|| {
            error!("unable to compute x-projection of curve point: x coordinate is not a canonical scalar");
            InternalError::InternalInvariantFailed
        })
    }

    fn is_high(s: &Self::Scalar) -> bool {
        <P256Scalar as IsHigh>::is_high(s).into()
    }
}

/// ECDSA signature over P-256.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignatureP256(pub p256::ecdsa::Signature);

impl SignatureTrait for SignatureP256 {
    fn from_scalars(r: &BigNumber, s: &BigNumber) -> Result<Self> {
        let r_scalar = P256::bn_to_scalar(r)?;
        let s_scalar = P256::bn_to_scalar(s)?;
        let sig = p256::ecdsa::Signature::from_scalars(r_scalar, s_scalar)
            .map_err(|_| InternalError::InternalInvariantFailed)?;
        Ok(SignatureP256(sig))
    }
}

impl std::ops::Deref for SignatureP256 {
    type Target = p256::ecdsa::Signature;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl VerifyingKeyTrait for VerifyingKey {
    type C = P256;

    fn from_point(point: Self::C) -> Result<Self> {
        VerifyingKey::from_sec1_bytes(&point.to_bytes())
            .map_err(|_| InternalError::InternalInvariantFailed)
    }
}

impl ScalarTrait for P256Scalar {
    fn zero() -> Self {
        P256Scalar::ZERO
    }

    fn one() -> Self {
        P256Scalar::ONE
    }

    fn from_u128(x: u128) -> Self {
        P256Scalar::from_u128(x)
    }

    fn add(&self, other: &Self) -> Self {
        p256::Scalar::add(self, other)
    }

    fn sub(&self, other: &Self) -> Self {
        p256::Scalar::sub(self, other)
    }

    fn negate(&self) -> Self {
        p256::Scalar::negate(self)
    }

    fn mul(&self, other: &Self) -> Self {
        p256::Scalar::mul(self, other)
    }

    fn invert(&self) -> Option<Self> {
        P256Scalar::invert(self).into()
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        <P256Scalar as Field>::random(rng)
    }

    fn to_bytes(&self) -> Vec<u8> {
        P256Scalar::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() != 32 {
            Err(CallerError::DeserializationFailed)?;
        }
        Ok(<P256Scalar as PrimeField>::from_repr(GenericArray::clone_from_slice(bytes)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn curve_point_byte_conversion_works() {
        let rng = &mut init_testing();
        let point = P256::random(rng);
        let bytes = point.to_bytes();
        let reconstructed = P256::try_from_bytes(&bytes).unwrap();
        assert_eq!(point, reconstructed);
    }

    #[test]
    fn order_matches_scalar_modulus() {
        let q_minus_1 = p256_order() - BigNumber::one();
        let as_scalar = P256::bn_to_scalar(&q_minus_1).unwrap();
        assert_eq!(
            ScalarTrait::add(&as_scalar, &P256Scalar::ONE),
            P256Scalar::ZERO
        );
    }
}
