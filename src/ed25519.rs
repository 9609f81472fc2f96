// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Curve implementation for ed25519, backed by `curve25519-dalek`.
//!
//! Only the shared group surface is implemented here; there is no ECDSA
//! over a twisted Edwards curve. The EdDSA protocols use this type for
//! commitments and shares and hand finished signatures to
//! [`ed25519_dalek`] for verification.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{CallerError, InternalError, Result},
};
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_POINT,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    scalar::Scalar as DalekScalar,
    traits::Identity,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::error;
use zeroize::Zeroize;

/// Wrapper around [`EdwardsPoint`] restricted to the prime-order
/// subgroup.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize, Serialize, Deserialize)]
pub struct Ed25519(pub(crate) EdwardsPoint);

impl AsRef<Ed25519> for Ed25519 {
    fn as_ref(&self) -> &Ed25519 {
        self
    }
}

impl std::ops::Add for Ed25519 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

/// The order of the prime-order subgroup,
/// `l = 2^252 + 27742317777372353535851937790883648493`.
pub(crate) fn ed25519_order() -> BigNumber {
    const ORDER_BE: [u8; 32] = [
        0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x14, 0xde, 0xf9, 0xde, 0xa2, 0xf7, 0x9c, 0xd6, 0x58, 0x12, 0x63, 0x1a,
        0x5c, 0xf5, 0xd3, 0xed,
    ];
    BigNumber::from_slice(ORDER_BE)
}

impl CurveTrait for Ed25519 {
    type Scalar = DalekScalar;

    fn generator() -> Self {
        Self(ED25519_BASEPOINT_POINT)
    }

    fn identity() -> Self {
        Self(EdwardsPoint::identity())
    }

    fn order() -> BigNumber {
        ed25519_order()
    }

    fn multiply_by_scalar(&self, scalar: &Self::Scalar) -> Self {
        Self(self.0 * scalar)
    }

    fn bn_to_scalar(x: &BigNumber) -> Result<Self::Scalar> {
        // Reduce to the canonical representative, then re-encode the
        // big-endian magnitude as the little-endian form dalek expects.
        let reduced = x.nmod(&Self::order());
        let be_bytes = reduced.to_bytes();
        if be_bytes.len() > 32 {
            error!("reduced scalar is wider than the field");
            return Err(InternalError::InternalInvariantFailed);
        }
        let mut le_bytes = [0u8; 32];
        for (i, byte) in be_bytes.iter().rev().enumerate() {
            le_bytes[i] = *byte;
        }
        let scalar = Option::from(DalekScalar::from_canonical_bytes(le_bytes)).ok_or_else(|| {
            error!("failed to convert BigNumber into an ed25519 scalar");
            InternalError::InternalInvariantFailed
        })?;
        le_bytes.zeroize();
        Ok(scalar)
    }

    fn scalar_to_bn(x: &Self::Scalar) -> BigNumber {
        let le_bytes = x.to_bytes();
        let be_bytes: Vec<u8> = le_bytes.iter().rev().copied().collect();
        BigNumber::from_slice(be_bytes)
    }

    fn to_bytes(self) -> Vec<u8> {
        self.0.compress().to_bytes().to_vec()
    }

    fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let compressed = CompressedEdwardsY::from_slice(bytes).map_err(|_| {
            error!("failed to decode bytes as a compressed edwards point");
            CallerError::DeserializationFailed
        })?;
        let point = compressed.decompress().ok_or_else(|| {
            error!("failed to decode bytes as a compressed edwards point");
            InternalError::from(CallerError::DeserializationFailed)
        })?;
        // Reject encodings outside the prime-order subgroup; every honest
        // value in the protocol is a multiple of the basepoint.
        if !point.is_torsion_free() {
            error!("edwards point has a torsion component");
            Err(CallerError::DeserializationFailed)?;
        }
        Ok(Self(point))
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(EdwardsPoint::mul_base(&DalekScalar::random(rng)))
    }
}

impl ScalarTrait for DalekScalar {
    fn zero() -> Self {
        DalekScalar::ZERO
    }

    fn one() -> Self {
        DalekScalar::ONE
    }

    fn from_u128(x: u128) -> Self {
        DalekScalar::from(x)
    }

    fn add(&self, other: &Self) -> Self {
        self + other
    }

    fn sub(&self, other: &Self) -> Self {
        self - other
    }

    fn negate(&self) -> Self {
        -self
    }

    fn mul(&self, other: &Self) -> Self {
        self * other
    }

    fn invert(&self) -> Option<Self> {
        if self == &DalekScalar::ZERO {
            None
        } else {
            Some(DalekScalar::invert(self))
        }
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        DalekScalar::random(rng)
    }

    fn to_bytes(&self) -> Vec<u8> {
        DalekScalar::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        let fixed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CallerError::DeserializationFailed)?;
        Ok(Option::from(DalekScalar::from_canonical_bytes(fixed)))
    }
}

/// Convert a group element into an [`ed25519_dalek::VerifyingKey`].
pub fn verifying_key(point: &Ed25519) -> Result<ed25519_dalek::VerifyingKey> {
    let bytes: [u8; 32] = point
        .to_bytes()
        .try_into()
        .map_err(|_| InternalError::InternalInvariantFailed)?;
    ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| {
        error!("group public key is not a valid ed25519 verifying key");
        InternalError::InternalInvariantFailed
    })
}

/// Assemble an RFC 8032 signature from the group commitment `R` and the
/// response scalar `s`.
pub fn signature_from_parts(big_r: &Ed25519, s: &DalekScalar) -> Result<ed25519_dalek::Signature> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&big_r.to_bytes());
    bytes[32..].copy_from_slice(&s.to_bytes());
    Ok(ed25519_dalek::Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn point_byte_conversion_works() {
        let rng = &mut init_testing();
        let point = Ed25519::random(rng);
        let bytes = point.to_bytes();
        let reconstructed = Ed25519::try_from_bytes(&bytes).unwrap();
        assert_eq!(point, reconstructed);
    }

    #[test]
    fn scalar_bn_roundtrip() {
        let rng = &mut init_testing();
        let scalar = DalekScalar::random(rng);
        let bn = Ed25519::scalar_to_bn(&scalar);
        assert_eq!(Ed25519::bn_to_scalar(&bn).unwrap(), scalar);
    }

    #[test]
    fn order_constant_matches_scalar_field() {
        // l - 1 must reduce to -1 in the scalar field.
        let l_minus_1 = ed25519_order() - BigNumber::one();
        let as_scalar = Ed25519::bn_to_scalar(&l_minus_1).unwrap();
        assert_eq!(as_scalar + DalekScalar::ONE, DalekScalar::ZERO);
    }

    #[test]
    fn torsioned_encodings_are_rejected() {
        // The all-zero encoding decompresses to a small-order point.
        let small_order = [0u8; 32];
        assert!(Ed25519::try_from_bytes(&small_order).is_err());
    }
}
