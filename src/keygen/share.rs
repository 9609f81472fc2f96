// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{CallerError, InternalError, Result},
    paillier::{Ciphertext, DecryptionKey, EncryptionKey},
    zkp::pifac::PiFacProof,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::error;

/// A polynomial evaluation in transit: encrypted under the recipient's
/// Paillier key so only the addressee learns its sub-share.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct EncryptedShare<C> {
    ciphertext: Ciphertext,
    phantom: PhantomData<C>,
}

impl<C: CurveTrait> EncryptedShare<C> {
    pub(crate) fn encrypt<R: RngCore + CryptoRng>(
        share: &C::Scalar,
        pk: &EncryptionKey,
        rng: &mut R,
    ) -> Result<Self> {
        if &(C::order() * 2) >= pk.modulus() {
            error!("encrypted share transfer requires a modulus much larger than the curve order");
            Err(InternalError::InternalInvariantFailed)?;
        }
        let plaintext = C::scalar_to_bn(share);
        let (ciphertext, _nonce) = pk.encrypt(rng, &plaintext)?;
        Ok(Self {
            ciphertext,
            phantom: PhantomData,
        })
    }

    pub(crate) fn decrypt(&self, dk: &DecryptionKey) -> Result<C::Scalar> {
        let plaintext = dk.decrypt(&self.ciphertext).map_err(|_| {
            error!("share decryption failed, ciphertext out of range");
            CallerError::DeserializationFailed
        })?;
        if plaintext >= C::order() || plaintext < BigNumber::zero() {
            error!("share decryption failed, plaintext out of range");
            Err(CallerError::DeserializationFailed)?;
        }
        C::bn_to_scalar(&plaintext)
    }
}

/// The round-two unicast payload: the addressee's encrypted sub-share,
/// plus a factor-size proof for the dealer's Paillier modulus unless the
/// run opted out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct RoundTwoPrivate<C> {
    pub(crate) share: EncryptedShare<C>,
    pub(crate) fac_proof: Option<PiFacProof>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{ScalarTrait, TestCurve},
        paillier::prime_gen,
        utils::testing::init_testing,
    };

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    fn keypair(rng: &mut (impl RngCore + CryptoRng)) -> (EncryptionKey, DecryptionKey) {
        let (p, q) = prime_gen::get_prime_pair_from_pool_insecure(rng).unwrap();
        let dk = DecryptionKey::from_primes(p, q).unwrap();
        (dk.encryption_key(), dk)
    }

    #[test]
    fn share_encryption_roundtrips() {
        let mut rng = init_testing();
        let (pk, dk) = keypair(&mut rng);

        let share = Scalar::random(&mut rng);
        let encrypted = EncryptedShare::<TestCurve>::encrypt(&share, &pk, &mut rng).unwrap();
        assert_eq!(encrypted.decrypt(&dk).unwrap(), share);
    }

    #[test]
    fn share_decryption_with_wrong_key_fails() {
        let mut rng = init_testing();
        let (pk, _) = keypair(&mut rng);
        let (_, other_dk) = loop {
            let (other_pk, other_dk) = keypair(&mut rng);
            if other_pk != pk {
                break (other_pk, other_dk);
            }
        };

        let share = Scalar::random(&mut rng);
        let encrypted = EncryptedShare::<TestCurve>::encrypt(&share, &pk, &mut rng).unwrap();
        // Wrong-key decryption produces garbage far outside the curve
        // order, which the range check catches.
        assert!(encrypted.decrypt(&other_dk).is_err());
    }
}
