// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Ring-Pedersen commitment parameters `(Ñ, h₁, h₂)`.
//!
//! Each party publishes one set of these alongside its Paillier key. They
//! are the *verifier's* setup for the range proofs: when party `i` proves
//! something about a ciphertext to party `j`, the commitments inside the
//! proof are computed over `j`'s parameters, so `i` cannot have picked a
//! trapdoor for them.
//!
//! `h₁` is a random quadratic residue and `h₂ = h₁^α mod Ñ`; the holder
//! also keeps `β = α⁻¹` over the subgroup order so it can prove the
//! relation in both directions.

use crate::{
    errors::{CallerError, Result},
    utils::{modinv, modpow_signed, random_bn_in_z_star, random_positive_bn},
    zkp::{
        piprm::{CommonInput as PiPrmInput, PiPrmProof, ProverSecret as PiPrmSecret},
        Proof, ProofContext,
    },
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;
use zeroize::ZeroizeOnDrop;

/// Public ring-Pedersen parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingPedersen {
    modulus: BigNumber,
    h1: BigNumber,
    h2: BigNumber,
}

impl RingPedersen {
    /// The modulus `Ñ`.
    pub fn modulus(&self) -> &BigNumber {
        &self.modulus
    }

    /// The first commitment base.
    pub fn h1(&self) -> &BigNumber {
        &self.h1
    }

    /// The second commitment base.
    pub fn h2(&self) -> &BigNumber {
        &self.h2
    }

    /// The commitment `h₁^a · h₂^b mod Ñ`. Exponents may be negative.
    pub(crate) fn commit(&self, a: &BigNumber, b: &BigNumber) -> Result<BigNumber> {
        let first = modpow_signed(&self.h1, a, &self.modulus)?;
        let second = modpow_signed(&self.h2, b, &self.modulus)?;
        Ok((first * second).nmod(&self.modulus))
    }

    /// Structural sanity checks on received parameters: bases in range and
    /// invertible. The cryptographic guarantees come from the
    /// [`VerifiedRingPedersen`] proofs.
    pub(crate) fn check_well_formed(&self) -> Result<()> {
        let one = BigNumber::one();
        if self.modulus <= one {
            error!("ring-Pedersen modulus is trivial");
            Err(CallerError::BadInput)?;
        }
        for base in [&self.h1, &self.h2] {
            if base <= &one || base >= &self.modulus || base.gcd(&self.modulus) != one {
                error!("ring-Pedersen base is outside the multiplicative group");
                Err(CallerError::BadInput)?;
            }
        }
        Ok(())
    }
}

/// A party's own ring-Pedersen material: the public parameters plus the
/// safe primes behind `Ñ` and the exponents linking the bases.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
pub(crate) struct RingPedersenSetup {
    #[zeroize(skip)]
    scheme: RingPedersen,
    ptilde: BigNumber,
    qtilde: BigNumber,
    subgroup_order: BigNumber,
    alpha: BigNumber,
    beta: BigNumber,
}

impl std::fmt::Debug for RingPedersenSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingPedersenSetup")
            .field("scheme", &self.scheme)
            .field("trapdoors", &"[redacted]")
            .finish()
    }
}

impl RingPedersenSetup {
    /// Build the setup from two distinct safe primes.
    pub(crate) fn generate<R: RngCore + CryptoRng>(
        ptilde: BigNumber,
        qtilde: BigNumber,
        rng: &mut R,
    ) -> Result<Self> {
        if ptilde == qtilde {
            error!("ring-Pedersen primes must be distinct");
            Err(CallerError::BadInput)?;
        }
        let modulus = &ptilde * &qtilde;
        let two = BigNumber::from_slice([2u8]);
        // The squares mod Ñ form a subgroup of order p̃'·q̃'.
        let subgroup_order = ((&ptilde - 1) / &two) * ((&qtilde - 1) / &two);

        let root = random_bn_in_z_star(rng, &modulus)?;
        let h1 = root.modpow(&two, &modulus);

        // alpha must be invertible over the subgroup order so the reverse
        // direction h1 = h2^beta exists.
        let (alpha, beta) = loop {
            let alpha = random_positive_bn(rng, &subgroup_order);
            if alpha.gcd(&subgroup_order) == BigNumber::one() && alpha != BigNumber::zero() {
                let beta = modinv(&alpha, &subgroup_order)?;
                break (alpha, beta);
            }
        };
        let h2 = h1.modpow(&alpha, &modulus);

        Ok(Self {
            scheme: RingPedersen { modulus, h1, h2 },
            ptilde,
            qtilde,
            subgroup_order,
            alpha,
            beta,
        })
    }

    pub(crate) fn scheme(&self) -> &RingPedersen {
        &self.scheme
    }

    pub(crate) fn primes(&self) -> (&BigNumber, &BigNumber) {
        (&self.ptilde, &self.qtilde)
    }

    pub(crate) fn subgroup_order(&self) -> &BigNumber {
        &self.subgroup_order
    }

    pub(crate) fn alpha(&self) -> &BigNumber {
        &self.alpha
    }

    pub(crate) fn beta(&self) -> &BigNumber {
        &self.beta
    }

    /// A setup over undersized pooled primes, for tests.
    #[cfg(test)]
    pub(crate) fn gen_from_pool<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let (p, q) = crate::paillier::prime_gen::get_prime_pair_from_pool_insecure(rng)?;
        Self::generate(p, q, rng)
    }
}

/// Ring-Pedersen parameters together with proofs that the two bases
/// generate the same subgroup, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VerifiedRingPedersen {
    scheme: RingPedersen,
    forward: PiPrmProof,
    reverse: PiPrmProof,
}

impl VerifiedRingPedersen {
    fn forward_transcript() -> Transcript {
        Transcript::new(b"ring-pedersen h1 to h2")
    }

    fn reverse_transcript() -> Transcript {
        Transcript::new(b"ring-pedersen h2 to h1")
    }

    /// Prove correctness of our own setup under the given context.
    pub(crate) fn prove<R: RngCore + CryptoRng>(
        setup: &RingPedersenSetup,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<Self> {
        let scheme = setup.scheme().clone();
        let forward = PiPrmProof::prove(
            PiPrmInput::new(scheme.modulus(), scheme.h1(), scheme.h2()),
            PiPrmSecret::new(setup.alpha(), setup.subgroup_order()),
            context,
            &mut Self::forward_transcript(),
            rng,
        )?;
        let reverse = PiPrmProof::prove(
            PiPrmInput::new(scheme.modulus(), scheme.h2(), scheme.h1()),
            PiPrmSecret::new(setup.beta(), setup.subgroup_order()),
            context,
            &mut Self::reverse_transcript(),
            rng,
        )?;
        Ok(Self {
            scheme,
            forward,
            reverse,
        })
    }

    /// Verify received parameters under the given context.
    pub(crate) fn verify(&self, context: &impl ProofContext) -> Result<()> {
        self.scheme.check_well_formed()?;
        self.forward.clone().verify(
            PiPrmInput::new(self.scheme.modulus(), self.scheme.h1(), self.scheme.h2()),
            context,
            &mut Self::forward_transcript(),
        )?;
        self.reverse.clone().verify(
            PiPrmInput::new(self.scheme.modulus(), self.scheme.h2(), self.scheme.h1()),
            context,
            &mut Self::reverse_transcript(),
        )?;
        Ok(())
    }

    pub(crate) fn scheme(&self) -> &RingPedersen {
        &self.scheme
    }

    /// Generate a fresh verified setup for proof unit tests.
    #[cfg(test)]
    pub(crate) fn gen<R: RngCore + CryptoRng>(
        rng: &mut R,
        context: &impl ProofContext,
    ) -> Result<Self> {
        let setup = RingPedersenSetup::gen_from_pool(rng)?;
        Self::prove(&setup, context, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn commitments_respect_negative_exponents() {
        let mut rng = init_testing();
        let setup = RingPedersenSetup::gen_from_pool(&mut rng).unwrap();
        let scheme = setup.scheme();

        let a = BigNumber::from_rng(scheme.modulus(), &mut rng);
        let b = BigNumber::from_rng(scheme.modulus(), &mut rng);
        let commitment = scheme.commit(&a, &b).unwrap();
        let inverse = scheme.commit(&-a, &-b).unwrap();
        assert_eq!(
            (commitment * inverse).nmod(scheme.modulus()),
            BigNumber::one()
        );
    }

    #[test]
    fn verified_setup_roundtrips() {
        let mut rng = init_testing();
        let verified = VerifiedRingPedersen::gen(&mut rng, &()).unwrap();
        assert!(verified.verify(&()).is_ok());
    }

    #[test]
    fn proofs_are_context_bound() {
        let mut rng = init_testing();
        let context =
            crate::protocol::SharedContext::<crate::curve::TestCurve>::random(&mut rng);
        let verified = VerifiedRingPedersen::gen(&mut rng, &context).unwrap();
        assert!(verified.verify(&context).is_ok());
        assert!(verified.verify(&()).is_err());
    }

    #[test]
    fn swapped_bases_fail_verification() {
        let mut rng = init_testing();
        let verified = VerifiedRingPedersen::gen(&mut rng, &()).unwrap();
        let swapped = VerifiedRingPedersen {
            scheme: RingPedersen {
                modulus: verified.scheme.modulus.clone(),
                h1: verified.scheme.h2.clone(),
                h2: verified.scheme.h1.clone(),
            },
            forward: verified.forward.clone(),
            reverse: verified.reverse.clone(),
        };
        assert!(swapped.verify(&()).is_err());
    }
}
