// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The multiplicative-to-additive conversion.
//!
//! Party `i` holds `a` and party `j` holds `b`; afterwards `i` holds `α`
//! and `j` holds `β` with `α + β = a·b mod q`, and neither learned the
//! other's input. The trick is Paillier: `i` publishes `Enc_i(a)`, `j`
//! homomorphically computes `Enc_i(a·b + β′)` for a mask `β′` it chose,
//! and keeps `β = -β′ mod q`; `i` decrypts its side to `α = a·b + β′`.
//!
//! Every step is accompanied by a range proof — the initiator's under
//! [`pienc`](crate::zkp::pienc), the responder's under
//! [`piaffg`](crate::zkp::piaffg) — because an out-of-range input would
//! let one side shift the other's decryption and break the additive
//! relation. The "checked" responder variant additionally binds the
//! multiplier to a public curve point, which signing uses to tie the MtA
//! output to the signer's known key share.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::Result,
    paillier::{Ciphertext, DecryptionKey, EncryptionKey, Nonce},
    preparams::PublicPreParams,
    protocol::{Identifier, ParticipantIdentifier},
    ring_pedersen::RingPedersen,
    utils::random_positive_bn,
    zkp::{
        piaffg::{CommonInput as PiAffInput, PiAffProof, PiAffgProof, ProverSecret as PiAffSecret},
        pienc::{CommonInput as PiEncInput, PiEncProof, ProverSecret as PiEncSecret},
        Proof, ProofContext,
    },
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

/// The initiator's opening move: its encrypted input with a range proof
/// for one specific verifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MtaInit {
    pub ciphertext: Ciphertext,
    proof: PiEncProof,
}

/// A responder's answer without the group binding.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct MtaPlainResponse {
    ciphertext: Ciphertext,
    proof: PiAffProof,
}

/// A responder's answer with its multiplier bound to a public point.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct MtaCheckedResponse<C: CurveTrait> {
    ciphertext: Ciphertext,
    proof: PiAffgProof<C>,
}

/// The transcript for one directed MtA exchange, bound to the session
/// and both roles.
fn mta_transcript(
    label: &'static [u8],
    sid: Identifier,
    initiator: ParticipantIdentifier,
    responder: ParticipantIdentifier,
) -> Result<Transcript> {
    let mut transcript = Transcript::new(label);
    transcript.append_message(b"sid", &serialize!(&sid)?);
    transcript.append_message(b"initiator", &serialize!(&initiator)?);
    transcript.append_message(b"responder", &serialize!(&responder)?);
    Ok(transcript)
}

impl MtaInit {
    /// Encrypt the initiator's input and prove it in range towards one
    /// verifier. The same ciphertext may be proven towards many
    /// verifiers; the proof is per-verifier because it commits under the
    /// verifier's ring-Pedersen parameters.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn initiate<C: CurveTrait, R: RngCore + CryptoRng>(
        input: &C::Scalar,
        ciphertext: &Ciphertext,
        nonce: &Nonce,
        own_pk: &EncryptionKey,
        verifier_setup: &RingPedersen,
        sid: Identifier,
        initiator: ParticipantIdentifier,
        responder: ParticipantIdentifier,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<Self> {
        let order = C::order();
        let plaintext = C::scalar_to_bn(input);
        let proof = PiEncProof::prove(
            PiEncInput::new(own_pk, ciphertext, verifier_setup, &order),
            PiEncSecret::new(&plaintext, nonce),
            context,
            &mut mta_transcript(b"mta init", sid, initiator, responder)?,
            rng,
        )?;
        Ok(Self {
            ciphertext: ciphertext.clone(),
            proof,
        })
    }

    /// Verify an initiator's range proof against our own commitment
    /// parameters.
    pub(crate) fn verify<C: CurveTrait>(
        &self,
        initiator_aux: &PublicPreParams,
        own_setup: &RingPedersen,
        sid: Identifier,
        initiator: ParticipantIdentifier,
        responder: ParticipantIdentifier,
        context: &impl ProofContext,
    ) -> Result<()> {
        let order = C::order();
        self.proof.clone().verify(
            PiEncInput::new(
                &initiator_aux.paillier,
                &self.ciphertext,
                own_setup,
                &order,
            ),
            context,
            &mut mta_transcript(b"mta init", sid, initiator, responder)?,
        )
    }
}

/// Build `c₂ = b ⊙ c₁ ⊕ Enc(β′)` and the mask bookkeeping shared by both
/// response flavors. Returns the pieces the proofs need plus the
/// responder's additive share `-β′ mod q`.
struct ResponseParts {
    c2: Ciphertext,
    mask: BigNumber,
    nonce: Nonce,
}

fn respond_parts<C: CurveTrait, R: RngCore + CryptoRng>(
    multiplier: &C::Scalar,
    initiator_ciphertext: &Ciphertext,
    initiator_pk: &EncryptionKey,
    rng: &mut R,
) -> Result<(ResponseParts, C::Scalar)> {
    let order = C::order();
    let q3 = &order * &order * &order;
    let mask = random_positive_bn(rng, &q3);

    let scaled =
        initiator_pk.multiply_by_scalar(initiator_ciphertext, &C::scalar_to_bn(multiplier))?;
    let (masked, nonce) = initiator_pk.encrypt(rng, &mask)?;
    let c2 = initiator_pk.add(&scaled, &masked)?;

    // beta = -beta' mod q.
    let beta = C::bn_to_scalar(&mask)?.negate();

    Ok((ResponseParts { c2, mask, nonce }, beta))
}

impl MtaPlainResponse {
    /// Respond to an initiation, returning the response and the additive
    /// share to keep.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn respond<C: CurveTrait, R: RngCore + CryptoRng>(
        multiplier: &C::Scalar,
        initiator_ciphertext: &Ciphertext,
        initiator_aux: &PublicPreParams,
        verifier_setup: &RingPedersen,
        sid: Identifier,
        initiator: ParticipantIdentifier,
        responder: ParticipantIdentifier,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<(Self, C::Scalar)> {
        let order = C::order();
        let (parts, beta) =
            respond_parts::<C, R>(multiplier, initiator_ciphertext, &initiator_aux.paillier, rng)?;
        let multiplier_bn = C::scalar_to_bn(multiplier);
        let proof = PiAffProof::prove(
            PiAffInput::new(
                &initiator_aux.paillier,
                initiator_ciphertext,
                &parts.c2,
                verifier_setup,
                &order,
            ),
            PiAffSecret::new(&multiplier_bn, &parts.mask, &parts.nonce),
            context,
            &mut mta_transcript(b"mta respond", sid, initiator, responder)?,
            rng,
        )?;
        Ok((
            Self {
                ciphertext: parts.c2,
                proof,
            },
            beta,
        ))
    }

    /// As the initiator: verify the responder's proof and decrypt our
    /// additive share.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn verify_and_decrypt<C: CurveTrait>(
        &self,
        own_dk: &DecryptionKey,
        own_setup: &RingPedersen,
        own_ciphertext: &Ciphertext,
        sid: Identifier,
        initiator: ParticipantIdentifier,
        responder: ParticipantIdentifier,
        context: &impl ProofContext,
    ) -> Result<C::Scalar> {
        let order = C::order();
        self.proof.clone().verify(
            PiAffInput::new(
                &own_dk.encryption_key(),
                own_ciphertext,
                &self.ciphertext,
                own_setup,
                &order,
            ),
            context,
            &mut mta_transcript(b"mta respond", sid, initiator, responder)?,
        )?;
        let plaintext = own_dk.decrypt(&self.ciphertext)?;
        C::bn_to_scalar(&plaintext)
    }
}

impl<C: CurveTrait> MtaCheckedResponse<C> {
    /// Respond, additionally binding the multiplier to `public_point`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn respond<R: RngCore + CryptoRng>(
        multiplier: &C::Scalar,
        public_point: &C,
        initiator_ciphertext: &Ciphertext,
        initiator_aux: &PublicPreParams,
        verifier_setup: &RingPedersen,
        sid: Identifier,
        initiator: ParticipantIdentifier,
        responder: ParticipantIdentifier,
        context: &impl ProofContext,
        rng: &mut R,
    ) -> Result<(Self, C::Scalar)> {
        let order = C::order();
        let (parts, beta) =
            respond_parts::<C, R>(multiplier, initiator_ciphertext, &initiator_aux.paillier, rng)?;
        let multiplier_bn = C::scalar_to_bn(multiplier);
        let proof = PiAffgProof::prove_with_commitment(
            PiAffInput::new(
                &initiator_aux.paillier,
                initiator_ciphertext,
                &parts.c2,
                verifier_setup,
                &order,
            ),
            PiAffSecret::new(&multiplier_bn, &parts.mask, &parts.nonce),
            public_point,
            context,
            &mut mta_transcript(b"mta respond checked", sid, initiator, responder)?,
            rng,
        )?;
        Ok((
            Self {
                ciphertext: parts.c2,
                proof,
            },
            beta,
        ))
    }

    /// As the initiator: verify the responder's proof — including the
    /// binding to the responder's public point — and decrypt our
    /// additive share.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn verify_and_decrypt(
        &self,
        public_point: &C,
        own_dk: &DecryptionKey,
        own_setup: &RingPedersen,
        own_ciphertext: &Ciphertext,
        sid: Identifier,
        initiator: ParticipantIdentifier,
        responder: ParticipantIdentifier,
        context: &impl ProofContext,
    ) -> Result<C::Scalar> {
        let order = C::order();
        self.proof.clone().verify_with_commitment(
            PiAffInput::new(
                &own_dk.encryption_key(),
                own_ciphertext,
                &self.ciphertext,
                own_setup,
                &order,
            ),
            public_point,
            context,
            &mut mta_transcript(b"mta respond checked", sid, initiator, responder)?,
        )?;
        let plaintext = own_dk.decrypt(&self.ciphertext)?;
        C::bn_to_scalar(&plaintext)
    }

    /// Corrupt the embedded proof, for abort tests.
    #[cfg(test)]
    pub(crate) fn corrupt_proof_for_test(&mut self, rng: &mut (impl RngCore + CryptoRng)) {
        let garbage = C::generator().multiply_by_scalar(&C::Scalar::random(rng));
        self.proof = PiAffgProof::corrupt_group_commitment_for_test(self.proof.clone(), garbage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve, preparams::LocalPreParams, utils::testing::init_testing,
    };

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    struct Party {
        preparams: LocalPreParams,
        pid: ParticipantIdentifier,
    }

    fn party(rng: &mut (impl RngCore + CryptoRng)) -> Party {
        Party {
            preparams: LocalPreParams::simulate(rng).unwrap(),
            pid: ParticipantIdentifier::random(rng),
        }
    }

    #[test]
    fn mta_produces_additive_shares() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = Scalar::random(&mut rng);
        let b = Scalar::random(&mut rng);

        // Alice initiates.
        let a_bn = TestCurve::scalar_to_bn(&a);
        let (ciphertext, nonce) = alice
            .preparams
            .encryption_key()
            .encrypt(&mut rng, &a_bn)
            .unwrap();
        let init = MtaInit::initiate::<TestCurve, _>(
            &a,
            &ciphertext,
            &nonce,
            &alice.preparams.encryption_key(),
            bob.preparams.ring_pedersen().scheme(),
            sid,
            alice.pid,
            bob.pid,
            &(),
            &mut rng,
        )
        .unwrap();

        // Bob verifies and responds.
        init.verify::<TestCurve>(
            &alice.preparams.to_public(),
            bob.preparams.ring_pedersen().scheme(),
            sid,
            alice.pid,
            bob.pid,
            &(),
        )
        .unwrap();
        let (response, beta) = MtaPlainResponse::respond::<TestCurve, _>(
            &b,
            &init.ciphertext,
            &alice.preparams.to_public(),
            alice.preparams.ring_pedersen().scheme(),
            sid,
            alice.pid,
            bob.pid,
            &(),
            &mut rng,
        )
        .unwrap();

        // Alice verifies and decrypts.
        let alpha = response
            .verify_and_decrypt::<TestCurve>(
                alice.preparams.decryption_key(),
                alice.preparams.ring_pedersen().scheme(),
                &ciphertext,
                sid,
                alice.pid,
                bob.pid,
                &(),
            )
            .unwrap();

        // alpha + beta = a * b.
        assert_eq!(ScalarTrait::add(&alpha, &beta), a.mul(&b));
    }

    #[test]
    fn checked_mta_verifies_the_public_point() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = Scalar::random(&mut rng);
        let b = Scalar::random(&mut rng);
        let b_point = TestCurve::generator().multiply_by_scalar(&b);

        let a_bn = TestCurve::scalar_to_bn(&a);
        let (ciphertext, _nonce) = alice
            .preparams
            .encryption_key()
            .encrypt(&mut rng, &a_bn)
            .unwrap();

        let (response, beta) = MtaCheckedResponse::<TestCurve>::respond(
            &b,
            &b_point,
            &ciphertext,
            &alice.preparams.to_public(),
            alice.preparams.ring_pedersen().scheme(),
            sid,
            alice.pid,
            bob.pid,
            &(),
            &mut rng,
        )
        .unwrap();

        let alpha = response
            .verify_and_decrypt(
                &b_point,
                alice.preparams.decryption_key(),
                alice.preparams.ring_pedersen().scheme(),
                &ciphertext,
                sid,
                alice.pid,
                bob.pid,
                &(),
            )
            .unwrap();
        assert_eq!(ScalarTrait::add(&alpha, &beta), a.mul(&b));

        // A response claiming a different public point is rejected.
        let wrong_point = TestCurve::random(&mut rng);
        assert!(response
            .verify_and_decrypt(
                &wrong_point,
                alice.preparams.decryption_key(),
                alice.preparams.ring_pedersen().scheme(),
                &ciphertext,
                sid,
                alice.pid,
                bob.pid,
                &(),
            )
            .is_err());
    }

    #[test]
    fn mta_transcripts_are_role_bound() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let alice = party(&mut rng);
        let bob = party(&mut rng);

        let a = Scalar::random(&mut rng);
        let a_bn = TestCurve::scalar_to_bn(&a);
        let (ciphertext, nonce) = alice
            .preparams
            .encryption_key()
            .encrypt(&mut rng, &a_bn)
            .unwrap();
        let init = MtaInit::initiate::<TestCurve, _>(
            &a,
            &ciphertext,
            &nonce,
            &alice.preparams.encryption_key(),
            bob.preparams.ring_pedersen().scheme(),
            sid,
            alice.pid,
            bob.pid,
            &(),
            &mut rng,
        )
        .unwrap();

        // Same proof presented for swapped roles fails.
        assert!(init
            .verify::<TestCurve>(
                &alice.preparams.to_public(),
                bob.preparams.ring_pedersen().scheme(),
                sid,
                bob.pid,
                alice.pid,
                &(),
            )
            .is_err());

        // And for a different session.
        let other_sid = Identifier::random(&mut rng);
        assert!(init
            .verify::<TestCurve>(
                &alice.preparams.to_public(),
                bob.preparams.ring_pedersen().scheme(),
                other_sid,
                alice.pid,
                bob.pid,
                &(),
            )
            .is_err());
    }
}
