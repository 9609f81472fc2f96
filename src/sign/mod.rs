// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Threshold ECDSA signing.
//!
//! Any `t + 1` (or more) committee members holding save data from
//! [`keygen`](crate::keygen) can jointly sign a 32-byte digest. The
//! protocol follows Gennaro-Goldfeder: the nonce `k` and the key `x`
//! only ever exist as additive sharings, and the products `kγ` and `kx`
//! needed for the signature equation are assembled through pairwise
//! Paillier-based multiplicative-to-additive conversions, each armored
//! with range proofs under the receiving verifier's ring-Pedersen
//! parameters.
//!
//! # High-level protocol description
//! - **Rounds 1-2**: commit to per-signer nonce commitments `Γᵢ` and run
//!   the MtA exchanges.
//! - **Rounds 3-4**: publish the masked nonce shares `δᵢ` and open the
//!   `Γᵢ` commitments, fixing `R = (kγ)⁻¹ · Γ` and `r = R.x`.
//! - **Rounds 5-8**: the check phase. Signature shares
//!   `sᵢ = m·kᵢ + r·σᵢ` are fixed inside blinded check values whose
//!   consistency is established by commit/reveal plus representation and
//!   dlog-equality proofs — before any share is revealed.
//! - **Round 9**: if the aggregate check passes, release the shares,
//!   assemble `(r, s)`, normalize to low-s, and verify against the group
//!   key before emitting.
//!
//! A signer caught by any proof or commitment check is named in the
//! abort; a failed aggregate check aborts without naming (the shares are
//! still blinded at that point), but no signature material leaks either
//! way.

pub(crate) mod commit;
mod mta;
mod participant;

pub use participant::{Input, SignParticipant};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        errors::{CallerError, InternalError},
        keygen::{self, Output as KeygenOutput},
        messages::{Message, MessageType, SignMessageType},
        participant::{ProtocolParticipant, Status},
        protocol::{Identifier, ParticipantIdentifier},
        utils::testing::init_testing,
        zkp::ProofKind,
    };
    use k256::ecdsa::signature::DigestVerifier;
    use rand::{CryptoRng, Rng, RngCore};
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;

    type Sign = SignParticipant<TestCurve>;

    fn keygen_outputs<R: RngCore + CryptoRng>(
        n: usize,
        threshold: usize,
        rng: &mut R,
    ) -> HashMap<ParticipantIdentifier, KeygenOutput<TestCurve>> {
        let sid = Identifier::random(rng);
        let mut quorum = keygen::tests::new_quorum(n, threshold, sid, rng);
        keygen::tests::run_keygen(&mut quorum, rng)
    }

    fn signers(
        outputs: &HashMap<ParticipantIdentifier, KeygenOutput<TestCurve>>,
        subset: &[ParticipantIdentifier],
        digest: [u8; 32],
        sid: Identifier,
    ) -> Vec<Sign> {
        subset
            .iter()
            .map(|pid| {
                let others: Vec<_> = subset.iter().copied().filter(|p| p != pid).collect();
                let input = Input::new(digest, outputs[pid].clone());
                Sign::new(sid, *pid, others, input).unwrap()
            })
            .collect()
    }

    fn ready_messages(quorum: &[Sign]) -> Vec<Message> {
        quorum
            .iter()
            .map(|participant| {
                Message::new(
                    Sign::ready_type(),
                    participant.sid(),
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap()
            })
            .collect()
    }

    /// Drive a signing session to completion with random delivery order.
    fn run_signing<R: RngCore + CryptoRng>(
        quorum: &mut [Sign],
        rng: &mut R,
    ) -> HashMap<ParticipantIdentifier, <Sign as ProtocolParticipant>::Output> {
        let mut inbox = ready_messages(quorum);
        let mut outputs = HashMap::new();
        while !quorum
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
        {
            if inbox.is_empty() {
                panic!("signing deadlocked with no messages in flight");
            }
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            let participant = quorum
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            let (output, messages) = participant
                .process_message(rng, &message)
                .unwrap()
                .into_parts();
            inbox.extend(messages);
            if let Some(output) = output {
                assert!(outputs.insert(participant.id(), output).is_none());
            }
        }
        outputs
    }

    #[test]
    fn signing_produces_a_verifiable_signature() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();

        let digest: [u8; 32] = Sha256::digest(b"hello world").into();
        let sid = Identifier::random(&mut rng);
        // Two signers meet the threshold t + 1 = 2.
        let subset = &committee[..2];
        let mut quorum = signers(&outputs, subset, digest, sid);
        let signatures = run_signing(&mut quorum, &mut rng);

        // Everyone got the same signature.
        let signature = signatures.values().next().unwrap();
        assert!(signatures.values().all(|s| s == signature));

        // The independent verifier accepts it under the group key.
        let verifying_key = outputs[&committee[0]].public_key().unwrap();
        assert!(verifying_key
            .verify_digest(Sha256::new_with_prefix(b"hello world"), &signature.0)
            .is_ok());
    }

    #[test]
    fn overlapping_signer_sets_produce_fresh_nonces() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest: [u8; 32] = Sha256::digest(b"same message, twice").into();

        let sid_a = Identifier::random(&mut rng);
        let mut quorum_a = signers(&outputs, &committee[..2], digest, sid_a);
        let signatures_a = run_signing(&mut quorum_a, &mut rng);

        let sid_b = Identifier::random(&mut rng);
        let mut quorum_b = signers(&outputs, &committee[1..], digest, sid_b);
        let signatures_b = run_signing(&mut quorum_b, &mut rng);

        let verifying_key = outputs[&committee[0]].public_key().unwrap();
        let signature_a = signatures_a.values().next().unwrap();
        let signature_b = signatures_b.values().next().unwrap();
        for signature in [signature_a, signature_b] {
            assert!(verifying_key
                .verify_digest(
                    Sha256::new_with_prefix(b"same message, twice"),
                    &signature.0
                )
                .is_ok());
        }
        // Fresh nonces: same message, different r.
        assert_ne!(
            signature_a.0.r().to_bytes(),
            signature_b.0.r().to_bytes()
        );
    }

    #[test]
    fn full_committee_can_sign() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest: [u8; 32] = Sha256::digest(b"all hands").into();

        let sid = Identifier::random(&mut rng);
        let mut quorum = signers(&outputs, &committee, digest, sid);
        let signatures = run_signing(&mut quorum, &mut rng);
        let verifying_key = outputs[&committee[0]].public_key().unwrap();
        assert!(verifying_key
            .verify_digest(
                Sha256::new_with_prefix(b"all hands"),
                &signatures.values().next().unwrap().0
            )
            .is_ok());
    }

    #[test]
    fn too_few_signers_are_rejected() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 2, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest = [7u8; 32];
        let sid = Identifier::random(&mut rng);

        // t = 2 requires 3 signers; 2 is not enough.
        let pid = committee[0];
        let input = Input::new(digest, outputs[&pid].clone());
        assert!(Sign::new(sid, pid, vec![committee[1]], input).is_err());
    }

    #[test]
    fn corrupted_mta_proof_aborts_with_the_sender_blamed() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest: [u8; 32] = Sha256::digest(b"abort run").into();
        let sid = Identifier::random(&mut rng);
        let mut quorum = signers(&outputs, &committee, digest, sid);
        let cheater = committee[0];

        let mut inbox = ready_messages(&quorum);
        let mut aborted = 0;
        while !inbox.is_empty() {
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            let message = if message.from() == cheater
                && message.message_type() == MessageType::Sign(SignMessageType::R2MtaResponse)
            {
                Sign::corrupt_round_two_msg_for_test(&message, &mut rng).unwrap()
            } else {
                message
            };

            let participant = quorum
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            match participant.process_message(&mut rng, &message) {
                Ok(outcome) => {
                    let (_, messages) = outcome.into_parts();
                    inbox.extend(messages);
                }
                Err(InternalError::FailedProof(ProofKind::MtaRange, Some(blamed))) => {
                    assert_eq!(blamed, cheater);
                    assert_eq!(participant.status(), &Status::Aborted(vec![cheater]));
                    aborted += 1;
                }
                Err(InternalError::CallingApplicationMistake(
                    CallerError::ProtocolAlreadyAborted,
                )) => {}
                Err(other) => panic!("unexpected signing error: {other}"),
            }
        }
        // Both honest signers caught the cheater.
        assert_eq!(aborted, 2);
    }

    #[test]
    fn reverse_round_order_delivery_still_completes() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest: [u8; 32] = Sha256::digest(b"out of order").into();
        let sid = Identifier::random(&mut rng);
        let mut quorum = signers(&outputs, &committee[..2], digest, sid);

        let mut inbox = ready_messages(&quorum);
        let mut outputs_count = 0;
        while !quorum
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
        {
            if inbox.is_empty() {
                panic!("signing deadlocked with no messages in flight");
            }
            // Deliver the highest-round message available: later rounds
            // land before the rounds they depend on and must be
            // buffered, not lost.
            let index = (0..inbox.len())
                .max_by_key(|&i| inbox[i].message_type().round())
                .unwrap();
            let message = inbox.swap_remove(index);
            let participant = quorum
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            let (output, messages) = participant
                .process_message(&mut rng, &message)
                .unwrap()
                .into_parts();
            inbox.extend(messages);
            if output.is_some() {
                outputs_count += 1;
            }
        }
        assert_eq!(outputs_count, 2);
    }

    #[test]
    fn duplicate_and_foreign_session_messages_are_refused_without_state_change() {
        let mut rng = init_testing();
        let outputs = keygen_outputs(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest: [u8; 32] = Sha256::digest(b"isolation").into();
        let sid = Identifier::random(&mut rng);
        let mut quorum = signers(&outputs, &committee[..2], digest, sid);

        let mut inbox = ready_messages(&quorum);
        // Process messages until a commit broadcast shows up.
        let commit_message = loop {
            let message = inbox.pop().unwrap();
            let participant = quorum
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            let (_, messages) = participant
                .process_message(&mut rng, &message)
                .unwrap()
                .into_parts();
            let commit = messages
                .iter()
                .find(|m| m.message_type() == MessageType::Sign(SignMessageType::R1CommitGamma));
            if let Some(commit) = commit {
                break commit.clone();
            }
            inbox.extend(messages);
        };

        let recipient = quorum
            .iter_mut()
            .find(|participant| participant.id() == commit_message.to())
            .unwrap();

        // First delivery is fine.
        let _ = recipient
            .process_message(&mut rng, &commit_message)
            .unwrap();
        let waiting_before = recipient.waiting_for();

        // Second delivery of the same message is refused.
        assert_eq!(
            recipient
                .process_message(&mut rng, &commit_message)
                .unwrap_err(),
            CallerError::DuplicateMessage.into()
        );
        assert_eq!(recipient.waiting_for(), waiting_before);

        // A message from a different session is refused without state
        // change, even with a valid body.
        let foreign_sid = Identifier::random(&mut rng);
        let foreign = Message::new(
            commit_message.message_type(),
            foreign_sid,
            commit_message.from(),
            commit_message.to(),
            &[0u8; 8],
        )
        .unwrap();
        assert_eq!(
            recipient.process_message(&mut rng, &foreign).unwrap_err(),
            CallerError::WrongSessionId.into()
        );
        assert_eq!(recipient.waiting_for(), waiting_before);
    }
}
