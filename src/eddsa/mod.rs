// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Threshold EdDSA over ed25519.
//!
//! The Edwards side of the library is deliberately small: keygen is the
//! same Feldman dance as ECDSA without any Paillier material to
//! exchange, and signing is three rounds of threshold Schnorr with
//! committed nonces. Both reuse the party runtime, the verifiable secret
//! sharing, and the Schnorr proofs of the ECDSA side.

pub mod keygen;
pub mod sign;

pub use keygen::{EddsaKeygenParticipant, Output as KeygenOutput};
pub use sign::{EddsaSignParticipant, Input as SignInput};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::CurveTrait,
        ed25519::{verifying_key, Ed25519},
        errors::{CallerError, InternalError},
        messages::{EddsaKeygenMessageType, Message, MessageType},
        participant::{ProtocolParticipant, Status},
        protocol::{testing::quorum_parameters, Identifier, ParticipantIdentifier},
        utils::testing::init_testing,
        vss,
    };
    use ed25519_dalek::Verifier;
    use rand::{CryptoRng, Rng, RngCore};
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;

    type Keygen = EddsaKeygenParticipant<Ed25519>;
    type Sign = EddsaSignParticipant;

    fn run_keygen<R: RngCore + CryptoRng>(
        n: usize,
        threshold: usize,
        rng: &mut R,
    ) -> HashMap<ParticipantIdentifier, KeygenOutput<Ed25519>> {
        let sid = Identifier::random(rng);
        let params = quorum_parameters(n, threshold, rng);
        let mut quorum: Vec<_> = params
            .into_iter()
            .map(|param| {
                let id = param.self_id();
                let others = param.other_ids();
                Keygen::new(sid, id, others, param).unwrap()
            })
            .collect();

        let mut inbox: Vec<_> = quorum
            .iter()
            .map(|participant| {
                Message::new(
                    Keygen::ready_type(),
                    sid,
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap()
            })
            .collect();
        let mut outputs = HashMap::new();
        while !quorum
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
        {
            if inbox.is_empty() {
                panic!("eddsa keygen deadlocked with no messages in flight");
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

    fn run_signing<R: RngCore + CryptoRng>(
        outputs: &HashMap<ParticipantIdentifier, KeygenOutput<Ed25519>>,
        subset: &[ParticipantIdentifier],
        message_bytes: &[u8],
        rng: &mut R,
    ) -> ed25519_dalek::Signature {
        let sid = Identifier::random(rng);
        let mut quorum: Vec<_> = subset
            .iter()
            .map(|pid| {
                let others: Vec<_> = subset.iter().copied().filter(|p| p != pid).collect();
                let input = SignInput::new(message_bytes.to_vec(), outputs[pid].clone());
                Sign::new(sid, *pid, others, input).unwrap()
            })
            .collect();

        let mut inbox: Vec<_> = quorum
            .iter()
            .map(|participant| {
                Message::new(
                    Sign::ready_type(),
                    sid,
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap()
            })
            .collect();
        let mut signature = None;
        while !quorum
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
        {
            if inbox.is_empty() {
                panic!("eddsa signing deadlocked with no messages in flight");
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
                signature = Some(output);
            }
        }
        signature.unwrap()
    }

    #[test]
    fn keygen_produces_consistent_save_data() {
        let mut rng = init_testing();
        // A five-member committee with threshold two.
        let outputs = run_keygen(5, 2, &mut rng);
        assert_eq!(outputs.len(), 5);

        let reference = outputs.values().next().unwrap();
        let y_bytes = reference.public_key_point().to_bytes();
        for output in outputs.values() {
            assert_eq!(output.public_key_point().to_bytes(), y_bytes);
        }

        // Every private share matches every member's public record.
        for (pid, output) in &outputs {
            let expected = Ed25519::generator()
                .multiply_by_scalar(output.private_share().as_scalar());
            for other in outputs.values() {
                assert_eq!(other.find_public_share(*pid).unwrap().as_ref(), &expected);
            }
        }

        // Any t + 1 = 3 shares reconstruct the secret key.
        let shares: Vec<_> = outputs
            .iter()
            .map(|(pid, output)| (*pid, *output.private_share().as_scalar()))
            .collect();
        for window in shares.windows(3) {
            let secret = vss::reconstruct::<Ed25519>(window).unwrap();
            assert_eq!(
                Ed25519::generator().multiply_by_scalar(&secret).to_bytes(),
                y_bytes
            );
        }
    }

    #[test]
    fn signing_produces_a_verifiable_signature() {
        let mut rng = init_testing();
        let outputs = run_keygen(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();

        let digest: [u8; 32] = Sha256::digest(b"hello eddsa").into();
        let signature = run_signing(&outputs, &committee[..2], &digest, &mut rng);

        let verifying_key =
            verifying_key(outputs[&committee[0]].public_key_point()).unwrap();
        assert!(verifying_key.verify(&digest, &signature).is_ok());
        // The strict verifier accepts it too (no torsion tricks).
        assert!(verifying_key.verify_strict(&digest, &signature).is_ok());
        // And not under a different message.
        assert!(verifying_key.verify(b"something else", &signature).is_err());
    }

    #[test]
    fn overlapping_signer_sets_produce_fresh_nonces() {
        let mut rng = init_testing();
        let outputs = run_keygen(3, 1, &mut rng);
        let committee: Vec<_> = outputs.keys().copied().collect();
        let digest: [u8; 32] = Sha256::digest(b"same eddsa message").into();

        let signature_a = run_signing(&outputs, &committee[..2], &digest, &mut rng);
        let signature_b = run_signing(&outputs, &committee[1..], &digest, &mut rng);

        let verifying_key =
            verifying_key(outputs[&committee[0]].public_key_point()).unwrap();
        assert!(verifying_key.verify(&digest, &signature_a).is_ok());
        assert!(verifying_key.verify(&digest, &signature_b).is_ok());
        assert_ne!(signature_a.r_bytes(), signature_b.r_bytes());
    }

    #[test]
    fn participant_wrapper_drives_keygen_over_wire_bytes() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let params = quorum_parameters(3, 1, &mut rng);
        let mut quorum: Vec<_> = params
            .into_iter()
            .map(|param| {
                let id = param.self_id();
                let others = param.other_ids();
                crate::Participant::<Keygen>::new(sid, id, others, param).unwrap()
            })
            .collect();

        let mut inbox = Vec::new();
        for participant in quorum.iter_mut() {
            inbox.extend(participant.start(&mut rng).unwrap());
        }

        let mut outputs = 0;
        while outputs < 3 {
            assert!(!inbox.is_empty(), "wrapper-driven keygen deadlocked");
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            // Round-trip every message through its wire encoding, as a
            // real transport would.
            let bytes = message.to_wire_bytes().unwrap();
            let recipient = quorum
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            let (output, messages) = recipient
                .update_from_bytes(&mut rng, &bytes)
                .unwrap()
                .into_parts();
            inbox.extend(messages);
            if output.is_some() {
                outputs += 1;
            }
            // A party never waits on itself.
            let own_id = recipient.id();
            assert!(!recipient.waiting_for().contains(&own_id));
        }
    }

    #[test]
    fn tampered_sub_share_aborts_with_the_dealer_blamed() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let params = quorum_parameters(3, 1, &mut rng);
        let mut quorum: Vec<_> = params
            .into_iter()
            .map(|param| {
                let id = param.self_id();
                let others = param.other_ids();
                Keygen::new(sid, id, others, param).unwrap()
            })
            .collect();
        let cheater = quorum[0].id();

        let mut inbox: Vec<_> = quorum
            .iter()
            .map(|participant| {
                Message::new(
                    Keygen::ready_type(),
                    sid,
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap()
            })
            .collect();

        let mut aborted = 0;
        while !inbox.is_empty() {
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            // Swap the cheater's outbound sub-shares for random scalars.
            let message = if message.from() == cheater
                && message.message_type()
                    == MessageType::EddsaKeygen(EddsaKeygenMessageType::R2PrivateShare)
            {
                let garbage =
                    <Ed25519 as CurveTrait>::Scalar::random(&mut rng);
                Message::new(
                    message.message_type(),
                    message.id(),
                    message.from(),
                    message.to(),
                    &garbage,
                )
                .unwrap()
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
                Err(InternalError::InvalidVssShare(blamed)) => {
                    assert_eq!(blamed, cheater);
                    assert_eq!(participant.status(), &Status::Aborted(vec![cheater]));
                    aborted += 1;
                }
                Err(InternalError::CallingApplicationMistake(
                    CallerError::ProtocolAlreadyAborted,
                )) => {}
                Err(other) => panic!("unexpected eddsa keygen error: {other}"),
            }
        }
        assert_eq!(aborted, 2);
    }
}
