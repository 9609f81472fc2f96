// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Distributed key generation for threshold ECDSA.
//!
//! Produces a `(t, n)` Shamir sharing of a fresh signing key without any
//! party — or any proper subset of up to `t` parties — ever learning it.
//!
//! # High-level protocol description
//! The protocol runs in four rounds:
//! - Each participant deals a random degree-`t` polynomial and broadcasts
//!   a hash commitment to its Feldman vector, together with its Paillier
//!   public key and ring-Pedersen parameters and the proofs that both
//!   were generated honestly.
//! - Once all commitments are in, each participant sends every peer its
//!   polynomial evaluation, encrypted under the peer's Paillier key and
//!   accompanied by a factor-size proof, and opens its own commitment.
//! - Each participant checks all sub-shares against the revealed
//!   vectors, sums them into its final share, and broadcasts a Schnorr
//!   proof of knowledge of that share (completed from a round-one
//!   precommitment) plus a Paillier correct-key proof.
//! - Everyone verifies everyone's proofs and assembles the save bundle;
//!   the group public key is the sum of the dealers' constant-term
//!   commitments, so every honest party derives the same one.
//!
//! Any invalid share or proof aborts the run, naming the sender; no save
//! data is produced.

pub(crate) mod commit;
mod keyshare;
mod output;
mod participant;
pub(crate) mod share;

pub use keyshare::{KeySharePrivate, KeySharePublic};
pub use output::Output;
pub use participant::{Input, KeygenParticipant};

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, TestCurve},
        messages::Message,
        participant::{ProcessOutcome, ProtocolParticipant, Status},
        preparams::LocalPreParams,
        protocol::{testing::quorum_parameters, Identifier, ParticipantIdentifier},
        utils::testing::init_testing,
        vss,
    };
    use rand::{CryptoRng, Rng, RngCore};
    use std::collections::HashMap;

    type Keygen = KeygenParticipant<TestCurve>;

    pub(crate) fn new_quorum<R: RngCore + CryptoRng>(
        n: usize,
        threshold: usize,
        sid: Identifier,
        rng: &mut R,
    ) -> Vec<Keygen> {
        let mut params = quorum_parameters(n, threshold, rng);
        for param in params.iter_mut() {
            param.set_no_proof_mod();
            param.set_no_proof_fac();
        }
        params
            .into_iter()
            .map(|param| {
                let preparams = LocalPreParams::simulate(rng).unwrap();
                let id = param.self_id();
                let others = param.other_ids();
                Keygen::new(sid, id, others, Input::new(param, preparams)).unwrap()
            })
            .collect()
    }

    pub(crate) fn run_keygen<R: RngCore + CryptoRng>(
        quorum: &mut [Keygen],
        rng: &mut R,
    ) -> HashMap<ParticipantIdentifier, Output<TestCurve>> {
        let sid = quorum[0].sid();
        let mut inbox = Vec::new();
        for participant in quorum.iter() {
            inbox.push(
                Message::new(
                    Keygen::ready_type(),
                    sid,
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap(),
            );
        }

        let mut outputs = HashMap::new();
        while !quorum
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
        {
            if inbox.is_empty() {
                panic!("keygen deadlocked with no messages in flight");
            }
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            let participant = quorum
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            match participant.process_message(rng, &message).unwrap() {
                ProcessOutcome::Incomplete => {}
                ProcessOutcome::Processed(messages) => inbox.extend(messages),
                ProcessOutcome::Terminated(output) => {
                    assert!(outputs.insert(participant.id(), output).is_none())
                }
                ProcessOutcome::TerminatedForThisParticipant(output, messages) => {
                    inbox.extend(messages);
                    assert!(outputs.insert(participant.id(), output).is_none());
                }
            }
        }
        outputs
    }

    #[test]
    fn keygen_produces_consistent_save_data() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let mut quorum = new_quorum(3, 1, sid, &mut rng);
        let outputs = run_keygen(&mut quorum, &mut rng);
        assert_eq!(outputs.len(), 3);

        // Everybody agrees on the public key, bit for bit.
        let reference = outputs.values().next().unwrap();
        let y_bytes = reference.public_key_point().to_bytes();
        for output in outputs.values() {
            assert_eq!(output.public_key_point().to_bytes(), y_bytes);
            assert_eq!(output.public_shares().len(), 3);
        }

        // Every private share matches its public record everywhere.
        for (pid, output) in &outputs {
            let expected = TestCurve::generator()
                .multiply_by_scalar(output.private_share().as_scalar());
            for other in outputs.values() {
                assert_eq!(other.find_public_share(*pid).unwrap().as_ref(), &expected);
            }
        }

        // Any t + 1 = 2 shares reconstruct a scalar matching the public
        // key.
        let shares: Vec<_> = outputs
            .iter()
            .map(|(pid, output)| (*pid, *output.private_share().as_scalar()))
            .collect();
        for window in shares.windows(2) {
            let secret = vss::reconstruct::<TestCurve>(window).unwrap();
            assert_eq!(
                &TestCurve::generator().multiply_by_scalar(&secret),
                reference.public_key_point()
            );
        }
    }

    #[test]
    fn tampered_sub_share_aborts_with_the_dealer_blamed() {
        use crate::errors::InternalError;
        use crate::messages::{KeygenMessageType, MessageType};

        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let mut quorum = new_quorum(3, 1, sid, &mut rng);
        let cheater = quorum[0].id();

        let mut inbox = Vec::new();
        for participant in quorum.iter() {
            inbox.push(
                Message::new(
                    Keygen::ready_type(),
                    sid,
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap(),
            );
        }

        let mut aborted = 0;
        while !inbox.is_empty() {
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            // Replace the cheater's outbound sub-shares with shares for
            // the wrong evaluation point (another recipient's).
            let message = if message.from() == cheater
                && message.message_type()
                    == MessageType::Keygen(KeygenMessageType::R2PrivateShare)
            {
                let victim = message.to();
                let cheater_participant = quorum
                    .iter_mut()
                    .find(|participant| participant.id() == cheater)
                    .unwrap();
                let other_recipient = cheater_participant
                    .other_ids()
                    .iter()
                    .copied()
                    .find(|pid| *pid != victim)
                    .unwrap();
                cheater_participant
                    .resend_share_for_test(other_recipient, victim, &mut rng)
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
                // Deliveries to an already-aborted party are refused
                // without state change.
                Err(InternalError::CallingApplicationMistake(
                    crate::errors::CallerError::ProtocolAlreadyAborted,
                )) => {}
                Err(other) => panic!("unexpected keygen error: {other}"),
            }
        }
        // Both honest parties must have aborted and named the cheater.
        assert_eq!(aborted, 2);
    }
}
