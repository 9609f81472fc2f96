// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Resharing: refresh shares and/or change the committee without
//! changing the public key.
//!
//! A quorum of the old committee re-deals the key to a new committee
//! with its own size and threshold. Every dealing is pinned to the old
//! public key record, so the new committee can check — dealer by
//! dealer — that what it received still assembles the key it expects.
//! Old shares become stale the moment the new committee acknowledges;
//! parties leaving the committee should destroy theirs.
//!
//! Resharing is also the upgrade path for save data predating the
//! mandatory Paillier primes: rejoin the new committee with fresh
//! pre-parameters.

mod commit;
mod participant;

pub use participant::{Input, Output, ReshareParticipant};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, TestCurve},
        keygen,
        messages::Message,
        participant::{ProtocolParticipant, Status},
        preparams::LocalPreParams,
        protocol::{
            Identifier, ParticipantIdentifier, PartyId, PeerContext, ReshareParameters,
        },
        sign,
        utils::testing::init_testing,
        vss,
    };
    use k256::ecdsa::signature::DigestVerifier;
    use rand::{CryptoRng, Rng, RngCore};
    use sha2::{Digest, Sha256};
    use std::collections::HashMap;

    type Reshare = ReshareParticipant<TestCurve>;

    fn run_to_completion<R: RngCore + CryptoRng>(
        quorum: &mut [Reshare],
        rng: &mut R,
    ) -> HashMap<ParticipantIdentifier, Output<TestCurve>> {
        let sid = quorum[0].sid();
        let mut inbox: Vec<_> = quorum
            .iter()
            .map(|participant| {
                Message::new(
                    Reshare::ready_type(),
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
                panic!("resharing deadlocked with no messages in flight");
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
    fn resharing_preserves_the_public_key_and_supports_signing() {
        let mut rng = init_testing();

        // Key generation with the original committee: n = 3, t = 1.
        let keygen_sid = Identifier::random(&mut rng);
        let mut keygen_quorum = keygen::tests::new_quorum(3, 1, keygen_sid, &mut rng);
        let keygen_outputs = keygen::tests::run_keygen(&mut keygen_quorum, &mut rng);
        let old_committee: Vec<_> = keygen_outputs.keys().copied().collect();
        let reference = keygen_outputs.values().next().unwrap();
        let old_peers = reference.peers().clone();
        let y_bytes = reference.public_key_point().to_bytes();

        // A fresh committee of four, threshold two.
        let new_peers = PeerContext::new(
            (0..4)
                .map(|i| {
                    PartyId::new(format!("new-{i}"), ParticipantIdentifier::random(&mut rng))
                })
                .collect(),
        )
        .unwrap();

        let sid = Identifier::random(&mut rng);
        let union: Vec<_> = {
            let mut ids = old_peers.ids();
            ids.extend(new_peers.ids());
            ids.sort();
            ids.dedup();
            ids
        };
        let mut quorum: Vec<_> = union
            .iter()
            .map(|&pid| {
                let mut params = ReshareParameters::new(
                    old_peers.clone(),
                    1,
                    new_peers.clone(),
                    2,
                    pid,
                )
                .unwrap();
                params.set_no_proof_mod();
                let save = keygen_outputs.get(&pid).cloned();
                let preparams = params
                    .is_new_party(pid)
                    .then(|| LocalPreParams::simulate(&mut rng).unwrap());
                let others: Vec<_> = union.iter().copied().filter(|p| *p != pid).collect();
                Reshare::new(sid, pid, others, Input::new(params, save, preparams).unwrap())
                    .unwrap()
            })
            .collect();

        let outputs = run_to_completion(&mut quorum, &mut rng);

        // Old members produce nothing; new members produce save data
        // under the unchanged public key.
        let mut new_saves = HashMap::new();
        for (pid, output) in outputs {
            match output {
                Output::Old => assert!(old_committee.contains(&pid)),
                Output::New(save) => {
                    assert_eq!(save.public_key_point().to_bytes(), y_bytes);
                    assert_eq!(save.threshold(), 2);
                    assert_eq!(save.peers(), &new_peers);
                    assert!(new_saves.insert(pid, save).is_none());
                }
            }
        }
        assert_eq!(new_saves.len(), 4);

        // The new shares reconstruct the same secret.
        let shares: Vec<_> = new_saves
            .iter()
            .map(|(pid, save)| (*pid, *save.private_share().as_scalar()))
            .collect();
        let secret = vss::reconstruct::<TestCurve>(&shares[..3]).unwrap();
        assert_eq!(
            TestCurve::generator().multiply_by_scalar(&secret).to_bytes(),
            y_bytes
        );

        // Three of the four new members sign, and the signature verifies
        // under the original key.
        let signer_ids: Vec<_> = new_saves.keys().copied().take(3).collect();
        let digest: [u8; 32] = Sha256::digest(b"post-reshare message").into();
        let sign_sid = Identifier::random(&mut rng);
        let mut signers: Vec<_> = signer_ids
            .iter()
            .map(|pid| {
                let others: Vec<_> =
                    signer_ids.iter().copied().filter(|p| p != pid).collect();
                let input = sign::Input::new(digest, new_saves[pid].clone());
                sign::SignParticipant::<TestCurve>::new(sign_sid, *pid, others, input).unwrap()
            })
            .collect();

        let mut inbox: Vec<_> = signers
            .iter()
            .map(|participant| {
                Message::new(
                    sign::SignParticipant::<TestCurve>::ready_type(),
                    sign_sid,
                    participant.id(),
                    participant.id(),
                    &(),
                )
                .unwrap()
            })
            .collect();
        let mut signature = None;
        while !signers
            .iter()
            .all(|participant| *participant.status() == Status::TerminatedSuccessfully)
        {
            if inbox.is_empty() {
                panic!("post-reshare signing deadlocked");
            }
            let message = inbox.swap_remove(rng.gen_range(0..inbox.len()));
            let participant = signers
                .iter_mut()
                .find(|participant| participant.id() == message.to())
                .unwrap();
            let (output, messages) = participant
                .process_message(&mut rng, &message)
                .unwrap()
                .into_parts();
            inbox.extend(messages);
            if let Some(output) = output {
                signature = Some(output);
            }
        }

        let verifying_key = reference.public_key().unwrap();
        assert!(verifying_key
            .verify_digest(
                Sha256::new_with_prefix(b"post-reshare message"),
                &signature.unwrap().0
            )
            .is_ok());
    }

    #[test]
    fn old_member_without_save_data_is_rejected() {
        let mut rng = init_testing();
        let old_peers = PeerContext::new(
            (0..3)
                .map(|i| {
                    PartyId::new(format!("old-{i}"), ParticipantIdentifier::random(&mut rng))
                })
                .collect(),
        )
        .unwrap();
        let new_peers = PeerContext::new(
            (0..3)
                .map(|i| {
                    PartyId::new(format!("new-{i}"), ParticipantIdentifier::random(&mut rng))
                })
                .collect(),
        )
        .unwrap();
        let dealer = old_peers.ids()[0];
        let params =
            ReshareParameters::new(old_peers, 1, new_peers, 1, dealer).unwrap();
        assert!(Input::<TestCurve>::new(params, None, None).is_err());
    }
}
