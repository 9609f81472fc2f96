// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{InternalError, Result},
    messages::{KeygenMessageType, Message, MessageType},
    protocol::{Identifier, ParticipantIdentifier},
    vss::CommitmentVector,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

/// Round-one hash commitment to a [`KeygenDecommit`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct KeygenCommit {
    hash: [u8; 32],
}

/// The value committed to in round one and revealed in round two: the
/// dealer's Feldman vector and its Schnorr nonce commitment, blinded by
/// fresh randomness so the hash hides them.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct KeygenDecommit<C: CurveTrait> {
    pub sid: Identifier,
    pub sender: ParticipantIdentifier,
    blind: [u8; 32],
    pub vector: CommitmentVector<C>,
    pub precommit_a: C,
}

impl<C: CurveTrait> KeygenDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sid: &Identifier,
        sender: &ParticipantIdentifier,
        vector: &CommitmentVector<C>,
        precommit_a: &C,
    ) -> Self {
        let mut blind = [0u8; 32];
        rng.fill_bytes(blind.as_mut_slice());
        Self {
            sid: *sid,
            sender: *sender,
            blind,
            vector: vector.clone(),
            precommit_a: *precommit_a,
        }
    }

    /// Deserialize a decommitment from a message and verify it against
    /// the round-one commitment.
    pub(crate) fn from_message(
        message: &Message,
        com: &KeygenCommit,
        expected_degree: usize,
    ) -> Result<Self> {
        message.check_type(MessageType::Keygen(KeygenMessageType::R2Decommit))?;
        let decommit: KeygenDecommit<C> = deserialize!(&message.unverified_bytes)?;
        decommit.verify(message.id(), message.from(), com, expected_degree)?;
        Ok(decommit)
    }

    pub(crate) fn commit(&self) -> Result<KeygenCommit> {
        let mut transcript = Transcript::new(b"KeygenR1");
        transcript.append_message(b"decommit", &serialize!(&self)?);
        let mut hash = [0u8; 32];
        transcript.challenge_bytes(b"hashing r1", &mut hash);
        Ok(KeygenCommit { hash })
    }

    /// Verify this decommitment against a commitment and the expected
    /// content.
    #[instrument(skip_all, err(Debug))]
    fn verify(
        &self,
        sid: Identifier,
        sender: ParticipantIdentifier,
        com: &KeygenCommit,
        expected_degree: usize,
    ) -> Result<()> {
        let rebuilt = self.commit()?;
        if &rebuilt != com {
            error!("decommitment does not match the round-one commitment");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        if self.sid != sid {
            error!("decommitment carries the wrong session");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        if self.sender != sender {
            error!("decommitment carries the wrong sender");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        self.vector
            .check_degree(expected_degree)
            .map_err(|_| InternalError::ProtocolError(Some(sender)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{CurveTrait, ScalarTrait, TestCurve},
        utils::testing::init_testing,
        vss::Polynomial,
    };

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    #[test]
    fn decommit_roundtrips_through_its_commitment() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let sender = ParticipantIdentifier::random(&mut rng);
        let receiver = ParticipantIdentifier::random(&mut rng);
        let polynomial = Polynomial::<TestCurve>::random(Scalar::random(&mut rng), 2, &mut rng);
        let precommit = TestCurve::random(&mut rng);

        let decommit =
            KeygenDecommit::new(&mut rng, &sid, &sender, &polynomial.commitment(), &precommit);
        let com = decommit.commit().unwrap();

        let message = Message::new(
            MessageType::Keygen(KeygenMessageType::R2Decommit),
            sid,
            sender,
            receiver,
            &decommit,
        )
        .unwrap();
        assert!(KeygenDecommit::<TestCurve>::from_message(&message, &com, 2).is_ok());
        // Wrong degree expectation fails.
        assert!(KeygenDecommit::<TestCurve>::from_message(&message, &com, 3).is_err());

        // A different decommitment against the same commitment fails.
        let other =
            KeygenDecommit::new(&mut rng, &sid, &sender, &polynomial.commitment(), &precommit);
        let message = Message::new(
            MessageType::Keygen(KeygenMessageType::R2Decommit),
            sid,
            sender,
            receiver,
            &other,
        )
        .unwrap();
        assert!(matches!(
            KeygenDecommit::<TestCurve>::from_message(&message, &com, 2),
            Err(InternalError::ProtocolError(Some(pid))) if pid == sender
        ));
    }
}
