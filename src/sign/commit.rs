// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::CurveTrait,
    errors::{InternalError, Result},
    protocol::{Identifier, ParticipantIdentifier},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Which of the signing protocol's commit/reveal exchanges a commitment
/// belongs to. Mixing them up would let values be replayed across
/// phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CommitPhase {
    /// Round 1/4: the nonce commitment `Gamma`.
    Gamma,
    /// Round 5/6: the check values `(V, A)`.
    CheckValues,
    /// Round 7/8: the blinded check values `(U, T)`.
    BlindedValues,
    /// EdDSA signing rounds 1/2: the nonce point `R`.
    Nonce,
}

/// Hash commitment to a [`PointsDecommit`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct PointsCommit {
    hash: [u8; 32],
}

/// A blinded commitment to a short vector of curve points, opened in a
/// later round.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct PointsDecommit<C: CurveTrait> {
    pub sid: Identifier,
    pub sender: ParticipantIdentifier,
    phase: CommitPhase,
    blind: [u8; 32],
    pub points: Vec<C>,
}

impl<C: CurveTrait> PointsDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sid: Identifier,
        sender: ParticipantIdentifier,
        phase: CommitPhase,
        points: Vec<C>,
    ) -> Self {
        let mut blind = [0u8; 32];
        rng.fill_bytes(blind.as_mut_slice());
        Self {
            sid,
            sender,
            phase,
            blind,
            points,
        }
    }

    pub(crate) fn commit(&self) -> Result<PointsCommit> {
        let mut transcript = Transcript::new(b"sign commit");
        transcript.append_message(b"decommit", &serialize!(&self)?);
        let mut hash = [0u8; 32];
        transcript.challenge_bytes(b"hashing", &mut hash);
        Ok(PointsCommit { hash })
    }

    /// Verify an opened commitment against the hash from the earlier
    /// round and the expected metadata.
    pub(crate) fn verify(
        &self,
        sid: Identifier,
        sender: ParticipantIdentifier,
        phase: CommitPhase,
        expected_len: usize,
        com: &PointsCommit,
    ) -> Result<()> {
        let rebuilt = self.commit()?;
        if &rebuilt != com {
            error!("decommitment does not match the committed hash");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        if self.sid != sid || self.sender != sender || self.phase != phase {
            error!("decommitment metadata does not match its exchange");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        if self.points.len() != expected_len {
            error!(
                "decommitment opened {} points where {} were expected",
                self.points.len(),
                expected_len
            );
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    #[test]
    fn decommit_phase_and_content_are_bound() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let sender = ParticipantIdentifier::random(&mut rng);
        let points = vec![TestCurve::random(&mut rng), TestCurve::random(&mut rng)];

        let decommit = PointsDecommit::new(
            &mut rng,
            sid,
            sender,
            CommitPhase::CheckValues,
            points.clone(),
        );
        let com = decommit.commit().unwrap();

        assert!(decommit
            .verify(sid, sender, CommitPhase::CheckValues, 2, &com)
            .is_ok());
        // Wrong phase, wrong arity, wrong sender all fail.
        assert!(decommit
            .verify(sid, sender, CommitPhase::BlindedValues, 2, &com)
            .is_err());
        assert!(decommit
            .verify(sid, sender, CommitPhase::CheckValues, 1, &com)
            .is_err());
        let other = ParticipantIdentifier::random(&mut rng);
        assert!(decommit
            .verify(sid, other, CommitPhase::CheckValues, 2, &com)
            .is_err());

        // A decommitment to different points does not open the hash.
        let forged = PointsDecommit::new(
            &mut rng,
            sid,
            sender,
            CommitPhase::CheckValues,
            vec![TestCurve::random(&mut rng), TestCurve::random(&mut rng)],
        );
        assert!(forged
            .verify(sid, sender, CommitPhase::CheckValues, 2, &com)
            .is_err());
    }
}
