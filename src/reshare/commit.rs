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
    vss::CommitmentVector,
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Round-one hash commitment to a dealer's fresh dealing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct ReshareCommit {
    hash: [u8; 32],
}

/// The dealer's Feldman vector, blinded under the round-one hash until
/// round three.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
pub(crate) struct ReshareDecommit<C: CurveTrait> {
    pub sid: Identifier,
    pub sender: ParticipantIdentifier,
    blind: [u8; 32],
    pub vector: CommitmentVector<C>,
}

impl<C: CurveTrait> ReshareDecommit<C> {
    pub(crate) fn new<R: RngCore + CryptoRng>(
        rng: &mut R,
        sid: Identifier,
        sender: ParticipantIdentifier,
        vector: CommitmentVector<C>,
    ) -> Self {
        let mut blind = [0u8; 32];
        rng.fill_bytes(blind.as_mut_slice());
        Self {
            sid,
            sender,
            blind,
            vector,
        }
    }

    pub(crate) fn commit(&self) -> Result<ReshareCommit> {
        let mut transcript = Transcript::new(b"ReshareR1");
        transcript.append_message(b"decommit", &serialize!(&self)?);
        let mut hash = [0u8; 32];
        transcript.challenge_bytes(b"hashing r1", &mut hash);
        Ok(ReshareCommit { hash })
    }

    pub(crate) fn verify(
        &self,
        sid: Identifier,
        sender: ParticipantIdentifier,
        com: &ReshareCommit,
        expected_degree: usize,
    ) -> Result<()> {
        let rebuilt = self.commit()?;
        if &rebuilt != com {
            error!("resharing decommitment does not match its commitment");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        if self.sid != sid || self.sender != sender {
            error!("resharing decommitment carries wrong metadata");
            return Err(InternalError::ProtocolError(Some(sender)));
        }
        self.vector
            .check_degree(expected_degree)
            .map_err(|_| InternalError::ProtocolError(Some(sender)))?;
        Ok(())
    }
}
