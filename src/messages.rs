// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Message types sent between participants.
//!
//! A [`Message`] is the unit the transport moves: routing metadata (session
//! identifier, sender, recipient, broadcast flag, typed kind) around an
//! opaque payload. Payload bytes stay unparsed — and are named
//! `unverified_bytes` as a reminder — until a round handler checks the
//! message's type tag and deserializes them into the round's expected
//! structure.

use crate::{
    errors::{CallerError, InternalError, Result},
    protocol::{Identifier, ParticipantIdentifier},
};
use serde::{Deserialize, Serialize};
use tracing::error;

/// The type of a protocol message, namespaced by protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum MessageType {
    /// ECDSA distributed key generation.
    Keygen(KeygenMessageType),
    /// ECDSA signing.
    Sign(SignMessageType),
    /// Resharing onto a new committee.
    Reshare(ReshareMessageType),
    /// EdDSA distributed key generation.
    EddsaKeygen(EddsaKeygenMessageType),
    /// EdDSA signing.
    EddsaSign(EddsaSignMessageType),
}

/// Message types for the four-round ECDSA keygen protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum KeygenMessageType {
    /// Local bootstrap signal; never sent to peers.
    Ready,
    /// Broadcast commitment to the Feldman vector, plus Paillier and
    /// ring-Pedersen material with their setup proofs.
    R1CommitHash,
    /// Unicast encrypted polynomial evaluation (with factor-size proof).
    R2PrivateShare,
    /// Broadcast decommitment revealing the Feldman vector.
    R2Decommit,
    /// Broadcast Schnorr proof of the aggregated share, plus the Paillier
    /// correct-key proof.
    R3Proofs,
}

/// Message types for the nine-round ECDSA signing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SignMessageType {
    /// Local bootstrap signal; never sent to peers.
    Ready,
    /// Broadcast commitment to `Gamma_i`.
    R1CommitGamma,
    /// Unicast Paillier encryption of `k_i` with its range proof.
    R1EncK,
    /// Unicast multiplicative-to-additive responses for the pair
    /// `(k_j, gamma_i)` and `(k_j, w_i)`.
    R2MtaResponse,
    /// Broadcast share `delta_i` of `k * gamma`.
    R3Delta,
    /// Broadcast decommitment revealing `Gamma_i`.
    R4DecommitGamma,
    /// Broadcast commitment to the check values `(V_i, A_i)`.
    R5CommitVA,
    /// Broadcast decommitment of `(V_i, A_i)` with its representation
    /// proof.
    R6DecommitVA,
    /// Broadcast commitment to the blinded check values `(U_i, T_i)`.
    R7CommitUT,
    /// Broadcast decommitment of `(U_i, T_i)` with its dlog-equality
    /// proof.
    R8DecommitUT,
    /// Broadcast signature share `s_i`.
    R9Share,
}

/// Message types for the four-round resharing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum ReshareMessageType {
    /// Local bootstrap signal; never sent to peers.
    Ready,
    /// Broadcast (old committee): commitment to the fresh dealing.
    R1CommitHash,
    /// Broadcast (new committee): Paillier and ring-Pedersen material with
    /// setup proofs.
    R2AuxInfo,
    /// Broadcast (old committee): decommitment revealing the Feldman
    /// vector.
    R3Decommit,
    /// Unicast (old to new): encrypted sub-share with factor-size proof.
    R3PrivateShare,
    /// Broadcast (new committee): acknowledgement that all dealings
    /// verified.
    R4Ack,
}

/// Message types for the three-round EdDSA keygen protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EddsaKeygenMessageType {
    /// Local bootstrap signal; never sent to peers.
    Ready,
    /// Broadcast commitment to the Feldman vector.
    R1CommitHash,
    /// Unicast polynomial evaluation.
    R2PrivateShare,
    /// Broadcast decommitment revealing the Feldman vector.
    R2Decommit,
    /// Broadcast Schnorr proof of the aggregated share.
    R3Proof,
}

/// Message types for the three-round EdDSA signing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum EddsaSignMessageType {
    /// Local bootstrap signal; never sent to peers.
    Ready,
    /// Broadcast commitment to the nonce point `R_i`.
    R1CommitNonce,
    /// Broadcast decommitment of `R_i` with a Schnorr proof of `r_i`.
    R2DecommitNonce,
    /// Broadcast signature share `s_i`.
    R3Share,
}

impl MessageType {
    /// Whether this is a protocol's local bootstrap type.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            MessageType::Keygen(KeygenMessageType::Ready)
                | MessageType::Sign(SignMessageType::Ready)
                | MessageType::Reshare(ReshareMessageType::Ready)
                | MessageType::EddsaKeygen(EddsaKeygenMessageType::Ready)
                | MessageType::EddsaSign(EddsaSignMessageType::Ready)
        )
    }

    /// The protocol round this message belongs to. Ready types are round
    /// zero.
    pub fn round(&self) -> u8 {
        match self {
            MessageType::Keygen(t) => match t {
                KeygenMessageType::Ready => 0,
                KeygenMessageType::R1CommitHash => 1,
                KeygenMessageType::R2PrivateShare | KeygenMessageType::R2Decommit => 2,
                KeygenMessageType::R3Proofs => 3,
            },
            MessageType::Sign(t) => match t {
                SignMessageType::Ready => 0,
                SignMessageType::R1CommitGamma | SignMessageType::R1EncK => 1,
                SignMessageType::R2MtaResponse => 2,
                SignMessageType::R3Delta => 3,
                SignMessageType::R4DecommitGamma => 4,
                SignMessageType::R5CommitVA => 5,
                SignMessageType::R6DecommitVA => 6,
                SignMessageType::R7CommitUT => 7,
                SignMessageType::R8DecommitUT => 8,
                SignMessageType::R9Share => 9,
            },
            MessageType::Reshare(t) => match t {
                ReshareMessageType::Ready => 0,
                ReshareMessageType::R1CommitHash => 1,
                ReshareMessageType::R2AuxInfo => 2,
                ReshareMessageType::R3Decommit | ReshareMessageType::R3PrivateShare => 3,
                ReshareMessageType::R4Ack => 4,
            },
            MessageType::EddsaKeygen(t) => match t {
                EddsaKeygenMessageType::Ready => 0,
                EddsaKeygenMessageType::R1CommitHash => 1,
                EddsaKeygenMessageType::R2PrivateShare | EddsaKeygenMessageType::R2Decommit => 2,
                EddsaKeygenMessageType::R3Proof => 3,
            },
            MessageType::EddsaSign(t) => match t {
                EddsaSignMessageType::Ready => 0,
                EddsaSignMessageType::R1CommitNonce => 1,
                EddsaSignMessageType::R2DecommitNonce => 2,
                EddsaSignMessageType::R3Share => 3,
            },
        }
    }
}

/// A protocol message: routing metadata around an opaque, typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    message_type: MessageType,
    identifier: Identifier,
    from: ParticipantIdentifier,
    to: ParticipantIdentifier,
    is_broadcast: bool,
    /// Payload bytes. Not validated beyond "it came off the wire"; round
    /// handlers must [`check_type`](Message::check_type) and deserialize.
    pub(crate) unverified_bytes: Vec<u8>,
}

impl Message {
    /// Create a point-to-point message.
    ///
    /// Protocol messages may not be self-addressed; only the local Ready
    /// bootstrap is.
    pub fn new(
        message_type: MessageType,
        identifier: Identifier,
        from: ParticipantIdentifier,
        to: ParticipantIdentifier,
        payload: &impl Serialize,
    ) -> Result<Self> {
        Self::build(message_type, identifier, from, to, false, payload)
    }

    /// Create one recipient's copy of a broadcast message.
    pub(crate) fn new_broadcast(
        message_type: MessageType,
        identifier: Identifier,
        from: ParticipantIdentifier,
        to: ParticipantIdentifier,
        payload: &impl Serialize,
    ) -> Result<Self> {
        Self::build(message_type, identifier, from, to, true, payload)
    }

    fn build(
        message_type: MessageType,
        identifier: Identifier,
        from: ParticipantIdentifier,
        to: ParticipantIdentifier,
        is_broadcast: bool,
        payload: &impl Serialize,
    ) -> Result<Self> {
        if from == to && !message_type.is_ready() {
            error!("tried to create a self-addressed {message_type:?} message");
            Err(CallerError::BadInput)?;
        }
        Ok(Self {
            message_type,
            identifier,
            from,
            to,
            is_broadcast,
            unverified_bytes: serialize!(payload)?,
        })
    }

    /// The message's type.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The session this message belongs to.
    pub fn id(&self) -> Identifier {
        self.identifier
    }

    /// The sender.
    pub fn from(&self) -> ParticipantIdentifier {
        self.from
    }

    /// The recipient.
    pub fn to(&self) -> ParticipantIdentifier {
        self.to
    }

    /// Whether this message was sent to the whole committee.
    pub fn is_broadcast(&self) -> bool {
        self.is_broadcast
    }

    /// Fail unless the message has the expected type.
    pub(crate) fn check_type(&self, expected: MessageType) -> Result<()> {
        if self.message_type != expected {
            error!(
                "expected a {:?} message but got a {:?} message",
                expected, self.message_type
            );
            return Err(InternalError::InternalInvariantFailed);
        }
        Ok(())
    }

    /// Encode for the wire: a self-describing envelope with every
    /// variable-length field length-prefixed.
    pub fn to_wire_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }

    /// Decode a message from wire bytes produced by
    /// [`to_wire_bytes`](Message::to_wire_bytes).
    ///
    /// The payload stays unparsed; session, sender and type checks happen
    /// when the message is fed to a participant.
    pub fn from_wire_bytes(bytes: &[u8]) -> Result<Self> {
        deserialize!(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn wire_roundtrip_preserves_everything() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let from = ParticipantIdentifier::random(&mut rng);
        let to = ParticipantIdentifier::random(&mut rng);
        let message = Message::new(
            MessageType::Keygen(KeygenMessageType::R2PrivateShare),
            sid,
            from,
            to,
            &vec![1u8, 2, 3],
        )
        .unwrap();

        let bytes = message.to_wire_bytes().unwrap();
        let decoded = Message::from_wire_bytes(&bytes).unwrap();

        assert_eq!(decoded.message_type(), message.message_type());
        assert_eq!(decoded.id(), message.id());
        assert_eq!(decoded.from(), from);
        assert_eq!(decoded.to(), to);
        assert!(!decoded.is_broadcast());
        assert_eq!(decoded.unverified_bytes, message.unverified_bytes);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(Message::from_wire_bytes(&[0xff; 7]).is_err());
    }

    #[test]
    fn self_addressed_protocol_messages_are_forbidden() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let pid = ParticipantIdentifier::random(&mut rng);

        assert!(Message::new(
            MessageType::Keygen(KeygenMessageType::R1CommitHash),
            sid,
            pid,
            pid,
            &()
        )
        .is_err());
        // The bootstrap signal is the one exception.
        assert!(Message::new(
            MessageType::Keygen(KeygenMessageType::Ready),
            sid,
            pid,
            pid,
            &()
        )
        .is_ok());
    }

    #[test]
    fn rounds_are_ordered() {
        assert!(
            MessageType::Sign(SignMessageType::R1CommitGamma).round()
                < MessageType::Sign(SignMessageType::R9Share).round()
        );
        assert!(MessageType::Keygen(KeygenMessageType::Ready).is_ready());
        assert!(!MessageType::Keygen(KeygenMessageType::R3Proofs).is_ready());
    }
}
