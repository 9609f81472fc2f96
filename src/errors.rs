// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Error types for the crate.
//!
//! Errors are split along the question "whose fault is it?". A
//! [`CallerError`] points at the calling application: a bad configuration,
//! bytes that do not decode, a message delivered twice. An
//! [`InternalError`] covers everything the protocol itself can report,
//! including cryptographic failures attributable to a specific misbehaving
//! participant; those carry the culprit so callers can run identifiable
//! abort.

use crate::{protocol::ParticipantIdentifier, zkp::ProofKind};
use std::fmt::{Display, Formatter};

/// The default Result type used in this crate.
pub type Result<T> = std::result::Result<T, InternalError>;

/// Errors that arise from the protocol execution itself or from misbehavior
/// of other participants.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum InternalError {
    /// The calling application passed something unusable; see the wrapped
    /// [`CallerError`].
    CallingApplicationMistake(CallerError),
    /// Serialization or deserialization of an internal type failed.
    Serialization,
    /// A zero-knowledge proof failed to verify. If a culprit is set, the
    /// named participant produced the proof.
    FailedProof(ProofKind, Option<ParticipantIdentifier>),
    /// A verifiable secret sharing share did not match its dealer's
    /// published commitment vector.
    InvalidVssShare(ParticipantIdentifier),
    /// A participant broke the protocol in a way that is not a proof
    /// failure, such as opening a commitment to a different value or
    /// contributing a value that fails a consistency check.
    ProtocolError(Option<ParticipantIdentifier>),
    /// The safe-prime search did not finish before the caller's deadline.
    PreParamsGenerationTimedOut,
    /// Encountered a state that should be impossible. Always a bug in this
    /// crate, never expected behavior.
    InternalInvariantFailed,
}

/// Errors that point at a mistake by the calling application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CallerError {
    /// Protocol input does not satisfy its documented requirements.
    BadInput,
    /// The participant set is invalid: empty, contains duplicates, or does
    /// not contain the local party.
    ParticipantConfigError,
    /// The threshold is out of the range `1..=n - 1`.
    BadThreshold,
    /// Received bytes that could not be deserialized into the expected
    /// type.
    DeserializationFailed,
    /// A message carried a session identifier that does not belong to this
    /// protocol instance.
    WrongSessionId,
    /// A message claimed a sender outside the participant set.
    UnknownSender,
    /// A message of this type was already received from this sender.
    DuplicateMessage,
    /// A message was addressed to a different participant.
    WrongRecipient,
    /// The protocol instance already terminated and cannot process further
    /// messages.
    ProtocolAlreadyTerminated,
    /// The protocol instance aborted due to earlier misbehavior and cannot
    /// process further messages.
    ProtocolAlreadyAborted,
    /// A randomized sampling procedure exceeded its retry bound.
    RetryFailed,
}

impl InternalError {
    /// The set of participants this error blames, for identifiable abort.
    ///
    /// Empty when the failure cannot be attributed (e.g. an aggregate
    /// consistency check) or when the error is not a protocol failure.
    pub fn culprits(&self) -> Vec<ParticipantIdentifier> {
        match self {
            InternalError::FailedProof(_, Some(pid))
            | InternalError::InvalidVssShare(pid)
            | InternalError::ProtocolError(Some(pid)) => vec![*pid],
            _ => Vec::new(),
        }
    }

    /// Attach a culprit to a proof failure that was produced without one.
    ///
    /// Proof modules verify statements without knowing which participant
    /// sent them; the participant layer uses this to fill in the sender.
    pub(crate) fn blame(self, pid: ParticipantIdentifier) -> Self {
        match self {
            InternalError::FailedProof(kind, None) => {
                InternalError::FailedProof(kind, Some(pid))
            }
            InternalError::ProtocolError(None) => InternalError::ProtocolError(Some(pid)),
            other => other,
        }
    }
}

impl Display for InternalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InternalError::CallingApplicationMistake(e) => {
                write!(f, "caller error: {e}")
            }
            InternalError::Serialization => {
                write!(f, "failed to serialize or deserialize an internal type")
            }
            InternalError::FailedProof(kind, Some(pid)) => {
                write!(f, "{kind} proof from {pid} failed to verify")
            }
            InternalError::FailedProof(kind, None) => {
                write!(f, "{kind} proof failed to verify")
            }
            InternalError::InvalidVssShare(pid) => {
                write!(f, "secret share from {pid} does not match its commitment")
            }
            InternalError::ProtocolError(Some(pid)) => {
                write!(f, "participant {pid} broke the protocol")
            }
            InternalError::ProtocolError(None) => write!(f, "protocol consistency check failed"),
            InternalError::PreParamsGenerationTimedOut => {
                write!(f, "safe-prime search exceeded the caller's deadline")
            }
            InternalError::InternalInvariantFailed => {
                write!(f, "internal invariant violated (this is a bug)")
            }
        }
    }
}

impl Display for CallerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            CallerError::BadInput => "protocol input does not satisfy its requirements",
            CallerError::ParticipantConfigError => "invalid participant set",
            CallerError::BadThreshold => "threshold out of range",
            CallerError::DeserializationFailed => "received undecodable bytes",
            CallerError::WrongSessionId => "message belongs to a different session",
            CallerError::UnknownSender => "message sender is not in the participant set",
            CallerError::DuplicateMessage => "message was already received from this sender",
            CallerError::WrongRecipient => "message was addressed to a different participant",
            CallerError::ProtocolAlreadyTerminated => "protocol already terminated",
            CallerError::ProtocolAlreadyAborted => "protocol aborted",
            CallerError::RetryFailed => "sampling exceeded its retry bound",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for InternalError {}
impl std::error::Error for CallerError {}

impl From<CallerError> for InternalError {
    fn from(e: CallerError) -> Self {
        InternalError::CallingApplicationMistake(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParticipantIdentifier;

    #[test]
    fn culprits_are_surfaced() {
        let pid = ParticipantIdentifier::from_u128(7);
        assert_eq!(
            InternalError::InvalidVssShare(pid).culprits(),
            vec![pid]
        );
        assert_eq!(
            InternalError::FailedProof(ProofKind::Schnorr, Some(pid)).culprits(),
            vec![pid]
        );
        assert!(InternalError::ProtocolError(None).culprits().is_empty());
        assert!(InternalError::Serialization.culprits().is_empty());
    }

    #[test]
    fn blame_fills_missing_culprit_only() {
        let pid = ParticipantIdentifier::from_u128(3);
        let other = ParticipantIdentifier::from_u128(4);
        let blamed = InternalError::FailedProof(ProofKind::Modulus, None).blame(pid);
        assert_eq!(blamed.culprits(), vec![pid]);

        // An already-attributed failure keeps its culprit.
        let kept = InternalError::FailedProof(ProofKind::Modulus, Some(other)).blame(pid);
        assert_eq!(kept.culprits(), vec![other]);
    }
}
