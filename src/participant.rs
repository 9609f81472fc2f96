// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Traits and shared machinery for protocol state machines.
//!
//! Every protocol in this crate — keygen, signing, resharing, and their
//! EdDSA counterparts — is a [`ProtocolParticipant`]: a single party's
//! state machine, advanced exclusively by feeding it messages. Handlers
//! are pure computation; all I/O belongs to the caller, which receives
//! outbound messages in the returned [`ProcessOutcome`].
//!
//! The shared machinery lives in [`InnerProtocolParticipant`]: typed local
//! storage, a stash for messages that arrive before their round, duplicate
//! detection, broadcast fan-out, and the run-once guard for round message
//! generation.

use crate::{
    errors::{CallerError, InternalError, Result},
    local_storage::{LocalStorage, TypeTag},
    message_queue::MessageQueue,
    messages::{Message, MessageType},
    protocol::{Identifier, ParticipantIdentifier},
    zkp::ProofContext,
};
use rand::{CryptoRng, RngCore};
use std::collections::HashSet;
use tracing::{error, info};

/// The progress a participant has made, as visible to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// Constructed but not yet started.
    NotReady,
    /// Started and exchanging messages.
    Running,
    /// Finished; the output was produced and no further messages are
    /// accepted.
    TerminatedSuccessfully,
    /// Aborted because of misbehavior. Carries the culprit set (possibly
    /// empty when the failure could not be attributed). Terminal.
    Aborted(Vec<ParticipantIdentifier>),
}

impl Status {
    /// Whether the participant has started processing protocol messages.
    pub fn is_ready(&self) -> bool {
        !matches!(self, Status::NotReady)
    }
}

/// The result of handing one message to a participant.
#[derive(Debug)]
pub enum ProcessOutcome<O> {
    /// The message was consumed but the current round still needs more
    /// input.
    Incomplete,
    /// Processing produced messages for the caller to deliver. Messages
    /// addressed to this same participant (replayed from the stash) must
    /// be fed back like any other.
    Processed(Vec<Message>),
    /// The protocol finished and produced its output.
    Terminated(O),
    /// The protocol finished for this participant, which still has final
    /// messages for the others.
    TerminatedForThisParticipant(O, Vec<Message>),
}

impl<O> ProcessOutcome<O> {
    /// Build an outcome from an optional output and a set of outgoing
    /// messages.
    pub(crate) fn from(output: Option<O>, messages: Vec<Message>) -> Self {
        match (output, messages.is_empty()) {
            (None, true) => Self::Incomplete,
            (None, false) => Self::Processed(messages),
            (Some(output), true) => Self::Terminated(output),
            (Some(output), false) => Self::TerminatedForThisParticipant(output, messages),
        }
    }

    /// Split into the optional output and the outgoing messages.
    pub fn into_parts(self) -> (Option<O>, Vec<Message>) {
        match self {
            Self::Incomplete => (None, Vec::new()),
            Self::Processed(messages) => (None, messages),
            Self::Terminated(output) => (Some(output), Vec::new()),
            Self::TerminatedForThisParticipant(output, messages) => (Some(output), messages),
        }
    }

    /// Add more outgoing messages to this outcome.
    pub(crate) fn with_messages(self, messages: Vec<Message>) -> Self {
        let (output, mut existing) = self.into_parts();
        existing.extend(messages);
        Self::from(output, existing)
    }

    /// Merge several outcomes produced while handling a single inbound
    /// message. At most one of them may carry an output.
    pub(crate) fn collect(outcomes: Vec<Self>) -> Result<Self> {
        Self::collect_with_messages(outcomes, Vec::new())
    }

    /// Like [`collect`](Self::collect), with extra messages appended.
    pub(crate) fn collect_with_messages(
        outcomes: Vec<Self>,
        messages: Vec<Message>,
    ) -> Result<Self> {
        let mut output = None;
        let mut all_messages = messages;
        for outcome in outcomes {
            let (o, m) = outcome.into_parts();
            if o.is_some() {
                if output.is_some() {
                    error!("a single message produced two protocol outputs");
                    return Err(InternalError::InternalInvariantFailed);
                }
                output = o;
            }
            all_messages.extend(m);
        }
        Ok(Self::from(output, all_messages))
    }

    /// Merge this outcome with others produced by the same inbound
    /// message.
    pub(crate) fn consolidate(self, others: Vec<Self>) -> Result<Self> {
        let mut outcomes = vec![self];
        outcomes.extend(others);
        Self::collect(outcomes)
    }
}

/// The public face of a protocol state machine.
pub trait ProtocolParticipant {
    /// Input required to begin the protocol.
    type Input;
    /// Output produced when the protocol terminates successfully.
    type Output;

    /// Create a participant for one protocol run.
    ///
    /// `other_participant_ids` must not contain `id` and must be
    /// consistent with the committee described by the input.
    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self>
    where
        Self: Sized;

    /// The message type used as the local bootstrap signal.
    fn ready_type() -> MessageType;

    /// This participant's identifier.
    fn id(&self) -> ParticipantIdentifier;

    /// The other participants in this protocol run.
    fn other_ids(&self) -> &[ParticipantIdentifier];

    /// The session this run belongs to.
    fn sid(&self) -> Identifier;

    /// Feed one message to the state machine.
    fn process_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>>;

    /// Current progress.
    fn status(&self) -> &Status;

    /// The peers whose messages the current round is still missing.
    ///
    /// Empty once the protocol has terminated or before it starts. Callers
    /// use this to report stalls; the participant itself never times out.
    fn waiting_for(&self) -> Vec<ParticipantIdentifier>;
}

mod storage {
    use super::*;

    pub(super) struct Stash;
    impl TypeTag for Stash {
        type Value = MessageQueue;
    }

    pub(super) struct Progress;
    impl TypeTag for Progress {
        type Value = HashSet<&'static str>;
    }
}

/// Internal extension of [`ProtocolParticipant`] providing the shared
/// round-handling machinery.
pub(crate) trait InnerProtocolParticipant: ProtocolParticipant {
    /// The context bound into every Fiat-Shamir transcript this protocol
    /// produces.
    type Context: ProofContext;

    /// Collect the current transcript context.
    fn retrieve_context(&self) -> Self::Context;

    fn local_storage(&self) -> &LocalStorage;
    fn local_storage_mut(&mut self) -> &mut LocalStorage;
    fn status_mut(&mut self) -> &mut Status;

    /// All participants in this run, self included.
    fn all_participants(&self) -> Vec<ParticipantIdentifier> {
        std::iter::once(self.id())
            .chain(self.other_ids().iter().copied())
            .collect()
    }

    /// Reject messages that do not belong to this participant and session:
    /// wrong session identifier, unknown sender, or wrong recipient. Such
    /// messages are refused without any state change.
    fn check_inbound(&self, message: &Message) -> Result<()> {
        if message.id() != self.sid() {
            error!(
                "rejecting message for session {} (this is session {})",
                message.id(),
                self.sid()
            );
            Err(CallerError::WrongSessionId)?;
        }
        if message.to() != self.id() {
            Err(CallerError::WrongRecipient)?;
        }
        if message.message_type().is_ready() {
            // The bootstrap signal is local and must come from ourselves.
            if message.from() != self.id() {
                Err(CallerError::UnknownSender)?;
            }
        } else if !self.other_ids().contains(&message.from()) {
            Err(CallerError::UnknownSender)?;
        }
        match self.status() {
            Status::TerminatedSuccessfully => Err(CallerError::ProtocolAlreadyTerminated)?,
            Status::Aborted(_) => Err(CallerError::ProtocolAlreadyAborted)?,
            _ => Ok(()),
        }
    }

    /// Handle the local bootstrap signal: mark the participant ready and
    /// hand any stashed early messages back to the caller for redelivery.
    fn process_ready_message<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>> {
        message.check_type(Self::ready_type())?;
        if self.status().is_ready() {
            Err(CallerError::DuplicateMessage)?;
        }
        info!("starting protocol for participant {}", self.id());
        *self.status_mut() = Status::Running;

        let stashed = self.fetch_all_messages();
        Ok(ProcessOutcome::from(None, stashed))
    }

    /// Stash a message that cannot be processed yet.
    fn stash_message(&mut self, message: &Message) -> Result<()> {
        info!(
            "stashing early {:?} message from {}",
            message.message_type(),
            message.from()
        );
        let id = self.id();
        let storage = self.local_storage_mut();
        if !storage.contains::<storage::Stash>(id) {
            storage.store::<storage::Stash>(id, MessageQueue::default());
        }
        let queue = storage
            .retrieve_mut::<storage::Stash>(id)
            .ok_or(InternalError::InternalInvariantFailed)?;
        queue.store(message.clone());
        Ok(())
    }

    /// Drain stashed messages of one type.
    fn fetch_messages(&mut self, message_type: MessageType) -> Result<Vec<Message>> {
        let id = self.id();
        let storage = self.local_storage_mut();
        Ok(match storage.retrieve_mut::<storage::Stash>(id) {
            Some(queue) => queue.retrieve_all_of_type(message_type),
            None => Vec::new(),
        })
    }

    /// Drain the whole stash.
    fn fetch_all_messages(&mut self) -> Vec<Message> {
        let id = self.id();
        let storage = self.local_storage_mut();
        match storage.retrieve_mut::<storage::Stash>(id) {
            Some(queue) => queue.retrieve_all(),
            None => Vec::new(),
        }
    }

    /// Fail with a duplicate-message error if we already hold a value of
    /// this tag from this sender.
    fn check_for_duplicate_msg<T: TypeTag>(&self, from: ParticipantIdentifier) -> Result<()> {
        if self.local_storage().contains::<T>(from) {
            Err(CallerError::DuplicateMessage)?;
        }
        Ok(())
    }

    /// Produce one copy of a broadcast payload for every other
    /// participant.
    fn broadcast_message(
        &self,
        message_type: MessageType,
        payload: &impl serde::Serialize,
    ) -> Result<Vec<Message>> {
        self.other_ids()
            .iter()
            .map(|&to| Message::new_broadcast(message_type, self.sid(), self.id(), to, payload))
            .collect()
    }

    /// Whether the named round-message generator already ran. Used by
    /// [`run_only_once!`](crate::run_only_once).
    fn read_progress(&self, func: &'static str) -> Result<bool> {
        let id = self.id();
        Ok(self
            .local_storage()
            .contains::<storage::Progress>(id)
            .then(|| self.local_storage().retrieve::<storage::Progress>(id))
            .transpose()?
            .map(|set| set.contains(func))
            .unwrap_or(false))
    }

    /// Record that the named round-message generator ran.
    fn write_progress(&mut self, func: &'static str) -> Result<()> {
        let id = self.id();
        let storage = self.local_storage_mut();
        if !storage.contains::<storage::Progress>(id) {
            storage.store::<storage::Progress>(id, HashSet::new());
        }
        let set = storage
            .retrieve_mut::<storage::Progress>(id)
            .ok_or(InternalError::InternalInvariantFailed)?;
        let _ = set.insert(func);
        Ok(())
    }

    /// On a protocol failure that names misbehavior, transition to
    /// [`Status::Aborted`] so the participant stops emitting messages.
    /// Wire and caller errors pass through without a state change.
    fn abort_on_protocol_failure(&mut self, error: InternalError) -> InternalError {
        match &error {
            InternalError::FailedProof(..)
            | InternalError::InvalidVssShare(_)
            | InternalError::ProtocolError(_) => {
                error!("aborting protocol: {error}");
                *self.status_mut() = Status::Aborted(error.culprits());
            }
            _ => {}
        }
        error
    }
}

/// Run a round-message generator exactly once per protocol instance.
///
/// Round completion can be detected from several code paths (a round's
/// last message may arrive before or after our own bootstrap); this guard
/// makes re-entry harmless by returning no messages the second time.
#[macro_export]
#[doc(hidden)]
macro_rules! run_only_once {
    ($self:ident . $func:ident ( $($args:expr),* $(,)? )) => {{
        if $self.read_progress(stringify!($func))? {
            Ok(Vec::new())
        } else {
            $self.write_progress(stringify!($func))?;
            $self.$func($($args),*)
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_from_parts_roundtrip() {
        let outcome: ProcessOutcome<u8> = ProcessOutcome::from(None, Vec::new());
        assert!(matches!(outcome, ProcessOutcome::Incomplete));

        let outcome = ProcessOutcome::from(Some(7u8), Vec::new());
        assert!(matches!(outcome, ProcessOutcome::Terminated(7)));

        let (output, messages) = outcome.into_parts();
        assert_eq!(output, Some(7));
        assert!(messages.is_empty());
    }

    #[test]
    fn collect_rejects_two_outputs() {
        let outcomes = vec![
            ProcessOutcome::Terminated(1u8),
            ProcessOutcome::Terminated(2u8),
        ];
        assert!(ProcessOutcome::collect(outcomes).is_err());
    }

    #[test]
    fn status_readiness() {
        assert!(!Status::NotReady.is_ready());
        assert!(Status::Running.is_ready());
        assert!(Status::TerminatedSuccessfully.is_ready());
        assert!(Status::Aborted(Vec::new()).is_ready());
    }
}
