// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! EdDSA distributed key generation.
//!
//! Three rounds, structurally the first half of the ECDSA keygen without
//! any Paillier machinery: commit to a Feldman dealing, reveal it and
//! distribute sub-shares, prove knowledge of the aggregated share. Since
//! there are no encryption keys to exchange, sub-shares travel in the
//! clear; the transport is required to be confidential and
//! authenticated.

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{CallerError, InternalError, Result},
    keygen::commit::{KeygenCommit, KeygenDecommit},
    keygen::{KeySharePrivate, KeySharePublic},
    local_storage::{LocalStorage, TypeTag},
    messages::{EddsaKeygenMessageType, Message, MessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{Identifier, Parameters, ParticipantIdentifier, PeerContext, SharedContext},
    run_only_once,
    vss::{CommitmentVector, Polynomial},
    zkp::pisch::{CommonInput as PiSchInput, PiSchPrecommit, PiSchProof, ProverSecret},
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use std::{collections::HashSet, marker::PhantomData};
use tracing::{error, info, instrument};

mod storage {
    use super::*;

    pub(super) struct Commit;
    impl TypeTag for Commit {
        type Value = KeygenCommit;
    }
    pub(super) struct Decommit<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Decommit<C> {
        type Value = KeygenDecommit<C>;
    }
    pub(super) struct Dealing<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Dealing<C> {
        type Value = Polynomial<C>;
    }
    pub(super) struct SchnorrPrecom<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SchnorrPrecom<C> {
        type Value = PiSchPrecommit<C>;
    }
    pub(super) struct SubShare<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SubShare<C> {
        type Value = C::Scalar;
    }
    pub(super) struct PrivateShare<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for PrivateShare<C> {
        type Value = KeySharePrivate<C>;
    }
    pub(super) struct Aggregate<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Aggregate<C> {
        type Value = CommitmentVector<C>;
    }
    pub(super) struct ValidPublicShare<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for ValidPublicShare<C> {
        type Value = KeySharePublic<C>;
    }
}

/// The save bundle from EdDSA key generation.
#[derive(Debug, Clone)]
pub struct Output<C: CurveTrait> {
    peers: PeerContext,
    threshold: usize,
    private_share: KeySharePrivate<C>,
    public_shares: Vec<KeySharePublic<C>>,
    public_key_point: C,
}

impl<C: CurveTrait> Output<C> {
    /// Assemble a save bundle from previously persisted parts, checking
    /// internal consistency.
    pub fn from_parts(
        peers: PeerContext,
        threshold: usize,
        private_share: KeySharePrivate<C>,
        public_shares: Vec<KeySharePublic<C>>,
        public_key_point: C,
    ) -> Result<Self> {
        let committee: HashSet<_> = peers.ids().into_iter().collect();
        if threshold < 1 || threshold >= committee.len() {
            Err(CallerError::BadThreshold)?;
        }
        let owners: HashSet<_> = public_shares
            .iter()
            .map(KeySharePublic::participant)
            .collect();
        if owners != committee || public_shares.len() != committee.len() {
            error!("save data requires exactly one public share per committee member");
            Err(CallerError::BadInput)?;
        }
        for share in &public_shares {
            share.check_non_identity()?;
        }
        Ok(Self {
            peers,
            threshold,
            private_share,
            public_shares,
            public_key_point,
        })
    }

    /// The committee this key is shared across.
    pub fn peers(&self) -> &PeerContext {
        &self.peers
    }

    /// The threshold `t`; any `t + 1` members can sign.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// This party's private share.
    pub fn private_share(&self) -> &KeySharePrivate<C> {
        &self.private_share
    }

    /// Every member's public share.
    pub fn public_shares(&self) -> &[KeySharePublic<C>] {
        &self.public_shares
    }

    /// A specific member's public share.
    pub fn find_public_share(&self, pid: ParticipantIdentifier) -> Result<&KeySharePublic<C>> {
        self.public_shares
            .iter()
            .find(|share| share.participant() == pid)
            .ok_or_else(|| {
                error!("no public share recorded for {pid}");
                InternalError::from(CallerError::BadInput)
            })
    }

    /// The group public key as a curve point.
    pub fn public_key_point(&self) -> &C {
        &self.public_key_point
    }

    /// Decompose the bundle into its serializable parts for persistence.
    ///
    /// # 🔒 Storage requirements
    /// The private share must be stored securely; the public components
    /// can be stored in the clear.
    pub fn into_parts(
        self,
    ) -> (
        PeerContext,
        usize,
        KeySharePrivate<C>,
        Vec<KeySharePublic<C>>,
        C,
    ) {
        (
            self.peers,
            self.threshold,
            self.private_share,
            self.public_shares,
            self.public_key_point,
        )
    }
}

/// A [`ProtocolParticipant`] that runs the three-round EdDSA distributed
/// key generation, producing a `(t, n)` Shamir sharing of an ed25519
/// signing key.
#[derive(Debug)]
pub struct EddsaKeygenParticipant<C: CurveTrait> {
    sid: Identifier,
    params: Parameters,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
    _curve: PhantomData<C>,
}

impl<C: CurveTrait> ProtocolParticipant for EddsaKeygenParticipant<C> {
    type Input = Parameters;
    type Output = Output<C>;

    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self> {
        input.check_participant_list(id, &other_participant_ids)?;
        Ok(Self {
            sid,
            params: input,
            id,
            other_participant_ids,
            local_storage: Default::default(),
            status: Status::NotReady,
            _curve: PhantomData,
        })
    }

    fn ready_type() -> MessageType {
        MessageType::EddsaKeygen(EddsaKeygenMessageType::Ready)
    }

    fn id(&self) -> ParticipantIdentifier {
        self.id
    }

    fn other_ids(&self) -> &[ParticipantIdentifier] {
        &self.other_participant_ids
    }

    fn sid(&self) -> Identifier {
        self.sid
    }

    #[instrument(skip_all)]
    fn process_message<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<Self::Output>> {
        info!(
            "EDDSA KEYGEN: participant {} received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );
        self.check_inbound(message)?;

        if !self.status().is_ready() && message.message_type() != Self::ready_type() {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }

        let outcome = match message.message_type() {
            MessageType::EddsaKeygen(EddsaKeygenMessageType::Ready) => {
                self.handle_ready_msg(rng, message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R1CommitHash) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2PrivateShare) => {
                self.handle_round_two_private_msg(message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit) => {
                self.handle_round_two_decommit_msg(message)
            }
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof) => {
                self.handle_round_three_msg(message)
            }
            message_type => {
                error!(
                    "incorrect MessageType given to EddsaKeygenParticipant: {message_type:?}"
                );
                Err(InternalError::InternalInvariantFailed)
            }
        };
        outcome.map_err(|e| self.abort_on_protocol_failure(e))
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn waiting_for(&self) -> Vec<ParticipantIdentifier> {
        if *self.status() != Status::Running {
            return Vec::new();
        }
        let others = self.other_ids().to_vec();
        let missing_commits = self.local_storage.missing_ids::<storage::Commit>(&others);
        if !missing_commits.is_empty() {
            return missing_commits;
        }
        let mut missing = self
            .local_storage
            .missing_ids::<storage::Decommit<C>>(&others);
        for pid in self
            .local_storage
            .missing_ids::<storage::SubShare<C>>(&others)
        {
            if !missing.contains(&pid) {
                missing.push(pid);
            }
        }
        if !missing.is_empty() {
            return missing;
        }
        self.local_storage
            .missing_ids::<storage::ValidPublicShare<C>>(&others)
    }
}

impl<C: CurveTrait> InnerProtocolParticipant for EddsaKeygenParticipant<C> {
    type Context = SharedContext<C>;

    fn retrieve_context(&self) -> Self::Context {
        SharedContext::collect(self)
    }

    fn local_storage(&self) -> &LocalStorage {
        &self.local_storage
    }

    fn local_storage_mut(&mut self) -> &mut LocalStorage {
        &mut self.local_storage
    }

    fn status_mut(&mut self) -> &mut Status {
        &mut self.status
    }
}

impl<C: CurveTrait> EddsaKeygenParticipant<C> {
    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let ready_outcome = self.process_ready_message(rng, message)?;
        let round_one_messages = run_only_once!(self.gen_round_one_msgs(rng, message.id()))?;
        Ok(ready_outcome.with_messages(round_one_messages))
    }

    /// Deal a fresh polynomial and broadcast its commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        sid: Identifier,
    ) -> Result<Vec<Message>> {
        info!("Generating round one eddsa keygen messages.");

        let contribution = C::Scalar::random(rng);
        let polynomial = Polynomial::<C>::random(contribution, self.params.threshold(), rng);
        let vector = polynomial.commitment();
        let sch_precom = PiSchProof::<C>::precommit(rng)?;
        let decommit = KeygenDecommit::new(
            rng,
            &sid,
            &self.id(),
            &vector,
            sch_precom.precommitment(),
        );
        let commit = decommit.commit()?;

        self.local_storage
            .store::<storage::Dealing<C>>(self.id(), polynomial);
        self.local_storage
            .store::<storage::SchnorrPrecom<C>>(self.id(), sch_precom);
        self.local_storage
            .store::<storage::Commit>(self.id(), commit.clone());
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);

        self.broadcast_message(
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R1CommitHash),
            &commit,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        info!("Handling round one eddsa keygen message.");

        message.check_type(MessageType::EddsaKeygen(EddsaKeygenMessageType::R1CommitHash))?;
        let commit: KeygenCommit = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::Commit>(message.from(), commit)?;

        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(self.other_ids());
        if r1_done {
            let round_two_messages = run_only_once!(self.gen_round_two_msgs(rng))?;
            let mut outcomes = self
                .fetch_messages(MessageType::EddsaKeygen(
                    EddsaKeygenMessageType::R2PrivateShare,
                ))?
                .iter()
                .map(|msg| self.handle_round_two_private_msg(msg))
                .collect::<Result<Vec<_>>>()?;
            let decommit_outcomes = self
                .fetch_messages(MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit))?
                .iter()
                .map(|msg| self.handle_round_two_decommit_msg(msg))
                .collect::<Result<Vec<_>>>()?;
            outcomes.extend(decommit_outcomes);
            ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
        } else {
            Ok(ProcessOutcome::Incomplete)
        }
    }

    /// Send every peer its plaintext sub-share and open our commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two eddsa keygen messages.");
        let _ = rng;

        let mut messages = Vec::new();
        for recipient in self.other_ids().to_vec() {
            let sub_share = {
                let polynomial = self
                    .local_storage
                    .retrieve::<storage::Dealing<C>>(self.id())?;
                polynomial.evaluate_at(recipient)
            };
            messages.push(Message::new(
                MessageType::EddsaKeygen(EddsaKeygenMessageType::R2PrivateShare),
                self.sid(),
                self.id(),
                recipient,
                &sub_share,
            )?);
        }

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        messages.extend(self.broadcast_message(
            MessageType::EddsaKeygen(EddsaKeygenMessageType::R2Decommit),
            &decommit,
        )?);
        Ok(messages)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_private_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::SubShare<C>>(message.from())?;
        info!("Handling round two eddsa keygen private message.");

        message.check_type(MessageType::EddsaKeygen(
            EddsaKeygenMessageType::R2PrivateShare,
        ))?;
        let sub_share: C::Scalar = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::SubShare<C>>(message.from(), sub_share)?;

        self.maybe_finish_round_two()
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_decommit_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;

        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        if !r1_done {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round two eddsa keygen decommit message.");

        let com = self
            .local_storage
            .retrieve::<storage::Commit>(message.from())?;
        let decommit =
            KeygenDecommit::from_message(message, com, self.params.threshold())?;
        self.local_storage
            .store_once::<storage::Decommit<C>>(message.from(), decommit)?;

        self.maybe_finish_round_two()
    }

    fn maybe_finish_round_two(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let got_all_decommits = self
            .local_storage
            .contains_for_all_ids::<storage::Decommit<C>>(&self.all_participants());
        let got_all_shares = self
            .local_storage
            .contains_for_all_ids::<storage::SubShare<C>>(self.other_ids());
        if !(got_all_decommits && got_all_shares) {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_three_messages = run_only_once!(self.gen_round_three_msgs())?;
        let outcomes = self
            .fetch_messages(MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof))?
            .iter()
            .map(|msg| self.handle_round_three_msg(msg))
            .collect::<Result<Vec<_>>>()?;
        ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
    }

    /// Verify all dealings, aggregate our final share, and prove we know
    /// it.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round three eddsa keygen messages.");

        for dealer in self.other_ids().to_vec() {
            let vector = &self
                .local_storage
                .retrieve::<storage::Decommit<C>>(dealer)?
                .vector;
            let sub_share = self
                .local_storage
                .retrieve::<storage::SubShare<C>>(dealer)?;
            if !vector.is_valid_share(self.id(), sub_share) {
                error!("sub-share from {dealer} does not lie on its committed polynomial");
                return Err(InternalError::InvalidVssShare(dealer));
            }
        }

        let own_evaluation = {
            let polynomial = self
                .local_storage
                .retrieve::<storage::Dealing<C>>(self.id())?;
            polynomial.evaluate_at(self.id())
        };
        let mut private_share = own_evaluation;
        for dealer in self.other_ids() {
            let sub_share = self
                .local_storage
                .retrieve::<storage::SubShare<C>>(*dealer)?;
            private_share = ScalarTrait::add(&private_share, sub_share);
        }

        let vectors = self
            .all_participants()
            .iter()
            .map(|pid| {
                Ok(self
                    .local_storage
                    .retrieve::<storage::Decommit<C>>(*pid)?
                    .vector
                    .clone())
            })
            .collect::<Result<Vec<_>>>()?;
        let aggregate = CommitmentVector::aggregate(&vectors)?;

        let public_share = C::generator().multiply_by_scalar(&private_share);
        let context = self.retrieve_context();
        let precom = self
            .local_storage
            .retrieve::<storage::SchnorrPrecom<C>>(self.id())?;
        let transcript = Self::schnorr_transcript(self.sid(), self.id())?;
        let proof = PiSchProof::prove_from_precommit(
            &context,
            precom,
            &PiSchInput::new(&public_share),
            &ProverSecret::new(&private_share),
            &transcript,
        )?;

        self.local_storage
            .store::<storage::PrivateShare<C>>(self.id(), KeySharePrivate::new(private_share));
        self.local_storage
            .store::<storage::Aggregate<C>>(self.id(), aggregate);
        self.local_storage.store::<storage::ValidPublicShare<C>>(
            self.id(),
            KeySharePublic::new(self.id(), public_share),
        );

        self.broadcast_message(MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof), &proof)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ValidPublicShare<C>>(message.from())?;

        if !self
            .local_storage
            .contains::<storage::Aggregate<C>>(self.id())
        {
            info!("Not yet ready to handle round three eddsa keygen message.");
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round three eddsa keygen message.");

        message.check_type(MessageType::EddsaKeygen(EddsaKeygenMessageType::R3Proof))?;
        let proof: PiSchProof<C> = deserialize!(&message.unverified_bytes)?;

        let sender_share = {
            let aggregate = self
                .local_storage
                .retrieve::<storage::Aggregate<C>>(self.id())?;
            aggregate.evaluate_at(message.from())
        };
        let context = self.retrieve_context();
        let precommit_a = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(message.from())?
            .precommit_a;
        let transcript = Self::schnorr_transcript(self.sid(), message.from())?;
        proof
            .verify_with_precommit(
                PiSchInput::new(&sender_share),
                &context,
                &transcript,
                &precommit_a,
            )
            .map_err(|e| e.blame(message.from()))?;

        self.local_storage.store_once::<storage::ValidPublicShare<C>>(
            message.from(),
            KeySharePublic::new(message.from(), sender_share),
        )?;

        self.maybe_finish_protocol()
    }

    fn maybe_finish_protocol(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        if !self
            .local_storage
            .contains_for_all_ids::<storage::ValidPublicShare<C>>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let public_shares = self
            .all_participants()
            .iter()
            .map(|pid| {
                Ok(self
                    .local_storage
                    .retrieve::<storage::ValidPublicShare<C>>(*pid)?
                    .clone())
            })
            .collect::<Result<Vec<_>>>()?;
        let public_key_point = *self
            .local_storage
            .retrieve::<storage::Aggregate<C>>(self.id())?
            .constant();
        let private_share = self
            .local_storage
            .remove::<storage::PrivateShare<C>>(self.id())?;

        let output = Output::from_parts(
            self.params.peers().clone(),
            self.params.threshold(),
            private_share,
            public_shares,
            public_key_point,
        )?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(output))
    }

    fn schnorr_transcript(
        sid: Identifier,
        sender: ParticipantIdentifier,
    ) -> Result<Transcript> {
        let mut transcript = Transcript::new(b"eddsa keygen schnorr");
        transcript.append_message(b"sid", &serialize!(&sid)?);
        transcript.append_message(b"sender", &serialize!(&sender)?);
        Ok(transcript)
    }
}
