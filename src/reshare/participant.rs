// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The resharing state machine.

use super::commit::{ReshareCommit, ReshareDecommit};
use crate::{
    curve::{CurveTrait, EcdsaCurve, ScalarTrait},
    errors::{CallerError, InternalError, Result},
    keygen::{self, share::EncryptedShare, KeySharePrivate, KeySharePublic},
    local_storage::{LocalStorage, TypeTag},
    messages::{Message, MessageType, ReshareMessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    preparams::{LocalPreParams, PublicPreParams},
    protocol::{Identifier, ParticipantIdentifier, ReshareParameters, SharedContext},
    ring_pedersen::VerifiedRingPedersen,
    run_only_once,
    vss::{lagrange_at_zero, CommitmentVector, Polynomial},
    zkp::{
        pimod::{self, PiModProof},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::{error, info, instrument};

/// Input for resharing.
///
/// Old-committee members contribute their existing save data; new
/// members contribute fresh pre-parameters; a party in both committees
/// contributes both.
#[derive(Debug, Clone)]
pub struct Input<C: EcdsaCurve> {
    params: ReshareParameters,
    save: Option<keygen::Output<C>>,
    preparams: Option<LocalPreParams>,
}

impl<C: EcdsaCurve> Input<C> {
    /// Build an input, checking that the pieces match the party's roles.
    pub fn new(
        params: ReshareParameters,
        save: Option<keygen::Output<C>>,
        preparams: Option<LocalPreParams>,
    ) -> Result<Self> {
        let id = params.self_id();
        if params.is_old_party(id) {
            let save = save.as_ref().ok_or_else(|| {
                error!("an old-committee member must supply its save data");
                InternalError::from(CallerError::BadInput)
            })?;
            // The dealer set must be a quorum of the committee the key
            // was shared across.
            if params.old_threshold() != save.threshold() {
                error!("resharing threshold does not match the save data");
                Err(CallerError::BadInput)?;
            }
            if params.old_peers().count() < save.threshold() + 1 {
                error!("not enough old-committee members to reassemble the key");
                Err(CallerError::BadInput)?;
            }
            for pid in params.old_peers().ids() {
                if !save.peers().contains(pid) {
                    error!("old peer context contains a party with no share");
                    Err(CallerError::BadInput)?;
                }
            }
        }
        if params.is_new_party(id) && preparams.is_none() {
            error!("a new-committee member must supply pre-parameters");
            Err(CallerError::BadInput)?;
        }
        Ok(Self {
            params,
            save,
            preparams,
        })
    }

    fn save(&self) -> Result<&keygen::Output<C>> {
        self.save
            .as_ref()
            .ok_or(InternalError::InternalInvariantFailed)
    }

    fn preparams(&self) -> Result<&LocalPreParams> {
        self.preparams
            .as_ref()
            .ok_or(InternalError::InternalInvariantFailed)
    }
}

/// What resharing delivers.
#[derive(Debug, Clone)]
pub enum Output<C: EcdsaCurve> {
    /// Old-committee-only members produce nothing; their share is now
    /// stale and should be destroyed.
    Old,
    /// New-committee members receive fresh save data under the same
    /// public key.
    New(keygen::Output<C>),
}

/// Round-one broadcast from each dealer: the commitment to its fresh
/// dealing plus its record of the public key material being reshared.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct RoundOnePublic<C: CurveTrait> {
    commit: ReshareCommit,
    public_key_point: C,
    old_public_shares: Vec<KeySharePublic<C>>,
}

/// Round-two broadcast from each new member: its Paillier and
/// ring-Pedersen material with setup proofs.
#[derive(Clone, Serialize, Deserialize)]
struct RoundTwoPublic {
    paillier_pk: crate::paillier::EncryptionKey,
    ring_pedersen: VerifiedRingPedersen,
    mod_proof: Option<PiModProof>,
}

/// Round-three unicast: the encrypted sub-share for one new member.
#[derive(Clone, Serialize, Deserialize)]
struct RoundThreePrivate<C> {
    share: EncryptedShare<C>,
}

mod storage {
    use super::*;

    pub(super) struct Dealing<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Dealing<C> {
        type Value = Polynomial<C>;
    }
    pub(super) struct Commit;
    impl TypeTag for Commit {
        type Value = ReshareCommit;
    }
    pub(super) struct Decommit<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Decommit<C> {
        type Value = ReshareDecommit<C>;
    }
    pub(super) struct DealerRecord<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for DealerRecord<C> {
        type Value = (C, Vec<KeySharePublic<C>>);
    }
    pub(super) struct Aux;
    impl TypeTag for Aux {
        type Value = PublicPreParams;
    }
    pub(super) struct SubShare<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SubShare<C> {
        type Value = C::Scalar;
    }
    pub(super) struct Ack;
    impl TypeTag for Ack {
        type Value = ();
    }
    pub(super) struct PendingSave<C: EcdsaCurve> {
        _c: PhantomData<C>,
    }
    impl<C: EcdsaCurve> TypeTag for PendingSave<C> {
        type Value = keygen::Output<C>;
    }
}

/// A [`ProtocolParticipant`] that refreshes shares and/or hands the key
/// to a new committee, preserving the public key:
///
/// - **Round 1**: each old member deals its Lagrange-scaled share
///   `λᵢ·xᵢ` into a fresh degree-`t′` polynomial over the new committee
///   and broadcasts a commitment, together with the public key record.
/// - **Round 2**: each new member broadcasts its Paillier and
///   ring-Pedersen material with setup proofs.
/// - **Round 3**: dealers open their commitments and send each new
///   member its encrypted sub-share.
/// - **Round 4**: new members verify every dealing against the old
///   public key, sum their sub-shares, and acknowledge; on a full set of
///   acknowledgements, new members emit save data and old members
///   retire.
#[derive(Debug)]
pub struct ReshareParticipant<C: EcdsaCurve> {
    sid: Identifier,
    input: Input<C>,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
}

impl<C: EcdsaCurve> ProtocolParticipant for ReshareParticipant<C> {
    type Input = Input<C>;
    type Output = Output<C>;

    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self> {
        if id != input.params.self_id() {
            Err(CallerError::ParticipantConfigError)?;
        }
        let mut expected: Vec<_> = input
            .params
            .union_ids()
            .into_iter()
            .filter(|pid| *pid != id)
            .collect();
        expected.sort();
        let mut given = other_participant_ids.clone();
        given.sort();
        if expected != given {
            error!("participant list does not match the resharing committees");
            Err(CallerError::ParticipantConfigError)?;
        }
        Ok(Self {
            sid,
            input,
            id,
            other_participant_ids,
            local_storage: Default::default(),
            status: Status::NotReady,
        })
    }

    fn ready_type() -> MessageType {
        MessageType::Reshare(ReshareMessageType::Ready)
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
            "RESHARE: participant {} received {:?} from {}",
            self.id(),
            message.message_type(),
            message.from()
        );
        self.check_inbound(message)?;

        if !self.status().is_ready() && message.message_type() != Self::ready_type() {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }

        let result = if message.message_type() == Self::ready_type() {
            self.handle_ready_msg(rng, message)
        } else {
            self.absorb_message(message).and_then(|absorbed| {
                if absorbed {
                    self.advance(rng)
                } else {
                    Ok(ProcessOutcome::Incomplete)
                }
            })
        };
        result.map_err(|e| self.abort_on_protocol_failure(e))
    }

    fn status(&self) -> &Status {
        &self.status
    }

    fn waiting_for(&self) -> Vec<ParticipantIdentifier> {
        if *self.status() != Status::Running {
            return Vec::new();
        }
        let dealers: Vec<_> = self
            .dealers()
            .into_iter()
            .filter(|pid| *pid != self.id())
            .collect();
        let receivers: Vec<_> = self
            .receivers()
            .into_iter()
            .filter(|pid| *pid != self.id())
            .collect();

        let missing_commits = self.local_storage.missing_ids::<storage::Commit>(&dealers);
        if !missing_commits.is_empty() {
            return missing_commits;
        }
        let missing_aux = self.local_storage.missing_ids::<storage::Aux>(&receivers);
        if !missing_aux.is_empty() {
            return missing_aux;
        }
        let mut missing = self
            .local_storage
            .missing_ids::<storage::Decommit<C>>(&dealers);
        if self.is_receiver() {
            for pid in self.local_storage.missing_ids::<storage::SubShare<C>>(&dealers) {
                if !missing.contains(&pid) {
                    missing.push(pid);
                }
            }
        }
        if !missing.is_empty() {
            return missing;
        }
        self.local_storage.missing_ids::<storage::Ack>(&receivers)
    }
}

impl<C: EcdsaCurve> InnerProtocolParticipant for ReshareParticipant<C> {
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

impl<C: EcdsaCurve> ReshareParticipant<C> {
    fn is_dealer(&self) -> bool {
        self.input.params.is_old_party(self.id())
    }

    fn is_receiver(&self) -> bool {
        self.input.params.is_new_party(self.id())
    }

    fn dealers(&self) -> Vec<ParticipantIdentifier> {
        self.input.params.old_peers().ids()
    }

    fn receivers(&self) -> Vec<ParticipantIdentifier> {
        self.input.params.new_peers().ids()
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let ready_outcome = self.process_ready_message(rng, message)?;
        let advance_outcome = self.advance(rng)?;
        ready_outcome.consolidate(vec![advance_outcome])
    }

    /// Validate one inbound message and file its contents. Returns false
    /// if the message had to be stashed.
    fn absorb_message(&mut self, message: &Message) -> Result<bool> {
        match message.message_type() {
            MessageType::Reshare(ReshareMessageType::R1CommitHash) => {
                self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
                if !self.input.params.is_old_party(message.from()) {
                    error!("round-one dealing from a party outside the old committee");
                    return Err(InternalError::ProtocolError(Some(message.from())));
                }
                let public: RoundOnePublic<C> = deserialize!(&message.unverified_bytes)?;
                self.local_storage
                    .store_once::<storage::Commit>(message.from(), public.commit)?;
                self.local_storage.store::<storage::DealerRecord<C>>(
                    message.from(),
                    (public.public_key_point, public.old_public_shares),
                );
                Ok(true)
            }
            MessageType::Reshare(ReshareMessageType::R2AuxInfo) => {
                self.check_for_duplicate_msg::<storage::Aux>(message.from())?;
                if !self.input.params.is_new_party(message.from()) {
                    error!("round-two parameters from a party outside the new committee");
                    return Err(InternalError::ProtocolError(Some(message.from())));
                }
                let public: RoundTwoPublic = deserialize!(&message.unverified_bytes)?;
                let context = self.retrieve_context();
                public
                    .ring_pedersen
                    .verify(&context)
                    .map_err(|e| e.blame(message.from()))?;
                if self.input.params.no_proof_mod() {
                    // Test-only concession.
                } else {
                    let mod_proof = public
                        .mod_proof
                        .ok_or(InternalError::ProtocolError(Some(message.from())))?;
                    mod_proof
                        .verify(
                            pimod::CommonInput::new(public.paillier_pk.modulus()),
                            &context,
                            &mut Self::pimod_transcript(),
                        )
                        .map_err(|e| e.blame(message.from()))?;
                }
                if &(C::order() * 2) >= public.paillier_pk.modulus() {
                    error!("new member's Paillier modulus is too small to carry curve shares");
                    return Err(InternalError::ProtocolError(Some(message.from())));
                }
                self.local_storage.store::<storage::Aux>(
                    message.from(),
                    PublicPreParams {
                        paillier: public.paillier_pk,
                        ring_pedersen: public.ring_pedersen.scheme().clone(),
                    },
                );
                Ok(true)
            }
            MessageType::Reshare(ReshareMessageType::R3Decommit) => {
                self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;
                if !self
                    .local_storage
                    .contains::<storage::Commit>(message.from())
                {
                    self.stash_message(message)?;
                    return Ok(false);
                }
                let decommit: ReshareDecommit<C> = deserialize!(&message.unverified_bytes)?;
                let commit = self
                    .local_storage
                    .retrieve::<storage::Commit>(message.from())?;
                decommit.verify(
                    self.sid(),
                    message.from(),
                    commit,
                    self.input.params.new_threshold(),
                )?;
                self.local_storage
                    .store_once::<storage::Decommit<C>>(message.from(), decommit)?;
                Ok(true)
            }
            MessageType::Reshare(ReshareMessageType::R3PrivateShare) => {
                self.check_for_duplicate_msg::<storage::SubShare<C>>(message.from())?;
                if !self.is_receiver() {
                    error!("received a sub-share while not in the new committee");
                    Err(CallerError::WrongRecipient)?;
                }
                let private: RoundThreePrivate<C> = deserialize!(&message.unverified_bytes)?;
                let sub_share = private
                    .share
                    .decrypt(self.input.preparams()?.decryption_key())
                    .map_err(|_| InternalError::ProtocolError(Some(message.from())))?;
                self.local_storage
                    .store_once::<storage::SubShare<C>>(message.from(), sub_share)?;
                Ok(true)
            }
            MessageType::Reshare(ReshareMessageType::R4Ack) => {
                self.check_for_duplicate_msg::<storage::Ack>(message.from())?;
                if !self.input.params.is_new_party(message.from()) {
                    error!("acknowledgement from a party outside the new committee");
                    return Err(InternalError::ProtocolError(Some(message.from())));
                }
                self.local_storage
                    .store_once::<storage::Ack>(message.from(), ())?;
                Ok(true)
            }
            message_type => {
                error!("incorrect MessageType given to ReshareParticipant: {message_type:?}");
                Err(InternalError::InternalInvariantFailed)
            }
        }
    }

    /// Drive the state machine to a fixpoint.
    fn advance<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let mut messages = Vec::new();
        loop {
            let mut progressed = false;

            if self.is_dealer() {
                let new_messages = run_only_once!(self.gen_round_one_msgs(rng))?;
                if !new_messages.is_empty() {
                    messages.extend(new_messages);
                    progressed = true;
                }
            }
            if self.is_receiver() {
                let new_messages = run_only_once!(self.gen_round_two_msgs(rng))?;
                if !new_messages.is_empty() {
                    messages.extend(new_messages);
                    progressed = true;
                }
            }
            if self.is_dealer() && self.round_three_ready() {
                let new_messages = run_only_once!(self.gen_round_three_msgs(rng))?;
                if !new_messages.is_empty() {
                    messages.extend(new_messages);
                    progressed = true;
                }
            }
            if self.is_receiver() && self.round_four_ready() {
                let new_messages = run_only_once!(self.gen_round_four_msgs(rng))?;
                if !new_messages.is_empty() {
                    messages.extend(new_messages);
                    progressed = true;
                }
            }

            for message_type in [
                ReshareMessageType::R3Decommit,
                ReshareMessageType::R3PrivateShare,
            ] {
                for stashed in self.fetch_messages(MessageType::Reshare(message_type))? {
                    if self.absorb_message(&stashed)? {
                        progressed = true;
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        let output = self.maybe_finish_protocol()?;
        Ok(ProcessOutcome::from(output, messages))
    }

    fn round_three_ready(&self) -> bool {
        let receivers = self.receivers();
        receivers.iter().all(|pid| {
            *pid == self.id() || self.local_storage.contains::<storage::Aux>(*pid)
        }) && (!self.is_receiver()
            || self.local_storage.contains::<storage::Aux>(self.id()))
    }

    fn round_four_ready(&self) -> bool {
        let dealers = self.dealers();
        let decommits = dealers
            .iter()
            .all(|pid| self.local_storage.contains::<storage::Decommit<C>>(*pid));
        let shares = dealers
            .iter()
            .all(|pid| self.local_storage.contains::<storage::SubShare<C>>(*pid));
        let aux = self
            .receivers()
            .iter()
            .all(|pid| self.local_storage.contains::<storage::Aux>(*pid));
        decommits && shares && aux
    }

    /// Deal our Lagrange-scaled share into a fresh polynomial for the
    /// new committee and broadcast its commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one reshare messages.");
        let save = self.input.save()?;

        let dealers = self.dealers();
        let lagrange = lagrange_at_zero::<C>(self.id(), &dealers)?;
        let contribution = lagrange.mul(save.private_share().as_scalar());
        let polynomial =
            Polynomial::<C>::random(contribution, self.input.params.new_threshold(), rng);
        let vector = polynomial.commitment();

        let decommit = ReshareDecommit::new(rng, self.sid(), self.id(), vector);
        let commit = decommit.commit()?;

        let old_public_shares = dealers
            .iter()
            .map(|pid| Ok(save.find_public_share(*pid)?.clone()))
            .collect::<Result<Vec<_>>>()?;
        let public = RoundOnePublic::<C> {
            commit: commit.clone(),
            public_key_point: *save.public_key_point(),
            old_public_shares: old_public_shares.clone(),
        };

        self.local_storage
            .store::<storage::Dealing<C>>(self.id(), polynomial);
        self.local_storage.store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);
        self.local_storage.store::<storage::DealerRecord<C>>(
            self.id(),
            (*save.public_key_point(), old_public_shares),
        );

        self.broadcast_message(MessageType::Reshare(ReshareMessageType::R1CommitHash), &public)
    }

    /// Publish our Paillier and ring-Pedersen material for the new
    /// committee.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two reshare messages.");
        let context = self.retrieve_context();
        let preparams = self.input.preparams()?;

        let ring_pedersen = VerifiedRingPedersen::prove(preparams.ring_pedersen(), &context, rng)?;
        let mod_proof = if self.input.params.no_proof_mod() {
            None
        } else {
            Some(PiModProof::prove(
                pimod::CommonInput::new(preparams.decryption_key().modulus()),
                pimod::ProverSecret::new(preparams.decryption_key()),
                &context,
                &mut Self::pimod_transcript(),
                rng,
            )?)
        };
        let public = RoundTwoPublic {
            paillier_pk: preparams.encryption_key(),
            ring_pedersen,
            mod_proof,
        };

        self.local_storage
            .store::<storage::Aux>(self.id(), preparams.to_public());

        self.broadcast_message(MessageType::Reshare(ReshareMessageType::R2AuxInfo), &public)
    }

    /// Open our dealing and send every new member its encrypted
    /// sub-share.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round three reshare messages.");

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        let mut messages = self
            .broadcast_message(MessageType::Reshare(ReshareMessageType::R3Decommit), &decommit)?;

        for recipient in self.receivers() {
            let sub_share = {
                let polynomial = self
                    .local_storage
                    .retrieve::<storage::Dealing<C>>(self.id())?;
                polynomial.evaluate_at(recipient)
            };
            if recipient == self.id() {
                // Our own sub-share never leaves the process.
                self.local_storage
                    .store::<storage::SubShare<C>>(self.id(), sub_share);
                continue;
            }
            let recipient_aux = self.local_storage.retrieve::<storage::Aux>(recipient)?;
            let share = EncryptedShare::<C>::encrypt(&sub_share, &recipient_aux.paillier, rng)?;
            messages.push(Message::new(
                MessageType::Reshare(ReshareMessageType::R3PrivateShare),
                self.sid(),
                self.id(),
                recipient,
                &RoundThreePrivate::<C> { share },
            )?);
        }
        Ok(messages)
    }

    /// Verify every dealing against the old key, assemble our new share,
    /// and acknowledge.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_four_msgs<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round four reshare messages.");
        let dealers = self.dealers();

        // All dealers must tell the same story about the old key.
        let (public_key_point, old_shares) = self
            .local_storage
            .retrieve::<storage::DealerRecord<C>>(dealers[0])?
            .clone();
        for dealer in &dealers[1..] {
            let record = self
                .local_storage
                .retrieve::<storage::DealerRecord<C>>(*dealer)?;
            if record.0 != public_key_point || record.1 != old_shares {
                error!("dealers disagree about the key being reshared");
                return Err(InternalError::ProtocolError(None));
            }
        }

        // Each dealer's constant term must be its Lagrange-scaled public
        // share, and our sub-share must lie on its polynomial.
        let mut vectors = Vec::with_capacity(dealers.len());
        let mut new_share = C::Scalar::zero();
        for dealer in &dealers {
            let vector = self
                .local_storage
                .retrieve::<storage::Decommit<C>>(*dealer)?
                .vector
                .clone();
            let lagrange = lagrange_at_zero::<C>(*dealer, &dealers)?;
            let expected_constant = old_shares
                .iter()
                .find(|share| share.participant() == *dealer)
                .ok_or(InternalError::ProtocolError(Some(*dealer)))?
                .as_ref()
                .multiply_by_scalar(&lagrange);
            if vector.constant() != &expected_constant {
                error!("dealer's polynomial does not extend its recorded share");
                return Err(InternalError::ProtocolError(Some(*dealer)));
            }
            let sub_share = self.local_storage.retrieve::<storage::SubShare<C>>(*dealer)?;
            if !vector.is_valid_share(self.id(), sub_share) {
                error!("sub-share from {dealer} does not lie on its committed polynomial");
                return Err(InternalError::InvalidVssShare(*dealer));
            }
            new_share = ScalarTrait::add(&new_share, sub_share);
            vectors.push(vector);
        }

        let aggregate = CommitmentVector::aggregate(&vectors)?;
        if aggregate.constant() != &public_key_point {
            error!("reshared polynomial does not preserve the public key");
            return Err(InternalError::ProtocolError(None));
        }

        // Assemble the new committee's save data now; it is released
        // once everyone acknowledges.
        let new_peers = self.input.params.new_peers().clone();
        let public_shares = new_peers
            .ids()
            .into_iter()
            .map(|pid| KeySharePublic::new(pid, aggregate.evaluate_at(pid)))
            .collect::<Vec<_>>();
        let aux = new_peers
            .ids()
            .into_iter()
            .map(|pid| Ok((pid, self.local_storage.retrieve::<storage::Aux>(pid)?.clone())))
            .collect::<Result<Vec<_>>>()?;
        let save = keygen::Output::from_parts(
            new_peers,
            self.input.params.new_threshold(),
            KeySharePrivate::new(new_share),
            public_shares,
            public_key_point,
            aux,
            self.input.preparams()?.clone(),
        )?;
        self.local_storage
            .store::<storage::PendingSave<C>>(self.id(), save);
        self.local_storage.store::<storage::Ack>(self.id(), ());

        self.broadcast_message(MessageType::Reshare(ReshareMessageType::R4Ack), &())
    }

    fn maybe_finish_protocol(&mut self) -> Result<Option<Output<C>>> {
        let receivers = self.receivers();
        let all_acked = receivers
            .iter()
            .all(|pid| self.local_storage.contains::<storage::Ack>(*pid));
        if !all_acked {
            return Ok(None);
        }
        // Wait for every dealer's opened dealing and every new member's
        // parameters before retiring, so no protocol message of this run
        // arrives after termination.
        let dealings_complete = self
            .dealers()
            .iter()
            .all(|pid| self.local_storage.contains::<storage::Decommit<C>>(*pid));
        let aux_complete = receivers
            .iter()
            .all(|pid| self.local_storage.contains::<storage::Aux>(*pid));
        if !(dealings_complete && aux_complete) {
            return Ok(None);
        }

        self.status = Status::TerminatedSuccessfully;
        if self.is_receiver() {
            let save = self
                .local_storage
                .remove::<storage::PendingSave<C>>(self.id())?;
            Ok(Some(Output::New(save)))
        } else {
            Ok(Some(Output::Old))
        }
    }

    fn pimod_transcript() -> Transcript {
        Transcript::new(b"reshare pimod")
    }
}
