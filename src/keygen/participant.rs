// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The key generation state machine.

use super::{
    commit::{KeygenCommit, KeygenDecommit},
    keyshare::{KeySharePrivate, KeySharePublic},
    output::Output,
    share::{EncryptedShare, RoundTwoPrivate},
};
use crate::{
    curve::{CurveTrait, EcdsaCurve, ScalarTrait},
    errors::{CallerError, InternalError, Result},
    local_storage::{LocalStorage, TypeTag},
    messages::{KeygenMessageType, Message, MessageType},
    paillier::KeyProof,
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    preparams::{LocalPreParams, PublicPreParams},
    protocol::{Identifier, Parameters, ParticipantIdentifier, SharedContext},
    ring_pedersen::VerifiedRingPedersen,
    run_only_once,
    vss::{CommitmentVector, Polynomial},
    zkp::{
        pifac,
        pimod::{self, PiModProof},
        pisch::{CommonInput as PiSchInput, PiSchPrecommit, PiSchProof, ProverSecret},
        Proof,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
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
    pub(super) struct Aux;
    impl TypeTag for Aux {
        type Value = PublicPreParams;
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

/// Input for key generation: the run's [`Parameters`] and this party's
/// pre-generated [`LocalPreParams`].
#[derive(Debug, Clone)]
pub struct Input {
    params: Parameters,
    preparams: LocalPreParams,
}

impl Input {
    /// Bundle parameters and pre-parameters into a keygen input.
    pub fn new(params: Parameters, preparams: LocalPreParams) -> Self {
        Self { params, preparams }
    }

    pub(crate) fn params(&self) -> &Parameters {
        &self.params
    }

    pub(crate) fn preparams(&self) -> &LocalPreParams {
        &self.preparams
    }
}

/// Round-one broadcast: the hash commitment to this party's dealing,
/// plus its Paillier key and ring-Pedersen parameters with their setup
/// proofs.
#[derive(Clone, Serialize, Deserialize)]
struct RoundOnePublic {
    commit: KeygenCommit,
    paillier_pk: crate::paillier::EncryptionKey,
    ring_pedersen: VerifiedRingPedersen,
    mod_proof: Option<PiModProof>,
}

/// Round-three broadcast: the Schnorr proof of the aggregated share,
/// completed from the round-one precommitment, plus the Paillier
/// correct-key proof.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct RoundThreePublic<C: CurveTrait> {
    sch_proof: PiSchProof<C>,
    key_proof: KeyProof,
}

/// A [`ProtocolParticipant`] that runs the four-round distributed key
/// generation protocol, producing a `(t, n)` Shamir sharing of a fresh
/// ECDSA key:
///
/// - **Round 1**: commit to a fresh degree-`t` Feldman dealing; publish
///   the commitment with the Paillier and ring-Pedersen material.
/// - **Round 2**: send every peer its encrypted sub-share (with a
///   factor-size proof), and open the commitment.
/// - **Round 3**: verify all dealings and sub-shares, aggregate into the
///   final share, and prove knowledge of it via Schnorr, alongside the
///   Paillier correct-key proof.
/// - **Round 4**: verify everyone's proofs and emit the save bundle.
#[derive(Debug)]
pub struct KeygenParticipant<C: EcdsaCurve> {
    sid: Identifier,
    input: Input,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
    _curve: PhantomData<C>,
}

impl<C: EcdsaCurve> ProtocolParticipant for KeygenParticipant<C> {
    type Input = Input;
    type Output = Output<C>;

    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self> {
        input.params().check_participant_list(id, &other_participant_ids)?;
        Ok(Self {
            sid,
            input,
            id,
            other_participant_ids,
            local_storage: Default::default(),
            status: Status::NotReady,
            _curve: PhantomData,
        })
    }

    fn ready_type() -> MessageType {
        MessageType::Keygen(KeygenMessageType::Ready)
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
            "KEYGEN: participant {} received {:?} from {}",
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
            MessageType::Keygen(KeygenMessageType::Ready) => self.handle_ready_msg(rng, message),
            MessageType::Keygen(KeygenMessageType::R1CommitHash) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::Keygen(KeygenMessageType::R2PrivateShare) => {
                self.handle_round_two_private_msg(message)
            }
            MessageType::Keygen(KeygenMessageType::R2Decommit) => {
                self.handle_round_two_decommit_msg(rng, message)
            }
            MessageType::Keygen(KeygenMessageType::R3Proofs) => {
                self.handle_round_three_msg(message)
            }
            message_type => {
                error!("incorrect MessageType given to KeygenParticipant: {message_type:?}");
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
        for pid in self.local_storage.missing_ids::<storage::SubShare<C>>(&others) {
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

impl<C: EcdsaCurve> InnerProtocolParticipant for KeygenParticipant<C> {
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

impl<C: EcdsaCurve> KeygenParticipant<C> {
    /// Handle the local bootstrap: mark ready and deal round one.
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

    /// Deal a fresh polynomial and broadcast its commitment together with
    /// our Paillier and ring-Pedersen material.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        sid: Identifier,
    ) -> Result<Vec<Message>> {
        info!("Generating round one keygen messages.");
        let threshold = self.input.params().threshold();

        let contribution = C::Scalar::random(rng);
        let polynomial = Polynomial::<C>::random(contribution, threshold, rng);
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

        let context = self.retrieve_context();
        let ring_pedersen = VerifiedRingPedersen::prove(
            self.input.preparams().ring_pedersen(),
            &context,
            rng,
        )?;
        let mod_proof = if self.input.params().no_proof_mod() {
            None
        } else {
            Some(PiModProof::prove(
                pimod::CommonInput::new(self.input.preparams().decryption_key().modulus()),
                pimod::ProverSecret::new(self.input.preparams().decryption_key()),
                &context,
                &mut Self::pimod_transcript(),
                rng,
            )?)
        };

        let public = RoundOnePublic {
            commit: commit.clone(),
            paillier_pk: self.input.preparams().encryption_key(),
            ring_pedersen,
            mod_proof,
        };

        self.local_storage
            .store::<storage::Dealing<C>>(self.id(), polynomial);
        self.local_storage
            .store::<storage::SchnorrPrecom<C>>(self.id(), sch_precom);
        self.local_storage.store::<storage::Commit>(self.id(), commit);
        self.local_storage
            .store::<storage::Decommit<C>>(self.id(), decommit);
        self.local_storage
            .store::<storage::Aux>(self.id(), self.input.preparams().to_public());

        self.broadcast_message(MessageType::Keygen(KeygenMessageType::R1CommitHash), &public)
    }

    /// Handle a round-one broadcast: verify the sender's setup proofs and
    /// file its commitment.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Commit>(message.from())?;
        info!("Handling round one keygen message.");

        message.check_type(MessageType::Keygen(KeygenMessageType::R1CommitHash))?;
        let public: RoundOnePublic = deserialize!(&message.unverified_bytes)?;

        let context = self.retrieve_context();
        public
            .ring_pedersen
            .verify(&context)
            .map_err(|e| e.blame(message.from()))?;
        if self.input.params().no_proof_mod() {
            // Skipping the proof is a test-only concession; nothing to
            // check.
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
            error!("peer's Paillier modulus is too small to carry curve shares");
            return Err(InternalError::ProtocolError(Some(message.from())));
        }

        self.local_storage
            .store_once::<storage::Commit>(message.from(), public.commit)?;
        self.local_storage.store::<storage::Aux>(
            message.from(),
            PublicPreParams {
                paillier: public.paillier_pk,
                ring_pedersen: public.ring_pedersen.scheme().clone(),
            },
        );

        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(self.other_ids());
        if r1_done {
            let round_two_messages = run_only_once!(self.gen_round_two_msgs(rng, message.id()))?;

            let mut outcomes = self
                .fetch_messages(MessageType::Keygen(KeygenMessageType::R2PrivateShare))?
                .iter()
                .map(|msg| self.handle_round_two_private_msg(msg))
                .collect::<Result<Vec<_>>>()?;
            let decommit_outcomes = self
                .fetch_messages(MessageType::Keygen(KeygenMessageType::R2Decommit))?
                .iter()
                .map(|msg| self.handle_round_two_decommit_msg(rng, msg))
                .collect::<Result<Vec<_>>>()?;
            outcomes.extend(decommit_outcomes);

            ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
        } else {
            Ok(ProcessOutcome::Incomplete)
        }
    }

    /// Send every peer its encrypted sub-share and open our commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        sid: Identifier,
    ) -> Result<Vec<Message>> {
        info!("Generating round two keygen messages.");

        let mut messages = vec![];
        // If our own round one hasn't run yet (its completion can be
        // detected from a peer's message), catch up first.
        if !self
            .local_storage
            .contains::<storage::Decommit<C>>(self.id())
        {
            let more = run_only_once!(self.gen_round_one_msgs(rng, sid))?;
            messages.extend_from_slice(&more);
        }

        let context = self.retrieve_context();
        let (p, q) = {
            let dk = self.input.preparams().decryption_key();
            let (p, q) = dk.primes();
            (p.clone(), q.clone())
        };
        for recipient in self.other_ids().to_vec() {
            let (sub_share, own_modulus) = {
                let polynomial = self
                    .local_storage
                    .retrieve::<storage::Dealing<C>>(self.id())?;
                (
                    polynomial.evaluate_at(recipient),
                    self.input.preparams().decryption_key().modulus().clone(),
                )
            };
            let recipient_aux = self.local_storage.retrieve::<storage::Aux>(recipient)?;
            let share = EncryptedShare::<C>::encrypt(&sub_share, &recipient_aux.paillier, rng)?;
            let fac_proof = if self.input.params().no_proof_fac() {
                None
            } else {
                Some(PiFacProofHelper::prove(
                    &recipient_aux.ring_pedersen,
                    &own_modulus,
                    &p,
                    &q,
                    &context,
                    rng,
                )?)
            };
            messages.push(Message::new(
                MessageType::Keygen(KeygenMessageType::R2PrivateShare),
                self.sid(),
                self.id(),
                recipient,
                &RoundTwoPrivate::<C> { share, fac_proof },
            )?);
        }

        let decommit = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(self.id())?
            .clone();
        messages.extend(self.broadcast_message(
            MessageType::Keygen(KeygenMessageType::R2Decommit),
            &decommit,
        )?);
        Ok(messages)
    }

    /// Handle an encrypted sub-share addressed to us.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_private_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::SubShare<C>>(message.from())?;

        // The factor-size proof speaks about the sender's modulus, which
        // arrives in round one; hold the share until then.
        if !self.local_storage.contains::<storage::Aux>(message.from()) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round two keygen private message.");

        message.check_type(MessageType::Keygen(KeygenMessageType::R2PrivateShare))?;
        let private: RoundTwoPrivate<C> = deserialize!(&message.unverified_bytes)?;

        if self.input.params().no_proof_fac() {
            // Test-only concession, as with the modulus proof.
        } else {
            let fac_proof = private
                .fac_proof
                .ok_or(InternalError::ProtocolError(Some(message.from())))?;
            let sender_modulus = self
                .local_storage
                .retrieve::<storage::Aux>(message.from())?
                .paillier
                .modulus()
                .clone();
            let context = self.retrieve_context();
            PiFacProofHelper::verify(
                fac_proof,
                self.input.preparams().ring_pedersen().scheme(),
                &sender_modulus,
                &context,
            )
            .map_err(|e| e.blame(message.from()))?;
        }

        let sub_share = private
            .share
            .decrypt(self.input.preparams().decryption_key())
            .map_err(|_| InternalError::ProtocolError(Some(message.from())))?;
        self.local_storage
            .store_once::<storage::SubShare<C>>(message.from(), sub_share)?;

        self.maybe_finish_round_two()
    }

    /// Handle a decommitment broadcast.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_decommit_msg<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::Decommit<C>>(message.from())?;

        // All round-one commitments must be on file before decommitments
        // can be judged.
        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::Commit>(&self.all_participants());
        if !r1_done {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round two keygen decommit message.");

        let com = self.local_storage.retrieve::<storage::Commit>(message.from())?;
        let decommit = KeygenDecommit::from_message(
            message,
            com,
            self.input.params().threshold(),
        )?;
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

        if got_all_decommits && got_all_shares {
            let round_three_messages = run_only_once!(self.gen_round_three_msgs())?;
            let outcomes = self
                .fetch_messages(MessageType::Keygen(KeygenMessageType::R3Proofs))?
                .iter()
                .map(|msg| self.handle_round_three_msg(msg))
                .collect::<Result<Vec<_>>>()?;
            ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
        } else {
            Ok(ProcessOutcome::Incomplete)
        }
    }

    /// Verify all dealings, aggregate our final share, and prove we know
    /// it.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round three keygen messages.");

        // Check every received sub-share against its dealer's revealed
        // vector.
        for dealer in self.other_ids().to_vec() {
            let vector = &self
                .local_storage
                .retrieve::<storage::Decommit<C>>(dealer)?
                .vector;
            let sub_share = self.local_storage.retrieve::<storage::SubShare<C>>(dealer)?;
            if !vector.is_valid_share(self.id(), sub_share) {
                error!("sub-share from {dealer} does not lie on its committed polynomial");
                return Err(InternalError::InvalidVssShare(dealer));
            }
        }

        // Aggregate the dealings: our share is the sum of everyone's
        // evaluations at our point, and the committee's polynomial is the
        // sum of the committed ones.
        let own_evaluation = {
            let polynomial = self
                .local_storage
                .retrieve::<storage::Dealing<C>>(self.id())?;
            polynomial.evaluate_at(self.id())
        };
        let mut private_share = own_evaluation;
        for dealer in self.other_ids() {
            let sub_share = self.local_storage.retrieve::<storage::SubShare<C>>(*dealer)?;
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
        let sch_proof = PiSchProof::prove_from_precommit(
            &context,
            precom,
            &PiSchInput::new(&public_share),
            &ProverSecret::new(&private_share),
            &transcript,
        )?;
        let key_proof = KeyProof::prove(
            self.input.preparams().decryption_key(),
            &context,
            &mut Self::key_proof_transcript(),
        )?;

        self.local_storage
            .store::<storage::PrivateShare<C>>(self.id(), KeySharePrivate::new(private_share));
        self.local_storage
            .store::<storage::Aggregate<C>>(self.id(), aggregate);
        self.local_storage.store::<storage::ValidPublicShare<C>>(
            self.id(),
            KeySharePublic::new(self.id(), public_share),
        );

        self.broadcast_message(
            MessageType::Keygen(KeygenMessageType::R3Proofs),
            &RoundThreePublic::<C> {
                sch_proof,
                key_proof,
            },
        )
    }

    fn can_handle_round_three_msg(&self) -> bool {
        self.local_storage.contains::<storage::Aggregate<C>>(self.id())
    }

    /// Handle a round-three broadcast: verify the sender's Schnorr and
    /// Paillier-key proofs against its derived public share.
    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::ValidPublicShare<C>>(message.from())?;

        if !self.can_handle_round_three_msg() {
            info!("Not yet ready to handle round three keygen message.");
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round three keygen message.");

        message.check_type(MessageType::Keygen(KeygenMessageType::R3Proofs))?;
        let public: RoundThreePublic<C> = deserialize!(&message.unverified_bytes)?;

        let sender_share = {
            let aggregate = self.local_storage.retrieve::<storage::Aggregate<C>>(self.id())?;
            aggregate.evaluate_at(message.from())
        };

        let context = self.retrieve_context();
        let precommit_a = self
            .local_storage
            .retrieve::<storage::Decommit<C>>(message.from())?
            .precommit_a;
        let transcript = Self::schnorr_transcript(self.sid(), message.from())?;
        public
            .sch_proof
            .verify_with_precommit(
                PiSchInput::new(&sender_share),
                &context,
                &transcript,
                &precommit_a,
            )
            .map_err(|e| e.blame(message.from()))?;

        let sender_pk = self
            .local_storage
            .retrieve::<storage::Aux>(message.from())?
            .paillier
            .clone();
        public
            .key_proof
            .verify(&sender_pk, &context, &mut Self::key_proof_transcript())
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
        let got_all_proofs = self
            .local_storage
            .contains_for_all_ids::<storage::ValidPublicShare<C>>(&self.all_participants());
        if !got_all_proofs {
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
        let aux = self
            .all_participants()
            .iter()
            .map(|pid| Ok((*pid, self.local_storage.retrieve::<storage::Aux>(*pid)?.clone())))
            .collect::<Result<Vec<_>>>()?;
        let public_key_point = *self
            .local_storage
            .retrieve::<storage::Aggregate<C>>(self.id())?
            .constant();
        let private_share = self
            .local_storage
            .remove::<storage::PrivateShare<C>>(self.id())?;

        let output = Output::from_parts(
            self.input.params().peers().clone(),
            self.input.params().threshold(),
            private_share,
            public_shares,
            public_key_point,
            aux,
            self.input.preparams().clone(),
        )?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(output))
    }

    fn schnorr_transcript(
        sid: Identifier,
        sender: ParticipantIdentifier,
    ) -> Result<Transcript> {
        let mut transcript = Transcript::new(b"keygen schnorr");
        transcript.append_message(b"sid", &serialize!(&sid)?);
        transcript.append_message(b"sender", &serialize!(&sender)?);
        Ok(transcript)
    }

    fn pimod_transcript() -> Transcript {
        Transcript::new(b"keygen pimod")
    }

    fn key_proof_transcript() -> Transcript {
        Transcript::new(b"keygen paillier key")
    }
}

#[cfg(test)]
impl<C: EcdsaCurve> KeygenParticipant<C> {
    /// Rebuild this dealer's round-two share message for `victim`, but
    /// containing the evaluation meant for `wrong_recipient`. Used by
    /// tests to play a misbehaving dealer.
    pub(crate) fn resend_share_for_test<R: RngCore + CryptoRng>(
        &mut self,
        wrong_recipient: ParticipantIdentifier,
        victim: ParticipantIdentifier,
        rng: &mut R,
    ) -> Result<Message> {
        let sub_share = {
            let polynomial = self
                .local_storage
                .retrieve::<storage::Dealing<C>>(self.id())?;
            polynomial.evaluate_at(wrong_recipient)
        };
        let victim_aux = self.local_storage.retrieve::<storage::Aux>(victim)?;
        let share = EncryptedShare::<C>::encrypt(&sub_share, &victim_aux.paillier, rng)?;
        Message::new(
            MessageType::Keygen(KeygenMessageType::R2PrivateShare),
            self.sid(),
            self.id(),
            victim,
            &RoundTwoPrivate::<C> {
                share,
                fac_proof: None,
            },
        )
    }
}

/// Thin wrapper shaping the factor-size proof's inputs from the keygen
/// perspective: the statement modulus is the *dealer's* Paillier modulus,
/// the commitment parameters are the *recipient's*.
struct PiFacProofHelper;

impl PiFacProofHelper {
    fn prove<C: EcdsaCurve, R: RngCore + CryptoRng>(
        recipient_setup: &crate::ring_pedersen::RingPedersen,
        own_modulus: &libpaillier::unknown_order::BigNumber,
        p: &libpaillier::unknown_order::BigNumber,
        q: &libpaillier::unknown_order::BigNumber,
        context: &SharedContext<C>,
        rng: &mut R,
    ) -> Result<pifac::PiFacProof> {
        let order = C::order();
        pifac::PiFacProof::prove(
            pifac::CommonInput::new(recipient_setup, own_modulus, &order),
            pifac::ProverSecret::new(p, q),
            context,
            &mut Transcript::new(b"keygen pifac"),
            rng,
        )
    }

    fn verify<C: EcdsaCurve>(
        proof: pifac::PiFacProof,
        own_setup: &crate::ring_pedersen::RingPedersen,
        sender_modulus: &libpaillier::unknown_order::BigNumber,
        context: &SharedContext<C>,
    ) -> Result<()> {
        let order = C::order();
        proof.verify(
            pifac::CommonInput::new(own_setup, sender_modulus, &order),
            context,
            &mut Transcript::new(b"keygen pifac"),
        )
    }
}
