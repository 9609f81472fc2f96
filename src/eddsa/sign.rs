// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Threshold EdDSA signing over ed25519.
//!
//! Three rounds of threshold Schnorr. Each signer's nonce point is fixed
//! under a hash commitment before anyone reveals theirs, closing the
//! rushing-adversary attack on the aggregated nonce; a Schnorr proof at
//! reveal time ties every `Rᵢ` to a known exponent. The challenge is the
//! standard RFC 8032 value `SHA-512(R ‖ Y ‖ m) mod L`, so the finished
//! signature verifies under any stock Ed25519 verifier.

use super::keygen::Output as EddsaKeyOutput;
use std::ops::Mul;
use crate::{
    curve::CurveTrait,
    ed25519::{signature_from_parts, verifying_key, Ed25519},
    errors::{CallerError, InternalError, Result},
    local_storage::{LocalStorage, TypeTag},
    messages::{EddsaSignMessageType, Message, MessageType},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{Identifier, ParticipantIdentifier, SharedContext},
    run_only_once,
    sign::commit::{CommitPhase, PointsCommit, PointsDecommit},
    vss::lagrange_at_zero,
    zkp::{
        pisch::{CommonInput as PiSchInput, PiSchProof, ProverSecret},
        Proof,
    },
};
use curve25519_dalek::scalar::Scalar as DalekScalar;
use ed25519_dalek::Verifier;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use std::fmt::Debug;
use tracing::{error, info, instrument};
use zeroize::Zeroize;

/// Input for EdDSA signing: the message and the save bundle.
///
/// As with ECDSA, the participant set of the session is the signer set:
/// at least `t + 1` committee members, agreed out of band.
#[derive(Debug, Clone)]
pub struct Input {
    message: Vec<u8>,
    save: EddsaKeyOutput<Ed25519>,
}

impl Input {
    /// Bundle the message (typically a digest; EdDSA hashes internally
    /// either way) and the keygen output into a signing input.
    pub fn new(message: impl Into<Vec<u8>>, save: EddsaKeyOutput<Ed25519>) -> Self {
        Self {
            message: message.into(),
            save,
        }
    }
}

/// Per-signer derived values fixed at startup.
struct SignerPrep {
    /// This signer's additive key share `w = λ · x` over the signer set.
    w: DalekScalar,
}

impl Debug for SignerPrep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignerPrep([redacted])")
    }
}

impl Drop for SignerPrep {
    fn drop(&mut self) {
        self.w.zeroize();
    }
}

/// The nonce sampled in round one.
struct NonceSecret {
    r: DalekScalar,
    big_r: Ed25519,
}

impl Debug for NonceSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NonceSecret([redacted])")
    }
}

impl Drop for NonceSecret {
    fn drop(&mut self) {
        self.r.zeroize();
    }
}

mod storage {
    use super::*;

    pub(super) struct Prep;
    impl TypeTag for Prep {
        type Value = SignerPrep;
    }
    pub(super) struct Nonce;
    impl TypeTag for Nonce {
        type Value = NonceSecret;
    }
    pub(super) struct NonceCommit;
    impl TypeTag for NonceCommit {
        type Value = PointsCommit;
    }
    pub(super) struct NonceOpening;
    impl TypeTag for NonceOpening {
        type Value = PointsDecommit<Ed25519>;
    }
    pub(super) struct NoncePoint;
    impl TypeTag for NoncePoint {
        type Value = Ed25519;
    }
    pub(super) struct SigShare;
    impl TypeTag for SigShare {
        type Value = DalekScalar;
    }
}

/// A [`ProtocolParticipant`] that runs the three-round threshold EdDSA
/// signing protocol.
#[derive(Debug)]
pub struct EddsaSignParticipant {
    sid: Identifier,
    input: Input,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
}

impl ProtocolParticipant for EddsaSignParticipant {
    type Input = Input;
    type Output = ed25519_dalek::Signature;

    fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: Self::Input,
    ) -> Result<Self> {
        let committee = input.save.peers();
        if !committee.contains(id)
            || other_participant_ids
                .iter()
                .any(|pid| !committee.contains(*pid))
        {
            error!("signer set contains parties outside the committee");
            Err(CallerError::ParticipantConfigError)?;
        }
        let mut signer_set: Vec<_> = std::iter::once(id)
            .chain(other_participant_ids.iter().copied())
            .collect();
        signer_set.sort();
        signer_set.dedup();
        if signer_set.len() != other_participant_ids.len() + 1 {
            error!("signer set contains duplicates");
            Err(CallerError::ParticipantConfigError)?;
        }
        if signer_set.len() < input.save.threshold() + 1 {
            error!(
                "{} signers cannot meet a threshold of {}",
                signer_set.len(),
                input.save.threshold()
            );
            Err(CallerError::BadInput)?;
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
        MessageType::EddsaSign(EddsaSignMessageType::Ready)
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
            "EDDSA SIGN: participant {} received {:?} from {}",
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
            MessageType::EddsaSign(EddsaSignMessageType::Ready) => {
                self.handle_ready_msg(rng, message)
            }
            MessageType::EddsaSign(EddsaSignMessageType::R1CommitNonce) => {
                self.handle_round_one_msg(rng, message)
            }
            MessageType::EddsaSign(EddsaSignMessageType::R2DecommitNonce) => {
                self.handle_round_two_msg(message)
            }
            MessageType::EddsaSign(EddsaSignMessageType::R3Share) => {
                self.handle_round_three_msg(message)
            }
            message_type => {
                error!("incorrect MessageType given to EddsaSignParticipant: {message_type:?}");
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
        let missing_commits = self
            .local_storage
            .missing_ids::<storage::NonceCommit>(&others);
        if !missing_commits.is_empty() {
            return missing_commits;
        }
        let missing_points = self
            .local_storage
            .missing_ids::<storage::NoncePoint>(&others);
        if !missing_points.is_empty() {
            return missing_points;
        }
        self.local_storage.missing_ids::<storage::SigShare>(&others)
    }
}

impl InnerProtocolParticipant for EddsaSignParticipant {
    type Context = SharedContext<Ed25519>;

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

impl EddsaSignParticipant {
    #[instrument(skip_all, err(Debug))]
    fn handle_ready_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let ready_outcome = self.process_ready_message(rng, message)?;

        let signer_set = {
            let mut set = self.all_participants();
            set.sort();
            set
        };
        let lagrange = lagrange_at_zero::<Ed25519>(self.id(), &signer_set)?;
        let w = lagrange.mul(self.input.save.private_share().as_scalar());

        // Sanity-check the signer set against the group key.
        let assembled = signer_set
            .iter()
            .map(|&pid| {
                let coefficient = lagrange_at_zero::<Ed25519>(pid, &signer_set)?;
                let share = self.input.save.find_public_share(pid)?;
                Ok(share.as_ref().multiply_by_scalar(&coefficient))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .fold(Ed25519::identity(), |sum, point| sum + point);
        if &assembled != self.input.save.public_key_point() {
            error!("signer set's additive shares do not assemble the group key");
            Err(CallerError::BadInput)?;
        }

        self.local_storage
            .store::<storage::Prep>(self.id(), SignerPrep { w });

        let round_one_messages = run_only_once!(self.gen_round_one_msgs(rng))?;
        Ok(ready_outcome.with_messages(round_one_messages))
    }

    /// Sample a nonce and broadcast a commitment to its public point.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round one eddsa sign messages.");

        let r = DalekScalar::random(rng);
        let big_r = Ed25519::generator().multiply_by_scalar(&r);

        let decommit = PointsDecommit::new(
            rng,
            self.sid(),
            self.id(),
            CommitPhase::Nonce,
            vec![big_r],
        );
        let commit = decommit.commit()?;

        self.local_storage
            .store::<storage::Nonce>(self.id(), NonceSecret { r, big_r });
        self.local_storage
            .store::<storage::NonceCommit>(self.id(), commit.clone());
        self.local_storage
            .store::<storage::NonceOpening>(self.id(), decommit);
        self.local_storage
            .store::<storage::NoncePoint>(self.id(), big_r);

        self.broadcast_message(
            MessageType::EddsaSign(EddsaSignMessageType::R1CommitNonce),
            &commit,
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_one_msg<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::NonceCommit>(message.from())?;
        info!("Handling round one eddsa sign message.");

        message.check_type(MessageType::EddsaSign(EddsaSignMessageType::R1CommitNonce))?;
        let commit: PointsCommit = deserialize!(&message.unverified_bytes)?;
        self.local_storage
            .store_once::<storage::NonceCommit>(message.from(), commit)?;

        let r1_done = self
            .local_storage
            .contains_for_all_ids::<storage::NonceCommit>(&self.all_participants());
        if r1_done {
            let round_two_messages = run_only_once!(self.gen_round_two_msgs(rng))?;
            let outcomes = self
                .fetch_messages(MessageType::EddsaSign(
                    EddsaSignMessageType::R2DecommitNonce,
                ))?
                .iter()
                .map(|msg| self.handle_round_two_msg(msg))
                .collect::<Result<Vec<_>>>()?;
            ProcessOutcome::collect_with_messages(outcomes, round_two_messages)
        } else {
            Ok(ProcessOutcome::Incomplete)
        }
    }

    /// Open the nonce commitment with a proof of knowledge of the nonce.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        info!("Generating round two eddsa sign messages.");
        let context = self.retrieve_context();

        let (decommit, proof) = {
            let nonce = self.local_storage.retrieve::<storage::Nonce>(self.id())?;
            let decommit = self
                .local_storage
                .retrieve::<storage::NonceOpening>(self.id())?
                .clone();
            let mut transcript = Self::nonce_transcript(self.sid(), self.id())?;
            let proof = PiSchProof::<Ed25519>::prove(
                PiSchInput::new(&nonce.big_r),
                ProverSecret::new(&nonce.r),
                &context,
                &mut transcript,
                rng,
            )?;
            (decommit, proof)
        };

        #[derive(serde::Serialize)]
        struct Payload<'a> {
            decommit: &'a PointsDecommit<Ed25519>,
            proof: &'a PiSchProof<Ed25519>,
        }
        self.broadcast_message(
            MessageType::EddsaSign(EddsaSignMessageType::R2DecommitNonce),
            &Payload {
                decommit: &decommit,
                proof: &proof,
            },
        )
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_two_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::NoncePoint>(message.from())?;

        if !self
            .local_storage
            .contains::<storage::NonceCommit>(message.from())
        {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round two eddsa sign message.");

        message.check_type(MessageType::EddsaSign(EddsaSignMessageType::R2DecommitNonce))?;
        #[derive(serde::Deserialize)]
        struct Payload {
            decommit: PointsDecommit<Ed25519>,
            proof: PiSchProof<Ed25519>,
        }
        let payload: Payload = deserialize!(&message.unverified_bytes)?;

        let commit = self
            .local_storage
            .retrieve::<storage::NonceCommit>(message.from())?;
        payload
            .decommit
            .verify(self.sid(), message.from(), CommitPhase::Nonce, 1, commit)?;
        let big_r = payload.decommit.points[0];

        let context = self.retrieve_context();
        let mut transcript = Self::nonce_transcript(self.sid(), message.from())?;
        payload
            .proof
            .verify(PiSchInput::new(&big_r), &context, &mut transcript)
            .map_err(|e| e.blame(message.from()))?;

        self.local_storage
            .store_once::<storage::NoncePoint>(message.from(), big_r)?;

        self.maybe_finish_round_two()
    }

    fn maybe_finish_round_two(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        if !self
            .local_storage
            .contains_for_all_ids::<storage::NoncePoint>(&self.all_participants())
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let round_three_messages = run_only_once!(self.gen_round_three_msgs())?;
        let outcomes = self
            .fetch_messages(MessageType::EddsaSign(EddsaSignMessageType::R3Share))?
            .iter()
            .map(|msg| self.handle_round_three_msg(msg))
            .collect::<Result<Vec<_>>>()?;
        ProcessOutcome::collect_with_messages(outcomes, round_three_messages)
    }

    /// Compute the RFC 8032 challenge and release our response share.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs(&mut self) -> Result<Vec<Message>> {
        info!("Generating round three eddsa sign messages.");

        let share = {
            let big_r_agg = self.aggregate_nonce_point()?;
            let challenge = self.challenge(&big_r_agg)?;
            let nonce = self.local_storage.retrieve::<storage::Nonce>(self.id())?;
            let prep = self.local_storage.retrieve::<storage::Prep>(self.id())?;
            nonce.r + challenge * prep.w
        };

        self.local_storage
            .store::<storage::SigShare>(self.id(), share);
        self.broadcast_message(MessageType::EddsaSign(EddsaSignMessageType::R3Share), &share)
    }

    #[instrument(skip_all, err(Debug))]
    fn handle_round_three_msg(
        &mut self,
        message: &Message,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        self.check_for_duplicate_msg::<storage::SigShare>(message.from())?;

        if !self.local_storage.contains::<storage::SigShare>(self.id()) {
            self.stash_message(message)?;
            return Ok(ProcessOutcome::Incomplete);
        }
        info!("Handling round three eddsa sign message.");

        message.check_type(MessageType::EddsaSign(EddsaSignMessageType::R3Share))?;
        let share: DalekScalar = deserialize!(&message.unverified_bytes)?;

        // A share can be checked immediately: s_j * G = R_j + c * W_j.
        let signer_set = {
            let mut set = self.all_participants();
            set.sort();
            set
        };
        let big_r_agg = self.aggregate_nonce_point()?;
        let challenge = self.challenge(&big_r_agg)?;
        let coefficient = lagrange_at_zero::<Ed25519>(message.from(), &signer_set)?;
        let big_w = self
            .input
            .save
            .find_public_share(message.from())?
            .as_ref()
            .multiply_by_scalar(&coefficient);
        let big_r_sender = *self
            .local_storage
            .retrieve::<storage::NoncePoint>(message.from())?;
        let expected = big_r_sender + big_w.multiply_by_scalar(&challenge);
        if Ed25519::generator().multiply_by_scalar(&share) != expected {
            error!("signature share from {} fails its check equation", message.from());
            return Err(InternalError::ProtocolError(Some(message.from())));
        }

        self.local_storage
            .store_once::<storage::SigShare>(message.from(), share)?;

        self.maybe_finish_protocol()
    }

    fn maybe_finish_protocol(
        &mut self,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let all = self.all_participants();
        if !self
            .local_storage
            .contains_for_all_ids::<storage::SigShare>(&all)
        {
            return Ok(ProcessOutcome::Incomplete);
        }

        let big_r_agg = self.aggregate_nonce_point()?;
        let mut s = DalekScalar::ZERO;
        for pid in &all {
            s += self.local_storage.retrieve::<storage::SigShare>(*pid)?;
        }

        let signature = signature_from_parts(&big_r_agg, &s)?;
        let verifying_key = verifying_key(self.input.save.public_key_point())?;
        verifying_key
            .verify(&self.input.message, &signature)
            .map_err(|_| {
                error!("assembled eddsa signature failed verification");
                InternalError::ProtocolError(None)
            })?;

        self.status = Status::TerminatedSuccessfully;
        Ok(ProcessOutcome::Terminated(signature))
    }

    fn aggregate_nonce_point(&self) -> Result<Ed25519> {
        let mut sum = Ed25519::identity();
        for pid in self.all_participants() {
            sum = sum + *self.local_storage.retrieve::<storage::NoncePoint>(pid)?;
        }
        Ok(sum)
    }

    /// The RFC 8032 challenge `SHA-512(enc(R) ‖ enc(Y) ‖ m) mod L`.
    fn challenge(&self, big_r_agg: &Ed25519) -> Result<DalekScalar> {
        let mut hasher = Sha512::new();
        hasher.update(big_r_agg.to_bytes());
        hasher.update(self.input.save.public_key_point().to_bytes());
        hasher.update(&self.input.message);
        let digest: [u8; 64] = hasher.finalize().into();
        Ok(DalekScalar::from_bytes_mod_order_wide(&digest))
    }

    fn nonce_transcript(
        sid: Identifier,
        sender: ParticipantIdentifier,
    ) -> Result<Transcript> {
        let mut transcript = Transcript::new(b"eddsa sign nonce");
        transcript.append_message(b"sid", &serialize!(&sid)?);
        transcript.append_message(b"sender", &serialize!(&sender)?);
        Ok(transcript)
    }
}
