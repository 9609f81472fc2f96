// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The signing state machine.
//!
//! Nine rounds with interleaved gating make the usual
//! handler-per-round completion checks error prone, so this participant
//! splits message handling in two: `absorb` validates and files a single
//! message (stashing it when its prerequisites are missing), and
//! `advance` repeatedly re-examines the state, generating each round's
//! outbound messages as soon as its inputs are satisfied and replaying
//! newly unblocked stashed messages, until a fixpoint is reached.

use super::{
    commit::{CommitPhase, PointsCommit, PointsDecommit},
    mta::{MtaCheckedResponse, MtaInit, MtaPlainResponse},
};
use crate::{
    curve::{CurveTrait, EcdsaCurve, ScalarTrait, SignatureTrait},
    errors::{CallerError, InternalError, Result},
    keygen,
    local_storage::{LocalStorage, TypeTag},
    messages::{Message, MessageType, SignMessageType},
    paillier::{Ciphertext, Nonce},
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    protocol::{Identifier, ParticipantIdentifier, SharedContext},
    run_only_once,
    vss::lagrange_at_zero,
    zkp::{
        pilog::{CommonInput as PiLogInput, PiLogProof, ProverSecret as PiLogSecret},
        pist::{CommonInput as PiStInput, PiStProof, ProverSecret as PiStSecret},
        Proof, ProofContext,
    },
};
use libpaillier::unknown_order::BigNumber;
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, marker::PhantomData};
use tracing::{error, info, instrument};
use zeroize::Zeroize;

/// Input for signing: the digest to sign and the save bundle from key
/// generation.
///
/// The set of participants constructing this session *is* the signer
/// set: any subset of the committee of size at least `t + 1`, agreed out
/// of band and identical across all signers.
#[derive(Debug, Clone)]
pub struct Input<C: EcdsaCurve> {
    digest: [u8; 32],
    save: keygen::Output<C>,
}

impl<C: EcdsaCurve> Input<C> {
    /// Bundle a 32-byte message digest and the keygen output into a
    /// signing input. Hashing the message is the caller's business; the
    /// protocol never sees the preimage.
    pub fn new(digest: [u8; 32], save: keygen::Output<C>) -> Self {
        Self { digest, save }
    }

    fn digest_scalar(&self) -> Result<C::Scalar> {
        C::bn_to_scalar(&BigNumber::from_slice(self.digest))
    }
}

/// Per-signer derived values fixed at startup.
#[derive(Clone)]
struct SignerPrep<C: CurveTrait> {
    /// The digest as a scalar, `m`.
    m: C::Scalar,
    /// This signer's additive key share `w = λ · x` over the signer set.
    w: C::Scalar,
    /// Every signer's public additive share `W_j = λ_j · X_j`.
    big_w: Vec<(ParticipantIdentifier, C)>,
}

impl<C: CurveTrait> SignerPrep<C> {
    fn find_big_w(&self, pid: ParticipantIdentifier) -> Result<C> {
        self.big_w
            .iter()
            .find(|(owner, _)| *owner == pid)
            .map(|(_, point)| *point)
            .ok_or(InternalError::InternalInvariantFailed)
    }
}

impl<C: CurveTrait> Debug for SignerPrep<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SignerPrep([redacted])")
    }
}

impl<C: CurveTrait> Drop for SignerPrep<C> {
    fn drop(&mut self) {
        self.w.zeroize();
    }
}

/// The session nonces sampled in round one.
struct NonceSecrets<C: CurveTrait> {
    k: C::Scalar,
    gamma: C::Scalar,
    k_ciphertext: Ciphertext,
    k_nonce: Nonce,
}

impl<C: CurveTrait> Debug for NonceSecrets<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NonceSecrets([redacted])")
    }
}

impl<C: CurveTrait> Drop for NonceSecrets<C> {
    fn drop(&mut self) {
        self.k.zeroize();
        self.gamma.zeroize();
    }
}

/// The values derived once the group commitment `R` is known.
struct Phase5<C: CurveTrait> {
    big_r: C,
    r: C::Scalar,
    s_share: C::Scalar,
    l: C::Scalar,
    rho: C::Scalar,
    big_v: C,
    big_a: C,
}

impl<C: CurveTrait> Debug for Phase5<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Phase5([redacted])")
    }
}

impl<C: CurveTrait> Drop for Phase5<C> {
    fn drop(&mut self) {
        self.s_share.zeroize();
        self.l.zeroize();
        self.rho.zeroize();
    }
}

/// The aggregated check values and this signer's blinded contributions.
#[derive(Debug)]
struct Phase5b<C: CurveTrait> {
    big_v_agg: C,
    u: C,
    t: C,
}

mod storage {
    use super::*;

    pub(super) struct Prep<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Prep<C> {
        type Value = SignerPrep<C>;
    }
    pub(super) struct Nonces<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Nonces<C> {
        type Value = NonceSecrets<C>;
    }
    pub(super) struct GammaCommit;
    impl TypeTag for GammaCommit {
        type Value = PointsCommit;
    }
    pub(super) struct GammaOpening<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for GammaOpening<C> {
        type Value = PointsDecommit<C>;
    }
    pub(super) struct GammaPoint<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for GammaPoint<C> {
        type Value = C;
    }
    pub(super) struct KCipher;
    impl TypeTag for KCipher {
        type Value = Ciphertext;
    }
    pub(super) struct MtaAlphas<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for MtaAlphas<C> {
        type Value = (C::Scalar, C::Scalar);
    }
    pub(super) struct MtaBetas<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for MtaBetas<C> {
        type Value = (C::Scalar, C::Scalar);
    }
    pub(super) struct Delta<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Delta<C> {
        type Value = C::Scalar;
    }
    pub(super) struct Sigma<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Sigma<C> {
        type Value = C::Scalar;
    }
    pub(super) struct Phase5Tag<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Phase5Tag<C> {
        type Value = Phase5<C>;
    }
    pub(super) struct VACommit;
    impl TypeTag for VACommit {
        type Value = PointsCommit;
    }
    pub(super) struct VAOpening<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for VAOpening<C> {
        type Value = PointsDecommit<C>;
    }
    pub(super) struct VAPoints<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for VAPoints<C> {
        type Value = (C, C);
    }
    pub(super) struct Phase5bTag<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for Phase5bTag<C> {
        type Value = Phase5b<C>;
    }
    pub(super) struct UTCommit;
    impl TypeTag for UTCommit {
        type Value = PointsCommit;
    }
    pub(super) struct UTOpening<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for UTOpening<C> {
        type Value = PointsDecommit<C>;
    }
    pub(super) struct UTPoints<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for UTPoints<C> {
        type Value = (C, C);
    }
    pub(super) struct SigShare<C: CurveTrait> {
        _c: PhantomData<C>,
    }
    impl<C: CurveTrait> TypeTag for SigShare<C> {
        type Value = C::Scalar;
    }
}

/// Round-two unicast: the two MtA responses for one ordered pair.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct RoundTwoResponse<C: CurveTrait> {
    gamma: MtaPlainResponse,
    w: MtaCheckedResponse<C>,
}

/// Round-six broadcast: the opened check values with their
/// representation proof.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct RoundSixPublic<C: CurveTrait> {
    decommit: PointsDecommit<C>,
    proof: PiStProof<C>,
}

/// Round-eight broadcast: the opened blinded values with their equality
/// proof.
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "C: CurveTrait", deserialize = "C: CurveTrait"))]
struct RoundEightPublic<C: CurveTrait> {
    decommit: PointsDecommit<C>,
    proof: PiLogProof<C>,
}

/// Transcript context for signing proofs: the shared protocol context
/// plus the digest being signed.
pub(crate) struct SignContext<C: CurveTrait> {
    shared_context: SharedContext<C>,
    digest: [u8; 32],
}

impl<C: CurveTrait> ProofContext for SignContext<C> {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        Ok([self.shared_context.as_bytes()?, self.digest.to_vec()].concat())
    }
}

/// A [`ProtocolParticipant`] that runs the nine-round threshold ECDSA
/// signing protocol.
///
/// The signature is `(r, s)` with `R = (kγ)⁻¹ · Γ` and
/// `s = Σᵢ (m·kᵢ + r·σᵢ)`, where the `δ`/`σ` values come out of pairwise
/// multiplicative-to-additive conversions. No party ever learns the
/// nonce `k` or the key `x`; rounds five through nine are the check
/// phase that catches a signer whose share would break the signature
/// before any share is released.
#[derive(Debug)]
pub struct SignParticipant<C: EcdsaCurve> {
    sid: Identifier,
    input: Input<C>,
    id: ParticipantIdentifier,
    other_participant_ids: Vec<ParticipantIdentifier>,
    local_storage: LocalStorage,
    status: Status,
}

impl<C: EcdsaCurve> ProtocolParticipant for SignParticipant<C> {
    type Input = Input<C>;
    type Output = C::Signature;

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
        MessageType::Sign(SignMessageType::Ready)
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
            "SIGN: participant {} received {:?} from {}",
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
        let others = self.other_ids().to_vec();

        let mut missing = self
            .local_storage
            .missing_ids::<storage::GammaCommit>(&others);
        for pid in self.local_storage.missing_ids::<storage::KCipher>(&others) {
            if !missing.contains(&pid) {
                missing.push(pid);
            }
        }
        if !missing.is_empty() {
            return missing;
        }
        for tag_missing in [
            self.local_storage
                .missing_ids::<storage::MtaAlphas<C>>(&others),
            self.local_storage.missing_ids::<storage::Delta<C>>(&others),
            self.local_storage
                .missing_ids::<storage::GammaPoint<C>>(&others),
            self.local_storage.missing_ids::<storage::VACommit>(&others),
            self.local_storage
                .missing_ids::<storage::VAPoints<C>>(&others),
            self.local_storage.missing_ids::<storage::UTCommit>(&others),
            self.local_storage
                .missing_ids::<storage::UTPoints<C>>(&others),
            self.local_storage
                .missing_ids::<storage::SigShare<C>>(&others),
        ] {
            if !tag_missing.is_empty() {
                return tag_missing;
            }
        }
        Vec::new()
    }
}

impl<C: EcdsaCurve> InnerProtocolParticipant for SignParticipant<C> {
    type Context = SignContext<C>;

    fn retrieve_context(&self) -> Self::Context {
        SignContext {
            shared_context: SharedContext::collect(self),
            digest: self.input.digest,
        }
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

impl<C: EcdsaCurve> SignParticipant<C> {
    /// Handle the local bootstrap: derive the additive key shares for
    /// this signer set and let the cascade open round one.
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
        let lagrange = lagrange_at_zero::<C>(self.id(), &signer_set)?;
        let w = lagrange.mul(self.input.save.private_share().as_scalar());
        let big_w = signer_set
            .iter()
            .map(|&pid| {
                let coefficient = lagrange_at_zero::<C>(pid, &signer_set)?;
                let share = self.input.save.find_public_share(pid)?;
                Ok((pid, share.as_ref().multiply_by_scalar(&coefficient)))
            })
            .collect::<Result<Vec<_>>>()?;

        // The additive shares must still assemble the group key; a
        // mismatch means the caller fed inconsistent save data.
        let assembled = big_w
            .iter()
            .fold(C::identity(), |sum, (_, share)| sum + *share);
        if &assembled != self.input.save.public_key_point() {
            error!("signer set's additive shares do not assemble the group key");
            Err(CallerError::BadInput)?;
        }

        let prep = SignerPrep {
            m: self.input.digest_scalar()?,
            w,
            big_w,
        };
        self.local_storage.store::<storage::Prep<C>>(self.id(), prep);

        let advance_outcome = self.advance(rng)?;
        ready_outcome.consolidate(vec![advance_outcome])
    }

    /// Validate one inbound message and file its contents. Returns false
    /// if the message had to be stashed for later.
    fn absorb_message(&mut self, message: &Message) -> Result<bool> {
        match message.message_type() {
            MessageType::Sign(SignMessageType::R1CommitGamma) => {
                self.check_for_duplicate_msg::<storage::GammaCommit>(message.from())?;
                let commit: PointsCommit = deserialize!(&message.unverified_bytes)?;
                self.local_storage
                    .store_once::<storage::GammaCommit>(message.from(), commit)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R1EncK) => {
                self.check_for_duplicate_msg::<storage::KCipher>(message.from())?;
                let init: MtaInit = deserialize!(&message.unverified_bytes)?;
                let context = self.retrieve_context();
                let initiator_aux = self.input.save.find_aux(message.from())?;
                init.verify::<C>(
                    initiator_aux,
                    self.input.save.preparams().ring_pedersen().scheme(),
                    self.sid(),
                    message.from(),
                    self.id(),
                    &context,
                )
                .map_err(|e| e.blame(message.from()))?;
                self.local_storage
                    .store_once::<storage::KCipher>(message.from(), init.ciphertext)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R2MtaResponse) => {
                self.check_for_duplicate_msg::<storage::MtaAlphas<C>>(message.from())?;
                if !self.local_storage.contains::<storage::Nonces<C>>(self.id()) {
                    self.stash_message(message)?;
                    return Ok(false);
                }
                self.absorb_round_two(message)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R3Delta) => {
                self.check_for_duplicate_msg::<storage::Delta<C>>(message.from())?;
                let delta: C::Scalar = deserialize!(&message.unverified_bytes)?;
                self.local_storage
                    .store_once::<storage::Delta<C>>(message.from(), delta)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R4DecommitGamma) => {
                self.check_for_duplicate_msg::<storage::GammaPoint<C>>(message.from())?;
                if !self
                    .local_storage
                    .contains::<storage::GammaCommit>(message.from())
                {
                    self.stash_message(message)?;
                    return Ok(false);
                }
                let decommit: PointsDecommit<C> = deserialize!(&message.unverified_bytes)?;
                let commit = self
                    .local_storage
                    .retrieve::<storage::GammaCommit>(message.from())?;
                decommit.verify(self.sid(), message.from(), CommitPhase::Gamma, 1, commit)?;
                self.local_storage
                    .store_once::<storage::GammaPoint<C>>(message.from(), decommit.points[0])?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R5CommitVA) => {
                self.check_for_duplicate_msg::<storage::VACommit>(message.from())?;
                let commit: PointsCommit = deserialize!(&message.unverified_bytes)?;
                self.local_storage
                    .store_once::<storage::VACommit>(message.from(), commit)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R6DecommitVA) => {
                self.check_for_duplicate_msg::<storage::VAPoints<C>>(message.from())?;
                let gated = !self.local_storage.contains::<storage::Phase5Tag<C>>(self.id())
                    || !self
                        .local_storage
                        .contains::<storage::VACommit>(message.from());
                if gated {
                    self.stash_message(message)?;
                    return Ok(false);
                }
                self.absorb_round_six(message)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R7CommitUT) => {
                self.check_for_duplicate_msg::<storage::UTCommit>(message.from())?;
                let commit: PointsCommit = deserialize!(&message.unverified_bytes)?;
                self.local_storage
                    .store_once::<storage::UTCommit>(message.from(), commit)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R8DecommitUT) => {
                self.check_for_duplicate_msg::<storage::UTPoints<C>>(message.from())?;
                let gated = !self
                    .local_storage
                    .contains::<storage::Phase5bTag<C>>(self.id())
                    || !self
                        .local_storage
                        .contains::<storage::UTCommit>(message.from());
                if gated {
                    self.stash_message(message)?;
                    return Ok(false);
                }
                self.absorb_round_eight(message)?;
                Ok(true)
            }
            MessageType::Sign(SignMessageType::R9Share) => {
                self.check_for_duplicate_msg::<storage::SigShare<C>>(message.from())?;
                let share: C::Scalar = deserialize!(&message.unverified_bytes)?;
                self.local_storage
                    .store_once::<storage::SigShare<C>>(message.from(), share)?;
                Ok(true)
            }
            message_type => {
                error!("incorrect MessageType given to SignParticipant: {message_type:?}");
                Err(InternalError::InternalInvariantFailed)
            }
        }
    }

    /// As initiator: verify a peer's MtA responses and decrypt our
    /// additive outputs.
    fn absorb_round_two(&mut self, message: &Message) -> Result<()> {
        info!("Handling round two sign message.");
        let response: RoundTwoResponse<C> = deserialize!(&message.unverified_bytes)?;

        let context = self.retrieve_context();
        let (own_ciphertext, responder_big_w) = {
            let nonces = self.local_storage.retrieve::<storage::Nonces<C>>(self.id())?;
            let prep = self.local_storage.retrieve::<storage::Prep<C>>(self.id())?;
            (
                nonces.k_ciphertext.clone(),
                prep.find_big_w(message.from())?,
            )
        };
        let own_dk = self.input.save.preparams().decryption_key();
        let own_setup = self.input.save.preparams().ring_pedersen().scheme();

        let alpha = response
            .gamma
            .verify_and_decrypt::<C>(
                own_dk,
                own_setup,
                &own_ciphertext,
                self.sid(),
                self.id(),
                message.from(),
                &context,
            )
            .map_err(|e| e.blame(message.from()))?;
        let mu = response
            .w
            .verify_and_decrypt(
                &responder_big_w,
                own_dk,
                own_setup,
                &own_ciphertext,
                self.sid(),
                self.id(),
                message.from(),
                &context,
            )
            .map_err(|e| e.blame(message.from()))?;

        self.local_storage
            .store_once::<storage::MtaAlphas<C>>(message.from(), (alpha, mu))?;
        Ok(())
    }

    /// Verify an opened check-value pair and its representation proof.
    fn absorb_round_six(&mut self, message: &Message) -> Result<()> {
        info!("Handling round six sign message.");
        let public: RoundSixPublic<C> = deserialize!(&message.unverified_bytes)?;

        let commit = self
            .local_storage
            .retrieve::<storage::VACommit>(message.from())?;
        public.decommit.verify(
            self.sid(),
            message.from(),
            CommitPhase::CheckValues,
            2,
            commit,
        )?;
        let big_v = public.decommit.points[0];
        let big_a = public.decommit.points[1];

        let context = self.retrieve_context();
        let big_r = self
            .local_storage
            .retrieve::<storage::Phase5Tag<C>>(self.id())?
            .big_r;
        let mut transcript = Self::phase_five_transcript(self.sid(), message.from())?;
        public
            .proof
            .verify(
                PiStInput::new(&big_r, &big_v, &big_a),
                &context,
                &mut transcript,
            )
            .map_err(|e| e.blame(message.from()))?;

        self.local_storage
            .store_once::<storage::VAPoints<C>>(message.from(), (big_v, big_a))?;
        Ok(())
    }

    /// Verify an opened blinded pair and its dlog-equality proof.
    fn absorb_round_eight(&mut self, message: &Message) -> Result<()> {
        info!("Handling round eight sign message.");
        let public: RoundEightPublic<C> = deserialize!(&message.unverified_bytes)?;

        let commit = self
            .local_storage
            .retrieve::<storage::UTCommit>(message.from())?;
        public.decommit.verify(
            self.sid(),
            message.from(),
            CommitPhase::BlindedValues,
            2,
            commit,
        )?;
        let u = public.decommit.points[0];
        let t = public.decommit.points[1];

        let context = self.retrieve_context();
        let (big_v_agg, sender_big_a) = {
            let phase5b = self
                .local_storage
                .retrieve::<storage::Phase5bTag<C>>(self.id())?;
            let (_, big_a) = self
                .local_storage
                .retrieve::<storage::VAPoints<C>>(message.from())?;
            (phase5b.big_v_agg, *big_a)
        };
        let mut transcript = Self::phase_five_transcript(self.sid(), message.from())?;
        public
            .proof
            .verify(
                PiLogInput::new(&big_v_agg, &sender_big_a, &u),
                &context,
                &mut transcript,
            )
            .map_err(|e| e.blame(message.from()))?;

        self.local_storage
            .store_once::<storage::UTPoints<C>>(message.from(), (u, t))?;
        Ok(())
    }

    /// Drive the state machine forward: generate every round whose
    /// inputs are satisfied and replay stashed messages they unblock,
    /// until nothing changes. Returns the final outcome for this
    /// delivery.
    fn advance<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<ProcessOutcome<<Self as ProtocolParticipant>::Output>> {
        let mut messages = Vec::new();
        loop {
            let mut progressed = false;

            for (ready, generator) in [
                (self.round_one_ready(), Self::gen_round_one_msgs as fn(&mut Self, &mut R) -> Result<Vec<Message>>),
                (self.round_two_ready(), Self::gen_round_two_msgs),
                (self.round_three_ready(), Self::gen_round_three_msgs),
                (self.round_four_ready(), Self::gen_round_four_msgs),
                (self.round_five_ready(), Self::gen_round_five_msgs),
                (self.round_six_ready(), Self::gen_round_six_msgs),
                (self.round_seven_ready(), Self::gen_round_seven_msgs),
                (self.round_eight_ready(), Self::gen_round_eight_msgs),
                (self.round_nine_ready(), Self::gen_round_nine_msgs),
            ] {
                if ready {
                    let new_messages = generator(self, rng)?;
                    if !new_messages.is_empty() {
                        messages.extend(new_messages);
                        progressed = true;
                    }
                }
            }

            // Replay everything stashed; newly satisfied gates absorb,
            // the rest goes back to the stash.
            for message_type in [
                SignMessageType::R2MtaResponse,
                SignMessageType::R4DecommitGamma,
                SignMessageType::R6DecommitVA,
                SignMessageType::R8DecommitUT,
            ] {
                for stashed in self.fetch_messages(MessageType::Sign(message_type))? {
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

    fn round_one_ready(&self) -> bool {
        self.local_storage.contains::<storage::Prep<C>>(self.id())
            && !self.local_storage.contains::<storage::Nonces<C>>(self.id())
    }

    fn round_two_ready(&self) -> bool {
        let others = self.other_ids();
        self.local_storage.contains::<storage::Nonces<C>>(self.id())
            && self
                .local_storage
                .contains_for_all_ids::<storage::GammaCommit>(others)
            && self
                .local_storage
                .contains_for_all_ids::<storage::KCipher>(others)
    }

    fn round_three_ready(&self) -> bool {
        let others = self.other_ids();
        self.local_storage
            .contains_for_all_ids::<storage::MtaAlphas<C>>(others)
            && self
                .local_storage
                .contains_for_all_ids::<storage::MtaBetas<C>>(others)
    }

    fn round_four_ready(&self) -> bool {
        self.local_storage
            .contains_for_all_ids::<storage::Delta<C>>(&self.all_participants())
    }

    fn round_five_ready(&self) -> bool {
        let all = self.all_participants();
        self.local_storage
            .contains_for_all_ids::<storage::Delta<C>>(&all)
            && self
                .local_storage
                .contains_for_all_ids::<storage::GammaPoint<C>>(&all)
    }

    fn round_six_ready(&self) -> bool {
        self.local_storage.contains::<storage::Phase5Tag<C>>(self.id())
            && self
                .local_storage
                .contains_for_all_ids::<storage::VACommit>(&self.all_participants())
    }

    fn round_seven_ready(&self) -> bool {
        self.local_storage.contains::<storage::Phase5Tag<C>>(self.id())
            && self
                .local_storage
                .contains_for_all_ids::<storage::VAPoints<C>>(self.other_ids())
    }

    fn round_eight_ready(&self) -> bool {
        self.local_storage
            .contains::<storage::Phase5bTag<C>>(self.id())
            && self
                .local_storage
                .contains_for_all_ids::<storage::UTCommit>(&self.all_participants())
    }

    fn round_nine_ready(&self) -> bool {
        self.local_storage
            .contains::<storage::Phase5bTag<C>>(self.id())
            && self
                .local_storage
                .contains_for_all_ids::<storage::UTPoints<C>>(self.other_ids())
    }

    /// Sample the session nonces, commit to `Γ`, and start every MtA
    /// pair as initiator.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_one_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_one_msgs_inner(rng))?;
        Ok(run)
    }

    fn gen_round_one_msgs_inner<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round one sign messages.");

        let k = C::Scalar::random(rng);
        let gamma = C::Scalar::random(rng);
        let big_gamma = C::generator().multiply_by_scalar(&gamma);

        let decommit = PointsDecommit::new(
            rng,
            self.sid(),
            self.id(),
            CommitPhase::Gamma,
            vec![big_gamma],
        );
        let commit = decommit.commit()?;

        let own_pk = self.input.save.preparams().encryption_key();
        let (k_ciphertext, k_nonce) = own_pk.encrypt(rng, &C::scalar_to_bn(&k))?;

        let context = self.retrieve_context();
        let mut messages =
            self.broadcast_message(MessageType::Sign(SignMessageType::R1CommitGamma), &commit)?;
        for recipient in self.other_ids().to_vec() {
            let recipient_aux = self.input.save.find_aux(recipient)?;
            let init = MtaInit::initiate::<C, R>(
                &k,
                &k_ciphertext,
                &k_nonce,
                &own_pk,
                &recipient_aux.ring_pedersen,
                self.sid(),
                self.id(),
                recipient,
                &context,
                rng,
            )?;
            messages.push(Message::new(
                MessageType::Sign(SignMessageType::R1EncK),
                self.sid(),
                self.id(),
                recipient,
                &init,
            )?);
        }

        self.local_storage.store::<storage::Nonces<C>>(
            self.id(),
            NonceSecrets {
                k,
                gamma,
                k_ciphertext,
                k_nonce,
            },
        );
        self.local_storage
            .store::<storage::GammaCommit>(self.id(), commit);
        self.local_storage
            .store::<storage::GammaOpening<C>>(self.id(), decommit);
        self.local_storage
            .store::<storage::GammaPoint<C>>(self.id(), big_gamma);

        Ok(messages)
    }

    /// Answer every peer's MtA initiation: once with our `γ`, once with
    /// our additive key share (bound to its public point).
    #[instrument(skip_all, err(Debug))]
    fn gen_round_two_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_two_msgs_inner(rng))?;
        Ok(run)
    }

    fn gen_round_two_msgs_inner<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round two sign messages.");
        let context = self.retrieve_context();

        let (gamma, w, own_big_w) = {
            let nonces = self.local_storage.retrieve::<storage::Nonces<C>>(self.id())?;
            let prep = self.local_storage.retrieve::<storage::Prep<C>>(self.id())?;
            (nonces.gamma, prep.w, prep.find_big_w(self.id())?)
        };

        let mut messages = Vec::new();
        for initiator in self.other_ids().to_vec() {
            let initiator_ciphertext = self
                .local_storage
                .retrieve::<storage::KCipher>(initiator)?
                .clone();
            let initiator_aux = self.input.save.find_aux(initiator)?;

            let (gamma_response, beta) = MtaPlainResponse::respond::<C, R>(
                &gamma,
                &initiator_ciphertext,
                initiator_aux,
                &initiator_aux.ring_pedersen,
                self.sid(),
                initiator,
                self.id(),
                &context,
                rng,
            )?;
            let (w_response, nu) = MtaCheckedResponse::<C>::respond(
                &w,
                &own_big_w,
                &initiator_ciphertext,
                initiator_aux,
                &initiator_aux.ring_pedersen,
                self.sid(),
                initiator,
                self.id(),
                &context,
                rng,
            )?;

            self.local_storage
                .store::<storage::MtaBetas<C>>(initiator, (beta, nu));
            messages.push(Message::new(
                MessageType::Sign(SignMessageType::R2MtaResponse),
                self.sid(),
                self.id(),
                initiator,
                &RoundTwoResponse::<C> {
                    gamma: gamma_response,
                    w: w_response,
                },
            )?);
        }
        Ok(messages)
    }

    /// Combine the MtA outputs into `δ` and `σ` shares and publish `δ`.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_three_msgs<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
    ) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_three_msgs_inner())?;
        Ok(run)
    }

    fn gen_round_three_msgs_inner(&mut self) -> Result<Vec<Message>> {
        info!("Generating round three sign messages.");

        let (k, gamma, w) = {
            let nonces = self.local_storage.retrieve::<storage::Nonces<C>>(self.id())?;
            let prep = self.local_storage.retrieve::<storage::Prep<C>>(self.id())?;
            (nonces.k, nonces.gamma, prep.w)
        };

        let mut delta = k.mul(&gamma);
        let mut sigma = k.mul(&w);
        for peer in self.other_ids().to_vec() {
            let (alpha, mu) = *self.local_storage.retrieve::<storage::MtaAlphas<C>>(peer)?;
            let (beta, nu) = *self.local_storage.retrieve::<storage::MtaBetas<C>>(peer)?;
            delta = ScalarTrait::add(&delta, &ScalarTrait::add(&alpha, &beta));
            sigma = ScalarTrait::add(&sigma, &ScalarTrait::add(&mu, &nu));
        }

        self.local_storage.store::<storage::Delta<C>>(self.id(), delta);
        self.local_storage.store::<storage::Sigma<C>>(self.id(), sigma);

        self.broadcast_message(MessageType::Sign(SignMessageType::R3Delta), &delta)
    }

    /// Open our `Γ` commitment.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_four_msgs<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
    ) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_four_msgs_inner())?;
        Ok(run)
    }

    fn gen_round_four_msgs_inner(&mut self) -> Result<Vec<Message>> {
        info!("Generating round four sign messages.");
        let decommit = self
            .local_storage
            .retrieve::<storage::GammaOpening<C>>(self.id())?
            .clone();
        self.broadcast_message(MessageType::Sign(SignMessageType::R4DecommitGamma), &decommit)
    }

    /// Derive the group commitment `R`, compute our signature share, and
    /// commit to the check values.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_five_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_five_msgs_inner(rng))?;
        Ok(run)
    }

    fn gen_round_five_msgs_inner<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round five sign messages.");
        let all = self.all_participants();

        let mut delta = C::Scalar::zero();
        let mut big_gamma = C::identity();
        for pid in &all {
            delta = ScalarTrait::add(
                &delta,
                self.local_storage.retrieve::<storage::Delta<C>>(*pid)?,
            );
            big_gamma =
                big_gamma + *self.local_storage.retrieve::<storage::GammaPoint<C>>(*pid)?;
        }
        let delta_inv = delta.invert().ok_or_else(|| {
            error!("the masked nonce sum is zero; signing cannot proceed");
            InternalError::ProtocolError(None)
        })?;
        let big_r = big_gamma.multiply_by_scalar(&delta_inv);
        let r = big_r.x_projection()?;
        if r == C::Scalar::zero() {
            error!("the group commitment has a zero x-projection");
            return Err(InternalError::ProtocolError(None));
        }

        let (m, k, sigma) = {
            let prep = self.local_storage.retrieve::<storage::Prep<C>>(self.id())?;
            let nonces = self.local_storage.retrieve::<storage::Nonces<C>>(self.id())?;
            let sigma = self.local_storage.retrieve::<storage::Sigma<C>>(self.id())?;
            (prep.m, nonces.k, *sigma)
        };
        let s_share = ScalarTrait::add(&m.mul(&k), &r.mul(&sigma));

        let l = C::Scalar::random(rng);
        let rho = C::Scalar::random(rng);
        let big_v =
            big_r.multiply_by_scalar(&s_share) + C::generator().multiply_by_scalar(&l);
        let big_a = C::generator().multiply_by_scalar(&rho);

        let decommit = PointsDecommit::new(
            rng,
            self.sid(),
            self.id(),
            CommitPhase::CheckValues,
            vec![big_v, big_a],
        );
        let commit = decommit.commit()?;

        self.local_storage.store::<storage::Phase5Tag<C>>(
            self.id(),
            Phase5 {
                big_r,
                r,
                s_share,
                l,
                rho,
                big_v,
                big_a,
            },
        );
        self.local_storage
            .store::<storage::VACommit>(self.id(), commit.clone());
        self.local_storage
            .store::<storage::VAOpening<C>>(self.id(), decommit);

        self.broadcast_message(MessageType::Sign(SignMessageType::R5CommitVA), &commit)
    }

    /// Open the check values and prove we know their representation.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_six_msgs<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_six_msgs_inner(rng))?;
        Ok(run)
    }

    fn gen_round_six_msgs_inner<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round six sign messages.");
        let context = self.retrieve_context();

        let (decommit, proof) = {
            let phase5 = self
                .local_storage
                .retrieve::<storage::Phase5Tag<C>>(self.id())?;
            let decommit = self
                .local_storage
                .retrieve::<storage::VAOpening<C>>(self.id())?
                .clone();
            let mut transcript = Self::phase_five_transcript(self.sid(), self.id())?;
            let proof = PiStProof::prove(
                PiStInput::new(&phase5.big_r, &phase5.big_v, &phase5.big_a),
                PiStSecret::new(&phase5.s_share, &phase5.l, &phase5.rho),
                &context,
                &mut transcript,
                rng,
            )?;
            (decommit, proof)
        };

        self.broadcast_message(
            MessageType::Sign(SignMessageType::R6DecommitVA),
            &RoundSixPublic::<C> { decommit, proof },
        )
    }

    /// Aggregate the check values and commit to our blinded
    /// contributions.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_seven_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_seven_msgs_inner(rng))?;
        Ok(run)
    }

    fn gen_round_seven_msgs_inner<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round seven sign messages.");

        let (big_v_agg, u, t) = {
            let phase5 = self
                .local_storage
                .retrieve::<storage::Phase5Tag<C>>(self.id())?;
            let prep = self.local_storage.retrieve::<storage::Prep<C>>(self.id())?;

            let mut v_sum = phase5.big_v;
            let mut a_sum = phase5.big_a;
            for pid in self.other_ids() {
                let (big_v, big_a) = self.local_storage.retrieve::<storage::VAPoints<C>>(*pid)?;
                v_sum = v_sum + *big_v;
                a_sum = a_sum + *big_a;
            }
            // V = sum V_j - m*G - r*Y; honest shares leave only the
            // blinding in it.
            let big_v_agg = v_sum
                + C::generator().multiply_by_scalar(&prep.m.negate())
                + self
                    .input
                    .save
                    .public_key_point()
                    .multiply_by_scalar(&phase5.r.negate());
            let u = big_v_agg.multiply_by_scalar(&phase5.rho);
            let t = a_sum.multiply_by_scalar(&phase5.l);
            (big_v_agg, u, t)
        };

        let decommit = PointsDecommit::new(
            rng,
            self.sid(),
            self.id(),
            CommitPhase::BlindedValues,
            vec![u, t],
        );
        let commit = decommit.commit()?;

        self.local_storage
            .store::<storage::Phase5bTag<C>>(self.id(), Phase5b { big_v_agg, u, t });
        self.local_storage
            .store::<storage::UTCommit>(self.id(), commit.clone());
        self.local_storage
            .store::<storage::UTOpening<C>>(self.id(), decommit);

        self.broadcast_message(MessageType::Sign(SignMessageType::R7CommitUT), &commit)
    }

    /// Open the blinded values and prove `U` reuses the exponent of `A`.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_eight_msgs<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_eight_msgs_inner(rng))?;
        Ok(run)
    }

    fn gen_round_eight_msgs_inner<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<Vec<Message>> {
        info!("Generating round eight sign messages.");
        let context = self.retrieve_context();

        let (decommit, proof) = {
            let phase5 = self
                .local_storage
                .retrieve::<storage::Phase5Tag<C>>(self.id())?;
            let phase5b = self
                .local_storage
                .retrieve::<storage::Phase5bTag<C>>(self.id())?;
            let decommit = self
                .local_storage
                .retrieve::<storage::UTOpening<C>>(self.id())?
                .clone();
            let mut transcript = Self::phase_five_transcript(self.sid(), self.id())?;
            let proof = PiLogProof::prove(
                PiLogInput::new(&phase5b.big_v_agg, &phase5.big_a, &phase5b.u),
                PiLogSecret::new(&phase5.rho),
                &context,
                &mut transcript,
                rng,
            )?;
            (decommit, proof)
        };

        self.broadcast_message(
            MessageType::Sign(SignMessageType::R8DecommitUT),
            &RoundEightPublic::<C> { decommit, proof },
        )
    }

    /// Check the aggregate consistency equation and release our
    /// signature share.
    #[instrument(skip_all, err(Debug))]
    fn gen_round_nine_msgs<R: RngCore + CryptoRng>(
        &mut self,
        _rng: &mut R,
    ) -> Result<Vec<Message>> {
        let run = run_only_once!(self.gen_round_nine_msgs_inner())?;
        Ok(run)
    }

    fn gen_round_nine_msgs_inner(&mut self) -> Result<Vec<Message>> {
        info!("Generating round nine sign messages.");

        let s_share = {
            let phase5 = self
                .local_storage
                .retrieve::<storage::Phase5Tag<C>>(self.id())?;
            let phase5b = self
                .local_storage
                .retrieve::<storage::Phase5bTag<C>>(self.id())?;

            let mut u_sum = phase5b.u;
            let mut t_sum = phase5b.t;
            for pid in self.other_ids() {
                let (u, t) = self.local_storage.retrieve::<storage::UTPoints<C>>(*pid)?;
                u_sum = u_sum + *u;
                t_sum = t_sum + *t;
            }
            // If the sums differ, some signer's share does not satisfy
            // the signature equation. The blinding prevents naming a
            // culprit here; releasing no share is the safe outcome.
            if u_sum != t_sum {
                error!("phase-five consistency check failed; withholding signature share");
                return Err(InternalError::ProtocolError(None));
            }
            phase5.s_share
        };

        self.local_storage
            .store::<storage::SigShare<C>>(self.id(), s_share);
        self.broadcast_message(MessageType::Sign(SignMessageType::R9Share), &s_share)
    }

    /// Assemble and verify the signature once every share is in.
    fn maybe_finish_protocol(&mut self) -> Result<Option<C::Signature>> {
        let all = self.all_participants();
        if !self
            .local_storage
            .contains_for_all_ids::<storage::SigShare<C>>(&all)
        {
            return Ok(None);
        }

        let r = self
            .local_storage
            .retrieve::<storage::Phase5Tag<C>>(self.id())?
            .r;
        let mut s = C::Scalar::zero();
        for pid in &all {
            s = ScalarTrait::add(
                &s,
                self.local_storage.retrieve::<storage::SigShare<C>>(*pid)?,
            );
        }
        // Normalize to the low-s form accepted by strict verifiers.
        if C::is_high(&s) {
            s = s.negate();
        }

        crate::curve::verify_ecdsa_digest::<C>(
            self.input.save.public_key_point(),
            &self.input.digest,
            &r,
            &s,
        )
        .map_err(|_| {
            error!("assembled signature failed verification");
            InternalError::ProtocolError(None)
        })?;

        let signature = C::Signature::from_scalars(&C::scalar_to_bn(&r), &C::scalar_to_bn(&s))?;
        self.status = Status::TerminatedSuccessfully;
        Ok(Some(signature))
    }

    fn phase_five_transcript(
        sid: Identifier,
        sender: ParticipantIdentifier,
    ) -> Result<Transcript> {
        let mut transcript = Transcript::new(b"sign phase five");
        transcript.append_message(b"sid", &serialize!(&sid)?);
        transcript.append_message(b"sender", &serialize!(&sender)?);
        Ok(transcript)
    }
}

#[cfg(test)]
impl<C: EcdsaCurve> SignParticipant<C> {
    /// Rebuild a round-two response message with a corrupted MtA range
    /// proof. Used by abort tests to play a cheating responder.
    pub(crate) fn corrupt_round_two_msg_for_test<R: RngCore + CryptoRng>(
        original: &Message,
        rng: &mut R,
    ) -> Result<Message> {
        original.check_type(MessageType::Sign(SignMessageType::R2MtaResponse))?;
        let mut response: RoundTwoResponse<C> = deserialize!(&original.unverified_bytes)?;
        response.w.corrupt_proof_for_test(rng);
        Message::new(
            MessageType::Sign(SignMessageType::R2MtaResponse),
            original.id(),
            original.from(),
            original.to(),
            &response,
        )
    }
}
