// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Session and committee types, and the caller-facing participant driver.
//!
//! A protocol run is identified by an [`Identifier`] agreed out of band.
//! The committee is a [`PeerContext`]: a canonically ordered set of
//! [`PartyId`]s, each wrapping a [`ParticipantIdentifier`] — a random
//! nonzero integer that serves both as the routing address and as the
//! party's Shamir evaluation key. [`Parameters`] bundles the committee
//! with the threshold and the test-only proof-skipping flags;
//! [`ReshareParameters`] does the same for the two committees of a
//! resharing run.

use crate::{
    curve::CurveTrait,
    errors::{CallerError, InternalError, Result},
    messages::Message,
    participant::{InnerProtocolParticipant, ProcessOutcome, ProtocolParticipant, Status},
    zkp::ProofContext,
};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::error;

/// A unique identifier for one protocol run, agreed out of band by all
/// participants. Binds every message and every Fiat-Shamir transcript of
/// the run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Identifier(u128);

impl Identifier {
    /// Sample a fresh identifier.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen())
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{:08x}", (self.0 >> 96) as u32)
    }
}

/// A participant's identity within a committee.
///
/// The wrapped integer doubles as the party's key for secret sharing: the
/// Shamir evaluation point is derived from it, so it must be unique within
/// a committee and nonzero. Committee order is ascending by this value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ParticipantIdentifier(u128);

impl ParticipantIdentifier {
    /// Sample a fresh, nonzero identifier.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let candidate: u128 = rng.gen();
            if candidate != 0 {
                return Self(candidate);
            }
        }
    }

    /// Construct from a known key value. Zero is reserved.
    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// The underlying key value.
    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// The party's Shamir evaluation point: `key + 1` in the scalar field,
    /// so it can never be zero (the secret lives at zero).
    pub(crate) fn share_point<C: CurveTrait>(&self) -> C::Scalar {
        use crate::curve::ScalarTrait;
        C::Scalar::from_u128(self.0) .add(&C::Scalar::one())
    }
}

impl Display for ParticipantIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "party-{:08x}", (self.0 >> 96) as u32)
    }
}

/// A committee member: a display name plus its identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyId {
    moniker: String,
    id: ParticipantIdentifier,
}

impl PartyId {
    /// Create a party id.
    pub fn new(moniker: impl Into<String>, id: ParticipantIdentifier) -> Self {
        Self {
            moniker: moniker.into(),
            id,
        }
    }

    /// The display name.
    pub fn moniker(&self) -> &str {
        &self.moniker
    }

    /// The identifier.
    pub fn id(&self) -> ParticipantIdentifier {
        self.id
    }
}

/// An immutable, canonically ordered committee for one protocol run.
///
/// Parties are sorted ascending by identifier; a party's index is its
/// position after the sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerContext {
    parties: Vec<PartyId>,
}

impl PeerContext {
    /// Create a context from an unordered party list. Rejects empty lists
    /// and duplicate identifiers.
    pub fn new(mut parties: Vec<PartyId>) -> Result<Self> {
        if parties.is_empty() {
            error!("tried to create an empty peer context");
            Err(CallerError::ParticipantConfigError)?;
        }
        parties.sort_by_key(|party| party.id());
        if parties.windows(2).any(|pair| pair[0].id() == pair[1].id()) {
            error!("peer context contains duplicate party keys");
            Err(CallerError::ParticipantConfigError)?;
        }
        Ok(Self { parties })
    }

    /// The parties, in canonical order.
    pub fn parties(&self) -> &[PartyId] {
        &self.parties
    }

    /// The identifiers, in canonical order.
    pub fn ids(&self) -> Vec<ParticipantIdentifier> {
        self.parties.iter().map(PartyId::id).collect()
    }

    /// The number of parties.
    pub fn count(&self) -> usize {
        self.parties.len()
    }

    /// A party's index in canonical order.
    pub fn index_of(&self, pid: ParticipantIdentifier) -> Option<usize> {
        self.parties.iter().position(|party| party.id() == pid)
    }

    /// Whether the committee contains the given identifier.
    pub fn contains(&self, pid: ParticipantIdentifier) -> bool {
        self.index_of(pid).is_some()
    }
}

/// Configuration for a single keygen or signing run: the committee, this
/// party, and the threshold `t` (any `t + 1` parties can sign).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    peers: PeerContext,
    self_id: ParticipantIdentifier,
    threshold: usize,
    no_proof_mod: bool,
    no_proof_fac: bool,
}

impl Parameters {
    /// Create parameters, checking that this party belongs to the
    /// committee and that `1 <= t <= n - 1`.
    pub fn new(
        peers: PeerContext,
        self_id: ParticipantIdentifier,
        threshold: usize,
    ) -> Result<Self> {
        if !peers.contains(self_id) {
            error!("local party is not a member of the peer context");
            Err(CallerError::ParticipantConfigError)?;
        }
        if threshold < 1 || threshold >= peers.count() {
            error!(
                "threshold {} out of range for a committee of {}",
                threshold,
                peers.count()
            );
            Err(CallerError::BadThreshold)?;
        }
        Ok(Self {
            peers,
            self_id,
            threshold,
            no_proof_mod: false,
            no_proof_fac: false,
        })
    }

    /// Skip the Paillier modulus proof during keygen.
    ///
    /// ⚠️ The resulting key material is not safe for production use. This
    /// exists to keep test suites fast.
    pub fn set_no_proof_mod(&mut self) {
        self.no_proof_mod = true;
    }

    /// Skip the factor-size proof during keygen.
    ///
    /// ⚠️ The resulting key material is not safe for production use. This
    /// exists to keep test suites fast.
    pub fn set_no_proof_fac(&mut self) {
        self.no_proof_fac = true;
    }

    /// The committee.
    pub fn peers(&self) -> &PeerContext {
        &self.peers
    }

    /// This party's identifier.
    pub fn self_id(&self) -> ParticipantIdentifier {
        self.self_id
    }

    /// The threshold `t`.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The committee size `n`.
    pub fn count(&self) -> usize {
        self.peers.count()
    }

    /// All committee identifiers except this party's.
    pub fn other_ids(&self) -> Vec<ParticipantIdentifier> {
        self.peers
            .ids()
            .into_iter()
            .filter(|&pid| pid != self.self_id)
            .collect()
    }

    pub(crate) fn no_proof_mod(&self) -> bool {
        self.no_proof_mod
    }

    pub(crate) fn no_proof_fac(&self) -> bool {
        self.no_proof_fac
    }

    /// Check that a participant's `(id, other_ids)` pair describes exactly
    /// this committee.
    pub(crate) fn check_participant_list(
        &self,
        id: ParticipantIdentifier,
        other_ids: &[ParticipantIdentifier],
    ) -> Result<()> {
        if id != self.self_id {
            error!("participant id does not match the configured local party");
            Err(CallerError::ParticipantConfigError)?;
        }
        let mut combined: Vec<_> = std::iter::once(id)
            .chain(other_ids.iter().copied())
            .collect();
        combined.sort();
        if combined != self.peers.ids() {
            error!("participant list does not match the peer context");
            Err(CallerError::ParticipantConfigError)?;
        }
        Ok(())
    }
}

/// Configuration for a resharing run: the old committee (which holds the
/// key) and the new committee (which will hold it afterwards), with their
/// thresholds. A party may belong to either committee or both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReshareParameters {
    old_peers: PeerContext,
    new_peers: PeerContext,
    old_threshold: usize,
    new_threshold: usize,
    self_id: ParticipantIdentifier,
    no_proof_mod: bool,
}

impl ReshareParameters {
    /// Create resharing parameters. The local party must belong to at
    /// least one of the two committees, and each threshold must be valid
    /// for its committee.
    pub fn new(
        old_peers: PeerContext,
        old_threshold: usize,
        new_peers: PeerContext,
        new_threshold: usize,
        self_id: ParticipantIdentifier,
    ) -> Result<Self> {
        if !old_peers.contains(self_id) && !new_peers.contains(self_id) {
            error!("local party belongs to neither resharing committee");
            Err(CallerError::ParticipantConfigError)?;
        }
        if old_threshold < 1 || old_threshold >= old_peers.count() {
            Err(CallerError::BadThreshold)?;
        }
        if new_threshold < 1 || new_threshold >= new_peers.count() {
            Err(CallerError::BadThreshold)?;
        }
        Ok(Self {
            old_peers,
            new_peers,
            old_threshold,
            new_threshold,
            self_id,
            no_proof_mod: false,
        })
    }

    /// Skip the Paillier modulus proof. ⚠️ Test-only; see
    /// [`Parameters::set_no_proof_mod`].
    pub fn set_no_proof_mod(&mut self) {
        self.no_proof_mod = true;
    }

    /// The committee currently holding the key.
    pub fn old_peers(&self) -> &PeerContext {
        &self.old_peers
    }

    /// The committee that will hold the key.
    pub fn new_peers(&self) -> &PeerContext {
        &self.new_peers
    }

    /// The old committee's threshold.
    pub fn old_threshold(&self) -> usize {
        self.old_threshold
    }

    /// The new committee's threshold.
    pub fn new_threshold(&self) -> usize {
        self.new_threshold
    }

    /// This party's identifier.
    pub fn self_id(&self) -> ParticipantIdentifier {
        self.self_id
    }

    /// Whether a party deals its share (old committee).
    pub fn is_old_party(&self, pid: ParticipantIdentifier) -> bool {
        self.old_peers.contains(pid)
    }

    /// Whether a party receives a new share (new committee).
    pub fn is_new_party(&self, pid: ParticipantIdentifier) -> bool {
        self.new_peers.contains(pid)
    }

    /// All identifiers in the union of the two committees, in canonical
    /// order.
    pub fn union_ids(&self) -> Vec<ParticipantIdentifier> {
        let mut ids = self.old_peers.ids();
        for pid in self.new_peers.ids() {
            if !ids.contains(&pid) {
                ids.push(pid);
            }
        }
        ids.sort();
        ids
    }

    pub(crate) fn no_proof_mod(&self) -> bool {
        self.no_proof_mod
    }
}

/// The context every Fiat-Shamir transcript in a protocol run is bound
/// to: the session, the full committee in canonical order, and the curve
/// (generator and order). Two honest parties always derive identical
/// context bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SharedContext<C> {
    sid: Identifier,
    participants: Vec<ParticipantIdentifier>,
    generator: C,
    order: BigNumber,
}

impl<C: CurveTrait> ProofContext for SharedContext<C> {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        serialize!(self)
    }
}

impl<C: CurveTrait> SharedContext<C> {
    /// Collect the shared context from a participant.
    pub(crate) fn collect<P: InnerProtocolParticipant>(p: &P) -> Self {
        let mut participants = p.all_participants();
        participants.sort();
        Self {
            sid: p.sid(),
            participants,
            generator: C::generator(),
            order: C::order(),
        }
    }

    /// An arbitrary context for proof unit tests.
    #[cfg(test)]
    pub(crate) fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut participants: Vec<_> = (0..3).map(|_| ParticipantIdentifier::random(rng)).collect();
        participants.sort();
        Self {
            sid: Identifier::random(rng),
            participants,
            generator: C::generator(),
            order: C::order(),
        }
    }
}

/// A caller-facing driver around a [`ProtocolParticipant`].
///
/// The transport hands inbound bytes to [`update_from_bytes`]
/// (or pre-parsed messages to [`update`]) and delivers whatever messages
/// come back — including any addressed to this same party, which replay
/// buffered early messages.
///
/// [`update`]: Participant::update
/// [`update_from_bytes`]: Participant::update_from_bytes
#[derive(Debug)]
pub struct Participant<P: ProtocolParticipant> {
    participant: P,
}

impl<P: ProtocolParticipant> Participant<P> {
    /// Create a driver for one protocol run. Fails on invalid
    /// configuration.
    pub fn new(
        sid: Identifier,
        id: ParticipantIdentifier,
        other_participant_ids: Vec<ParticipantIdentifier>,
        input: P::Input,
    ) -> Result<Self> {
        Ok(Self {
            participant: P::new(sid, id, other_participant_ids, input)?,
        })
    }

    /// Start the protocol, producing the first round's outbound messages.
    pub fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<Vec<Message>> {
        let ready = Message::new(P::ready_type(), self.sid(), self.id(), self.id(), &())?;
        let (output, messages) = self.participant.process_message(rng, &ready)?.into_parts();
        if output.is_some() {
            error!("protocol terminated while starting");
            return Err(InternalError::InternalInvariantFailed);
        }
        Ok(messages)
    }

    /// Feed one inbound message to the state machine.
    pub fn update<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &Message,
    ) -> Result<ProcessOutcome<P::Output>> {
        self.participant.process_message(rng, message)
    }

    /// Decode wire bytes and feed the message to the state machine.
    pub fn update_from_bytes<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        bytes: &[u8],
    ) -> Result<ProcessOutcome<P::Output>> {
        let message = Message::from_wire_bytes(bytes)?;
        self.update(rng, &message)
    }

    /// This party's identifier.
    pub fn id(&self) -> ParticipantIdentifier {
        self.participant.id()
    }

    /// The session identifier.
    pub fn sid(&self) -> Identifier {
        self.participant.sid()
    }

    /// Current progress.
    pub fn status(&self) -> &Status {
        self.participant.status()
    }

    /// The peers whose messages the current round still needs.
    pub fn waiting_for(&self) -> Vec<ParticipantIdentifier> {
        self.participant.waiting_for()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Build one set of `Parameters` per committee member, sharing a
    /// single randomly generated committee.
    pub(crate) fn quorum_parameters<R: RngCore + CryptoRng>(
        n: usize,
        threshold: usize,
        rng: &mut R,
    ) -> Vec<Parameters> {
        let parties: Vec<_> = (0..n)
            .map(|i| PartyId::new(format!("party-{i}"), ParticipantIdentifier::random(rng)))
            .collect();
        let peers = PeerContext::new(parties).unwrap();
        peers
            .ids()
            .into_iter()
            .map(|pid| Parameters::new(peers.clone(), pid, threshold).unwrap())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn peer_context_sorts_and_rejects_duplicates() {
        let ids = [30u128, 10, 20].map(ParticipantIdentifier::from_u128);
        let parties: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| PartyId::new(format!("p{i}"), id))
            .collect();

        let peers = PeerContext::new(parties.clone()).unwrap();
        let sorted = peers.ids();
        assert!(sorted.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(peers.index_of(ParticipantIdentifier::from_u128(10)), Some(0));
        assert_eq!(peers.index_of(ParticipantIdentifier::from_u128(30)), Some(2));

        let mut with_duplicate = parties;
        with_duplicate.push(PartyId::new("dup", ids[0]));
        assert!(PeerContext::new(with_duplicate).is_err());
    }

    #[test]
    fn parameters_validate_threshold_and_membership() {
        let mut rng = init_testing();
        let parties: Vec<_> = (0..3)
            .map(|i| PartyId::new(format!("p{i}"), ParticipantIdentifier::random(&mut rng)))
            .collect();
        let outsider = ParticipantIdentifier::random(&mut rng);
        let peers = PeerContext::new(parties).unwrap();
        let member = peers.ids()[0];

        assert!(Parameters::new(peers.clone(), member, 1).is_ok());
        assert!(Parameters::new(peers.clone(), member, 2).is_ok());
        // t = 0 and t = n are both unusable.
        assert!(Parameters::new(peers.clone(), member, 0).is_err());
        assert!(Parameters::new(peers.clone(), member, 3).is_err());
        assert!(Parameters::new(peers, outsider, 1).is_err());
    }

    #[test]
    fn reshare_parameters_accept_members_of_either_committee() {
        let mut rng = init_testing();
        let old_parties: Vec<_> = (0..3)
            .map(|i| PartyId::new(format!("old{i}"), ParticipantIdentifier::random(&mut rng)))
            .collect();
        let new_parties: Vec<_> = (0..4)
            .map(|i| PartyId::new(format!("new{i}"), ParticipantIdentifier::random(&mut rng)))
            .collect();
        let old_peers = PeerContext::new(old_parties).unwrap();
        let new_peers = PeerContext::new(new_parties).unwrap();
        let old_member = old_peers.ids()[0];
        let new_member = new_peers.ids()[0];
        let outsider = ParticipantIdentifier::random(&mut rng);

        assert!(ReshareParameters::new(
            old_peers.clone(),
            1,
            new_peers.clone(),
            2,
            old_member
        )
        .is_ok());
        assert!(ReshareParameters::new(
            old_peers.clone(),
            1,
            new_peers.clone(),
            2,
            new_member
        )
        .is_ok());
        assert!(
            ReshareParameters::new(old_peers, 1, new_peers, 2, outsider).is_err()
        );
    }

    #[test]
    fn share_points_are_nonzero_and_distinct() {
        use crate::curve::{ScalarTrait, TestCurve};
        let a = ParticipantIdentifier::from_u128(0);
        let b = ParticipantIdentifier::from_u128(1);
        let zero = <TestCurve as CurveTrait>::Scalar::zero();
        assert_ne!(a.share_point::<TestCurve>(), zero);
        assert_ne!(a.share_point::<TestCurve>(), b.share_point::<TestCurve>());
    }
}
