// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, EcdsaCurve, VerifyingKeyTrait},
    errors::{CallerError, InternalError, Result},
    keygen::keyshare::{KeySharePrivate, KeySharePublic},
    preparams::{LocalPreParams, PublicPreParams},
    protocol::{ParticipantIdentifier, PeerContext},
};
use std::collections::HashSet;
use tracing::error;

/// The save bundle produced by key generation: everything a party must
/// persist to take part in signing later.
///
/// # 🔒 Storage requirements
/// The private share and the pre-parameters must be stored securely; the
/// public components can be stored in the clear. The whole bundle must be
/// written atomically — a partially persisted bundle is unusable and the
/// committee cannot regenerate this party's share without a resharing.
#[derive(Debug, Clone)]
pub struct Output<C: EcdsaCurve> {
    peers: PeerContext,
    threshold: usize,
    private_share: KeySharePrivate<C>,
    public_shares: Vec<KeySharePublic<C>>,
    public_key_point: C,
    aux: Vec<(ParticipantIdentifier, PublicPreParams)>,
    preparams: LocalPreParams,
}

impl<C: EcdsaCurve> Output<C> {
    /// Assemble a save bundle, checking internal consistency: one public
    /// share and one set of auxiliary parameters per committee member, no
    /// identity shares, and a valid threshold.
    ///
    /// This is how a bundle persisted via [`into_parts`](Self::into_parts)
    /// is reconstituted; the components must not be assembled from
    /// anywhere else.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        peers: PeerContext,
        threshold: usize,
        private_share: KeySharePrivate<C>,
        public_shares: Vec<KeySharePublic<C>>,
        public_key_point: C,
        aux: Vec<(ParticipantIdentifier, PublicPreParams)>,
        preparams: LocalPreParams,
    ) -> Result<Self> {
        let committee: HashSet<_> = peers.ids().into_iter().collect();
        if threshold < 1 || threshold >= committee.len() {
            Err(CallerError::BadThreshold)?;
        }
        let share_owners: HashSet<_> = public_shares
            .iter()
            .map(KeySharePublic::participant)
            .collect();
        if share_owners != committee || public_shares.len() != committee.len() {
            error!("save data requires exactly one public share per committee member");
            Err(CallerError::BadInput)?;
        }
        let aux_owners: HashSet<_> = aux.iter().map(|(pid, _)| *pid).collect();
        if aux_owners != committee || aux.len() != committee.len() {
            error!("save data requires auxiliary parameters for every committee member");
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
            aux,
            preparams,
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

    /// A specific member's Paillier and ring-Pedersen parameters.
    pub fn find_aux(&self, pid: ParticipantIdentifier) -> Result<&PublicPreParams> {
        self.aux
            .iter()
            .find(|(owner, _)| *owner == pid)
            .map(|(_, aux)| aux)
            .ok_or_else(|| {
                error!("no auxiliary parameters recorded for {pid}");
                InternalError::from(CallerError::BadInput)
            })
    }

    /// This party's own pre-parameters.
    pub fn preparams(&self) -> &LocalPreParams {
        &self.preparams
    }

    /// The group public key as a curve point.
    pub fn public_key_point(&self) -> &C {
        &self.public_key_point
    }

    /// The group public key in the curve library's verifying-key type.
    pub fn public_key(&self) -> Result<C::VerifyingKey> {
        C::VerifyingKey::from_point(self.public_key_point)
    }

    /// Decompose the bundle into its serializable parts for persistence.
    ///
    /// # 🔒 Storage requirements
    /// The private share and the pre-parameters must be stored securely;
    /// the public components can be stored in the clear. Write the whole
    /// bundle atomically, and only after the protocol delivered it.
    #[allow(clippy::type_complexity)]
    pub fn into_parts(
        self,
    ) -> (
        PeerContext,
        usize,
        KeySharePrivate<C>,
        Vec<KeySharePublic<C>>,
        C,
        Vec<(ParticipantIdentifier, PublicPreParams)>,
        LocalPreParams,
    ) {
        (
            self.peers,
            self.threshold,
            self.private_share,
            self.public_shares,
            self.public_key_point,
            self.aux,
            self.preparams,
        )
    }
}
