// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! A holding pen for messages that arrived before their round.
//!
//! Networks reorder: a peer's round-three proof can land before our own
//! round one finished. Participants stash such messages here and drain them
//! once the protocol catches up, so out-of-order delivery never loses
//! anything.

use crate::messages::{Message, MessageType};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    queue: HashMap<MessageType, Vec<Message>>,
}

impl MessageQueue {
    /// Stash a message for later processing.
    pub(crate) fn store(&mut self, message: Message) {
        self.queue
            .entry(message.message_type())
            .or_default()
            .push(message);
    }

    /// Drain all stashed messages of the given type, in arrival order.
    pub(crate) fn retrieve_all_of_type(&mut self, message_type: MessageType) -> Vec<Message> {
        self.queue.remove(&message_type).unwrap_or_default()
    }

    /// Drain the entire stash.
    pub(crate) fn retrieve_all(&mut self) -> Vec<Message> {
        self.queue.drain().flat_map(|(_, messages)| messages).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        messages::{KeygenMessageType, MessageType},
        protocol::{Identifier, ParticipantIdentifier},
    };
    use crate::utils::testing::init_testing;

    fn test_message(
        message_type: MessageType,
        rng: &mut (impl rand::RngCore + rand::CryptoRng),
    ) -> Message {
        let sid = Identifier::random(rng);
        let from = ParticipantIdentifier::from_u128(1);
        let to = ParticipantIdentifier::from_u128(2);
        Message::new(message_type, sid, from, to, &()).unwrap()
    }

    #[test]
    fn retrieval_is_by_type() {
        let mut rng = init_testing();
        let mut queue = MessageQueue::default();

        let commit = MessageType::Keygen(KeygenMessageType::R1CommitHash);
        let decommit = MessageType::Keygen(KeygenMessageType::R2Decommit);

        queue.store(test_message(commit, &mut rng));
        queue.store(test_message(commit, &mut rng));
        queue.store(test_message(decommit, &mut rng));

        assert_eq!(queue.retrieve_all_of_type(commit).len(), 2);
        // Draining is destructive.
        assert!(queue.retrieve_all_of_type(commit).is_empty());
        assert_eq!(queue.retrieve_all().len(), 1);
        assert!(queue.retrieve_all().is_empty());
    }
}
