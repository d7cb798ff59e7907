//! Stream registry: id allocation and live-stream lookup.
//!
//! The registry is owned by the multiplexer and touched only from its single
//! dispatch path, so it needs no interior locking. Local ids are allocated
//! strictly increasing with the parity assigned to the connection role;
//! peer ids are tracked against a high-water mark so late frames for retired
//! ids can be told apart from ids that were never validly assigned.

use std::collections::HashMap;

use crate::{
    connection::ConnectionRole,
    error::ProtocolError,
    frame::StreamId,
    stream::StreamState,
};

/// Classification of a stream id with no live registry entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IdClass {
    /// The id was assigned earlier and its stream has since terminated.
    /// Frames for it are late: logged and dropped.
    Retired,
    /// A peer-parity id above the high-water mark: valid only as a new
    /// peer-initiated request.
    NewPeer,
    /// An id neither side could have assigned. Frames for it are a protocol
    /// error.
    NeverAssigned,
}

/// Registry of live streams plus the id allocation state for one connection.
#[derive(Debug)]
pub(crate) struct StreamRegistry {
    streams: HashMap<StreamId, StreamState>,
    next_local: u32,
    local_parity: u32,
    max_peer: u32,
}

impl StreamRegistry {
    /// Create an empty registry for the given connection role.
    pub fn new(role: ConnectionRole) -> Self {
        let next_local = role.initial_stream_id();
        Self {
            streams: HashMap::new(),
            local_parity: next_local % 2,
            next_local,
            max_peer: 0,
        }
    }

    /// Allocate the next local stream id.
    ///
    /// Ids are strictly increasing and never reused for the life of the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::StreamIdExhausted`] once the 31-bit id space
    /// for this role runs out; the connection must be replaced.
    pub fn allocate(&mut self) -> Result<StreamId, ProtocolError> {
        let id = StreamId::new(self.next_local).ok_or(ProtocolError::StreamIdExhausted)?;
        self.next_local = self.next_local.saturating_add(2);
        Ok(id)
    }

    /// Insert the state for a newly created stream.
    ///
    /// Peer-parity ids advance the high-water mark used by [`classify`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DuplicateStream`] if the id is already live.
    ///
    /// [`classify`]: StreamRegistry::classify
    pub fn insert(&mut self, state: StreamState) -> Result<(), ProtocolError> {
        let id = state.id();
        if self.streams.contains_key(&id) {
            return Err(ProtocolError::DuplicateStream { id });
        }
        if id.value() % 2 != self.local_parity {
            self.max_peer = self.max_peer.max(id.value());
        }
        self.streams.insert(id, state);
        Ok(())
    }

    /// Look up a live stream.
    pub fn lookup_mut(&mut self, id: StreamId) -> Option<&mut StreamState> {
        self.streams.get_mut(&id)
    }

    /// Remove a stream, normally once both directions are terminal.
    pub fn remove(&mut self, id: StreamId) -> Option<StreamState> { self.streams.remove(&id) }

    /// Classify an id that has no live entry.
    pub fn classify(&self, id: StreamId) -> IdClass {
        let value = id.value();
        if value % 2 == self.local_parity {
            if value < self.next_local {
                IdClass::Retired
            } else {
                IdClass::NeverAssigned
            }
        } else if value <= self.max_peer {
            IdClass::Retired
        } else {
            IdClass::NewPeer
        }
    }

    /// Number of live streams.
    pub fn len(&self) -> usize { self.streams.len() }

    /// Remove and return every live stream, used at connection teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = StreamState> + '_ {
        self.streams.drain().map(|(_, state)| state)
    }

    /// Iterate over live stream ids.
    #[cfg(test)]
    pub fn ids(&self) -> impl Iterator<Item = StreamId> + '_ { self.streams.keys().copied() }

    /// Jump the local allocation cursor, used to exercise exhaustion.
    #[cfg(test)]
    pub fn set_next_local(&mut self, value: u32) { self.next_local = value; }
}
