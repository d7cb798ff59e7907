//! Connection construction parameters.

use crate::frame::{FramingMode, KeepaliveParams, ProtocolVersion};

/// Default maximum frame body length (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Minimum accepted maximum frame length.
///
/// Configured limits are clamped to at least this value so every frame
/// header and typed body fits.
pub const MIN_FRAME_LEN: usize = 64;

/// Default capacity of the writer task's frame queue.
pub const DEFAULT_WRITER_CAPACITY: usize = 64;

/// Default capacity of the peer-initiated stream acceptor queue.
pub const DEFAULT_INCOMING_CAPACITY: usize = 32;

/// Default capacity of the application command channel.
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Which side of the connection this endpoint is.
///
/// The role fixes the parity of locally allocated stream ids: clients take
/// odd ids, servers take even ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionRole {
    /// The initiating side; sends SETUP and odd stream ids.
    Client,
    /// The accepting side; expects SETUP and uses even stream ids.
    Server,
}

impl ConnectionRole {
    /// First stream id this role may allocate.
    #[must_use]
    pub fn initial_stream_id(self) -> u32 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }
}

/// Parameters consumed once when a connection is constructed.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Negotiated protocol version.
    pub version: ProtocolVersion,
    /// Connection role; fixes stream id parity.
    pub role: ConnectionRole,
    /// How frames are delimited on the transport.
    pub framing: FramingMode,
    /// Maximum frame body length accepted and produced.
    pub max_frame_len: usize,
    /// Keepalive cadence; `None` disables liveness probing.
    pub keepalive: Option<KeepaliveParams>,
    /// Whether locally initiated requests are subject to peer-granted
    /// leases.
    pub lease_enabled: bool,
    /// Writer queue capacity; bounds outbound frames awaiting the transport.
    pub writer_capacity: usize,
    /// Acceptor queue capacity for peer-initiated streams.
    pub incoming_capacity: usize,
    /// Application command channel capacity.
    pub command_capacity: usize,
}

impl ConnectionConfig {
    fn new(role: ConnectionRole) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            role,
            framing: FramingMode::default(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            keepalive: None,
            lease_enabled: false,
            writer_capacity: DEFAULT_WRITER_CAPACITY,
            incoming_capacity: DEFAULT_INCOMING_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }

    /// Configuration for the initiating side.
    #[must_use]
    pub fn client() -> Self { Self::new(ConnectionRole::Client) }

    /// Configuration for the accepting side.
    #[must_use]
    pub fn server() -> Self { Self::new(ConnectionRole::Server) }

    /// Set the protocol version to negotiate.
    #[must_use]
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Select the transport framing mode.
    #[must_use]
    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }

    /// Set the maximum frame length, clamped to at least [`MIN_FRAME_LEN`].
    #[must_use]
    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max.max(MIN_FRAME_LEN);
        self
    }

    /// Enable keepalive probing with the given cadence.
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: KeepaliveParams) -> Self {
        self.keepalive = Some(keepalive);
        self
    }

    /// Subject locally initiated requests to peer-granted leases.
    #[must_use]
    pub fn with_lease(mut self) -> Self {
        self.lease_enabled = true;
        self
    }

    /// Set the writer queue capacity.
    #[must_use]
    pub fn with_writer_capacity(mut self, capacity: usize) -> Self {
        self.writer_capacity = capacity.max(1);
        self
    }

    /// Set the acceptor queue capacity.
    #[must_use]
    pub fn with_incoming_capacity(mut self, capacity: usize) -> Self {
        self.incoming_capacity = capacity.max(1);
        self
    }
}
