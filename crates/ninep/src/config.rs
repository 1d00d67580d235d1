//! Tunables threaded through [`crate::pool::SessionPool`] and
//! [`crate::server::Connection`]: message-size ceiling, table capacities,
//! session-pool capacity, and the protocol version string this server
//! accepts from `Tversion`.

/// Runtime limits for one server instance. Defaults match `spec.md` §6.
#[derive(Clone, Debug)]
pub struct Config {
    pub max_message_size: u32,
    pub max_fids: usize,
    pub max_tags: usize,
    pub max_sessions: usize,
    pub protocol_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_message_size: 8192,
            max_fids: 1024,
            max_tags: 128,
            max_sessions: 64,
            protocol_version: crate::wire::P92000.to_owned(),
        }
    }
}
