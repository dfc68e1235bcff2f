//! Error types for scale-out link discovery and configuration.
//!
//! Every non-fatal condition is logged where it is detected and the owning
//! pass decides, through its [`FailurePolicy`], whether it stops the batch.

use scaleout_types::ParseError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoverError>;

/// Errors that can occur while discovering and configuring links.
#[derive(Debug, Error)]
pub enum DiscoverError {
    /// Peer port description does not contain a name and an address.
    #[error("interface '{ifname}' could not split peer description '{description}'")]
    PeerDescription {
        /// The local interface.
        ifname: String,
        /// The raw port description text.
        description: String,
    },

    /// Second token of the peer port description is not a CIDR address.
    #[error("interface '{ifname}' could not parse peer address '{address}': {source}")]
    PeerAddress {
        /// The local interface.
        ifname: String,
        /// The token that failed to parse.
        address: String,
        /// The underlying parse failure.
        #[source]
        source: ParseError,
    },

    /// Peer address uses a prefix length other than /30.
    #[error("interface '{ifname}' peer mask is /{mask}, not the expected /30")]
    PeerMask {
        /// The local interface.
        ifname: String,
        /// The advertised prefix length.
        mask: u8,
    },

    /// A PFC priority is not a number or outside 0-7.
    #[error("PFC value error: {0}")]
    PfcValue(String),

    /// Too many PFC priorities given.
    #[error("{0} PFC values, max is 8")]
    PfcCount(usize),

    /// External tool could not be found on the search path.
    #[error("tool '{tool}' not found: {source}")]
    ToolNotFound {
        /// The binary name searched for.
        tool: String,
        /// The lookup failure.
        #[source]
        source: which::Error,
    },

    /// Failed to spawn an external command.
    #[error("failed to execute '{command}': {source}")]
    CommandExec {
        /// The command line.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// External command returned a non-zero exit code.
    #[error("command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// The exit code, -1 when terminated by a signal.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Netlink request failed.
    #[error("netlink {operation} failed: {message}")]
    Netlink {
        /// The request, e.g. "link set up".
        operation: String,
        /// Error message.
        message: String,
    },

    /// No kernel link with the given name.
    #[error("link '{0}' not found")]
    LinkNotFound(String),

    /// Not every requested link confirmed its state change in time.
    #[error("timeout after {waited:?} waiting for netlink reply, {pending} link(s) pending")]
    LinkWaitTimeout {
        /// Number of links still unconfirmed.
        pending: usize,
        /// The shared deadline that elapsed.
        waited: Duration,
    },

    /// The link event listener stopped before all confirmations arrived.
    #[error("link event stream closed with {pending} link(s) pending")]
    EventStreamClosed {
        /// Number of links still unconfirmed.
        pending: usize,
    },

    /// Reading interface statistics failed.
    #[error("statistics for '{ifname}' failed: {message}")]
    Statistics {
        /// The interface.
        ifname: String,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registry error.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DiscoverError {
    /// Creates a netlink error.
    pub fn netlink(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Netlink {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Creates a statistics error.
    pub fn statistics(ifname: impl Into<String>, message: impl ToString) -> Self {
        Self::Statistics {
            ifname: ifname.into(),
            message: message.to_string(),
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// How a batch over several interfaces reacts to a per-interface failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log the failure, skip the interface and keep going.
    ContinueOnError,
    /// Abort the remaining interfaces and return the first failure.
    FailFast,
}

impl FailurePolicy {
    /// Applies the policy to a per-interface failure that has already been
    /// logged. Returns `Err` when the batch must stop.
    pub fn on_error(self, err: DiscoverError) -> Result<()> {
        match self {
            FailurePolicy::ContinueOnError => Ok(()),
            FailurePolicy::FailFast => Err(err),
        }
    }
}
