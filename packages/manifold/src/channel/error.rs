// channel error types.

use std::{error::Error, fmt, sync::Arc};

/// A fault recorded when the dispatch loop halts abnormally.
pub type Fault = Arc<dyn Error + Send + Sync + 'static>;

/// Error for operations against a [`Channel`](crate::Channel) whose dispatch loop has halted, or
/// that were interrupted by the party's own detach.
#[derive(Debug, Clone)]
pub enum ChannelError {
    /// The dispatch loop has stopped, by [`close`](crate::Channel::close), by dropping the
    /// channel, or by an unrecovered fault. The fault, if one was recorded, is chained as this
    /// error's source.
    Closed {
        /// The fault that halted the loop, or `None` if it was stopped deliberately.
        fault: Option<Fault>,
    },
    /// The operation's own party was detached while the operation was suspended.
    Cancelled,
}

impl ChannelError {
    pub(crate) fn closed(fault: Option<Fault>) -> Self {
        ChannelError::Closed { fault }
    }

    /// Whether this error reports a halted dispatch loop.
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Closed { .. })
    }

    /// Whether this error reports a cancellation by detach.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChannelError::Closed { .. } => write!(f, "channel dispatch loop has stopped"),
            ChannelError::Cancelled => write!(f, "channel operation cancelled by detach"),
        }
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ChannelError::Closed { fault: Some(fault) } => {
                let fault: &(dyn Error + 'static) = fault.as_ref();
                Some(fault)
            }
            _ => None,
        }
    }
}
