// implementation of the broadcast channel.
//
// the basic architecture is as such:
//
// `Channel` is the sole owning handle. it wraps an Arc around the channel core, which owns:
//
//          |------ the sender roster and getter roster, each a livelist::LiveList of party
//          |       handles. the dispatch loop traverses a roster while attach/detach edit it;
//          |       the list's own edit serialization is the only synchronization around them.
//          |
//          |------ the "getters awaiting" gate, set by every Getter::get and cleared when a
//          |       broadcast begins. the dispatch loop parks on it between passes.
//          |
//          \------ the stop flag and recorded fault, consulted by every send/get.
//
// each Sender and Getter wraps an Arc around its own state (bounded queue, abort handles for its
// in-flight operations) plus a Weak reference back to the core, so a dropped Channel is not kept
// alive by its parties.
//
// the dispatch loop runs as its own task. a monitor task awaits its termination: on a fault it
// records the error and then detaches every attached party, which unblocks anyone suspended
// against the dead loop. dropping the Channel aborts the loop deterministically.
//
// the organization of these modules is as such:
//
//      queue<----------core: dispatch loop, monitor task, and the shared core state.
//                |     ^
//      sender<---|     |
//                |     |
//      getter<---/     |
//                      |
//      api-------------/   the exposed Channel handle and its direct drain iteration. the crate
//                          re-exports this API publically.
//
// there is also the error module, which contains the public error type.

pub(crate) mod api;
pub(crate) mod error;
pub(crate) mod getter;
pub(crate) mod sender;

mod core;
mod queue;

#[cfg(test)]
mod tests;
