//! [`Signal`]: the readiness record a `release`/`acquire` pair carries (C2, §3/§4.2).
//!
//! A render graph value is not consumable just because its producing node exists in the
//! module: a `release` node hands a resource back to the recorder, and nothing downstream may
//! assume the hand-off actually happened until the submission that recorded it has been
//! dispatched to a queue (or, for a host-only hand-off, until the producing host code has run).
//! `Signal` is the record a `release`/`acquire` pair shares so that question has an answer that
//! does not depend on when the node happens to be visited during compilation.
use crate::serial::SubmissionNumber;
use std::sync::Mutex;

/// How far along a signal's life cycle is. Transitions only ever move forward:
/// `Disarmed` -> `Synchronizable` -> `HostAvailable`, or `Disarmed` -> `HostAvailable` directly
/// for a signal whose source never touches a device queue (a pure host release).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignalStatus {
    /// No source has been assigned yet; nothing should wait on this signal.
    Disarmed,
    /// A device-queue source has been assigned. A consumer on another queue may wait on
    /// `source().submission`'s timeline value once it becomes known, but the value is not yet
    /// known to be visible to host code.
    Synchronizable,
    /// The value is visible to host code: its submission has completed, or it never needed one.
    HostAvailable,
}

/// Where a signal's value comes from once armed.
#[derive(Copy, Clone, Debug, Default)]
pub struct SignalSource {
    /// The submission that produces the value, if the source is a device queue.
    pub submission: Option<SubmissionNumber>,
    /// An opaque, monotonically increasing visibility counter a consumer compares against its
    /// own last-observed value, so a signal can be re-armed across frames without a consumer
    /// mistaking a stale value for a fresh one.
    pub visibility: u64,
}

#[derive(Debug)]
struct SignalState {
    status: SignalStatus,
    source: SignalSource,
}

/// A value's readiness record, shared between the `release` node that produces it and every
/// `acquire` node that re-imports it.
///
/// Interior mutability is required here: [`crate::compiler::compile`] and
/// [`crate::recorder::Recorder`] only ever see a module by shared reference, but a signal's
/// status legitimately changes after the node is constructed, as the graph is scheduled and
/// submitted.
#[derive(Debug)]
pub struct Signal {
    state: Mutex<SignalState>,
}

impl Signal {
    pub fn new() -> Signal {
        Signal {
            state: Mutex::new(SignalState {
                status: SignalStatus::Disarmed,
                source: SignalSource::default(),
            }),
        }
    }

    pub fn status(&self) -> SignalStatus {
        self.state.lock().unwrap().status
    }

    pub fn source(&self) -> SignalSource {
        self.state.lock().unwrap().source
    }

    /// Arms the signal with a device-queue source: the value becomes `Synchronizable`. Panics
    /// if the signal already reached `HostAvailable`, since status never moves backward.
    pub fn arm_synchronizable(&self, source: SignalSource) {
        let mut state = self.state.lock().unwrap();
        assert_ne!(state.status, SignalStatus::HostAvailable, "signal already past Synchronizable");
        state.status = SignalStatus::Synchronizable;
        state.source = source;
    }

    /// Marks the signal's value as directly visible to host code, e.g. a host-only release that
    /// never goes through a device queue.
    pub fn arm_host_available(&self, source: SignalSource) {
        let mut state = self.state.lock().unwrap();
        state.status = SignalStatus::HostAvailable;
        state.source = source;
    }

    /// Called once the submission recorded in the signal's source is known to have completed:
    /// promotes `Synchronizable` to `HostAvailable`. A no-op otherwise.
    pub fn complete(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status == SignalStatus::Synchronizable {
            state.status = SignalStatus::HostAvailable;
        }
    }
}

impl Default for Signal {
    fn default() -> Signal {
        Signal::new()
    }
}

/// A linked copy of a `release`/`acquire` node (see [`crate::ir::Module::link`]) is a distinct
/// future production in its own module and has not been submitted yet, so its signal starts
/// fresh `Disarmed` regardless of the source's current state - this is intentional, not a
/// missing deep-clone.
impl Clone for Signal {
    fn clone(&self) -> Signal {
        Signal::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_signal_is_disarmed() {
        let signal = Signal::new();
        assert_eq!(signal.status(), SignalStatus::Disarmed);
    }

    #[test]
    fn complete_promotes_synchronizable_to_host_available() {
        let signal = Signal::new();
        signal.arm_synchronizable(SignalSource {
            submission: Some(SubmissionNumber::new(0, 1)),
            visibility: 1,
        });
        assert_eq!(signal.status(), SignalStatus::Synchronizable);
        signal.complete();
        assert_eq!(signal.status(), SignalStatus::HostAvailable);
    }

    #[test]
    fn complete_is_a_no_op_before_arming() {
        let signal = Signal::new();
        signal.complete();
        assert_eq!(signal.status(), SignalStatus::Disarmed);
    }

    #[test]
    #[should_panic(expected = "already past Synchronizable")]
    fn status_never_moves_backward() {
        let signal = Signal::new();
        signal.arm_host_available(SignalSource::default());
        signal.arm_synchronizable(SignalSource::default());
    }

    #[test]
    fn cloning_a_signal_resets_it() {
        let signal = Signal::new();
        signal.arm_host_available(SignalSource::default());
        let copy = signal.clone();
        assert_eq!(copy.status(), SignalStatus::Disarmed);
    }
}
