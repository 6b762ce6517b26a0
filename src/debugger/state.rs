//! Session state machine
//!
//! Holds the single live [`SessionState`] and publishes every accepted
//! transition to the observer and to broadcast subscribers, in order. An
//! invalid transition is refused and leaves the state untouched.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

use super::{ErrorSnapshot, SessionState, StateChange};
use crate::interpreter::frames::DebugInfo;
use crate::interpreter::observer::ExecutionObserver;
use crate::interpreter::tracker::Tracker;

const EVENT_CAPACITY: usize = 256;

pub struct StateMachine {
    state: Mutex<SessionState>,
    events: broadcast::Sender<StateChange>,
    observer: Arc<dyn ExecutionObserver>,
}

impl StateMachine {
    pub fn new(observer: Arc<dyn ExecutionObserver>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(SessionState::Ready),
            events,
            observer,
        }
    }

    pub fn current(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.lock();
        self.apply(&mut state, next, None, None)
    }

    /// Enter Paused with the call stack of the engine that blocked
    pub fn pause_with(&self, debug_info: DebugInfo) -> bool {
        let mut state = self.state.lock();
        self.apply(
            &mut state,
            SessionState::Paused,
            None,
            Some(Arc::new(debug_info)),
        )
    }

    /// Enter StoppedWithError. Only the first failure is recorded.
    pub fn fail(&self, snapshot: ErrorSnapshot) -> bool {
        let debug_info = snapshot.debug_info.clone().map(Arc::new);
        let mut state = self.state.lock();
        self.apply(
            &mut state,
            SessionState::StoppedWithError,
            Some(Arc::new(snapshot)),
            debug_info,
        )
    }

    /// Running → Idle when the tracker reports quiescence
    pub fn refresh_idle(&self, tracker: &Tracker) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Running || !tracker.is_idle_candidate() {
            return false;
        }
        self.apply(&mut state, SessionState::Idle, None, None)
    }

    /// Idle → Running when new work arrives; any other state is kept
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock();
        if *state != SessionState::Idle {
            return false;
        }
        self.apply(&mut state, SessionState::Running, None, None)
    }

    fn apply(
        &self,
        state: &mut MutexGuard<'_, SessionState>,
        next: SessionState,
        error: Option<Arc<ErrorSnapshot>>,
        debug_info: Option<Arc<DebugInfo>>,
    ) -> bool {
        if !state.can_transition_to(next) {
            return false;
        }

        debug!(from = %**state, to = %next, "session state changed");
        **state = next;

        let change = StateChange {
            state: next,
            error,
            debug_info,
        };
        self.observer.state_changed(&change);
        // No subscribers is fine
        let _ = self.events.send(change);
        true
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("state", &self.current())
            .finish()
    }
}
