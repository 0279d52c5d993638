//! Guarded state machine shared by the per-build controllers and the task
//! graph facade.

use std::fmt;
use std::sync::Mutex;

use tracing::debug;

use crate::error::CoordinatorError;
use crate::util::lock;

struct CurrentState<S> {
    state: S,
    transitioning_to: Option<S>,
    failure: Option<String>,
}

/// Holds the current state of some object and runs actions that are only
/// valid in particular states.
///
/// A failed action poisons the controller: every later operation, except
/// [`restart`](Self::restart) and
/// [`transition_ignoring_failures`](Self::transition_ignoring_failures),
/// fails with [`CoordinatorError::Poisoned`] carrying the first failure.
///
/// The lock is never held while an action runs, so actions may call back
/// into code that checks this controller's state.
pub struct StateTransitionController<S> {
    display_name: String,
    current: Mutex<CurrentState<S>>,
}

impl<S> StateTransitionController<S>
where
    S: Copy + Eq + fmt::Debug,
{
    pub fn new(display_name: impl Into<String>, initial: S) -> Self {
        Self {
            display_name: display_name.into(),
            current: Mutex::new(CurrentState {
                state: initial,
                transitioning_to: None,
                failure: None,
            }),
        }
    }

    /// Current state, ignoring any recorded failure.
    pub fn state(&self) -> S {
        lock(&self.current).state
    }

    pub fn failure(&self) -> Option<String> {
        lock(&self.current).failure.clone()
    }

    pub fn assert_in_state(&self, expected: S) -> Result<(), CoordinatorError> {
        self.check(&lock(&self.current), &[expected])
    }

    pub fn in_state<R>(
        &self,
        expected: S,
        action: impl FnOnce() -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        self.in_any_state(&[expected], action)
    }

    pub fn in_any_state<R>(
        &self,
        allowed: &[S],
        action: impl FnOnce() -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        self.check(&lock(&self.current), allowed)?;
        action().map_err(|err| self.record_failure(err))
    }

    pub fn transition<R>(
        &self,
        from: S,
        to: S,
        action: impl FnOnce() -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        self.transition_any(&[from], to, action)
    }

    /// Runs `action` and moves to `to` if it succeeds. On failure the state
    /// is left unchanged and the controller is poisoned.
    pub fn transition_any<R>(
        &self,
        from: &[S],
        to: S,
        action: impl FnOnce() -> Result<R, CoordinatorError>,
    ) -> Result<R, CoordinatorError> {
        self.begin(from, to, true)?;
        let result = action();
        let mut current = lock(&self.current);
        current.transitioning_to = None;
        match result {
            Ok(value) => {
                debug!(name = %self.display_name, from = ?current.state, to = ?to, "state transition");
                current.state = to;
                Ok(value)
            }
            Err(err) => {
                if current.failure.is_none() {
                    current.failure = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Moves to `to` once `action` returns, whatever the outcome. Neither a
    /// previously recorded failure nor the action's result poisons the
    /// controller.
    pub fn transition_ignoring_failures<R>(
        &self,
        from: &[S],
        to: S,
        action: impl FnOnce() -> R,
    ) -> Result<R, CoordinatorError> {
        self.begin(from, to, false)?;
        let value = action();
        let mut current = lock(&self.current);
        current.transitioning_to = None;
        current.state = to;
        Ok(value)
    }

    /// Resets to `to`, discarding any recorded failure.
    pub fn restart(&self, from: &[S], to: S) -> Result<(), CoordinatorError> {
        let mut current = lock(&self.current);
        if let Some(target) = current.transitioning_to {
            return Err(self.transitioning(current.state, target));
        }
        if !from.contains(&current.state) {
            return Err(self.wrong_state(from, current.state));
        }
        current.state = to;
        current.failure = None;
        Ok(())
    }

    fn begin(&self, from: &[S], to: S, honour_failure: bool) -> Result<(), CoordinatorError> {
        let mut current = lock(&self.current);
        if honour_failure {
            self.check(&current, from)?;
        } else {
            if let Some(target) = current.transitioning_to {
                return Err(self.transitioning(current.state, target));
            }
            if !from.contains(&current.state) {
                return Err(self.wrong_state(from, current.state));
            }
        }
        current.transitioning_to = Some(to);
        Ok(())
    }

    fn check(&self, current: &CurrentState<S>, allowed: &[S]) -> Result<(), CoordinatorError> {
        if let Some(cause) = &current.failure {
            return Err(CoordinatorError::Poisoned {
                name: self.display_name.clone(),
                cause: cause.clone(),
            });
        }
        if let Some(target) = current.transitioning_to {
            return Err(self.transitioning(current.state, target));
        }
        if !allowed.contains(&current.state) {
            return Err(self.wrong_state(allowed, current.state));
        }
        Ok(())
    }

    fn record_failure(&self, err: CoordinatorError) -> CoordinatorError {
        let mut current = lock(&self.current);
        if current.failure.is_none() {
            current.failure = Some(err.to_string());
        }
        err
    }

    fn wrong_state(&self, expected: &[S], actual: S) -> CoordinatorError {
        let expected = match expected {
            [single] => format!("{single:?}"),
            many => format!("one of {many:?}"),
        };
        CoordinatorError::illegal_state(format!(
            "{} should be in state {expected} but is in state {actual:?}",
            self.display_name
        ))
    }

    fn transitioning(&self, state: S, target: S) -> CoordinatorError {
        CoordinatorError::illegal_state(format!(
            "{} is in state {state:?} and already transitioning to {target:?}",
            self.display_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ControllerState::{self, *};
    use pretty_assertions::assert_eq;

    fn controller() -> StateTransitionController<ControllerState> {
        StateTransitionController::new("build ':b'", DiscoveringTasks)
    }

    #[test]
    fn test_transition_moves_state() {
        let ctl = controller();
        let value = ctl.transition(DiscoveringTasks, ReadyToRun, || Ok(7)).unwrap();
        assert_eq!(value, 7);
        assert_eq!(ctl.state(), ReadyToRun);
    }

    #[test]
    fn test_transition_from_wrong_state_fails() {
        let ctl = controller();
        let err = ctl.transition(ReadyToRun, Running, || Ok(())).unwrap_err();
        assert!(matches!(err, CoordinatorError::IllegalState(_)));
        assert_eq!(ctl.state(), DiscoveringTasks);
        // A state mismatch is not an action failure and does not poison.
        assert!(ctl.failure().is_none());
    }

    #[test]
    fn test_failed_action_poisons() {
        let ctl = controller();
        let err = ctl
            .transition(DiscoveringTasks, ReadyToRun, || -> Result<(), _> {
                Err(CoordinatorError::CircularDependency {
                    diagram: ":a".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::CircularDependency { .. }));
        assert_eq!(ctl.state(), DiscoveringTasks);

        let err = ctl.in_state(DiscoveringTasks, || Ok(())).unwrap_err();
        match err {
            CoordinatorError::Poisoned { cause, .. } => {
                assert!(cause.starts_with("Circular dependency"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_restart_clears_failure() {
        let ctl = controller();
        let _ = ctl.in_state(DiscoveringTasks, || -> Result<(), _> {
            Err(CoordinatorError::illegal_state("boom"))
        });
        ctl.restart(&[DiscoveringTasks], DiscoveringTasks).unwrap();
        assert!(ctl.in_state(DiscoveringTasks, || Ok(())).is_ok());
    }

    #[test]
    fn test_action_may_query_state() {
        let ctl = controller();
        ctl.transition(DiscoveringTasks, ReadyToRun, || {
            assert_eq!(ctl.state(), DiscoveringTasks);
            assert!(ctl.assert_in_state(DiscoveringTasks).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_transition_ignoring_failures_always_moves() {
        let ctl = controller();
        ctl.transition(DiscoveringTasks, ReadyToRun, || Ok(())).unwrap();
        ctl.transition(ReadyToRun, Running, || Ok(())).unwrap();
        let outcome = ctl
            .transition_ignoring_failures(&[Running], Finished, || "done")
            .unwrap();
        assert_eq!(outcome, "done");
        assert_eq!(ctl.state(), Finished);
    }
}
