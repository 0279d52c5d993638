mod transition;
mod types;

pub use transition::StateTransitionController;
pub use types::{ControllerState, TaskGraphState, TaskResourceState};
