pub mod engine;
pub mod states;

pub use engine::{LifecycleDefinition, LifecycleEngine, LifecycleTransitionError, OrderLifecycle};
pub use states::{
    LifecycleAction, LifecycleContext, LifecycleEvent, LifecycleState, TransitionOutcome,
};
