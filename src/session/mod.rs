// src/session/mod.rs - Simulation session orchestration

pub mod controller;
pub mod exchange;
pub mod metrics;
pub mod resolver;
pub mod signals;
pub mod single_flight;
pub mod store;
pub mod types;

pub use controller::{EndSummary, LifecycleState, OpenedSession, SessionController, SessionDeps, SessionEvent};
pub use exchange::{Exchange, SendOutcome, Transcript};
pub use signals::SignalSnapshot;
