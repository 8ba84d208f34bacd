pub mod config;
pub mod controller;
pub mod events;
pub mod state;

pub use config::{SessionConfig, SetupPayload};
pub use controller::{Collaborators, SessionController, SessionOutcome};
pub use events::{EventSource, SessionEvent};
pub use state::SessionState;
