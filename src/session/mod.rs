//! Session persistence, state and refresh coordination

mod manager;
mod refresh_gate;
pub mod state;
pub mod store;

pub use manager::SessionManager;
pub use refresh_gate::RefreshGate;
pub use state::{SessionState, SessionStateTracker};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
