//! Chat dialogue for registering events and reminder recipients.

pub mod choices;
pub mod engine;
pub mod state;

pub use engine::{ConversationEngine, CANCEL_KEYWORD, TRIGGERS};
pub use state::{ConversationState, MemorySessionStore, SessionStore, Step};
