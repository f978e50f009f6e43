// Library side of persona-chat, shared by the terminal client and the tests
pub mod accumulator;
pub mod media;
pub mod models;
pub mod presence;
pub mod reply;
pub mod session;
pub mod store;

// Re-export main types for convenience
pub use accumulator::{AccumulatorConfig, Fragment, MessageAccumulator};
pub use models::*;
pub use reply::{ReplyError, ReplyGenerator, ReplyRequest};
pub use session::{ChatSession, SessionConfig, SessionError};
pub use store::ConversationStore;
