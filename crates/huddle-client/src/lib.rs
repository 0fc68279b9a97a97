//! Transport-free client logic. Feed it decoded frames and fetched pages;
//! it keeps conversations deduplicated and in server order, and tracks who
//! is typing.

pub mod conversation;
pub mod dispatch;
pub mod typing;

pub use conversation::Conversation;
pub use dispatch::{ClientState, DispatchError, EventTable, Update};
pub use typing::{TypingIndicator, TypingObserver, TypingSignal};
