pub mod input;
mod message;
mod scope;

pub use message::{Attachment, Message, MessageBody, MessageId, SearchHit};
pub use scope::{Scope, SelectionRecord};
