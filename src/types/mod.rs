pub mod event;
pub mod message;

pub use event::{EventSender, ExecutionHandle, StreamEvent};
pub use message::{Content, ContentPart, ImageSource, Message, Role};
