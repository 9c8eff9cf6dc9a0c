//! Session protocol engine for a remote compute cell server.
//!
//! A [`Session`] submits code through a [`Transport`], polls for output on a
//! single adaptive timer ([`PollController`]), and routes every decoded
//! message to a [`RenderSurface`] block. Interact cells created from
//! `interact_prepare` messages are owned by the session and resubmit through
//! it whenever a subscribed control event fires.

mod dispatch;
pub mod polling;
pub mod registry;
pub mod render;
pub mod session;
pub mod transport;

pub use polling::PollController;
pub use registry::{EventHandlerRegistry, Subscription};
pub use render::{HtmlDocument, RenderSurface};
pub use session::{ControlEvent, Session, SessionCommand, SessionSettings, SessionState};
pub use transport::{HttpTransport, Transport};
