//! Interact cells — live widgets whose control values are serialized into a
//! remote function call on every change.
//!
//! A cell is built from an `interact_prepare` payload, renders one HTML
//! fragment per declared control, and turns each subscribed control event
//! into a code string for the owning session to resubmit.

pub mod cell;
pub mod codegen;
pub mod control;

pub use cell::{InteractCell, RenderedControl, Resubmit};
pub use codegen::Changes;
pub use control::{Control, ControlKind, ControlType, ControlValue, EventKind, SliderKind};
