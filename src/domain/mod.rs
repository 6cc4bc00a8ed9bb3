pub mod event;
pub mod mail;

pub use event::*;
pub use mail::*;
