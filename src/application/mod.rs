pub mod archive_sweep;
pub mod mail_dispatch;
pub mod realtime;
pub mod supervisor;

pub use archive_sweep::*;
pub use mail_dispatch::*;
pub use realtime::*;
pub use supervisor::*;
