//! quack-session: one client talking to one or more dongles
//!
//! A [`Session`] owns a transport, keeps the table of discovered dongles, tracks which
//! one is selected, and rebuilds the command registry from that dongle's `info`
//! messages. Inbound traffic is drained by a single dispatcher thread; foreground
//! callers read the shared state and issue requests.

mod error;
pub use error::{Result, SessionError};

mod display;
pub use display::{DisplayEvent, DisplayFn};

mod metrics;
pub use metrics::SessionMetrics;

mod state;
pub use state::{Device, Reply};

mod session;
pub use session::{Session, SessionOptions};
