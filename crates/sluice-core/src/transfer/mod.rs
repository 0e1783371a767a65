//! File transfer: per-session state machine, local storage and the chunk
//! sender.
//!
//! ```text
//! IDLE -> DOWNLOADING -> IDLE
//! IDLE -> UPLOADING   -> IDLE
//! ```
//!
//! One transfer runs per session at a time. The sending side reads the file
//! on a worker thread so the engine loop never blocks on disk.

mod sender;
mod state;
mod storage;

pub use sender::{SendOutcome, pacing_delay, stream_chunks};
pub use state::{Direction, TransferSnapshot, TransferState, TransferStatus};
pub use storage::{Storage, sanitize_filename};
