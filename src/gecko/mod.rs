//! Gecko Protocol Client
//!
//! Command framing, chunked transfers, framebuffer capture and the small
//! enums that travel on the wire. See [`client::GeckoClient`] for the command set.

pub mod cheats;
pub mod client;
pub mod commands;
pub mod progress;
pub mod video;

pub use cheats::{frame_cheat_stream, CheatLine, CheatList, CheatParseError};
pub use client::GeckoClient;
pub use commands::{BreakpointKind, HookType, TargetStatus};
pub use progress::{no_progress, CancelToken, Progress, TransferStatus};
pub use video::{Screenshot, VideoMode};

use std::sync::{Arc, Mutex};

/// The client as shared between the search engine, the breakpoint waiter
/// and the caller. Holding the lock is holding the link.
pub type SharedClient = Arc<Mutex<GeckoClient>>;

pub fn shared(client: GeckoClient) -> SharedClient {
    Arc::new(Mutex::new(client))
}

#[cfg(test)]
mod tests_client;
