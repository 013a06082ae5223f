//! Geckolink - a remote memory debugging and cheat search client
//!
//! This library talks the Gecko protocol to a console target over TCP:
//! chunked memory dumps and uploads, pokes, breakpoints, RPC, and an
//! iterative search over successive memory captures.

pub mod breakpoint;
pub mod codec;
pub mod config;
pub mod error;
pub mod gecko;
pub mod memory;
pub mod search;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod transport;

pub use breakpoint::BreakpointEngine;
pub use config::Config;
pub use error::{ErrorCode, GeckoError};
pub use gecko::GeckoClient;
pub use memory::{MemoryRegionTable, MemorySnapshot};
pub use search::SearchEngine;
