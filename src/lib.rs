//! coordmap - sorted map with concurrent readers and drained, exclusive writers
//!
//! Many threads may read the map at once. A write takes a single admission
//! lock, waits for every in-flight reader to leave and only then mutates, so a
//! reader never observes a half-applied write.
//!
//! # Modules
//!
//! - [`map`] - the sorted map and its operations
//! - [`backoff`] - bounded exponential backoff used by the waits
//! - [`error`] - error types
//! - [`config`] - configuration types and loading
//! - [`stress`] - multi-threaded stress harness
//! - [`cli`] - command-line interface for the `cmap` binary
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use coordmap::SortedMap;
//!
//! let map = Arc::new(SortedMap::new());
//! let writer = {
//!     let map = Arc::clone(&map);
//!     thread::spawn(move || {
//!         for key in 0..100u32 {
//!             map.set(key, key * 2);
//!         }
//!     })
//! };
//! writer.join().unwrap();
//!
//! assert_eq!(map.len(), 100);
//! assert_eq!(map.value(&21), Ok(42));
//! ```

pub mod backoff;
pub mod cli;
pub mod config;
pub mod error;
pub mod map;
pub mod stress;
mod sync;

// Re-export commonly used types
pub use backoff::{Backoff, BackoffConfig, BackoffStep};
pub use config::Config;
pub use error::MapError;
pub use map::{MapStats, SortedMap};
pub use stress::{StressConfig, StressReport};
pub use sync::Phase;
