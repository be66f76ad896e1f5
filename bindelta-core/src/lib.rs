//! bindelta-core: a graph-based binary diffing engine.
//!
//! Given two disassembled binaries in the exchange format, the engine
//! computes a correspondence ("fixed points") between their functions and,
//! inside matched functions, between their basic blocks. Matching runs a
//! two-level cascade of heuristics over call graphs and per-function flow
//! graphs, driven by structural fingerprints (MD indices, prime signatures,
//! byte hashes, loop structure, string references).
//!
//! # Typical use
//!
//! ```no_run
//! use bindelta_core::binexport::read_binary_from_file;
//! use bindelta_core::config::MatchingConfig;
//! use bindelta_core::matching::diff;
//!
//! # fn main() -> bindelta_core::error::Result<()> {
//! let primary = read_binary_from_file("old.BinDelta")?;
//! let secondary = read_binary_from_file("new.BinDelta")?;
//! let catalog = diff(&primary, &secondary, &MatchingConfig::default(), None)?;
//! for m in &catalog.matches {
//!     println!("{:08X} <-> {:08X} {}", m.primary_address, m.secondary_address, m.step_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod binexport;
pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod matching;
pub mod primes;

pub use crate::config::MatchingConfig;
pub use crate::error::{DiffError, Result};
pub use crate::graph::{Address, Binary};
pub use crate::matching::{diff, DiffStatistics, FunctionMatch, MatchCatalog};
