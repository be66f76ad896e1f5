//! Structural graph algorithms backing the feature computations.
//!
//! Everything in here operates on plain vertex-count + edge-list inputs so
//! the same code serves both per-function flow graphs (vertices are basic
//! blocks) and the call graph (vertices are functions).

pub mod dominators;
pub mod levels;
pub mod md_index;

pub use dominators::DominatorTree;
pub use md_index::MdIndex;
