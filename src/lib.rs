//! Orchestrates parallel or sequential containerized explorations of a
//! software task across isolated git worktrees: each branch gets its own
//! worktree and container, explorers collaborate through a shared
//! insights/decisions volume, and the results are scored, ranked and
//! optionally merged back.

pub mod clock;
pub mod collaboration;
pub mod comparator;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod lock;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod resource;
pub mod shared_volume;
pub mod state;
pub mod strategy;
pub mod subprocess;
pub mod worktree;

pub use error::{ExplorationError, Result};
pub use model::{Exploration, ExplorationConfig, ExplorationStatus};
pub use orchestrator::ExplorationOrchestrator;
