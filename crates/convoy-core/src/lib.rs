//! # Convoy Core
//!
//! Lets independent automation runs share one repository. Each run asks
//! for a branch; the coordinator runs it in place, in an isolated git
//! worktree, or queues it until the branch frees up, and always releases
//! what it took.
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. Lock contention and
//! isolation failures never reach callers; the coordinator turns them into
//! deferrals.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cleanup;
pub mod config;
pub mod coordinator;
pub mod engine;
mod error;
pub mod isolation;
pub mod lifecycle;
pub mod lock;
pub mod queue;
pub mod request;
pub mod shutdown;
mod state_file;
pub mod status;
pub mod vcs;

pub use config::{load_config, Config, WaitPolicy};
pub use coordinator::{Classification, ClassificationObserver, Coordinator, RunReport, RunState};
pub use engine::{ExecutionContext, ExecutionEngine};
pub use error::{Error, Result, TERMINATED_EXIT_CODE};
pub use request::{OwnerId, Request};
pub use shutdown::{signal_channels, ShutdownCoordinator, ShutdownSignal};
