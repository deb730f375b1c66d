//! Convoy - run concurrent automation requests against one repository
//!
//! Binary name: `convoy`

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod cli;
pub mod engine;

pub use engine::ProcessEngine;
