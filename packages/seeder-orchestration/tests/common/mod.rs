//! Common test utilities for seeder-orchestration
//!
//! Scripted stage collaborators and record fixtures shared by the
//! integration tests.

#![allow(dead_code)]

mod fixtures;
mod stubs;

pub use fixtures::*;
pub use stubs::*;
