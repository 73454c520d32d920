//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod error;
pub mod instance;
pub mod lsdb;
pub mod route;
pub mod spf;
pub mod tasks;

pub use error::Error;
pub use instance::{Decision, DecisionConfig, DecisionRequest};
