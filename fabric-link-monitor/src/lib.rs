//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod error;
pub mod instance;
pub mod interface;
pub mod neighbor;
pub mod tasks;

pub use error::Error;
pub use instance::{
    LinkMonitor, LinkMonitorConfig, LinkMonitorRequest, LinkMonitorState,
};
