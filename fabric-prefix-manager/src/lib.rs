//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod instance;

pub use instance::{PrefixManager, PrefixManagerConfig};
