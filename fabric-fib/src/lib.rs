//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod error;
pub mod instance;
pub mod platform;
pub mod tasks;

pub use error::Error;
pub use instance::{Fib, FibConfig};
pub use platform::{FibPlatform, PlatformError};
