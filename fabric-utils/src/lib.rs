//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};

use pickledb::PickleDb;

pub mod adjacency;
pub mod area;
pub mod bus;
pub mod bytes;
pub mod ip;
pub mod kv;
pub mod mpls;
pub mod prefix;
pub mod southbound;
pub mod spark;
pub mod task;

// Useful type definition(s).
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
pub type Responder<T> = tokio::sync::oneshot::Sender<T>;

// Non-volatile storage shared by all components.
pub type Database = Arc<Mutex<PickleDb>>;
pub type DatabaseError = pickledb::error::Error;
