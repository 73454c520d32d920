//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

// MPLS label.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Label(u32);

// Label operation attached to a next-hop of an MPLS or SR-MPLS route.
#[derive(Clone, Debug, EnumAsInner, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MplsAction {
    // Penultimate hop popping: remove the top label.
    Php,
    // Replace the top label.
    Swap(Label),
    // Push a stack of labels (bottom first).
    Push(Vec<Label>),
}

// ===== impl Label =====

impl Label {
    pub const VALUE_MASK: u32 = 0x000FFFFF;

    // Well-known MPLS labels.
    pub const IMPLICIT_NULL: u32 = 3;

    // MPLS label ranges.
    pub const RESERVED_RANGE: std::ops::RangeInclusive<u32> = 0..=15;
    pub const UNRESERVED_RANGE: std::ops::RangeInclusive<u32> = 16..=1048575;

    // Sentinel meaning "no label allocated" (segment routing disabled).
    pub const UNSET: Label = Label(0);

    pub fn new(label: u32) -> Label {
        if label > *Self::UNRESERVED_RANGE.end() {
            panic!("invalid label value: {}", label);
        }
        Label(label)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }

    pub fn is_reserved(&self) -> bool {
        Self::RESERVED_RANGE.contains(&self.0)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Label::IMPLICIT_NULL => write!(f, "implicit-null"),
            _ => write!(f, "{}", self.0),
        }
    }
}

// ===== impl MplsAction =====

impl std::fmt::Display for MplsAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MplsAction::Php => write!(f, "php"),
            MplsAction::Swap(label) => write!(f, "swap({})", label),
            MplsAction::Push(labels) => {
                write!(f, "push(")?;
                for (idx, label) in labels.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", label)?;
                }
                write!(f, ")")
            }
        }
    }
}
