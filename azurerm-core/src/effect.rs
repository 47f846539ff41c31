//! Effect - A side effect described as a value
//!
//! Effects are produced by the differ and executed by the interpreter.

use crate::resource::{Resource, ResourceAddress, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Refresh a resource from the control plane
    Read {
        address: ResourceAddress,
        identifier: String,
    },
    Create(Resource),
    /// Mutate a resource in place
    Update {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute changed: delete, then create
    Replace {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    Delete {
        address: ResourceAddress,
        identifier: String,
    },
}

impl Effect {
    pub fn address(&self) -> &ResourceAddress {
        match self {
            Effect::Read { address, .. } | Effect::Delete { address, .. } => address,
            Effect::Create(r) => &r.address,
            Effect::Update { to, .. } | Effect::Replace { to, .. } => &to.address,
        }
    }

    /// Whether this Effect changes remote state
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Effect::Read { .. })
    }

    /// One-character marker used when rendering plans
    pub fn symbol(&self) -> &'static str {
        match self {
            Effect::Read { .. } => "?",
            Effect::Create(_) => "+",
            Effect::Update { .. } => "~",
            Effect::Replace { .. } => "-/+",
            Effect::Delete { .. } => "-",
        }
    }
}
