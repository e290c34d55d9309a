//! Access policy seam
//!
//! Authorization rules live outside this crate; services only ask.

use fe_core::Id;

/// Operations that are checked against the access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Delete,
    SetStatus,
    Reconcile,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::SetStatus => "set_status",
            Self::Reconcile => "reconcile",
        }
    }
}

/// Decides whether an operation on a target may proceed
pub trait AccessPolicy: Send + Sync {
    /// `target` is a file id for `Delete`/`SetStatus` and a parent id for `Reconcile`
    fn authorize(&self, operation: Operation, target: Id) -> bool;
}

/// Policy that allows everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn authorize(&self, _operation: Operation, _target: Id) -> bool {
        true
    }
}
