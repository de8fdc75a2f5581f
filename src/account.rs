//! Azure cloud account model and cross-snapshot reconciliation.
//!
//! The control plane can only list accounts one feature at a time, so a full view of an account
//! is assembled from several [`RawSnapshot`]s. [`reconcile`] folds them into a canonical,
//! deterministically ordered [`Reconciliation`].

pub mod model;
pub mod reconcile;
pub mod snapshot;

pub use model::*;
pub use reconcile::*;
pub use snapshot::*;
