//! Host checkout: the provisioning backend and the guard that serializes
//! state-changing calls against it.

mod backend;
mod coordinator;

pub use backend::{
    Backend, BackendError, BaseImage, DebugBackend, DebugDelays, Host, sort_by_timestamp,
};
pub use coordinator::{HostCoordinator, OperationPermit};
