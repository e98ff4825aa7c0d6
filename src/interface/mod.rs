pub mod coordinator;

pub use coordinator::{Coordinator, LeaseGrant, LeaseId};
