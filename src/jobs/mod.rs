//! Durable generation jobs: records, storage, driving and delivery.

pub mod content;
pub mod delivery;
pub mod driver;
pub mod notify;
pub mod store;
pub mod types;

pub use content::{ContentKind, ContentRecord, ContentStore};
pub use delivery::{DeliveryFrame, FollowEnd};
pub use store::{JobStore, JobStoreError, SqliteStore};
pub use types::{JobInput, JobRecord, JobStatus, JobType};
