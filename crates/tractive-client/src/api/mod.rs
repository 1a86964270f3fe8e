//! API endpoint implementations.

mod trackable_objects;
mod trackers;

pub use trackable_objects::TrackableObjectsApi;
pub use trackers::TrackersApi;
