//! track-core: Motor de transiciones de producción y coordinación de lotes
pub mod broadcast;
pub mod coordinator;
pub mod errors;
pub mod store;
pub mod transition;

pub use broadcast::{SubscriberHandle, TrackingUpdate, UpdateBroadcaster};
pub use coordinator::{BatchTracking, ErrorCode, OperationResult, SerialViolation, TrackingCoordinator};
pub use errors::{classify_store_error, ErrorClass, StoreError, TransitionError};
pub use store::{InMemoryTrackingStore, StateFilter, TrackingStore, UnitUpdate};
pub use transition::{resolve, Action, TransitionEngine};
