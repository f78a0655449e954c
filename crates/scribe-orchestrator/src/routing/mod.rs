//! Provider routing: strategy ordering, health tracking, and fallback dispatch.

pub mod performance;
pub mod router;
pub mod types;

pub use performance::{ProviderPerformance, RESPONSE_WINDOW};
pub use router::ProviderRouter;
pub use types::{DispatchOutcome, FailureRecord, RouteDecision, RoutingError, RoutingStrategy};
