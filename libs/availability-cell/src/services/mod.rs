pub mod adapter;
pub mod availability;
pub mod cancellation;
pub mod conflict;
pub mod memory_store;
pub mod resolver;
pub mod schedule;
pub mod store;

pub use adapter::AvailabilityPayload;
pub use availability::{booking_for_caller, AvailabilityService, CancellationOutcome};
pub use cancellation::{can_cancel, cancellation_deadline, evaluate_cancellation, CancellationDecision};
pub use conflict::{find_conflicts, has_conflict, intervals_overlap, ProposedBooking};
pub use memory_store::InMemoryAvailabilityStore;
pub use resolver::{ResolverInputs, SlotResolver, Slots};
pub use store::{AvailabilityStore, SupabaseAvailabilityStore};
