pub mod availability;
pub mod booking;
pub mod confirmation;
pub mod lifecycle;
pub mod store;

pub use availability::AvailabilityService;
pub use booking::BookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use store::AppointmentStore;
