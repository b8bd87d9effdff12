pub mod certificates;
pub mod domains;
pub mod events;

pub use domains::DomainStatus;
pub use events::EventType;
