pub mod listings;
pub mod status;
pub mod subscriptions;
