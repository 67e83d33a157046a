pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use repositories::{
    DeliveryLogRepository, DeliveryRecord, InMemorySubscriptionRepository, RepositoryError,
    SqlSubscriptionRepository, SubscriptionBackend, SubscriptionRepository,
};
pub use store::SubscriptionStore;
