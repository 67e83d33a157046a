pub mod config;
pub mod domain;
pub mod errors;
pub mod schedule;

pub use chrono;
pub use chrono_tz;

pub use domain::message::{ChannelDigest, ChannelInfo, ChannelMessage};
pub use domain::subscription::{
    DeliveryLogEntry, DeliveryStatus, Frequency, NewSubscription, ScheduleTime, Subscription,
    SubscriptionId, SubscriptionState,
};
pub use errors::{ApplicationError, DomainError};
pub use schedule::{CollectionWindow, DeliveryPeriod, DueCheck, ScheduleError};
