//! moneyger-notify - notifications for the moneyger personal-finance service.
//!
//! Account, transaction and chat events are buffered by domain producers and
//! published to RabbitMQ topic exchanges in short-lived connection cycles.
//! Account credentials are fetched from the notification service over a
//! correlation-id RPC.

pub mod bus;
pub mod config;
pub mod currency;
pub mod notifications;
pub mod rpc;
pub mod utils;
