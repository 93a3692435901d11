//! Shipment sync service.
//!
//! Consumes the shipment topics from Redpanda and reconciles them into
//! `PostgreSQL`. Poison messages land in the dead letter queue. See
//! [`config::Config`] for the environment it reads.

pub mod config;

pub use config::Config;
