//! # Warehouse Sync Core
//!
//! Types and traits shared by every part of the shipment synchronization
//! pipeline.
//!
//! ## Modules
//!
//! - [`status`]: shipment lifecycle and the legal transitions between states
//! - [`validation`]: field validation driven by per-entity accessor tables
//! - [`key`]: deterministic idempotency keys
//! - [`shipment`]: shipment and transaction payloads
//! - [`channel`]: the broker abstraction ([`channel::MessageChannel`])
//! - [`store`]: persistence collaborators ([`store::ShipmentStore`],
//!   [`store::DeadLetterSink`])
//!
//! ## Example
//!
//! ```
//! use warehouse_sync_core::{FieldValidator, KeyGenerator, Shipment, ShipmentStatus};
//!
//! let shipment = Shipment::new("S-100", ShipmentStatus::Planned);
//! FieldValidator::validate_required(&shipment, "id", true)?;
//!
//! let key = KeyGenerator::new().generate("S-100");
//! assert_eq!(key, KeyGenerator::new().generate("S-100"));
//! # Ok::<(), warehouse_sync_core::validation::FieldCheckError>(())
//! ```

pub mod channel;
pub mod key;
pub mod shipment;
pub mod status;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use channel::{AckHandle, ChannelError, Delivery, MessageChannel, MessageStream, Topics};
pub use key::{KeyGenerator, MessageKey};
pub use shipment::{Shipment, ShipmentLine, Transaction, TransactionFlow};
pub use status::{ShipmentStatus, can_transition};
pub use store::{DeadLetter, DeadLetterReason, DeadLetterSink, ShipmentStore, StoreError};
pub use validation::{FieldCheckError, FieldValidator, ValidationError, Validated};
