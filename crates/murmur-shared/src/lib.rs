//! # murmur-shared
//!
//! Types shared between the Murmur server, store, and client crates:
//! identifiers, the sender union, the delivery-state lattice, and the wire
//! DTOs exchanged over the REST API.

pub mod constants;
pub mod protocol;
pub mod types;

pub use types::{ConversationId, DeliveryState, MessageId, MessageType, Sender, UserId};
