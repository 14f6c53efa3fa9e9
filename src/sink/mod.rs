//! Egress boundaries.

pub mod message;

pub use message::{
    BrokerClient, DropReason, JsonPayloadConverter, MessageSinkAdapter, MessageSinkSettings,
    PayloadConverter, PayloadSchema, PublishReport,
};
