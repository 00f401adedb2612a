//! Handler seams between the connection, ingestion and dispatch layers

use crate::{CorrelationContext, RawMessage, SensorReading};

/// Consumer of inbound transport messages
///
/// Registered with the connection supervisor. Implementations must contain
/// their own failures: nothing is returned to the transport.
#[trait_variant::make(MessageHandler: Send)]
pub trait LocalMessageHandler {
    async fn handle(&self, message: RawMessage);
}

/// Consumer of decoded readings
#[trait_variant::make(ReadingDispatcher: Send)]
pub trait LocalReadingDispatcher {
    async fn dispatch(&self, reading: SensorReading, ctx: CorrelationContext);
}
