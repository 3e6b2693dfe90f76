//! Live notification delivery: the connection hub, the per-target
//! dispatcher built on top of it, and the WebSocket gateway loop.

pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod publisher;

pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use hub::Hub;
pub use publisher::{DeliveryError, Publisher};
