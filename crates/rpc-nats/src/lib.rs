//! NATS transport for the RPC layer.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod subject;
mod transport;

pub use error::Error;
pub use subject::{from_subject, to_subject};
pub use transport::NatsTransport;
