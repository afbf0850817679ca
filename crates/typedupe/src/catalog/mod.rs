//! Configured catalog input and its translation into [`ParsedCatalog`](crate::core::ParsedCatalog).

pub mod parser;
pub mod protocol;

pub use parser::CatalogParser;
pub use protocol::{AirbyteStream, ConfiguredCatalog, ConfiguredStream, DestinationSyncMode};
