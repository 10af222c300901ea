//! vector-ml Common Types
//!
//! Shared types used by the ml-server crate and its clients.

pub mod index;
pub mod model_type;

pub use index::{IndexRequest, MessageResponse, SearchParams, DEFAULT_K};
pub use model_type::{ModelType, ParseModelTypeError};
