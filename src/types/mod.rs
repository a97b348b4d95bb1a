//! Core types for turnstream.

pub mod message;
pub mod quota;
pub mod request;
pub mod stream;
pub mod turn;

pub use message::*;
pub use quota::*;
pub use request::*;
pub use stream::*;
pub use turn::*;
