pub mod collection;
pub mod connection;
pub mod factory;
pub mod handler;
pub mod initializer;
pub mod writer;

pub use collection::*;
pub use connection::*;
pub use factory::*;
pub use handler::*;
pub use initializer::*;
pub use writer::*;
