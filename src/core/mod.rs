pub mod attributes;
pub mod codec;
pub mod config;
pub mod dedup;
pub mod frame;
pub mod schedule;
pub mod types;

pub use attributes::*;
pub use codec::*;
pub use config::*;
pub use dedup::*;
pub use frame::*;
pub use schedule::*;
pub use types::*;
