mod command;
mod field;
mod protocol;

pub use command::*;
pub use field::*;
pub use protocol::*;
