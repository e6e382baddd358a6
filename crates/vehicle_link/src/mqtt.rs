mod connection;
mod heartbeat;
mod topic;

pub use connection::*;
pub use heartbeat::*;
pub use topic::*;
