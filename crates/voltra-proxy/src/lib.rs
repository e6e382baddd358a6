mod conversions;
mod failover;
mod gateway;
mod routes;
mod sign;

pub use conversions::*;
pub use failover::*;
pub use gateway::*;
pub use routes::*;
pub use sign::*;
