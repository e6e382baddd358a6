mod credentials;
mod result;
mod signals;
mod traits;
mod vehicle;

pub use credentials::*;
pub use result::*;
pub use signals::*;
pub use traits::*;
pub use vehicle::*;
