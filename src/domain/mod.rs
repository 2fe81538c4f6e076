mod cancellation;
mod operation;
mod policy;
mod user;

pub use cancellation::*;
pub use operation::*;
pub use policy::*;
pub use user::*;
