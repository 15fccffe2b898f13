pub mod calendar;
pub mod policy;

pub use calendar::*;
pub use policy::*;
