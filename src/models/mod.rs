pub mod assessment;
pub mod candidate;

pub use assessment::*;
pub use candidate::*;
