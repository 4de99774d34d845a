pub mod paper;
pub mod request;

pub use paper::*;
pub use request::*;
