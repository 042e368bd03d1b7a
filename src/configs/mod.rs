pub mod base;
pub mod bot;
pub mod chime;
pub mod logging;

pub use base::*;
pub use bot::*;
pub use chime::*;
pub use logging::*;
