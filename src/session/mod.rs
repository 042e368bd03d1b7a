pub(crate) mod actor;
pub mod registry;
pub mod types;

pub use registry::SessionRegistry;
pub use types::{ChimeOutcome, SessionSnapshot};
