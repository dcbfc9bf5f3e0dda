//! Pull resolution: turning an image locator into an ordered plan of
//! source/destination pairs and executing it against a copy layer.
pub mod archive;
pub mod cancel;
pub mod copy;
pub mod error;
pub mod goal;
pub mod name;
pub mod pull;
pub mod reference;
pub mod registries;
pub mod retry;
pub mod store;
pub mod system_context;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{PullError, Result};
pub use goal::{PullGoal, RefPair};
pub use pull::{PullOptions, Puller};
pub use reference::{ImageReference, Transport};
