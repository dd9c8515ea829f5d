pub mod error;
pub mod fetch;
pub mod hash;
pub mod journal;
pub mod manifest;
pub mod path_safety;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod version;
pub mod worker;

pub use error::{Result, UpdateError};
