pub mod api;
pub mod authorization;
pub mod bundle;
pub mod chain;
pub mod error;
pub mod proof;
pub mod roles;
pub mod types;
pub mod wallet;

pub use bundle::{BundleState, Pczt};
pub use error::{Error, ErrorClass};
