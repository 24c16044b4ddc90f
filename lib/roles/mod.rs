//! Role operations over a [`crate::bundle::Pczt`].
//!
//! Each role takes the bundle by reference and returns a new bundle, so a
//! failed operation leaves the caller's copy untouched. Roles may run in
//! separate processes, with the bundle handed between them in its encoded
//! form.

pub mod combiner;
pub mod constructor;
pub mod creator;
pub mod finalizer;
pub mod funder;
pub mod io_finalizer;
pub mod prover;
pub mod signer;
pub mod tx_extractor;

pub use combiner::combine;
pub use constructor::{
    NewOutput, add_output, add_spend, add_transparent_input,
    add_transparent_output, fill_output, reserve_output,
};
pub use creator::{Skeleton, create};
pub use finalizer::finalize;
pub use funder::{FundingPolicy, fund};
pub use io_finalizer::seal;
pub use prover::prove;
pub use signer::{sign_spend, sign_spends, sign_transparent};
pub use tx_extractor::extract;
