//! Output side of the pipeline: the `.npy` codec and the object writer.

pub mod npy;
pub mod writer;

pub use npy::{NpyArray, NpyError};
pub use writer::{Claim, ClaimOwner, ClaimStatus, ObjectWriter, OutputLayout, WriteError};
