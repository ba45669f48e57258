pub mod builder;
pub mod classifier;
pub mod codec;
pub mod report;
pub mod sequence;
pub mod signer;
pub mod submission;
pub mod xml;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::domain::model::{InputRecord, SubmissionOutcome};
pub use crate::domain::ports::{DfeTransport, Storage};
pub use crate::utils::error::Result;
