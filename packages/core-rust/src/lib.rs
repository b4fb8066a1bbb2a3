//! `repokeeper` core: the vocabulary operators speak, the runtime's error
//! taxonomy, and content-addressed call identity.

pub mod error;
pub mod key;
pub mod types;

pub use error::OpError;
pub use key::{canonical_params, derive_key, idempotency_key};
pub use types::{ClientBundle, Descriptor, Insight, Metric, OpInput, OpOutput, RepoRef};
