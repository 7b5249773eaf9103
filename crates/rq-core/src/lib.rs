pub mod agent;
pub mod error;
pub mod jobs;
pub mod patches;
pub mod queue;
pub mod repos;
pub mod reviews;
pub mod settings;
pub mod store;
pub mod validation;
pub mod verdict;

pub mod types;

pub use crate::error::RqError;
pub use crate::queue::{Queue, RequestContext};
pub use crate::settings::Settings;
pub use crate::store::Store;
pub use crate::verdict::VerdictParser;
