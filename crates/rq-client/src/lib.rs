pub mod client;
pub mod wait;

pub use crate::client::{ClientError, DaemonClient};
pub use crate::wait::{DaemonJobs, GitRefs, JobSource, RefResolver, WaitArgs, run_wait};
