pub mod enums;
pub mod ids;
pub mod io;
pub mod job;
pub mod repo;
pub mod review;

pub use enums::{JobStatus, Verdict};
pub use ids::{CommitId, IdError, JobId, RepoId, ResponseId, ReviewId};
pub use io::{CommitMeta, EnqueueInput, EnqueueRequest, JobFilter, NewJob, NewReview};
pub use job::{JobWithReview, QueueStatus, ReviewJob, ReviewWithJob};
pub use repo::{Commit, Repo};
pub use review::{Response, Review};
