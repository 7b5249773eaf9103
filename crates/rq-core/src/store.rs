use crate::RqError;
use crate::jobs::JobRepository;
use crate::repos::RepoRepository;
use crate::reviews::ReviewRepository;
use crate::verdict::VerdictParser;

pub trait Store {
    type Repos<'a>: RepoRepository
    where
        Self: 'a;
    type Jobs<'a>: JobRepository
    where
        Self: 'a;
    type Reviews<'a>: ReviewRepository
    where
        Self: 'a;

    fn repos(&self) -> Self::Repos<'_>;
    fn jobs(&self) -> Self::Jobs<'_>;
    fn reviews(&self) -> Self::Reviews<'_>;

    /// Parser used both when writing verdicts and when re-deriving missing ones.
    fn verdict_parser(&self) -> &VerdictParser;

    /// Runs `f` inside one write transaction, committing on `Ok` and rolling
    /// back on `Err`.
    fn with_tx<F, T>(&self, f: F) -> Result<T, RqError>
    where
        F: FnOnce(&Self) -> Result<T, RqError>;
}
