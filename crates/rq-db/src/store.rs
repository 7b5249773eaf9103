use rq_core::error::RqError;
use rq_core::store::Store;
use rq_core::verdict::VerdictParser;
use rusqlite::Connection;

use crate::job_repo::JobRepo;
use crate::repo_repo::RepoRepo;
use crate::review_repo::ReviewRepo;

pub struct DbStore {
    conn: Connection,
    verdict: VerdictParser,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            verdict: VerdictParser::default(),
        }
    }

    pub fn with_verdict_parser(mut self, verdict: VerdictParser) -> Self {
        self.verdict = verdict;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DbStore {
    type Repos<'a>
        = RepoRepo<'a>
    where
        Self: 'a;
    type Jobs<'a>
        = JobRepo<'a>
    where
        Self: 'a;
    type Reviews<'a>
        = ReviewRepo<'a>
    where
        Self: 'a;

    fn repos(&self) -> Self::Repos<'_> {
        RepoRepo::new(&self.conn)
    }

    fn jobs(&self) -> Self::Jobs<'_> {
        JobRepo::new(&self.conn, &self.verdict)
    }

    fn reviews(&self) -> Self::Reviews<'_> {
        ReviewRepo::new(&self.conn, &self.verdict)
    }

    fn verdict_parser(&self) -> &VerdictParser {
        &self.verdict
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, RqError>
    where
        F: FnOnce(&Self) -> Result<T, RqError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(storage)?;
        match f(self) {
            Ok(value) => {
                if let Err(err) = self.conn.execute_batch("COMMIT") {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(storage(err));
                }
                Ok(value)
            }
            Err(err) => {
                self.conn.execute_batch("ROLLBACK").map_err(storage)?;
                Err(err)
            }
        }
    }
}

fn storage(err: rusqlite::Error) -> RqError {
    RqError::Storage {
        message: err.to_string(),
    }
}
