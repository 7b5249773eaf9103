use owo_colors::{OwoColorize, Stream::Stdout};
use rq_core::types::{JobStatus, JobWithReview, QueueStatus, Response, ReviewJob, Verdict};

fn short(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

pub fn status_label(status: JobStatus) -> String {
    let text = status.as_str();
    match status {
        JobStatus::Done | JobStatus::Applied => {
            text.if_supports_color(Stdout, |t| t.green()).to_string()
        }
        JobStatus::Failed | JobStatus::Canceled => {
            text.if_supports_color(Stdout, |t| t.red()).to_string()
        }
        JobStatus::Running => text.if_supports_color(Stdout, |t| t.yellow()).to_string(),
        JobStatus::Queued | JobStatus::Rebased => {
            text.if_supports_color(Stdout, |t| t.dimmed()).to_string()
        }
    }
}

pub fn verdict_label(verdict: Verdict) -> String {
    match verdict {
        Verdict::Pass => "PASS"
            .if_supports_color(Stdout, |t| t.green().bold().to_string())
            .to_string(),
        Verdict::Fail => "FAIL"
            .if_supports_color(Stdout, |t| t.red().bold().to_string())
            .to_string(),
    }
}

/// One-line summary: id, status, repo, target and verdict.
pub fn job_line(job: &ReviewJob) -> String {
    let mut line = format!(
        "#{} {} {} {}",
        job.id,
        status_label(job.status),
        job.repo_name,
        short(job.target())
    );
    if let Some(subject) = &job.commit_subject {
        line.push_str(&format!(" {subject}"));
    }
    if let Some(verdict) = job.verdict {
        line.push_str(&format!(" [{}]", verdict_label(verdict)));
    }
    if let Some(parent) = job.parent_job_id {
        line.push_str(&format!(" (fix for #{parent})"));
    }
    line
}

pub fn job_details(found: &JobWithReview, comments: &[Response]) -> String {
    let job = &found.job;
    let mut out = vec![job_line(job)];
    out.push(format!("agent:    {}", job.agent));
    out.push(format!("enqueued: {}", job.enqueued_at.to_rfc3339()));
    if let Some(finished) = job.finished_at {
        out.push(format!("finished: {}", finished.to_rfc3339()));
    }
    if let Some(worker) = &job.claimed_by {
        out.push(format!("worker:   {worker}"));
    }
    if let Some(error) = &job.error {
        out.push(format!("error:    {error}"));
    }
    if let Some(review) = &found.review {
        out.push(String::new());
        out.push(review.output.trim_end().to_string());
    }
    if let Some(patch) = &job.patch {
        out.push(String::new());
        out.push(format!(
            "patch against {}: {} lines",
            short(job.patch_base_sha.as_deref().unwrap_or("")),
            patch.lines().count()
        ));
    }
    if !comments.is_empty() {
        out.push(String::new());
        for comment in comments {
            out.push(format!(
                "{} ({}): {}",
                comment.responder.if_supports_color(Stdout, |t| t.bold()),
                comment.created_at.format("%Y-%m-%d %H:%M"),
                comment.text
            ));
        }
    }
    out.join("\n")
}

pub fn queue_status(status: &QueueStatus) -> String {
    let mut lines = vec![format!("workers: {}", status.workers)];
    for job_status in JobStatus::ALL {
        lines.push(format!(
            "{:<9} {}",
            job_status.as_str(),
            status.count(job_status)
        ));
    }
    lines.join("\n")
}
