//! Background job manager for OAuth login flows and operator-invoked CLI
//! runs.
//!
//! Each job supervises one child process: stdout and stderr are streamed
//! line by line into a bounded ring, URLs are extracted as they appear (the
//! whole point for device-code login flows), and a per-job timer enforces
//! the timeout with the usual SIGTERM then SIGKILL escalation.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::executor::{terminate, ResolvedCommand};

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// Snapshot of one job; logs and urls are copied out.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub kind: String,
    pub command: String,
    pub args: Vec<String>,
    pub status: JobStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub exit_code: Option<i32>,
    pub urls: Vec<String>,
    pub logs: Vec<String>,
}

#[derive(Debug)]
struct JobRecord {
    id: String,
    kind: String,
    command: String,
    args: Vec<String>,
    status: JobStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    urls: Vec<String>,
    logs: VecDeque<String>,
}

impl JobRecord {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            kind: self.kind.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            status: self.status,
            started_at: self.started_at.to_rfc3339(),
            finished_at: self.finished_at.map(|t| t.to_rfc3339()),
            exit_code: self.exit_code,
            urls: self.urls.clone(),
            logs: self.logs.iter().cloned().collect(),
        }
    }
}

/// Concurrent, addressable background jobs.
pub struct JobManager {
    max_log_lines: usize,
    max_jobs_per_kind: usize,
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    url_regex: Regex,
}

impl JobManager {
    pub fn new(max_log_lines: usize, max_jobs_per_kind: usize) -> Self {
        Self {
            max_log_lines,
            max_jobs_per_kind,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            url_regex: Regex::new(r"(?i)https?://[^\s]+").expect("url regex is valid"),
        }
    }

    /// Start a background command; returns immediately with a running
    /// record while a supervisor task streams output.
    pub async fn start_command(&self, kind: &str, cmd: ResolvedCommand) -> JobSnapshot {
        let id = Uuid::new_v4().to_string();
        let record = JobRecord {
            id: id.clone(),
            kind: kind.to_string(),
            command: cmd.program.clone(),
            args: cmd.args.clone(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            urls: Vec::new(),
            logs: VecDeque::new(),
        };
        let snapshot = record.snapshot();

        {
            let mut jobs = self.jobs.write().await;
            self.evict_finished(&mut jobs, kind);
            jobs.insert(id.clone(), record);
        }

        info!(job_id = %id, kind, program = %cmd.program, "starting background job");
        let supervisor = Supervisor {
            jobs: Arc::clone(&self.jobs),
            job_id: id,
            max_log_lines: self.max_log_lines,
            url_regex: self.url_regex.clone(),
        };
        tokio::spawn(supervisor.run(cmd));

        snapshot
    }

    /// Allow-list-gated variant for operator-supplied commands; executables
    /// are checked by basename before anything is spawned.
    pub async fn start_allowed_command(
        &self,
        kind: &str,
        cmd: ResolvedCommand,
        allowed: &[String],
    ) -> Result<JobSnapshot> {
        let basename = Path::new(&cmd.program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&cmd.program);
        if !allowed.iter().any(|entry| entry == basename) {
            warn!(program = %cmd.program, "rejected command outside the allow list");
            return Err(GatewayError::Config(format!(
                "executable '{basename}' is not in the allow list"
            )));
        }
        Ok(self.start_command(kind, cmd).await)
    }

    pub async fn get_job(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.read().await.get(id).map(JobRecord::snapshot)
    }

    /// Most recent jobs first.
    pub async fn list_jobs(&self, limit: usize) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<&JobRecord> = jobs.values().collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records
            .into_iter()
            .take(limit)
            .map(JobRecord::snapshot)
            .collect()
    }

    /// Keep at most `max_jobs_per_kind` records per kind by evicting the
    /// oldest finished ones. Running jobs are never evicted.
    fn evict_finished(&self, jobs: &mut HashMap<String, JobRecord>, kind: &str) {
        loop {
            let same_kind = jobs.values().filter(|job| job.kind == kind).count();
            if same_kind < self.max_jobs_per_kind {
                return;
            }
            let oldest_finished = jobs
                .values()
                .filter(|job| job.kind == kind && job.status != JobStatus::Running)
                .min_by_key(|job| job.started_at)
                .map(|job| job.id.clone());
            match oldest_finished {
                Some(id) => {
                    jobs.remove(&id);
                }
                None => return,
            }
        }
    }
}

#[derive(Clone)]
struct Supervisor {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    job_id: String,
    max_log_lines: usize,
    url_regex: Regex,
}

impl Supervisor {
    async fn run(self, cmd: ResolvedCommand) {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.append(format!("[system] failed to start: {e}")).await;
                self.finish(JobStatus::Failed, None).await;
                return;
            }
        };

        let stdout_task = self.stream("stdout", child.stdout.take());
        let stderr_task = self.stream("stderr", child.stderr.take());

        let status = tokio::select! {
            waited = child.wait() => waited.ok(),
            () = tokio::time::sleep(cmd.timeout) => {
                self.append("[system] command timed out".to_string()).await;
                let status = terminate(&mut child).await;
                let _ = tokio::join!(stdout_task, stderr_task);
                self.finish(JobStatus::TimedOut, status.and_then(|s| s.code())).await;
                return;
            }
        };

        let _ = tokio::join!(stdout_task, stderr_task);
        match status {
            Some(status) if status.success() => {
                self.finish(JobStatus::Completed, status.code()).await;
            }
            Some(status) => self.finish(JobStatus::Failed, status.code()).await,
            None => self.finish(JobStatus::Failed, None).await,
        }
    }

    fn stream(
        &self,
        label: &'static str,
        pipe: Option<impl AsyncRead + Unpin + Send + 'static>,
    ) -> tokio::task::JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let Some(pipe) = pipe else { return };
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                supervisor.append(format!("[{label}] {line}")).await;
            }
        })
    }

    /// Append one log line, trimming the ring and harvesting URLs.
    async fn append(&self, line: String) {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(&self.job_id) else {
            return;
        };
        for found in self.url_regex.find_iter(&line) {
            let url = found.as_str().to_string();
            if !record.urls.contains(&url) {
                record.urls.push(url);
            }
        }
        record.logs.push_back(line);
        while record.logs.len() > self.max_log_lines {
            record.logs.pop_front();
        }
    }

    async fn finish(&self, status: JobStatus, exit_code: Option<i32>) {
        {
            let mut jobs = self.jobs.write().await;
            if let Some(record) = jobs.get_mut(&self.job_id) {
                record.status = status;
                record.exit_code = exit_code;
                record.finished_at = Some(Utc::now());
            }
        }
        info!(job_id = %self.job_id, status = ?status, exit_code = ?exit_code, "background job finished");
    }
}
