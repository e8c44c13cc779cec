//! Persistent row types shared by the job and channel managers

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobType {
    GenerateKraus,
    GenerateVector,
    Minimize,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::GenerateKraus => "generate_kraus",
            JobType::GenerateVector => "generate_vector",
            JobType::Minimize => "minimize",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_kraus" => Ok(JobType::GenerateKraus),
            "generate_vector" => Ok(JobType::GenerateVector),
            "minimize" => Ok(JobType::Minimize),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
            JobStatus::Paused => "paused",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            "paused" => Ok(JobStatus::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of work dispatched to a worker.
#[derive(Debug, Clone, FromRow)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub input_data: String,
    pub kraus_operator: Option<String>,
    pub vector: Option<String>,
    pub entropy: f64,
    pub num_iterations: i64,
    pub time_created: i64,
    pub time_started: Option<i64>,
    pub time_finished: Option<i64>,
    pub last_update: i64,
    pub worker_id: Option<String>,
    pub channel_id: Option<i64>,
    pub priority: i64,
}

impl Job {
    pub fn job_type(&self) -> JobType {
        self.job_type.parse().unwrap_or(JobType::Minimize)
    }

    pub fn status(&self) -> JobStatus {
        self.status.parse().unwrap_or(JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Created,
    Generating,
    Minimizing,
    Paused,
    Completed,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Created => "created",
            ChannelStatus::Generating => "generating",
            ChannelStatus::Minimizing => "minimizing",
            ChannelStatus::Paused => "paused",
            ChannelStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for ChannelStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ChannelStatus::Created),
            "generating" => Ok(ChannelStatus::Generating),
            "minimizing" => Ok(ChannelStatus::Minimizing),
            "paused" => Ok(ChannelStatus::Paused),
            "completed" => Ok(ChannelStatus::Completed),
            other => Err(format!("unknown channel status: {other}")),
        }
    }
}

/// A minimization objective: find the minimum output entropy of a
/// quantum channel defined by a set of Kraus operators.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Channel {
    pub id: i64,
    pub kraus_id: Option<String>,
    pub best_moe: f64,
    pub best_vector_id: Option<String>,
    pub minimization_attempts: i64,
    pub runs_spawned: i64,
    pub runs_completed: i64,
    pub input_dimension: i64,
    pub output_dimension: i64,
    pub num_kraus: i64,
    pub status: String,
}

impl Channel {
    pub fn status(&self) -> ChannelStatus {
        self.status.parse().unwrap_or(ChannelStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Kraus,
    Vector,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Kraus => "kraus",
            FileKind::Vector => "vector",
        }
    }
}

impl std::str::FromStr for FileKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kraus" => Ok(FileKind::Kraus),
            "vector" => Ok(FileKind::Vector),
            other => Err(format!("unknown file type: {other}")),
        }
    }
}

/// A reassembled artifact produced by a worker.
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub file_type: String,
    pub full_path: String,
}
