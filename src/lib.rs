pub mod access;
pub mod config;
pub mod error;
pub mod input;
pub mod progress;
pub mod report;
pub mod runner;
pub mod scanner;
pub mod storage;

pub use crate::access::{build_strategy, AccessOptions, AccessStrategy, BufferingMode};
pub use crate::config::{AppConfig, Backend};
pub use crate::error::Error;
pub use crate::progress::{ProgressReporter, SilentReporter};
pub use crate::report::{ReportRow, StatsReporter};
pub use crate::runner::{run, RunOptions, RunSummary};
pub use crate::scanner::{scan_all, OpenHandles, VisitRecord};
pub use crate::storage::{AllocationSnapshot, CacheParams, Storage};
