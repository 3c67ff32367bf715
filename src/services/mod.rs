pub mod cache;
pub use cache::{CacheError, CacheStore, MemoryCacheStore, SqlCacheStore};

pub mod job_queue;
pub use job_queue::{JobQueue, QueueEntry};

pub mod job_store;
pub use job_store::{JobStore, JobStoreError, MemoryJobStore, SqlJobStore};

pub mod maintenance;
pub use maintenance::{Maintenance, MaintenanceSettings};

pub mod rate_limiter;
pub use rate_limiter::{MemoryRateLimitStore, RateLimitStore, RateLimiter, SqlRateLimitStore};

pub mod retry;

pub mod scheduler;
pub use scheduler::{Claim, JobScheduler, SchedulerError, SchedulerSettings};

pub mod search;
pub use search::{SearchError, SearchOrchestrator, SearchOutcome, SearchSettings};

pub mod single_flight;

pub mod worker;
pub use worker::{WorkerPool, WorkerSettings};
