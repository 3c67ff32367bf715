pub mod prelude;

pub mod crawl_jobs;
pub mod rate_limit_windows;
pub mod search_cache;
pub mod search_inflight;
