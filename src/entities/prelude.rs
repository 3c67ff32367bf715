pub use super::crawl_jobs::Entity as CrawlJobs;
pub use super::rate_limit_windows::Entity as RateLimitWindows;
pub use super::search_cache::Entity as SearchCache;
pub use super::search_inflight::Entity as SearchInflight;
