pub mod headers {
    pub const API_KEY: &str = "x-api-key";

    pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";

    pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

    pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

    pub const PROCESS_TIME: &str = "x-process-time";
}

pub mod jobs {
    pub const MIN_PRIORITY: i32 = 0;

    pub const MAX_PRIORITY: i32 = 10;

    pub const DEFAULT_RECRAWL_PRIORITY: i32 = 10;

    pub const DEFAULT_CRAWL_PRIORITY: i32 = 0;

    pub const MAX_URL_LENGTH: usize = 2048;
}

pub mod search {
    pub const DEFAULT_PAGE_SIZE: u32 = 10;

    pub const SNIPPET_FALLBACK_CHARS: usize = 200;

    pub const HIGHLIGHT_SEPARATOR: &str = " ... ";

    /// Fingerprints longer than this are replaced by a digest.
    pub const MAX_FINGERPRINT_LEN: usize = 160;
}

pub mod identity {
    pub const ANONYMOUS: &str = "anonymous";
}
