/// Default number of records buffered by the insert queue before it flushes.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Default upper bound on pages followed from one paginated upstream.
pub const DEFAULT_PAGE_CAP: u32 = 500;

/// Default per-request timeout for upstream HTTP calls.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Number of best PBs averaged into a profile rating.
pub const PROFILE_RATING_DEPTH: usize = 20;

/// Message reported for converter failures whose detail must not leak.
pub const INTERNAL_FAILURE_MESSAGE: &str = "An internal error has occured.";

/// Message reported for failures outside the converter failure taxonomy.
pub const INTERNAL_SERVICE_MESSAGE: &str = "An internal service error has occured.";

/// Prefix of every score identifier.
pub const SCORE_ID_PREFIX: &str = "R";

/// Prefix of every orphan identifier.
pub const ORPHAN_ID_PREFIX: &str = "O";

pub const BATCH_MANUAL_SERVICE_SUFFIX: &str = " (BATCH-MANUAL)";
pub const DIRECT_MANUAL_SERVICE_SUFFIX: &str = " (DIRECT-MANUAL)";
