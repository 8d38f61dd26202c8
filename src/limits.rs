/// Window used by `match_range` when the caller omits `to`.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Effective match windows are clamped to `[from, from + MAX_WINDOW_DAYS]`.
pub const MAX_WINDOW_DAYS: i64 = 90;

pub const MAX_SPECIFIC_DATES: usize = 366;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_ENTRIES_PER_SITE: usize = 100_000;
