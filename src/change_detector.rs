/// Decide whether a file needs (re)extraction.
///
/// Modification time is the sole change signal: a file is skipped only when a
/// prior record exists and its stored mtime equals the current one exactly.
/// Content is never hashed, so touching a file re-extracts it.
pub fn needs_processing(last_known: Option<i64>, current: i64) -> bool {
    last_known != Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_file_needs_processing() {
        assert!(needs_processing(None, 1_700_000_000));
    }

    #[test]
    fn unchanged_mtime_is_skipped() {
        assert!(!needs_processing(Some(1_700_000_000), 1_700_000_000));
    }

    #[test]
    fn any_mtime_difference_triggers_reprocessing() {
        assert!(needs_processing(Some(1_700_000_000), 1_700_000_001));
        assert!(needs_processing(Some(1_700_000_001), 1_700_000_000));
    }
}
