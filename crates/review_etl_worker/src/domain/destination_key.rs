/// Leading key segment marking raw staging uploads
pub const RAW_PREFIX: &str = "raw/";

/// Leading key segment of processed outputs
pub const CLEAN_PREFIX: &str = "clean/";

/// Remove the leading `raw/` staging segment, if present.
///
/// Repeated leading segments (`raw/raw/a.txt`) are all removed so that
/// stripping an already stripped key is a no-op.
pub fn strip_raw_prefix(key: &str) -> &str {
    key.trim_start_matches(RAW_PREFIX)
}

/// Destination key for a source key: `clean/` + the key without its `raw/` prefix.
///
/// A pure function of the source key, so reprocessing always overwrites the
/// same object.
pub fn destination_key(source_key: &str) -> String {
    format!("{CLEAN_PREFIX}{}", strip_raw_prefix(source_key))
}
