//! Review transform.
//!
//! Counts newline-delimited records and reports the count. Splitting follows
//! plain `split('\n')` semantics: a trailing newline yields a final empty
//! record and the empty string is one record.

/// Number of records in `raw_text`.
pub fn count_records(raw_text: &str) -> usize {
    raw_text.split('\n').count()
}

/// Map raw review text to its processed summary. Pure and infallible.
pub fn transform(raw_text: &str) -> String {
    let review_count = count_records(raw_text);
    format!("Total reviews processed: {review_count}. Data validation placeholder complete.")
}
