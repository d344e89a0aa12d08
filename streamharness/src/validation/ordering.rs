//! Timestamp ordering for records that may lack a timestamp.

use std::cmp::Ordering;

/// Orders two optional timestamps.
///
/// Present timestamps compare numerically and sort before absent ones.
/// Two absent timestamps compare equal.
#[must_use]
pub fn compare_timestamps(a: Option<i64>, b: Option<i64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Returns true if the timestamps never go backwards.
pub fn is_time_ordered<I>(timestamps: I) -> bool
where
    I: IntoIterator<Item = Option<i64>>,
{
    let mut iter = timestamps.into_iter();
    let Some(mut prev) = iter.next() else {
        return true;
    };
    for ts in iter {
        if compare_timestamps(prev, ts) == Ordering::Greater {
            return false;
        }
        prev = ts;
    }
    true
}
