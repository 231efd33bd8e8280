use crate::timeline::YearLabel;

/// Sorts labels `N` first, then by increasing distance, dropping duplicates.
pub fn sort_year_labels(labels: &mut Vec<YearLabel>) {
    labels.sort();
    labels.dedup();
}

/// Pairs of adjacent labels in timeline order: `(N, N-1)`, `(N-1, N-2)`, …
pub fn adjacent_pairs(labels: &[YearLabel]) -> Vec<(YearLabel, YearLabel)> {
    labels.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Formats the fiscal years covered by a profile: `"2023"` or `"2021-2023"`.
pub fn fiscal_year_range(years: &[i32]) -> Option<String> {
    let min = years.iter().min()?;
    let max = years.iter().max()?;
    if min == max {
        Some(min.to_string())
    } else {
        Some(format!("{}-{}", min, max))
    }
}

/// Keeps the last `limit` entries of a log buffer.
pub fn truncate_front<T>(entries: &mut Vec<T>, limit: usize) {
    if entries.len() > limit {
        let excess = entries.len() - limit;
        entries.drain(..excess);
    }
}
