//! Container log slicing

use serde::Serialize;

/// A window onto a model's log lines
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSlice {
    pub lines: Vec<String>,
    pub start: usize,
    pub end: usize,
    pub total_lines: usize,
}

/// Python-style slicing `[start, end)` with negative index support
///
/// Out-of-range bounds are clamped; an empty or inverted range yields no lines.
pub fn slice_lines(lines: Vec<String>, start: Option<i64>, end: Option<i64>) -> LogSlice {
    let total_lines = lines.len();

    let resolve = |index: i64| -> usize {
        if index < 0 {
            (total_lines as i64 + index).max(0) as usize
        } else {
            (index as usize).min(total_lines)
        }
    };

    let start_idx = start.map(resolve).unwrap_or(0);
    let end_idx = end.map(resolve).unwrap_or(total_lines);

    let lines = if start_idx < end_idx {
        lines
            .into_iter()
            .skip(start_idx)
            .take(end_idx - start_idx)
            .collect()
    } else {
        Vec::new()
    };

    LogSlice {
        lines,
        start: start_idx,
        end: end_idx,
        total_lines,
    }
}

/// Last `n` lines
pub fn tail(lines: Vec<String>, n: usize) -> LogSlice {
    if n == 0 {
        let total = lines.len();
        return slice_lines(lines, Some(total as i64), None);
    }
    slice_lines(lines, Some(-(n.min(i64::MAX as usize) as i64)), None)
}
