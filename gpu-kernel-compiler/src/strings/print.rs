//! Debug printing of strings columns.

use gpu_olap_core::{KernelError, Result, StringColumn};

/// Marker written for null rows.
pub const NULL_MARKER: &str = "<null>";

/// Render rows `[start, end)` joined by `delimiter`.
///
/// `end` of `None` (or past the last row) stops at the last row. Rows longer
/// than `max_width` characters are cut to that many characters.
pub fn format_rows(
    strings: &StringColumn,
    start: usize,
    end: Option<usize>,
    max_width: Option<usize>,
    delimiter: &str,
) -> Result<String> {
    if start > strings.size() {
        return Err(KernelError::InvalidArgument(format!(
            "print: start {} past {} rows",
            start,
            strings.size()
        )));
    }
    let end = end.map_or(strings.size(), |e| e.min(strings.size())).max(start);

    let mut out = String::new();
    for row in start..end {
        match strings.get_str(row) {
            Some(s) => match max_width {
                Some(width) => out.extend(s.chars().take(width)),
                None => out.push_str(s),
            },
            None => out.push_str(NULL_MARKER),
        }
        out.push_str(delimiter);
    }
    Ok(out)
}

/// Write rows `[start, end)` to standard output.
pub fn print(
    strings: &StringColumn,
    start: usize,
    end: Option<usize>,
    max_width: Option<usize>,
    delimiter: &str,
) -> Result<()> {
    let text = format_rows(strings, start, end, max_width, delimiter)?;
    print!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_memory_manager::default_resource;

    fn col() -> StringColumn {
        StringColumn::from_options(&[Some("hello"), None, Some("héllo wörld"), Some("")], &default_resource())
            .unwrap()
    }

    #[test]
    fn formats_all_rows() {
        let text = format_rows(&col(), 0, None, None, "\n").unwrap();
        assert_eq!(text, "hello\n<null>\nhéllo wörld\n\n");
    }

    #[test]
    fn truncates_by_character() {
        let text = format_rows(&col(), 2, Some(3), Some(2), "|").unwrap();
        assert_eq!(text, "hé|");
    }

    #[test]
    fn range_is_clamped() {
        assert_eq!(format_rows(&col(), 4, None, None, ",").unwrap(), "");
        assert_eq!(format_rows(&col(), 1, Some(99), Some(0), ",").unwrap(), "<null>,,,");
        assert!(format_rows(&col(), 5, None, None, ",").is_err());
    }
}
