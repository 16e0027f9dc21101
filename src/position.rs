//! Line/column <-> byte offset arithmetic.
//!
//! Only `\n` terminates a line. A `\r` is counted as an ordinary column so
//! positions agree with the line convention used by source map mappings.
//! Columns count UTF-16 code units, as source map v3 columns do; offsets are
//! always byte offsets into the Rust string.

/// Zero-based (line, column) of byte `offset` within `text`.
///
/// Offsets past the end of `text` keep advancing the column one unit per
/// byte.
pub fn offset_to_line_column(text: &str, offset: usize) -> (usize, usize) {
    let mut line = 0;
    let mut column = 0;
    for (index, ch) in text.char_indices() {
        if index >= offset {
            return (line, column);
        }
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += ch.len_utf16();
        }
    }

    (line, column + offset.saturating_sub(text.len()))
}

/// Byte offset of the zero-based `line`/`column` position in `text`.
///
/// Returns `None` when the text ends before the position is reached, or when
/// the column falls inside a character (between the two halves of a
/// surrogate pair). A position exactly at the end of the text is not
/// addressable. A returned offset is always a char boundary.
pub fn line_column_to_offset(text: &str, line: usize, column: usize) -> Option<usize> {
    let mut current_line = 0;
    let mut current_column = 0;

    for (index, ch) in text.char_indices() {
        if current_line == line && current_column == column {
            return Some(index);
        }
        if current_line > line {
            return None;
        }
        if ch == '\n' {
            current_line += 1;
            current_column = 0;
        } else {
            current_column += ch.len_utf16();
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_to_line_column_single_line() {
        assert_eq!(offset_to_line_column("hello", 0), (0, 0));
        assert_eq!(offset_to_line_column("hello", 3), (0, 3));
    }

    #[test]
    fn test_offset_to_line_column_after_newline() {
        let text = "ab\ncd\nef";
        assert_eq!(offset_to_line_column(text, 2), (0, 2));
        assert_eq!(offset_to_line_column(text, 3), (1, 0));
        assert_eq!(offset_to_line_column(text, 7), (2, 1));
    }

    #[test]
    fn test_carriage_return_is_a_column() {
        let text = "ab\r\ncd";
        assert_eq!(offset_to_line_column(text, 3), (0, 3));
        assert_eq!(offset_to_line_column(text, 4), (1, 0));
        assert_eq!(line_column_to_offset(text, 0, 2), Some(2));
        assert_eq!(line_column_to_offset(text, 1, 1), Some(5));
    }

    #[test]
    fn test_line_column_to_offset_roundtrip() {
        let text = "first\nsecond line\nthird";
        for offset in 0..text.len() {
            let (line, column) = offset_to_line_column(text, offset);
            assert_eq!(line_column_to_offset(text, line, column), Some(offset));
        }
    }

    #[test]
    fn test_line_column_to_offset_not_found() {
        let text = "ab\ncd";
        assert_eq!(line_column_to_offset(text, 5, 0), None);
        assert_eq!(line_column_to_offset(text, 0, 7), None);
        // end of text is not addressable
        assert_eq!(line_column_to_offset(text, 1, 2), None);
    }

    #[test]
    fn test_offset_past_end_advances_column() {
        assert_eq!(offset_to_line_column("a\nb", 5), (1, 3));
    }

    #[test]
    fn test_columns_count_utf16_units() {
        // é is two bytes but one UTF-16 unit; 😀 is four bytes and two units
        let text = "var l='é';callMe()\n😀x";
        let call = text.find("callMe").unwrap();
        assert_eq!(offset_to_line_column(text, call), (0, 10));
        assert_eq!(line_column_to_offset(text, 0, 10), Some(call));

        let x = text.find('x').unwrap();
        assert_eq!(offset_to_line_column(text, x), (1, 2));
        assert_eq!(line_column_to_offset(text, 1, 2), Some(x));
    }

    #[test]
    fn test_column_inside_surrogate_pair_is_not_addressable() {
        let text = "😀x";
        assert_eq!(line_column_to_offset(text, 0, 1), None);
        assert_eq!(line_column_to_offset(text, 0, 2), Some(4));
    }

    #[test]
    fn test_non_ascii_roundtrip_on_char_boundaries() {
        let text = "é=1;\nlet ü='ß';go()";
        for (offset, _) in text.char_indices() {
            let (line, column) = offset_to_line_column(text, offset);
            assert_eq!(line_column_to_offset(text, line, column), Some(offset));
        }
    }
}
