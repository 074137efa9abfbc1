/// 1-based line and column of a byte offset.
pub fn position(text: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut column = 1u32;
    for (at, ch) in text.char_indices() {
        if at >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::position;

    #[test]
    fn positions_are_one_based_and_reset_per_line() {
        let text = "ab\ncde\n";
        assert_eq!(position(text, 0), (1, 1));
        assert_eq!(position(text, 1), (1, 2));
        assert_eq!(position(text, 3), (2, 1));
        assert_eq!(position(text, 5), (2, 3));
        assert_eq!(position(text, 7), (3, 1));
    }
}
