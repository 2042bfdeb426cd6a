// Exclusive bounds for prefix range scans over the `path` column.
// SQLite compares TEXT with memcmp over UTF-8, which orders strings by code
// point, so the bounds below are computed on chars, never on bytes.

fn next_char(c: char) -> Option<char> {
    match c as u32 {
        // skip the surrogate gap
        0xD7FF => Some('\u{E000}'),
        v => char::from_u32(v + 1),
    }
}

fn prev_char(c: char) -> Option<char> {
    match c as u32 {
        0 => None,
        0xE000 => Some('\u{D7FF}'),
        v => char::from_u32(v - 1),
    }
}

/// Return the first string greater than but not starting with `prefix`.
///
/// `strnextling("hello") == Some("hellp")`. The empty prefix is approximated
/// with the maximal code point. A trailing `char::MAX` cannot be incremented,
/// so it is dropped and the previous char is incremented instead. `None`
/// means there is no finite upper bound (the prefix is all `char::MAX`).
pub fn strnextling(prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return Some(char::MAX.to_string());
    }

    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = next_char(last) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Return an approximation of the last string less than but not starting
/// with `prefix`. `strprevling("hello") == "helln\u{10FFFF}"`.
/// There is no prevling for the empty string, it is returned unchanged.
pub fn strprevling(prefix: &str) -> String {
    let mut chars = prefix.chars();
    let Some(last) = chars.next_back() else {
        return String::new();
    };

    let mut result: String = chars.collect();
    if let Some(prev) = prev_char(last) {
        result.push(prev);
        result.push(char::MAX);
    }
    result
}
