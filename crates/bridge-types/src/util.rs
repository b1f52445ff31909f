//! Small shared helpers.

use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future. Used by the dyn-compatible traits in this
/// workspace instead of `async fn` in traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Find the largest byte index <= `i` that is on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Shorten `s` to at most `max_bytes` for log output, appending `...` when cut.
/// Never splits a UTF-8 codepoint.
pub fn preview(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        s.to_string()
    } else {
        format!("{}...", &s[..floor_char_boundary(s, max_bytes)])
    }
}
