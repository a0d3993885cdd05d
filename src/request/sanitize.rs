//! Scalar sanitisation for single-value query/body reads.

/// Trim, strip tags, then entity-escape `& < > " '`.
pub fn sanitize(input: &str) -> String {
    escape_html(&strip_tags(input.trim()))
}

/// Drop everything between `<` and the next `>`.
///
/// A `<` followed by whitespace (or at end of input) is literal text, and an
/// unterminated tag swallows the rest of the input.
pub fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_tag = false;
    while let Some(c) = chars.next() {
        if in_tag {
            if c == '>' {
                in_tag = false;
            }
            continue;
        }
        if c == '<' {
            match chars.peek() {
                Some(next) if !next.is_whitespace() => in_tag = true,
                _ => out.push(c),
            }
            continue;
        }
        out.push(c);
    }
    out
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_pipeline() {
        assert_eq!(sanitize("  <b>bold</b> & \"q\" "), "bold &amp; &quot;q&quot;");
        assert_eq!(sanitize("<script>alert('x')</script>"), "alert(&#039;x&#039;)");
    }

    #[test]
    fn test_strip_tags_edges() {
        assert_eq!(strip_tags("1 < 2"), "1 < 2");
        assert_eq!(strip_tags("a<br/>b"), "ab");
        assert_eq!(strip_tags("tail <unterminated"), "tail ");
        assert_eq!(strip_tags("x<"), "x<");
    }

    #[test]
    fn test_escape_only() {
        assert_eq!(escape_html("<>&'\""), "&lt;&gt;&amp;&#039;&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }
}
