//! Low-level scanning helpers shared by the directive driver in
//! [`super`]: comment stripping and identifier-boundary splitting.
//! Strings and character literals are treated as opaque runs so that `//`,
//! `/* */`, `"`, and `'` inside them are never misread as the start of a
//! comment or a new token (spec.md §4.D).

/// Replaces every `//` line comment and `/* */` block comment in `src`
/// with spaces, preserving every newline so line numbers stay aligned
/// with the original file.
pub fn strip_comments(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;
    let mut in_string: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(quote) = in_string {
            out.push(b as char);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1] as char);
                i += 2;
                continue;
            }
            if b == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }

        match (b, bytes.get(i + 1).copied()) {
            (b'"', _) | (b'\'', _) => {
                in_string = Some(b);
                out.push(b as char);
                i += 1;
            }
            (b'/', Some(b'/')) => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out.push(' ');
                    i += 1;
                }
            }
            (b'/', Some(b'*')) => {
                out.push(' ');
                out.push(' ');
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    out.push(if bytes[i] == b'\n' { '\n' } else { ' ' });
                    i += 1;
                }
                if i < bytes.len() {
                    out.push(' ');
                    out.push(' ');
                    i += 2;
                }
            }
            (other, _) => {
                out.push(other as char);
                i += 1;
            }
        }
    }

    out
}

/// One token produced by [`split_tokens`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Token<'a> {
    /// A maximal run of identifier characters (`[A-Za-z_][A-Za-z0-9_]*`).
    Ident(&'a str),
    /// Any other maximal run of non-identifier, non-whitespace characters.
    Other(&'a str),
}

impl<'a> Token<'a> {
    pub fn text(self) -> &'a str {
        match self {
            Token::Ident(s) | Token::Other(s) => s,
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits `line` into identifier and non-identifier runs, skipping
/// whitespace between them.
pub fn split_tokens(line: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if is_ident_start(c) {
            let mut end = start + c.len_utf8();
            chars.next();
            while let Some(&(i, c2)) = chars.peek() {
                if is_ident_continue(c2) {
                    end = i + c2.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(&line[start..end]));
        } else {
            let mut end = start + c.len_utf8();
            chars.next();
            while let Some(&(i, c2)) = chars.peek() {
                if c2.is_whitespace() || is_ident_start(c2) {
                    break;
                }
                end = i + c2.len_utf8();
                chars.next();
            }
            tokens.push(Token::Other(&line[start..end]));
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_comment_but_keeps_newline() {
        let cleaned = strip_comments("int a; // hello\nint b;");
        assert_eq!(cleaned.lines().count(), 2);
        assert!(!cleaned.contains("hello"));
    }

    #[test]
    fn strips_block_comment_spanning_lines() {
        let cleaned = strip_comments("a /* one\ntwo */ b");
        assert_eq!(cleaned.lines().count(), 2);
        assert!(!cleaned.contains("one"));
    }

    #[test]
    fn comment_markers_inside_strings_are_preserved() {
        let cleaned = strip_comments(r#"const char* s = "// not a comment";"#);
        assert!(cleaned.contains("// not a comment"));
    }

    #[test]
    fn split_tokens_separates_idents_and_punctuation() {
        let tokens = split_tokens("foo(bar, 1)");
        assert_eq!(
            tokens,
            vec![
                Token::Ident("foo"),
                Token::Other("("),
                Token::Ident("bar"),
                Token::Other(","),
                Token::Other("1"),
                Token::Other(")"),
            ]
        );
    }
}
