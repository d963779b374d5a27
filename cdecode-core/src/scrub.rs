// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Lexical scrubbing: comment removal.

/// Strip `// …` and `/* … */` comments from C source text.
///
/// String and character literals are treated as opaque, so comment markers
/// inside them survive. Block comments are replaced by a single space with
/// their newlines preserved, keeping line counts stable for diagnostics.
/// This is the only stage that mutates input text.
pub fn strip_comments(src: &str) -> String {
    enum State {
        Code,
        Line,
        Block,
        Str,
        StrEscape,
        Chr,
        ChrEscape,
    }

    let mut out = String::with_capacity(src.len());
    let mut state = State::Code;
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::Line;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push(' ');
                    state = State::Block;
                }
                '"' => {
                    out.push(c);
                    state = State::Str;
                }
                '\'' => {
                    out.push(c);
                    state = State::Chr;
                }
                _ => out.push(c),
            },
            State::Line => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::Block => {
                if c == '\n' {
                    out.push('\n');
                } else if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
            State::Str => {
                out.push(c);
                match c {
                    '\\' => state = State::StrEscape,
                    '"' => state = State::Code,
                    _ => {}
                }
            }
            State::StrEscape => {
                out.push(c);
                state = State::Str;
            }
            State::Chr => {
                out.push(c);
                match c {
                    '\\' => state = State::ChrEscape,
                    '\'' => state = State::Code,
                    _ => {}
                }
            }
            State::ChrEscape => {
                out.push(c);
                state = State::Chr;
            }
        }
    }

    out
}

#[cfg(test)]
mod test {
    use super::strip_comments;

    #[test]
    fn strips_line_comments() {
        let src = "int a; // trailing\nint b;";
        assert_eq!(strip_comments(src), "int a; \nint b;");
    }

    #[test]
    fn strips_block_comments_preserving_newlines() {
        let src = "int a; /* one\ntwo */ int b;";
        assert_eq!(strip_comments(src), "int a;  \n int b;");
    }

    #[test]
    fn leaves_string_literals_alone() {
        let src = "char *s = \"// not a comment\";";
        assert_eq!(strip_comments(src), src);
    }

    #[test]
    fn leaves_char_literals_alone() {
        let src = "char c = '/'; char d = '\\''; int e; // gone";
        assert_eq!(strip_comments(src), "char c = '/'; char d = '\\''; int e; ");
    }
}
