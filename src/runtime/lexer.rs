//! Tokenizer for the traced language.
//!
//! Produces a flat token stream with explicit `Newline`, `Indent` and
//! `Dedent` tokens. Newlines inside brackets are ignored, as are blank and
//! comment-only lines.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes processed; braces are left intact
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Name(n) => write!(f, "'{}'", n),
            Tok::Int(i) => write!(f, "'{}'", i),
            Tok::Float(x) => write!(f, "'{}'", x),
            Tok::Str(_) | Tok::FStr(_) => f.write_str("string literal"),
            Tok::Op(op) => write!(f, "'{}'", op),
            Tok::Newline => f.write_str("end of line"),
            Tok::Indent => f.write_str("indent"),
            Tok::Dedent => f.write_str("dedent"),
            Tok::Eof => f.write_str("end of input"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

/// Longest operators first so that `**=` wins over `**` and `*`.
const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "<<", ">>", "+=", "-=", "*=",
    "/=", "%=", "&=", "|=", "^=", "->", ":=", "+", "-", "*", "/", "%", "<", ">", "=", "(", ")",
    "[", "]", "{", "}", ",", ":", ".", ";", "@", "&", "|", "^", "~",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok, line: u32) {
        self.tokens.push(Token { tok, line });
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\\' if self.peek_at(1) == Some('\r') && self.peek_at(2) == Some('\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek_at(1).map_or(false, |d| d.is_ascii_digit()) => self.number()?,
                '"' | '\'' => self.string(false, false)?,
                c if c.is_alphabetic() || c == '_' => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }

        if self.depth > 0 {
            return Err(SyntaxError::new(self.line, "unexpected end of input inside brackets"));
        }
        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent, self.line);
        }
        self.push(Tok::Eof, self.line);
        Ok(self.tokens)
    }

    fn push_newline(&mut self) {
        let needs = !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        );
        if needs {
            self.push(Tok::Newline, self.line);
        }
    }

    /// Measure leading whitespace. Returns true when the line is blank or a
    /// comment and has been consumed entirely.
    fn handle_indentation(&mut self) -> Result<bool, SyntaxError> {
        let mut width = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('\r') if self.peek_at(1) == Some('\n') => {
                self.pos += 2;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent, self.line);
        } else if width < current {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent, self.line);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(SyntaxError::new(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        let start = self.pos;

        if self.peek() == Some('0') {
            let radix = match self.peek_at(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                let digits: String = digits.chars().filter(|c| *c != '_').collect();
                let value = i64::from_str_radix(&digits, radix)
                    .map_err(|_| SyntaxError::new(line, "invalid integer literal"))?;
                self.push(Tok::Int(value), line);
                return Ok(());
            }
        }

        let mut is_float = false;
        self.take_while(|c| c.is_ascii_digit() || c == '_');
        if self.peek() == Some('.') {
            is_float = true;
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit() || c == '_');
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let sign_offset = usize::from(matches!(self.peek_at(1), Some('+') | Some('-')));
            if self
                .peek_at(1 + sign_offset)
                .map_or(false, |c| c.is_ascii_digit())
            {
                is_float = true;
                self.pos += 1 + sign_offset;
                self.take_while(|c| c.is_ascii_digit());
            }
        }
        if matches!(self.peek(), Some('j') | Some('J')) {
            return Err(SyntaxError::new(line, "complex numbers are not supported"));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value = text
                .parse::<f64>()
                .map_err(|_| SyntaxError::new(line, "invalid float literal"))?;
            self.push(Tok::Float(value), line);
        } else {
            let value = text
                .parse::<i64>()
                .map_err(|_| SyntaxError::new(line, "integer literal is too large"))?;
            self.push(Tok::Int(value), line);
        }
        Ok(())
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().map_or(false, &pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        let name = self.take_while(|c| c.is_alphanumeric() || c == '_');

        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = name.to_ascii_lowercase();
            match lower.as_str() {
                "r" => return self.string(true, false),
                "f" => return self.string(false, true),
                "rf" | "fr" => return self.string(true, true),
                "b" | "rb" | "br" => {
                    return Err(SyntaxError::new(line, "bytes literals are not supported"))
                }
                "u" => return self.string(false, false),
                _ => {}
            }
        }

        self.push(Tok::Name(name), line);
        Ok(())
    }

    fn string(&mut self, raw: bool, formatted: bool) -> Result<(), SyntaxError> {
        let line = self.line;
        let quote = self.peek().unwrap_or('"');
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(SyntaxError::new(line, "unterminated string literal"));
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(SyntaxError::new(line, "unterminated string literal"));
                }
                self.line += 1;
            }

            if c == '\\' && !raw {
                self.pos += 1;
                let Some(esc) = self.peek() else {
                    return Err(SyntaxError::new(line, "unterminated string literal"));
                };
                self.pos += 1;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    'a' => out.push('\x07'),
                    'b' => out.push('\x08'),
                    'f' => out.push('\x0c'),
                    'v' => out.push('\x0b'),
                    '\n' => self.line += 1,
                    'x' => out.push(self.hex_escape(2, line)?),
                    'u' => out.push(self.hex_escape(4, line)?),
                    'U' => out.push(self.hex_escape(8, line)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            if c == '\\' && raw {
                // Raw strings keep the backslash but it still protects a quote.
                out.push(c);
                self.pos += 1;
                if let Some(next) = self.peek() {
                    out.push(next);
                    self.pos += 1;
                    if next == '\n' {
                        self.line += 1;
                    }
                }
                continue;
            }

            out.push(c);
            self.pos += 1;
        }

        let tok = if formatted { Tok::FStr(out) } else { Tok::Str(out) };
        self.push(tok, line);
        Ok(())
    }

    fn hex_escape(&mut self, len: usize, line: u32) -> Result<char, SyntaxError> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(SyntaxError::new(line, "truncated escape sequence"));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| SyntaxError::new(line, "invalid escape sequence"))
    }

    fn operator(&mut self) -> Result<(), SyntaxError> {
        let line = self.line;
        for op in OPERATORS {
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c));
            if matches {
                self.pos += op.chars().count();
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => {
                        if self.depth == 0 {
                            return Err(SyntaxError::new(line, format!("unmatched '{}'", op)));
                        }
                        self.depth -= 1;
                    }
                    _ => {}
                }
                self.push(Tok::Op(op), line);
                return Ok(());
            }
        }
        let c = self.peek().unwrap_or(' ');
        Err(SyntaxError::new(line, format!("invalid character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn indentation_produces_block_tokens() {
        let toks = kinds("if x:\n    y = 1\nz = 2\n");
        assert_eq!(
            toks,
            vec![
                Tok::Name("if".into()),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Op("="),
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [1,\n     2]\n");
        assert!(!toks[..toks.len() - 2].contains(&Tok::Newline));
        let lines: Vec<u32> = tokenize("x = [1,\n 2]\ny = 3").unwrap().iter().map(|t| t.line).collect();
        assert_eq!(lines.last(), Some(&3));
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        let toks = kinds("x = 1\n\n   # note\ny = 2  # trailing\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 2);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn numbers_and_strings() {
        let toks = kinds("0x1F 1_000 2.5 1e3 'a\\n' r'\\d' f'{x}'");
        assert_eq!(toks[0], Tok::Int(31));
        assert_eq!(toks[1], Tok::Int(1000));
        assert_eq!(toks[2], Tok::Float(2.5));
        assert_eq!(toks[3], Tok::Float(1000.0));
        assert_eq!(toks[4], Tok::Str("a\n".into()));
        assert_eq!(toks[5], Tok::Str("\\d".into()));
        assert_eq!(toks[6], Tok::FStr("{x}".into()));
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let tokens = tokenize("s = \"\"\"a\nb\"\"\"\nt = 1").unwrap();
        assert_eq!(tokens[2].tok, Tok::Str("a\nb".into()));
        let t_line = tokens.iter().find(|t| t.tok == Tok::Name("t".into())).unwrap().line;
        assert_eq!(t_line, 3);
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(tokenize("x = 'abc").is_err());
        assert!(tokenize("x = (1, 2").is_err());
    }
}
