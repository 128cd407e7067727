//! Indentation-aware tokenizer.

use super::error::{ScriptError, ScriptResult};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string, escapes already processed.
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPS3: &[&str] = &["**=", "//=", "..."];
const OPS2: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "->",
];
const OPS1: &[&str] = &[
    "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

pub fn tokenize(src: &str) -> ScriptResult<Vec<Token>> {
    let mut lexer = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn run(&mut self) -> ScriptResult<()> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\r' | '\x0c' => self.pos += 1,
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '\n' => {
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(Tok::Newline);
                        }
                        at_line_start = true;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                '#' => {
                    while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                        self.pos += 1;
                    }
                }
                c if c.is_ascii_digit()
                    || (c == '.' && self.peek(1).is_some_and(|n| n.is_ascii_digit())) =>
                {
                    self.number()?
                }
                c if c.is_alphabetic() || c == '_' => self.name_or_prefixed_string()?,
                '\'' | '"' => {
                    let body = self.string(false)?;
                    self.push(Tok::Str(body));
                }
                _ => self.operator()?,
            }
        }

        if !self.last_is_newline() {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Returns false when the line was blank and has been consumed.
    fn handle_indentation(&mut self) -> ScriptResult<bool> {
        let mut width = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek(0) {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                    self.pos += 1;
                }
                return Ok(false);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(ScriptError::syntax(
                    "unindent does not match any outer indentation level",
                    self.line,
                ));
            }
        }
        Ok(true)
    }

    fn number(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        let mut is_float = false;

        if self.peek(0) == Some('0') && matches!(self.peek(1), Some('x') | Some('X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek(0).is_some_and(|c| c.is_ascii_hexdigit() || c == '_') {
                self.pos += 1;
            }
            let digits: String = self.chars[digits_start..self.pos]
                .iter()
                .filter(|c| **c != '_')
                .collect();
            let value = i64::from_str_radix(&digits, 16)
                .map_err(|_| ScriptError::syntax("invalid hex literal", self.line))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float && self.peek(1) != Some('.') {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && (self.peek(1).is_some_and(|n| n.is_ascii_digit())
                    || (matches!(self.peek(1), Some('+') | Some('-'))
                        && self.peek(2).is_some_and(|n| n.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| ScriptError::syntax(format!("invalid number '{}'", text), self.line))?;
            self.push(Tok::Float(value));
        } else {
            match text.parse::<i64>() {
                Ok(value) => self.push(Tok::Int(value)),
                Err(_) => {
                    return Err(ScriptError::syntax(
                        format!("integer literal '{}' is too large", text),
                        self.line,
                    ))
                }
            }
        }
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(0), Some('\'') | Some('"')) {
            let prefix = name.to_ascii_lowercase();
            if matches!(prefix.as_str(), "r" | "f" | "b" | "rb" | "br" | "fr" | "rf") {
                let raw = prefix.contains('r');
                let body = self.string(raw)?;
                if prefix.contains('f') {
                    self.push(Tok::FStr(body));
                } else {
                    self.push(Tok::Str(body));
                }
                return Ok(());
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, raw: bool) -> ScriptResult<String> {
        let quote = self.chars[self.pos];
        let start_line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let c = self.peek(0).ok_or_else(|| {
                ScriptError::syntax("unterminated string literal", start_line)
            })?;

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax(
                        "unterminated string literal",
                        start_line,
                    ));
                }
                self.line += 1;
            }

            if c == '\\' && !raw {
                let next = self.peek(1).ok_or_else(|| {
                    ScriptError::syntax("unterminated string literal", start_line)
                })?;
                self.pos += 2;
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    'x' => out.push(self.hex_escape(2)?),
                    'u' => out.push(self.hex_escape(4)?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            out.push(c);
            self.pos += 1;
        }
    }

    fn hex_escape(&mut self, len: usize) -> ScriptResult<char> {
        let end = self.pos + len;
        if end > self.chars.len() {
            return Err(ScriptError::syntax("truncated escape sequence", self.line));
        }
        let digits: String = self.chars[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ScriptError::syntax("invalid escape sequence", self.line))
    }

    fn operator(&mut self) -> ScriptResult<()> {
        for (len, table) in [(3, OPS3), (2, OPS2), (1, OPS1)] {
            if self.pos + len > self.chars.len() {
                continue;
            }
            let text: String = self.chars[self.pos..self.pos + len].iter().collect();
            if let Some(op) = table.iter().find(|op| **op == text) {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.pos += len;
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        Err(ScriptError::syntax(
            format!("unexpected character '{}'", self.chars[self.pos]),
            self.line,
        ))
    }
}

/// Byte ranges of string literal bodies, quotes excluded, in source order.
///
/// Comments are skipped. An unterminated literal ends at the line break (or
/// the end of the source for triple quotes), so the result is usable on code
/// that does not yet lex.
pub fn string_spans(src: &str) -> Vec<Range<usize>> {
    let bytes = src.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            quote @ (b'\'' | b'"') => {
                let fence = [quote; 3];
                let triple = bytes[i..].starts_with(&fence);
                let width = if triple { 3 } else { 1 };
                let start = i + width;
                let mut j = start;
                let (end, closed) = loop {
                    match bytes.get(j) {
                        None => break (bytes.len(), false),
                        Some(b'\\') => j += 2,
                        Some(b'\n') if !triple => break (j, false),
                        Some(&c) if c == quote && (!triple || bytes[j..].starts_with(&fence)) => {
                            break (j, true)
                        }
                        Some(_) => j += 1,
                    }
                };
                spans.push(start..end);
                i = if closed { end + width } else { end };
            }
            _ => i += 1,
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn simple_assignment() {
        assert_eq!(
            kinds("result = 2 + 2"),
            vec![
                Tok::Name("result".into()),
                Tok::Op("="),
                Tok::Int(2),
                Tok::Op("+"),
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let toks = kinds("if x:\n    y = 1\n\n    # note\nz = 2\n");
        assert!(toks.contains(&Tok::Indent));
        assert!(toks.contains(&Tok::Dedent));
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 3);
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [\n  1,\n  2,\n]\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn string_prefixes_and_escapes() {
        assert_eq!(kinds("'a\\tb'")[0], Tok::Str("a\tb".into()));
        assert_eq!(kinds("r'a\\tb'")[0], Tok::Str("a\\tb".into()));
        assert_eq!(kinds("f'{x}'")[0], Tok::FStr("{x}".into()));
        assert_eq!(kinds("\"\"\"two\nlines\"\"\"")[0], Tok::Str("two\nlines".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1_000")[0], Tok::Int(1000));
        assert_eq!(kinds("2.5e3")[0], Tok::Float(2500.0));
        assert_eq!(kinds("0x1F")[0], Tok::Int(31));
    }

    #[test]
    fn unterminated_string_is_syntax_error() {
        assert!(matches!(
            tokenize("x = 'abc\n"),
            Err(ScriptError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn bad_dedent_is_syntax_error() {
        assert!(tokenize("if x:\n        a = 1\n    b = 2\n").is_err());
    }

    #[test]
    fn string_spans_cover_only_literal_bodies() {
        let src = "t = 1700000000 # call 'later'\nname = 'dana@dock.io'\nnote = \"\"\"a\nb\"\"\"\nesc = 'it\\'s'";
        let bodies: Vec<&str> = string_spans(src).into_iter().map(|r| &src[r]).collect();
        assert_eq!(bodies, vec!["dana@dock.io", "a\nb", "it\\'s"]);
    }

    #[test]
    fn unterminated_literal_stops_at_line_end() {
        let src = "x = 'open\ny = 2";
        let spans = string_spans(src);
        assert_eq!(spans, vec![5..9]);
    }
}
