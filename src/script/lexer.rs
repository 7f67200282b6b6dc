//! Tokenizer for the sandboxed script subset.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(&'static str),
    Identifier(String),
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    /// Raw source of a `${...}` substitution plus where it starts.
    Expr { src: String, line: usize, col: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

const KEYWORDS: &[&str] = &[
    "let", "const", "var", "if", "else", "while", "for", "break", "continue", "true", "false",
    "null", "undefined", "typeof", "function", "return", "class", "new", "throw",
];

// Longest first so that greedy matching works.
const PUNCTS: &[&str] = &[
    "===", "!==", "**", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=",
    "%=", "=>", "+", "-", "*", "/", "%", "=", "<", ">", "!", "(", ")", "{", "}", "[", "]", ",",
    ";", ".", ":", "?",
];

pub struct Lexer {
    chars: Vec<char>,
    idx: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(src: &str) -> Self {
        Self::at(src, 1, 1)
    }

    /// Lexer whose positions start at `line:col`, used for template substitutions.
    pub fn at(src: &str, line: usize, col: usize) -> Self {
        Self { chars: src.chars().collect(), idx: 0, line, col }
    }

    pub fn lex(&mut self) -> Result<Vec<Token>, ScriptError> {
        let mut out = Vec::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
                continue;
            }
            if ch == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' { break; }
                    self.bump();
                }
                continue;
            }
            if ch == '/' && self.peek_at(1) == Some('*') {
                self.block_comment()?;
                continue;
            }

            let (line, col) = (self.line, self.col);
            let kind = if ch.is_alphabetic() || ch == '_' || ch == '$' {
                self.lex_word()
            } else if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).map_or(false, |c| c.is_ascii_digit())) {
                self.lex_number()?
            } else if ch == '\'' || ch == '"' {
                self.lex_string(ch)?
            } else if ch == '`' {
                self.lex_template()?
            } else {
                self.lex_punct()?
            };
            out.push(Token { kind, line, col });
        }
        out.push(Token { kind: TokenKind::Eof, line: self.line, col: self.col });
        Ok(out)
    }

    fn block_comment(&mut self) -> Result<(), ScriptError> {
        let (line, col) = (self.line, self.col);
        self.bump();
        self.bump();
        while let Some(ch) = self.peek() {
            if ch == '*' && self.peek_at(1) == Some('/') {
                self.bump();
                self.bump();
                return Ok(());
            }
            self.bump();
        }
        Err(ScriptError::syntax("Unterminated comment", line, col))
    }

    fn lex_word(&mut self) -> TokenKind {
        let mut s = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                s.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        match KEYWORDS.iter().find(|k| **k == s) {
            Some(k) => TokenKind::Keyword(k),
            None => TokenKind::Identifier(s),
        }
    }

    fn lex_number(&mut self) -> Result<TokenKind, ScriptError> {
        let (line, col) = (self.line, self.col);
        let mut s = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' { s.push(ch); }
                self.bump();
            } else if ch == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                s.push(ch);
                self.bump();
            } else if (ch == 'e' || ch == 'E') && !seen_exp {
                seen_exp = true;
                s.push(ch);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    s.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }
        if self.peek().map_or(false, |c| c.is_alphabetic()) {
            return Err(ScriptError::syntax("Invalid or unexpected token", line, col));
        }
        s.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ScriptError::syntax("Invalid or unexpected token", line, col))
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, ScriptError> {
        let (line, col) = (self.line, self.col);
        self.bump();
        let mut s = String::new();
        while let Some(ch) = self.peek() {
            match ch {
                '\n' => break,
                '\\' => {
                    self.bump();
                    if let Some(esc) = self.peek() {
                        s.push(unescape(esc));
                        self.bump();
                    }
                }
                c if c == quote => {
                    self.bump();
                    return Ok(TokenKind::Str(s));
                }
                c => {
                    s.push(c);
                    self.bump();
                }
            }
        }
        Err(ScriptError::syntax("Invalid or unexpected token", line, col))
    }

    fn lex_template(&mut self) -> Result<TokenKind, ScriptError> {
        let (line, col) = (self.line, self.col);
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            match ch {
                '`' => {
                    self.bump();
                    if !text.is_empty() { parts.push(TemplatePart::Text(text)); }
                    return Ok(TokenKind::Template(parts));
                }
                '\\' => {
                    self.bump();
                    if let Some(esc) = self.peek() {
                        text.push(unescape(esc));
                        self.bump();
                    }
                }
                '$' if self.peek_at(1) == Some('{') => {
                    if !text.is_empty() { parts.push(TemplatePart::Text(std::mem::take(&mut text))); }
                    self.bump();
                    self.bump();
                    let (eline, ecol) = (self.line, self.col);
                    let mut depth = 0usize;
                    let mut src = String::new();
                    loop {
                        match self.peek() {
                            None => return Err(ScriptError::syntax("Unterminated template literal", line, col)),
                            Some('}') if depth == 0 => {
                                self.bump();
                                break;
                            }
                            Some(c) => {
                                if c == '{' { depth += 1; }
                                if c == '}' { depth -= 1; }
                                src.push(c);
                                self.bump();
                            }
                        }
                    }
                    parts.push(TemplatePart::Expr { src, line: eline, col: ecol });
                }
                c => {
                    text.push(c);
                    self.bump();
                }
            }
        }
        Err(ScriptError::syntax("Unterminated template literal", line, col))
    }

    fn lex_punct(&mut self) -> Result<TokenKind, ScriptError> {
        let (line, col) = (self.line, self.col);
        for p in PUNCTS {
            if p.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c)) {
                for _ in 0..p.chars().count() { self.bump(); }
                return Ok(TokenKind::Punct(p));
            }
        }
        let ch = self.peek().unwrap_or(' ');
        Err(ScriptError::syntax(format!("Invalid or unexpected token '{ch}'"), line, col))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.idx).copied()
    }

    fn peek_at(&self, off: usize) -> Option<char> {
        self.chars.get(self.idx + off).copied()
    }

    fn bump(&mut self) {
        if let Some(ch) = self.peek() {
            self.idx += 1;
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }
}

fn unescape(esc: char) -> char {
    match esc {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}
