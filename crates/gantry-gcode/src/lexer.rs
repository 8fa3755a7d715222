use crate::{
    config::ParserConfig,
    expr::{self, ExprError},
    params::Parameters,
    status::Status,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "value")]
pub enum TokenKind {
    /// A letter and its evaluated value.
    Word { letter: char, value: f64 },
    /// `#index=value`, applied when the line commits.
    Assign { index: f64, value: f64 },
    Comment(Comment),
    /// A character that cannot start a word. Extensions may claim it.
    Other(char),
    Newline,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Comment {
    pub text: String,
    /// `(MSG,...)` comments are echoed to the operator.
    pub message: bool,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LexError {
    #[error("bad number format at line {line}, column {column}")]
    BadNumber {
        line: usize,
        column: usize,
        #[source]
        source: ExprError,
    },

    #[error("line {line} is longer than {limit} bytes")]
    Overflow { line: usize, limit: usize },

    #[error("malformed parameter assignment at line {line}, column {column}")]
    InvalidAssignment { line: usize, column: usize },
}

impl LexError {
    pub fn status(&self) -> Status {
        match self {
            LexError::BadNumber { .. } => Status::BadNumberFormat,
            LexError::Overflow { .. } => Status::Overflow,
            LexError::InvalidAssignment { .. } => Status::InvalidStatement,
        }
    }
}

impl From<LexError> for Status {
    fn from(err: LexError) -> Self {
        err.status()
    }
}

pub fn lex<'a>(
    input: &'a str,
    config: &'a ParserConfig,
    params: &'a dyn Parameters,
) -> Lexer<'a> {
    Lexer::new(input, config, params)
}

/// Character source shared by the tokenizer and the expression evaluator.
///
/// Spaces, tabs and comments are invisible through [`Cursor::peek`] and
/// [`Cursor::bump`], even in the middle of a number. Comments skipped this
/// way are queued for the tokenizer to report. Neither method ever crosses
/// a line break.
#[derive(Debug, Clone)]
pub(crate) struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    line_start: usize,
    comments: Vec<(usize, Comment)>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            line_start: 0,
            comments: Vec::new(),
        }
    }

    fn raw(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(b) = self.raw() {
            match b {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'(' | b';' => {
                    let column = self.column();
                    let comment = self.read_comment(b);
                    self.comments.push((column, comment));
                }
                _ => break,
            }
        }
    }

    fn read_comment(&mut self, open: u8) -> Comment {
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.raw() {
            if b == b'\n' {
                break;
            }
            if open == b'(' && b == b')' {
                let text = &self.src[start..self.pos];
                self.pos += 1;
                return Comment::new(text);
            }
            self.pos += 1;
        }
        // an unclosed `(` runs to the end of the line
        Comment::new(&self.src[start..self.pos])
    }

    /// Next significant character, upper-cased. `None` at a line break.
    pub(crate) fn peek(&mut self) -> Option<char> {
        self.skip_trivia();
        match self.raw()? {
            b'\n' => None,
            b => Some((b as char).to_ascii_uppercase()),
        }
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.advance_char();
        Some(ch)
    }

    fn advance_char(&mut self) {
        let len = self.src[self.pos..]
            .chars()
            .next()
            .map(char::len_utf8)
            .unwrap_or(1);
        self.pos += len;
    }

    fn column(&self) -> usize {
        self.pos - self.line_start + 1
    }

    /// Length of the current line, without its terminator.
    fn line_len(&self) -> usize {
        let rest = &self.src[self.line_start..];
        let line = rest.split('\n').next().unwrap_or(rest);
        line.strip_suffix('\r').unwrap_or(line).len()
    }

    fn discard_line(&mut self) {
        self.pos = self.line_start + self.line_len();
        self.comments.clear();
    }
}

impl Comment {
    fn new(text: &str) -> Self {
        let is_message = text
            .get(..4)
            .is_some_and(|head| head.eq_ignore_ascii_case("MSG,"));
        if is_message {
            Self {
                text: text[4..].to_string(),
                message: true,
            }
        } else {
            Self {
                text: text.to_string(),
                message: false,
            }
        }
    }
}

/// Lazy tokenizer over one or more lines.
///
/// After an error the rest of the offending line is discarded and the next
/// token is that line's [`TokenKind::Newline`].
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    config: &'a ParserConfig,
    params: &'a dyn Parameters,
    checked_line: Option<usize>,
    pending: std::collections::VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, config: &'a ParserConfig, params: &'a dyn Parameters) -> Self {
        Self {
            cursor: Cursor::new(input),
            config,
            params,
            checked_line: None,
            pending: Default::default(),
        }
    }

    fn pos(&self) -> (usize, usize) {
        (self.cursor.line, self.cursor.column())
    }

    fn queue_comments(&mut self) {
        let line = self.cursor.line;
        for (column, comment) in self.cursor.comments.drain(..) {
            self.pending.push_back(Token {
                kind: TokenKind::Comment(comment),
                line,
                column,
            });
        }
    }

    fn fail(&mut self, err: LexError) -> Option<Result<Token, LexError>> {
        self.cursor.discard_line();
        self.pending.clear();
        Some(Err(err))
    }

    fn value(&mut self) -> Result<f64, LexError> {
        let (line, column) = self.pos();
        expr::value(&mut self.cursor, self.config, self.params).map_err(|source| {
            LexError::BadNumber {
                line,
                column,
                source,
            }
        })
    }

    fn word(&mut self, letter: char) -> Result<TokenKind, LexError> {
        let value = self.value()?;
        Ok(TokenKind::Word { letter, value })
    }

    fn assignment(&mut self) -> Result<TokenKind, LexError> {
        let (line, column) = self.pos();
        let index = self
            .value()
            .map_err(|_| LexError::InvalidAssignment { line, column })?;
        if self.cursor.bump() != Some('=') {
            return Err(LexError::InvalidAssignment { line, column });
        }
        let value = self.value()?;
        Ok(TokenKind::Assign { index, value })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(token) = self.pending.pop_front() {
            return Some(Ok(token));
        }

        if self.checked_line != Some(self.cursor.line) {
            self.checked_line = Some(self.cursor.line);
            if self.cursor.line_len() > self.config.line_buffer {
                let line = self.cursor.line;
                return self.fail(LexError::Overflow {
                    line,
                    limit: self.config.line_buffer,
                });
            }
        }

        let peeked = self.cursor.peek();
        if !self.cursor.comments.is_empty() {
            self.queue_comments();
            return self.pending.pop_front().map(Ok);
        }

        let (line, column) = self.pos();
        let Some(ch) = peeked else {
            if self.cursor.raw().is_none() {
                return None;
            }
            // line break
            self.cursor.pos += 1;
            self.cursor.line += 1;
            self.cursor.line_start = self.cursor.pos;
            return Some(Ok(Token {
                kind: TokenKind::Newline,
                line,
                column,
            }));
        };

        self.cursor.advance_char();
        let kind = match ch {
            'A'..='Z' => self.word(ch),
            '#' => self.assignment(),
            other => Ok(TokenKind::Other(other)),
        };

        match kind {
            Ok(kind) => {
                let token = Token { kind, line, column };
                if self.cursor.comments.is_empty() {
                    return Some(Ok(token));
                }
                self.pending.push_back(token);
                self.queue_comments();
                self.pending.pop_front().map(Ok)
            }
            Err(err) => self.fail(err),
        }
    }
}
