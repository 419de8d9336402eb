use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    Int,
    Long,
    Void,
    Inline,
    Extern,
    If,
    Else,
    While,
    Return,
}

impl Keyword {
    fn from_ident(s: &str) -> Option<Keyword> {
        Some(match s {
            "int" => Keyword::Int,
            "long" => Keyword::Long,
            "void" => Keyword::Void,
            "inline" => Keyword::Inline,
            "extern" => Keyword::Extern,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "return" => Keyword::Return,
            _ => return None,
        })
    }

    pub(crate) fn is_type(self) -> bool {
        matches!(self, Keyword::Int | Keyword::Long | Keyword::Void)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Semi,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
}

impl fmt::Display for Punct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::Comma => ",",
            Punct::Semi => ";",
            Punct::Assign => "=",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Star => "*",
            Punct::Slash => "/",
            Punct::Percent => "%",
            Punct::Bang => "!",
            Punct::Lt => "<",
            Punct::Le => "<=",
            Punct::Gt => ">",
            Punct::Ge => ">=",
            Punct::EqEq => "==",
            Punct::Ne => "!=",
        };
        f.write_str(s)
    }
}

/// A preprocessor line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive {
    Define { name: String, body: String },
    Undef { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    Ident(String),
    Int(i64),
    Keyword(Keyword),
    Punct(Punct),
    Directive(Directive),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Int(n) => write!(f, "'{}'", n),
            Token::Keyword(k) => write!(f, "'{}'", format!("{:?}", k).to_lowercase()),
            Token::Punct(p) => write!(f, "'{}'", p),
            Token::Directive(_) => f.write_str("preprocessor directive"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LexError {
    pub offset: usize,
    pub message: String,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Only whitespace seen since the last newline; `#` starts a directive.
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Lexer {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            at_line_start: true,
        }
    }

    /// Tokenize everything. The last token is always `Eof`.
    pub(crate) fn tokenize(mut self) -> Result<Vec<Spanned>, LexError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia()?;
            let offset = self.pos;
            let Some(c) = self.current() else {
                out.push(Spanned {
                    token: Token::Eof,
                    offset,
                });
                return Ok(out);
            };
            let token = if c == b'#' {
                if !self.at_line_start {
                    return Err(self.error(offset, "'#' must start a line"));
                }
                Token::Directive(self.read_directive()?)
            } else if c.is_ascii_digit() {
                self.read_number()?
            } else if c.is_ascii_alphabetic() || c == b'_' {
                let word = self.read_word();
                match Keyword::from_ident(word) {
                    Some(k) => Token::Keyword(k),
                    None => Token::Ident(word.to_string()),
                }
            } else {
                Token::Punct(self.read_punct()?)
            };
            self.at_line_start = false;
            out.push(Spanned { token, offset });
        }
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> LexError {
        LexError {
            offset,
            message: message.into(),
        }
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.current() {
            match c {
                b'\n' => {
                    self.at_line_start = true;
                    self.pos += 1;
                }
                c if c.is_ascii_whitespace() => self.pos += 1,
                b'/' if self.peek(1) == Some(b'/') => {
                    while self.current().is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                }
                b'/' if self.peek(1) == Some(b'*') => {
                    let start = self.pos;
                    self.pos += 2;
                    loop {
                        match self.current() {
                            None => return Err(self.error(start, "unterminated comment")),
                            Some(b'*') if self.peek(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn read_word(&mut self) -> &'a str {
        let start = self.pos;
        while self
            .current()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        while self.current().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.input[start..self.pos];
        // Integer suffixes carry no meaning here, every value is 64 bits.
        while self.current().is_some_and(|c| matches!(c, b'l' | b'L' | b'u' | b'U')) {
            self.pos += 1;
        }
        if self.current().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            return Err(self.error(start, "invalid suffix on integer constant"));
        }
        digits
            .parse::<i64>()
            .map(Token::Int)
            .map_err(|_| self.error(start, "integer constant is too large"))
    }

    fn read_punct(&mut self) -> Result<Punct, LexError> {
        let c = self.current().unwrap_or(0);
        let next = self.peek(1);
        let (punct, len) = match (c, next) {
            (b'=', Some(b'=')) => (Punct::EqEq, 2),
            (b'!', Some(b'=')) => (Punct::Ne, 2),
            (b'<', Some(b'=')) => (Punct::Le, 2),
            (b'>', Some(b'=')) => (Punct::Ge, 2),
            (b'(', _) => (Punct::LParen, 1),
            (b')', _) => (Punct::RParen, 1),
            (b'{', _) => (Punct::LBrace, 1),
            (b'}', _) => (Punct::RBrace, 1),
            (b',', _) => (Punct::Comma, 1),
            (b';', _) => (Punct::Semi, 1),
            (b'=', _) => (Punct::Assign, 1),
            (b'+', _) => (Punct::Plus, 1),
            (b'-', _) => (Punct::Minus, 1),
            (b'*', _) => (Punct::Star, 1),
            (b'/', _) => (Punct::Slash, 1),
            (b'%', _) => (Punct::Percent, 1),
            (b'!', _) => (Punct::Bang, 1),
            (b'<', _) => (Punct::Lt, 1),
            (b'>', _) => (Punct::Gt, 1),
            _ => {
                let ch = self.input[self.pos..].chars().next().unwrap_or('?');
                return Err(self.error(self.pos, format!("unexpected character '{}'", ch)));
            }
        };
        self.pos += len;
        Ok(punct)
    }

    /// `#define NAME body` or `#undef NAME`, up to the end of the line.
    fn read_directive(&mut self) -> Result<Directive, LexError> {
        let start = self.pos;
        self.pos += 1;
        self.skip_blanks();
        let keyword = self.read_word();
        self.skip_blanks();
        let name_at = self.pos;
        let name = self.read_word().to_string();
        if name.is_empty() || name.as_bytes()[0].is_ascii_digit() {
            return Err(self.error(name_at, "macro name must be an identifier"));
        }
        let rest_start = self.pos;
        while self.current().is_some_and(|c| c != b'\n') {
            self.pos += 1;
        }
        let rest = self.input[rest_start..self.pos].trim();
        match keyword {
            "define" => {
                if self.bytes.get(rest_start) == Some(&b'(') {
                    return Err(self.error(rest_start, "function-like macros are not supported"));
                }
                Ok(Directive::Define {
                    name,
                    body: rest.to_string(),
                })
            }
            "undef" if rest.is_empty() => Ok(Directive::Undef { name }),
            "undef" => Err(self.error(rest_start, "extra tokens at end of #undef directive")),
            other => Err(self.error(start, format!("invalid preprocessing directive '#{}'", other))),
        }
    }

    fn skip_blanks(&mut self) {
        while self.current().is_some_and(|c| c == b' ' || c == b'\t') {
            self.pos += 1;
        }
    }
}
