use std::str::FromStr;

use strum::EnumString;

use crate::value::TypeTag;

/// A single token: kind plus source position. Literal payloads ride inside
/// the kind. `len` is the byte length of the lexeme.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub len: usize,
    pub line: u32,
}

/// Reserved words. The lexer resolves identifiers through strum's `FromStr`;
/// the string form is the lowercase keyword itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum Keyword {
    Let,
    Const,
    Fn,
    If,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    Enum,
    Object,
    Define,
    #[strum(serialize = "self")]
    SelfKw,
    Try,
    Catch,
    Finally,
    Throw,
    Switch,
    Case,
    Default,
    Async,
    Await,
    Import,
    Export,
    From,
    As,
    Extern,
    Defer,
    Ref,
    Null,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Integer literal: raw magnitude plus optional type suffix.
    Int { value: u64, tag: Option<TypeTag> },
    Float { value: f64, tag: Option<TypeTag> },
    Str(String),
    Rune(char),
    Ident(String),
    /// A built-in type name usable in annotations and expressions.
    TypeName(TypeTag),
    Kw(Keyword),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    ShlEq,
    ShrEq,
    EqEq,
    BangEq,
    Lt,
    Gt,
    Le,
    Ge,
    AmpAmp,
    PipePipe,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Question,
    QuestionDot,
    QuestionQuestion,
    Dot,
    Comma,
    Semicolon,
    Colon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    /// Lexical error with a diagnostic message (unterminated string, unknown
    /// escape, malformed number). The parser reports it and synchronizes.
    Error(String),
    Eof,
}

impl TokenKind {
    /// Short human-readable form for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Int { .. } => "integer literal".to_owned(),
            Self::Float { .. } => "float literal".to_owned(),
            Self::Str(_) => "string literal".to_owned(),
            Self::Rune(_) => "rune literal".to_owned(),
            Self::Ident(name) => format!("identifier `{name}`"),
            Self::TypeName(tag) => format!("type name `{}`", tag.name()),
            Self::Kw(kw) => format!("keyword `{kw:?}`").to_lowercase(),
            Self::Error(msg) => format!("invalid token ({msg})"),
            Self::Eof => "end of input".to_owned(),
            other => format!("`{}`", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Eq => "=",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::PercentEq => "%=",
            Self::AmpEq => "&=",
            Self::PipeEq => "|=",
            Self::CaretEq => "^=",
            Self::ShlEq => "<<=",
            Self::ShrEq => ">>=",
            Self::EqEq => "==",
            Self::BangEq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::AmpAmp => "&&",
            Self::PipePipe => "||",
            Self::Bang => "!",
            Self::Amp => "&",
            Self::Pipe => "|",
            Self::Caret => "^",
            Self::Tilde => "~",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Question => "?",
            Self::QuestionDot => "?.",
            Self::QuestionQuestion => "??",
            Self::Dot => ".",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::LBracket => "[",
            Self::RBracket => "]",
            _ => "",
        }
    }
}

/// Pull-based lexer over UTF-8 source.
///
/// The lexer is reentrant and does not allocate a token stream; callers pull
/// tokens one at a time with [`Lexer::next_token`]. After an `Error` token it
/// keeps going from the following byte, so a parser can recover.
#[derive(Debug)]
pub(crate) struct Lexer<'src> {
    src: &'src str,
    pos: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Produces the next token. At end of input returns `Eof` forever.
    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let start = self.pos;
        let line = self.line;
        let kind = self.scan();
        Token {
            kind,
            start,
            len: self.pos - start,
            line,
        }
    }

    fn scan(&mut self) -> TokenKind {
        let Some(c) = self.peek() else {
            return TokenKind::Eof;
        };
        if c.is_ascii_digit() {
            return self.number();
        }
        if c == '_' || c.is_alphabetic() {
            return self.word();
        }
        self.bump();
        match c {
            '"' => self.string_literal(),
            '\'' => self.rune_literal(),
            '+' => self.with_eq(TokenKind::Plus, TokenKind::PlusEq),
            '-' => self.with_eq(TokenKind::Minus, TokenKind::MinusEq),
            '*' => self.with_eq(TokenKind::Star, TokenKind::StarEq),
            '/' => self.with_eq(TokenKind::Slash, TokenKind::SlashEq),
            '%' => self.with_eq(TokenKind::Percent, TokenKind::PercentEq),
            '^' => self.with_eq(TokenKind::Caret, TokenKind::CaretEq),
            '~' => TokenKind::Tilde,
            '=' => self.with_eq(TokenKind::Eq, TokenKind::EqEq),
            '!' => self.with_eq(TokenKind::Bang, TokenKind::BangEq),
            '<' => {
                if self.eat('<') {
                    self.with_eq(TokenKind::Shl, TokenKind::ShlEq)
                } else {
                    self.with_eq(TokenKind::Lt, TokenKind::Le)
                }
            }
            '>' => {
                if self.eat('>') {
                    self.with_eq(TokenKind::Shr, TokenKind::ShrEq)
                } else {
                    self.with_eq(TokenKind::Gt, TokenKind::Ge)
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AmpAmp
                } else {
                    self.with_eq(TokenKind::Amp, TokenKind::AmpEq)
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    self.with_eq(TokenKind::Pipe, TokenKind::PipeEq)
                }
            }
            '?' => {
                if self.eat('.') {
                    TokenKind::QuestionDot
                } else if self.eat('?') {
                    TokenKind::QuestionQuestion
                } else {
                    TokenKind::Question
                }
            }
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            other => TokenKind::Error(format!("unexpected character {other:?}")),
        }
    }

    fn with_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        if self.eat('=') { with_eq } else { plain }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if let Ok(kw) = Keyword::from_str(text) {
            return TokenKind::Kw(kw);
        }
        if let Some(tag) = type_name(text) {
            return TokenKind::TypeName(tag);
        }
        TokenKind::Ident(text.to_owned())
    }

    fn number(&mut self) -> TokenKind {
        let start = self.pos;
        if self.peek() == Some('0')
            && let Some(radix_char) = self.peek2()
            && matches!(radix_char, 'x' | 'o' | 'b')
        {
            self.bump();
            self.bump();
            let radix = match radix_char {
                'x' => 16,
                'o' => 8,
                _ => 2,
            };
            let digits_start = self.pos;
            while let Some(c) = self.peek() {
                if c.is_ascii_alphanumeric() {
                    self.bump();
                } else {
                    break;
                }
            }
            let src = self.src;
            let digits = &src[digits_start..self.pos];
            return match u64::from_str_radix(digits, radix) {
                Ok(value) => {
                    let tag = match self.suffix() {
                        Ok(tag) => tag,
                        Err(msg) => return TokenKind::Error(msg),
                    };
                    if let Some(tag) = tag
                        && tag.is_float()
                    {
                        return TokenKind::Error(format!("float suffix on radix literal `{digits}`"));
                    }
                    TokenKind::Int { value, tag }
                }
                Err(_) => TokenKind::Error(format!("malformed base-{radix} literal `{digits}`")),
            };
        }

        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mark = self.pos;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            } else {
                // Not an exponent after all (e.g. `1errors`); rewind and let
                // the suffix check reject it.
                self.pos = mark;
            }
        }
        let src = self.src;
        let text = &src[start..self.pos];
        let tag = match self.suffix() {
            Ok(tag) => tag,
            Err(msg) => return TokenKind::Error(msg),
        };
        if is_float || tag.is_some_and(TypeTag::is_float) {
            match text.parse::<f64>() {
                Ok(value) => TokenKind::Float { value, tag },
                Err(_) => TokenKind::Error(format!("malformed float literal `{text}`")),
            }
        } else {
            match text.parse::<u64>() {
                Ok(value) => TokenKind::Int { value, tag },
                Err(_) => TokenKind::Error(format!("integer literal `{text}` too large")),
            }
        }
    }

    /// Optional type suffix directly attached to a numeric literal
    /// (`300u8`, `1.5f32`). Any other trailing identifier run is an error.
    fn suffix(&mut self) -> Result<Option<TypeTag>, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        if text.is_empty() {
            return Ok(None);
        }
        match type_name(text) {
            Some(tag) if tag.is_numeric() => Ok(Some(tag)),
            _ => Err(format!("invalid numeric suffix `{text}`")),
        }
    }

    fn string_literal(&mut self) -> TokenKind {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return TokenKind::Str(out),
                Some('\\') => match self.escape() {
                    Ok(c) => out.push(c),
                    Err(msg) => return TokenKind::Error(msg),
                },
                Some(c) => out.push(c),
                None => return TokenKind::Error("unterminated string literal".to_owned()),
            }
        }
    }

    fn rune_literal(&mut self) -> TokenKind {
        let c = match self.bump() {
            Some('\\') => match self.escape() {
                Ok(c) => c,
                Err(msg) => return TokenKind::Error(msg),
            },
            Some('\'') => return TokenKind::Error("empty rune literal".to_owned()),
            Some(c) => c,
            None => return TokenKind::Error("unterminated rune literal".to_owned()),
        };
        if self.eat('\'') {
            TokenKind::Rune(c)
        } else {
            TokenKind::Error("rune literal must contain exactly one codepoint".to_owned())
        }
    }

    fn escape(&mut self) -> Result<char, String> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('\\') => Ok('\\'),
            Some('"') => Ok('"'),
            Some('\'') => Ok('\''),
            Some('0') => Ok('\0'),
            Some('u') => {
                if !self.eat('{') {
                    return Err("expected `{` after \\u".to_owned());
                }
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    self.bump();
                }
                let digits = &self.src[start..self.pos];
                if !self.eat('}') {
                    return Err("unterminated \\u{...} escape".to_owned());
                }
                let code = u32::from_str_radix(digits, 16).map_err(|_| format!("malformed \\u escape `{digits}`"))?;
                char::from_u32(code).ok_or_else(|| format!("\\u{{{digits}}} is not a valid codepoint"))
            }
            Some(other) => Err(format!("unknown escape `\\{other}`")),
            None => Err("unterminated escape".to_owned()),
        }
    }
}

/// Maps a built-in type name to its tag. Only names that are meaningful in
/// annotations and expression position are recognized here; `array` and
/// friends stay ordinary identifiers.
fn type_name(text: &str) -> Option<TypeTag> {
    match text {
        "i8" => Some(TypeTag::I8),
        "i16" => Some(TypeTag::I16),
        "i32" => Some(TypeTag::I32),
        "i64" => Some(TypeTag::I64),
        "u8" => Some(TypeTag::U8),
        "u16" => Some(TypeTag::U16),
        "u32" => Some(TypeTag::U32),
        "u64" => Some(TypeTag::U64),
        "f32" => Some(TypeTag::F32),
        "f64" => Some(TypeTag::F64),
        "bool" => Some(TypeTag::Bool),
        "rune" => Some(TypeTag::Rune),
        "string" => Some(TypeTag::Str),
        "ptr" => Some(TypeTag::Ptr),
        "buffer" => Some(TypeTag::Buffer),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = token.kind == TokenKind::Eof;
            out.push(token.kind);
            if done {
                return out;
            }
        }
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            kinds("let xs = null;"),
            vec![
                TokenKind::Kw(Keyword::Let),
                TokenKind::Ident("xs".to_owned()),
                TokenKind::Eq,
                TokenKind::Kw(Keyword::Null),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(kinds("0xff")[0], TokenKind::Int { value: 255, tag: None });
        assert_eq!(kinds("0o17")[0], TokenKind::Int { value: 15, tag: None });
        assert_eq!(kinds("0b101")[0], TokenKind::Int { value: 5, tag: None });
        assert_eq!(
            kinds("300u8")[0],
            TokenKind::Int {
                value: 300,
                tag: Some(TypeTag::U8)
            }
        );
        assert_eq!(kinds("1.5e2")[0], TokenKind::Float { value: 150.0, tag: None });
        assert_eq!(
            kinds("2f32")[0],
            TokenKind::Float {
                value: 2.0,
                tag: Some(TypeTag::F32)
            }
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("a <<= b ?? c?.d")
                .into_iter()
                .filter(|k| !matches!(k, TokenKind::Ident(_) | TokenKind::Eof))
                .collect::<Vec<_>>(),
            vec![TokenKind::ShlEq, TokenKind::QuestionQuestion, TokenKind::QuestionDot]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(kinds(r#""a\n\u{1F600}b""#)[0], TokenKind::Str("a\n😀b".to_owned()));
        assert!(matches!(kinds(r#""\q""#)[0], TokenKind::Error(_)));
        assert!(matches!(kinds("\"open").last(), Some(TokenKind::Eof)));
        assert!(matches!(kinds("\"open")[0], TokenKind::Error(_)));
    }

    #[test]
    fn rune_literals() {
        assert_eq!(kinds("'x'")[0], TokenKind::Rune('x'));
        assert_eq!(kinds(r"'\n'")[0], TokenKind::Rune('\n'));
        assert!(matches!(kinds("'ab'")[0], TokenKind::Error(_)));
    }

    #[test]
    fn line_tracking_and_comments() {
        let mut lexer = Lexer::new("a // comment\n/* block\nstill */ b");
        let a = lexer.next_token();
        let b = lexer.next_token();
        assert_eq!(a.line, 1);
        assert_eq!(b.line, 3);
    }

    #[test]
    fn type_names() {
        assert_eq!(kinds("i16")[0], TokenKind::TypeName(TypeTag::I16));
        assert_eq!(kinds("string")[0], TokenKind::TypeName(TypeTag::Str));
    }
}
