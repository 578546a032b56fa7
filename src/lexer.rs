use std::collections::HashMap;

use num_bigint::BigInt;

use crate::errors::ZexusError;
use crate::token::{Position, Token, TokenKind};

/// Lexer for Zexus source.
///
/// Produces a token stream with positions and original lexemes. Newlines are
/// emitted as layout tokens (they matter only inside colon-blocks); all other
/// whitespace and comments are skipped. Unknown characters fail with a
/// `LexicalError` carrying the offending position.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    keywords: HashMap<String, TokenKind>,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let mut keywords = HashMap::new();
        keywords.insert("let".to_string(), TokenKind::Let);
        keywords.insert("return".to_string(), TokenKind::Return);
        keywords.insert("print".to_string(), TokenKind::Print);
        keywords.insert("for".to_string(), TokenKind::For);
        keywords.insert("each".to_string(), TokenKind::Each);
        keywords.insert("in".to_string(), TokenKind::In);
        keywords.insert("action".to_string(), TokenKind::Action);
        keywords.insert("if".to_string(), TokenKind::If);
        keywords.insert("else".to_string(), TokenKind::Else);
        keywords.insert("while".to_string(), TokenKind::While);
        keywords.insert("try".to_string(), TokenKind::Try);
        keywords.insert("catch".to_string(), TokenKind::Catch);
        keywords.insert("debug".to_string(), TokenKind::Debug);
        keywords.insert("external".to_string(), TokenKind::External);
        keywords.insert("from".to_string(), TokenKind::From);
        keywords.insert("use".to_string(), TokenKind::Use);
        keywords.insert("export".to_string(), TokenKind::Export);
        keywords.insert("exactly".to_string(), TokenKind::Exactly);
        keywords.insert("lambda".to_string(), TokenKind::Lambda);
        keywords.insert("true".to_string(), TokenKind::True);
        keywords.insert("false".to_string(), TokenKind::False);
        keywords.insert("null".to_string(), TokenKind::Null);
        keywords.insert("await".to_string(), TokenKind::Await);
        keywords.insert("event".to_string(), TokenKind::Event);
        keywords.insert("emit".to_string(), TokenKind::Emit);
        keywords.insert("register_event".to_string(), TokenKind::RegisterEvent);
        keywords.insert("enum".to_string(), TokenKind::Enum);
        keywords.insert("protocol".to_string(), TokenKind::Protocol);
        keywords.insert("contract".to_string(), TokenKind::Contract);
        keywords.insert("require".to_string(), TokenKind::Require);
        keywords.insert("persistent".to_string(), TokenKind::Persistent);
        keywords.insert("storage".to_string(), TokenKind::Storage);
        keywords.insert("screen".to_string(), TokenKind::Screen);
        keywords.insert("component".to_string(), TokenKind::Component);
        keywords.insert("theme".to_string(), TokenKind::Theme);

        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            keywords,
            tokens: Vec::new(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ZexusError> {
        while !self.is_at_end() {
            self.skip_blanks();

            if self.is_at_end() {
                break;
            }

            if self.current_char() == '\n' {
                let pos = self.current_position();
                self.advance();
                self.tokens.push(Token::new(TokenKind::Newline, "\n", pos));
                continue;
            }

            if self.current_char() == '/' && self.peek_char() == Some('/') {
                self.skip_line_comment();
                continue;
            }

            if self.current_char() == '/' && self.peek_char() == Some('*') {
                self.skip_block_comment()?;
                continue;
            }

            // `{|` opens an embedded code block; plain `{` is a delimiter.
            if self.current_char() == '{' && self.peek_char() == Some('|') {
                self.handle_embedded_block()?;
                continue;
            }

            if self.current_char() == '"' {
                self.handle_string()?;
                continue;
            }

            if self.current_char().is_ascii_digit() {
                self.handle_number()?;
                continue;
            }

            if is_identifier_start(self.current_char()) {
                self.handle_identifier();
                continue;
            }

            self.handle_operator_or_delimiter()?;
        }

        self.tokens
            .push(Token::new(TokenKind::Eof, "", self.current_position()));
        Ok(std::mem::take(&mut self.tokens))
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current_char(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.input[self.position]
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) -> char {
        let ch = self.current_char();
        self.position += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        ch
    }

    fn current_position(&self) -> Position {
        Position::new(self.line, self.column, self.position)
    }

    fn lexeme_since(&self, start_offset: usize) -> String {
        self.input[start_offset..self.position].iter().collect()
    }

    fn skip_blanks(&mut self) {
        while !self.is_at_end() {
            match self.current_char() {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while !self.is_at_end() && self.current_char() != '\n' {
            self.advance();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), ZexusError> {
        let start = self.current_position();
        self.advance(); // '/'
        self.advance(); // '*'
        while !self.is_at_end() {
            if self.current_char() == '*' && self.peek_char() == Some('/') {
                self.advance();
                self.advance();
                return Ok(());
            }
            self.advance();
        }
        Err(ZexusError::lexical("unterminated block comment", start))
    }

    /// `{| lang\n ... |}` — the first in-block line names the language.
    fn handle_embedded_block(&mut self) -> Result<(), ZexusError> {
        let start = self.current_position();
        let start_offset = self.position;
        self.advance(); // '{'
        self.advance(); // '|'

        let mut raw = String::new();
        loop {
            if self.is_at_end() {
                return Err(ZexusError::lexical("unterminated embedded block", start));
            }
            if self.current_char() == '|' && self.peek_char() == Some('}') {
                self.advance();
                self.advance();
                break;
            }
            raw.push(self.advance());
        }

        let (language, body) = match raw.split_once('\n') {
            Some((tag, rest)) => (tag.trim().to_string(), rest.to_string()),
            None => (raw.trim().to_string(), String::new()),
        };

        let lexeme = self.lexeme_since(start_offset);
        self.tokens.push(Token::new(
            TokenKind::Embedded { language, body },
            lexeme,
            start,
        ));
        Ok(())
    }

    fn handle_string(&mut self) -> Result<(), ZexusError> {
        let start = self.current_position();
        let start_offset = self.position;
        self.advance(); // opening quote

        let mut value = String::new();
        loop {
            if self.is_at_end() {
                return Err(ZexusError::lexical("unterminated string literal", start));
            }
            match self.current_char() {
                '"' => {
                    self.advance();
                    break;
                }
                '\\' => {
                    self.advance();
                    if self.is_at_end() {
                        return Err(ZexusError::lexical("unterminated string literal", start));
                    }
                    match self.current_char() {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '\\' => value.push('\\'),
                        '"' => value.push('"'),
                        'x' => {
                            self.advance();
                            let hi = self.current_char();
                            self.advance();
                            let lo = self.current_char();
                            let byte = hex_pair(hi, lo).ok_or_else(|| {
                                ZexusError::lexical(
                                    format!("invalid \\x escape '\\x{}{}'", hi, lo),
                                    self.current_position(),
                                )
                            })?;
                            value.push(byte as char);
                        }
                        other => {
                            return Err(ZexusError::lexical(
                                format!("unknown escape '\\{}'", other),
                                self.current_position(),
                            ));
                        }
                    }
                    self.advance();
                }
                _ => value.push(self.advance()),
            }
        }

        let lexeme = self.lexeme_since(start_offset);
        self.tokens
            .push(Token::new(TokenKind::Str(value), lexeme, start));
        Ok(())
    }

    fn handle_number(&mut self) -> Result<(), ZexusError> {
        let start = self.current_position();
        let start_offset = self.position;
        let mut is_float = false;

        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            self.advance();
        }

        if self.current_char() == '.' {
            match self.peek_char() {
                Some(next) if next.is_ascii_digit() => {
                    is_float = true;
                    self.advance();
                    while !self.is_at_end() && self.current_char().is_ascii_digit() {
                        self.advance();
                    }
                }
                _ => {
                    return Err(ZexusError::lexical(
                        "numeric literal may not end with '.'",
                        self.current_position(),
                    ));
                }
            }
        }

        let lexeme = self.lexeme_since(start_offset);
        let kind = if is_float {
            let parsed = lexeme.parse::<f64>().map_err(|_| {
                ZexusError::lexical(format!("invalid float literal '{}'", lexeme), start.clone())
            })?;
            TokenKind::Float(parsed)
        } else {
            let parsed = lexeme.parse::<BigInt>().map_err(|_| {
                ZexusError::lexical(
                    format!("invalid integer literal '{}'", lexeme),
                    start.clone(),
                )
            })?;
            TokenKind::Integer(parsed)
        };
        self.tokens.push(Token::new(kind, lexeme, start));
        Ok(())
    }

    fn handle_identifier(&mut self) {
        let start = self.current_position();
        let start_offset = self.position;
        while !self.is_at_end() && is_identifier_continue(self.current_char()) {
            self.advance();
        }
        let lexeme = self.lexeme_since(start_offset);

        // `async` is a keyword only in the position `action async ...`;
        // anywhere else it is an ordinary identifier.
        let kind = if lexeme == "async" {
            if self.last_meaningful_kind() == Some(&TokenKind::Action) {
                TokenKind::Async
            } else {
                TokenKind::Identifier(lexeme.clone())
            }
        } else {
            self.keywords
                .get(lexeme.as_str())
                .cloned()
                .unwrap_or(TokenKind::Identifier(lexeme.clone()))
        };
        self.tokens.push(Token::new(kind, lexeme, start));
    }

    fn last_meaningful_kind(&self) -> Option<&TokenKind> {
        self.tokens
            .iter()
            .rev()
            .map(|token| &token.kind)
            .find(|kind| !matches!(kind, TokenKind::Newline))
    }

    fn handle_operator_or_delimiter(&mut self) -> Result<(), ZexusError> {
        let start = self.current_position();
        let start_offset = self.position;
        let ch = self.advance();

        let kind = match ch {
            '+' => TokenKind::Plus,
            '-' => {
                if self.current_char() == '>' {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.current_char() == '=' {
                    self.advance();
                    TokenKind::Equal
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.current_char() == '=' {
                    self.advance();
                    TokenKind::NotEqual
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.current_char() == '=' {
                    self.advance();
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.current_char() == '=' {
                    self.advance();
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                }
            }
            '&' => {
                if self.current_char() == '&' {
                    self.advance();
                    TokenKind::And
                } else {
                    return Err(ZexusError::lexical("unexpected character '&'", start));
                }
            }
            '|' => {
                if self.current_char() == '|' {
                    self.advance();
                    TokenKind::Or
                } else {
                    return Err(ZexusError::lexical("unexpected character '|'", start));
                }
            }
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '{' => TokenKind::LeftBrace,
            '}' => TokenKind::RightBrace,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            other => {
                return Err(ZexusError::lexical(
                    format!("unexpected character '{}'", other),
                    start,
                ));
            }
        };

        let lexeme = self.lexeme_since(start_offset);
        self.tokens.push(Token::new(kind, lexeme, start));
        Ok(())
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_identifier_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn hex_pair(hi: char, lo: char) -> Option<u8> {
    let hi = hi.to_digit(16)?;
    let lo = lo.to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Tokenize a whole source string. Layout (newline) tokens are kept; the
/// parsers decide where they matter.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ZexusError> {
    Lexer::new(source).tokenize()
}
