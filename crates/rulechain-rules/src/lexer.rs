//! Tokenizer for rule source text.

use crate::error::{Result, RuleError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    /// Unsigned; the parser applies a leading minus and checks the range.
    Int(u64),
    Float(f64),

    // Keywords (case-insensitive)
    Rule,
    When,
    Then,
    Salience,
    True,
    False,
    Nil,

    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Semi,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    Eof,
}

impl TokenKind {
    /// How the token reads in an error message.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Str(s) => format!("string {:?}", s),
            TokenKind::Int(i) => format!("number {}", i),
            TokenKind::Float(f) => format!("number {}", f),
            TokenKind::Rule => "'rule'".to_string(),
            TokenKind::When => "'when'".to_string(),
            TokenKind::Then => "'then'".to_string(),
            TokenKind::Salience => "'salience'".to_string(),
            TokenKind::True => "'true'".to_string(),
            TokenKind::False => "'false'".to_string(),
            TokenKind::Nil => "'nil'".to_string(),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Assign => "=",
            TokenKind::PlusAssign => "+=",
            TokenKind::MinusAssign => "-=",
            TokenKind::StarAssign => "*=",
            TokenKind::SlashAssign => "/=",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Bang => "!",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            _ => "?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Split source text into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let kind = if c.is_ascii_alphabetic() || c == '_' {
                self.word()
            } else if c.is_ascii_digit() {
                self.number(line, column)?
            } else if c == '"' {
                self.string(line, column)?
            } else {
                self.operator(line, column)?
            };
            tokens.push(Token { kind, line, column });
        }
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some('*'), Some('/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => {
                                self.bump();
                            }
                            (None, _) => {
                                return Err(RuleError::compile(
                                    line,
                                    column,
                                    "unterminated block comment",
                                ))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match word.to_ascii_lowercase().as_str() {
            "rule" => TokenKind::Rule,
            "when" => TokenKind::When,
            "then" => TokenKind::Then,
            "salience" => TokenKind::Salience,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Ident(word),
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        let mut text = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '.' && !is_float && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
                is_float = true;
                text.push(c);
                self.bump();
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|n| n.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+' | '-'))
                        && self.peek_at(2).is_some_and(|n| n.is_ascii_digit())))
            {
                is_float = true;
                text.push(c);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(TokenKind::Float(value)),
                Ok(_) => Err(RuleError::compile(
                    line,
                    column,
                    format!("number '{}' is out of range", text),
                )),
                Err(_) => Err(RuleError::compile(
                    line,
                    column,
                    format!("invalid number '{}'", text),
                )),
            }
        } else {
            text.parse::<u64>().map(TokenKind::Int).map_err(|_| {
                RuleError::compile(line, column, format!("integer '{}' is out of range", text))
            })
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(other) => {
                            return Err(RuleError::compile(
                                self.line,
                                self.column - 1,
                                format!("unknown escape '\\{}'", other),
                            ))
                        }
                        None => break,
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(RuleError::compile(line, column, "unterminated string literal"))
    }

    fn operator(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        let c = self.bump().unwrap_or_default();
        let next = self.peek();
        let (kind, wide) = match (c, next) {
            ('=', Some('=')) => (TokenKind::EqEq, true),
            ('!', Some('=')) => (TokenKind::NotEq, true),
            ('<', Some('=')) => (TokenKind::LtEq, true),
            ('>', Some('=')) => (TokenKind::GtEq, true),
            ('&', Some('&')) => (TokenKind::AndAnd, true),
            ('|', Some('|')) => (TokenKind::OrOr, true),
            ('+', Some('=')) => (TokenKind::PlusAssign, true),
            ('-', Some('=')) => (TokenKind::MinusAssign, true),
            ('*', Some('=')) => (TokenKind::StarAssign, true),
            ('/', Some('=')) => (TokenKind::SlashAssign, true),
            ('=', _) => (TokenKind::Assign, false),
            ('!', _) => (TokenKind::Bang, false),
            ('<', _) => (TokenKind::Lt, false),
            ('>', _) => (TokenKind::Gt, false),
            ('+', _) => (TokenKind::Plus, false),
            ('-', _) => (TokenKind::Minus, false),
            ('*', _) => (TokenKind::Star, false),
            ('/', _) => (TokenKind::Slash, false),
            ('%', _) => (TokenKind::Percent, false),
            ('{', _) => (TokenKind::LBrace, false),
            ('}', _) => (TokenKind::RBrace, false),
            ('(', _) => (TokenKind::LParen, false),
            (')', _) => (TokenKind::RParen, false),
            ('[', _) => (TokenKind::LBracket, false),
            (']', _) => (TokenKind::RBracket, false),
            ('.', _) => (TokenKind::Dot, false),
            (',', _) => (TokenKind::Comma, false),
            (';', _) => (TokenKind::Semi, false),
            _ => {
                return Err(RuleError::compile(
                    line,
                    column,
                    format!("unexpected character '{}'", c),
                ))
            }
        };
        if wide {
            self.bump();
        }
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("RULE When Then salience NIL"),
            vec![
                TokenKind::Rule,
                TokenKind::When,
                TokenKind::Then,
                TokenKind::Salience,
                TokenKind::Nil,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a.b >= 1 && !c || d != 2.5"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Dot,
                TokenKind::Ident("b".into()),
                TokenKind::GtEq,
                TokenKind::Int(1),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Ident("c".into()),
                TokenKind::OrOr,
                TokenKind::Ident("d".into()),
                TokenKind::NotEq,
                TokenKind::Float(2.5),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comments_and_positions() {
        let tokens = tokenize("// header\n/* block\n comment */ rule X").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Rule);
        assert_eq!((tokens[0].line, tokens[0].column), (3, 13));
        assert_eq!(tokens[1].kind, TokenKind::Ident("X".into()));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\"\n""#),
            vec![TokenKind::Str("say \"hi\"\n".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        match tokenize("rule X\n  \"open") {
            Err(RuleError::Compile { line, column, .. }) => assert_eq!((line, column), (2, 3)),
            other => panic!("Expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(
            tokenize("a # b"),
            Err(RuleError::Compile { line: 1, column: 3, .. })
        ));
    }

    #[test]
    fn test_float_exponent() {
        assert_eq!(kinds("1e3"), vec![TokenKind::Float(1000.0), TokenKind::Eof]);
    }

    #[test]
    fn test_float_overflow_rejected() {
        let err = tokenize("x > 1e999").unwrap_err();
        assert!(matches!(err, RuleError::Compile { line: 1, column: 5, .. }));
        assert!(err.to_string().contains("out of range"));
    }
}
