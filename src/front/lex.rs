//! The lexer.

use derive_more::Display;
use regex::Regex;

/// Tokens in the program
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// 1-based source line the token starts on.
    pub line: u32,
}

/// Token classes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display, Debug)]
pub enum TokenKind {
    #[display("id")]
    Id,
    #[display("intnum")]
    IntNum,
    #[display("floatnum")]
    FloatNum,
    #[display("int")]
    KwInt,
    #[display("float")]
    KwFloat,
    #[display("if")]
    KwIf,
    #[display("else")]
    KwElse,
    #[display("while")]
    KwWhile,
    #[display("do")]
    KwDo,
    #[display("for")]
    KwFor,
    #[display("switch")]
    KwSwitch,
    #[display("case")]
    KwCase,
    #[display("default")]
    KwDefault,
    #[display("break")]
    KwBreak,
    #[display("return")]
    KwReturn,
    #[display("==")]
    EqEq,
    #[display("!=")]
    NotEq,
    #[display("<=")]
    LessEq,
    #[display(">=")]
    GreaterEq,
    #[display("<")]
    Less,
    #[display(">")]
    Greater,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Star,
    #[display("/")]
    Slash,
    #[display("=")]
    Assign,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display("{{")]
    LBrace,
    #[display("}}")]
    RBrace,
    #[display(",")]
    Comma,
    #[display(";")]
    Semi,
    #[display(":")]
    Colon,
}

impl TokenKind {
    /// Identifiers that are keywords of the language.
    fn keyword(text: &str) -> Option<TokenKind> {
        use TokenKind::*;
        Some(match text {
            "int" => KwInt,
            "float" => KwFloat,
            "if" => KwIf,
            "else" => KwElse,
            "while" => KwWhile,
            "do" => KwDo,
            "for" => KwFor,
            "switch" => KwSwitch,
            "case" => KwCase,
            "default" => KwDefault,
            "break" => KwBreak,
            "return" => KwReturn,
            _ => return None,
        })
    }
}

pub struct LexError {
    pub line: u32,
    pub found: char,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Lexer error: unexpected character {:?} at line {}",
            self.found, self.line
        )
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: usize,
    line: u32,
    whitespace: Regex,
    matchers: Vec<(Regex, TokenKind)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        let table: &[(&str, TokenKind)] = &[
            (r"\A(?:\d+\.\d*|\.\d+)", FloatNum),
            (r"\A\d+", IntNum),
            (r"\A[A-Za-z_][A-Za-z0-9_]*", Id),
            (r"\A==", EqEq),
            (r"\A!=", NotEq),
            (r"\A<=", LessEq),
            (r"\A>=", GreaterEq),
            (r"\A<", Less),
            (r"\A>", Greater),
            (r"\A\+", Plus),
            (r"\A-", Minus),
            (r"\A\*", Star),
            (r"\A/", Slash),
            (r"\A=", Assign),
            (r"\A\(", LParen),
            (r"\A\)", RParen),
            (r"\A\[", LBracket),
            (r"\A\]", RBracket),
            (r"\A\{", LBrace),
            (r"\A\}", RBrace),
            (r"\A,", Comma),
            (r"\A;", Semi),
            (r"\A:", Colon),
        ];
        Lexer {
            input,
            pos: 0,
            line: 1,
            whitespace: Regex::new(r"\A(?:[ \t\f\r\n\v]|(?://.*))*").unwrap(),
            matchers: table
                .iter()
                .map(|(re, kind)| (Regex::new(re).unwrap(), *kind))
                .collect(),
        }
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos == self.input.len()
    }

    fn advance(&mut self, len: usize) {
        let consumed = &self.input[self.pos..self.pos + len];
        self.line += consumed.matches('\n').count() as u32;
        self.pos += len;
    }

    // Skip comments and whitespace
    fn skip_whitespace(&mut self) {
        if let Some(m) = self.whitespace.find(&self.input[self.pos..]) {
            self.advance(m.end());
        }
    }

    /// Get the next token if possible.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        self.skip_whitespace();
        if self.end_of_input() {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        for (re, kind) in &self.matchers {
            if let Some(m) = re.find(rest) {
                let text = &rest[..m.end()];
                let kind = match kind {
                    TokenKind::Id => TokenKind::keyword(text).unwrap_or(TokenKind::Id),
                    k => *k,
                };
                let token = Token {
                    kind,
                    text,
                    line: self.line,
                };
                self.advance(m.end());
                return Ok(Some(token));
            }
        }
        Err(LexError {
            line: self.line,
            found: rest.chars().next().unwrap_or('\0'),
        })
    }

    /// Run the lexer to completion and collect the token stream.
    pub fn tokenize(mut self) -> Result<Vec<Token<'input>>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next()? {
            tokens.push(token);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("int intx for forty"), vec![KwInt, Id, KwFor, Id]);
    }

    #[test]
    fn numbers() {
        use TokenKind::*;
        assert_eq!(kinds("12 1.5 .5 3."), vec![IntNum, FloatNum, FloatNum, FloatNum]);
    }

    #[test]
    fn compound_operators_win_over_single() {
        use TokenKind::*;
        assert_eq!(
            kinds("<= < == = != >= >"),
            vec![LessEq, Less, EqEq, Assign, NotEq, GreaterEq, Greater]
        );
    }

    #[test]
    fn comments_and_lines() {
        let tokens = Lexer::new("int a; // trailing\nfloat b;").tokenize().unwrap();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[3].line, 2);
        assert_eq!(tokens[3].text, "float");
    }

    #[test]
    fn rejects_stray_characters() {
        let err = Lexer::new("int a # b").tokenize().unwrap_err();
        assert_eq!(err.found, '#');
        assert_eq!(err.line, 1);
    }
}
