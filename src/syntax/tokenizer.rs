//! One-pass scanner.
//!
//! The token stream is lossless: whitespace and comments are emitted as
//! skip-kind tokens, so concatenating every token's `text` in order
//! reproduces the source verbatim. Unmatched input becomes a `BadToken`
//! which the parser rejects; the tokenizer itself never fails.
//!
//! Match ordering follows the grammar's needs: multi-character operators
//! before their prefixes, keywords before the call/memory-access
//! classification, which in turn runs before the plain identifier kind.
//! Keywords are anchored against trailing identifier characters because an
//! identifier is always consumed wholesale before classification.

use super::grammar::Kind;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: Kind,
    pub text: String,
    pub offset: u32,
    pub len: u32,
}

#[derive(Debug)]
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    offset: usize,
    token_text: String,
    peeked: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    pub fn from_string<S: AsRef<str> + ?Sized>(src: &'a S) -> Tokenizer<'a> {
        Tokenizer {
            chars: src.as_ref().chars().peekable(),
            offset: 0,
            token_text: String::new(),
            peeked: None,
        }
    }

    /// Returns a reference to the `next_token()` value without advancing.
    pub fn peek(&mut self) -> &Token {
        if self.peeked.is_none() {
            let token = self.advance_token();
            self.peeked = Some(token);
        }
        self.peeked.as_ref().unwrap()
    }

    pub fn peek_kind(&mut self) -> Kind {
        self.peek().kind
    }

    pub fn next_token(&mut self) -> Token {
        match self.peeked.take() {
            Some(token) => token,
            None => self.advance_token(),
        }
    }

    /// Drains the stream, end-of-input sentinel included.
    pub fn tokens(mut self) -> Vec<Token> {
        let mut tokens = vec![];
        loop {
            let token = self.next_token();
            let last = token.kind == Kind::EndOfInput;
            tokens.push(token);
            if last {
                return tokens;
            }
        }
    }

    fn begin_token(&mut self) -> u32 {
        self.token_text.clear();
        self.offset as u32
    }

    fn end_token(&mut self, kind: Kind, offset: u32) -> Token {
        Token {
            kind,
            text: self.token_text.clone(),
            offset,
            len: self.token_text.len() as u32,
        }
    }

    fn advance_token(&mut self) -> Token {
        let offset = self.begin_token();

        let kind = match self.peek_char() {
            None => Kind::EndOfInput,
            Some(c) => match c {
                // Whitespace first; newline is a statement terminator, not
                // skippable trivia.
                ' ' | '\t' | '\r' => self.read_whitespace(),
                '\n' | ';' => {
                    self.next_char();
                    Kind::Terminator
                }
                '#' => self.read_comment(),
                '0'..='9' => self.read_number(),
                'a'..='z' | 'A'..='Z' | '_' => self.read_name(),
                '"' => self.read_string(),
                '=' | '!' | '<' | '>' | '+' | '-' => self.read_operator(c),
                '*' | '/' | '%' => {
                    self.next_char();
                    Kind::Multiplicative
                }
                '&' => {
                    self.next_char();
                    Kind::BitwiseAnd
                }
                '^' => {
                    self.next_char();
                    Kind::BitwiseXor
                }
                '|' => {
                    self.next_char();
                    Kind::BitwiseOr
                }
                ':' => {
                    self.next_char();
                    Kind::Definition
                }
                ',' => {
                    self.next_char();
                    Kind::Comma
                }
                '(' => {
                    self.next_char();
                    Kind::Parenthesis
                }
                ')' => {
                    self.next_char();
                    Kind::CloseParen
                }
                '{' => {
                    self.next_char();
                    Kind::Block
                }
                '}' => {
                    self.next_char();
                    Kind::CloseBrace
                }
                '[' => {
                    self.next_char();
                    Kind::Brackets
                }
                ']' => {
                    self.next_char();
                    Kind::CloseBracket
                }
                _ => {
                    self.next_char();
                    Kind::BadToken
                }
            },
        };

        self.end_token(kind, offset)
    }

    fn read_whitespace(&mut self) -> Kind {
        while let Some(c) = self.peek_char() {
            if !(c == ' ' || c == '\t' || c == '\r') {
                break;
            }
            self.next_char();
        }
        Kind::Whitespace
    }

    fn read_comment(&mut self) -> Kind {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.next_char();
        }
        Kind::Comment
    }

    fn read_operator(&mut self, first: char) -> Kind {
        self.next_char();

        let second = self.peek_char();
        match (first, second) {
            ('=', Some('=')) => {
                self.next_char();
                Kind::EqualityCompare
            }
            ('!', Some('=')) => {
                self.next_char();
                Kind::EqualityCompare
            }
            ('<', Some('=')) | ('>', Some('=')) => {
                self.next_char();
                Kind::OrderCompare
            }
            ('<', Some('<')) => {
                self.next_char();
                Kind::BitwiseShift
            }
            ('>', Some('>')) => {
                self.next_char();
                // `>>>` is the unsigned shift.
                if let Some('>') = self.peek_char() {
                    self.next_char();
                }
                Kind::BitwiseShift
            }
            ('+', Some('+')) | ('-', Some('-')) => {
                self.next_char();
                Kind::SuffixOp
            }
            ('=', _) => Kind::Assign,
            ('<', _) | ('>', _) => Kind::OrderCompare,
            ('+', _) | ('-', _) => Kind::Additive,
            _ => Kind::BadToken,
        }
    }

    fn read_name(&mut self) -> Kind {
        while let Some(c) = self.peek_char() {
            match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => {
                    self.next_char();
                }
                _ => break,
            }
        }

        if let Some(kind) = keyword_kind(&self.token_text) {
            return kind;
        }
        if is_type_name(&self.token_text) {
            return Kind::TypeName;
        }

        // The call and memory-access kinds are an identifier with a
        // one-character lookahead; the delimiter is not consumed.
        match self.peek_char() {
            Some('(') => Kind::Call,
            Some('[') => Kind::MemoryAccess,
            _ => Kind::Variable,
        }
    }

    fn read_number(&mut self) -> Kind {
        let mut float = false;

        while let Some(c) = self.peek_char() {
            match c {
                '0'..='9' => {
                    self.next_char();
                }
                '.' if !float => {
                    float = true;
                    self.next_char();
                }
                _ => break,
            }
        }

        // Optional width suffix: x32 / x64.
        let mut wide = false;
        if let Some('x') = self.peek_char() {
            self.next_char();
            match (self.peek_char(), self.chars.clone().nth(1)) {
                (Some('3'), Some('2')) => {
                    self.next_char();
                    self.next_char();
                }
                (Some('6'), Some('4')) => {
                    wide = true;
                    self.next_char();
                    self.next_char();
                }
                _ => return Kind::BadToken,
            }
        } else if float {
            // Unsuffixed floats default to the wide type.
            wide = true;
        }

        match (float, wide) {
            (true, true) => Kind::Float64Literal,
            (true, false) => Kind::Float32Literal,
            (false, true) => Kind::Int64Literal,
            (false, false) => Kind::Int32Literal,
        }
    }

    fn read_string(&mut self) -> Kind {
        self.next_char(); // opening quote

        loop {
            match self.peek_char() {
                None | Some('\n') => return Kind::BadToken,
                Some('"') => {
                    self.next_char();
                    return Kind::StringLiteral;
                }
                Some('\\') => {
                    self.next_char();
                    if self.next_char().is_none() {
                        return Kind::BadToken;
                    }
                }
                Some(_) => {
                    self.next_char();
                }
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.token_text.push(c);
        self.offset += c.len_utf8();
        Some(c)
    }
}

fn keyword_kind(word: &str) -> Option<Kind> {
    let kind = match word {
        "fn" => Kind::FunctionLiteral,
        "fn_ptr" => Kind::FunctionPointer,
        "ptr" => Kind::Pointer,
        "memory" => Kind::DefaultMemory,
        "table" => Kind::DefaultTable,
        "import" => Kind::Import,
        "export" => Kind::Export,
        "as" => Kind::AsRename,
        "immutable" => Kind::Immutable,
        "if" => Kind::If,
        "else" => Kind::Else,
        "loop" => Kind::Loop,
        "break" => Kind::Break,
        "yield" => Kind::Yield,
        "continue" => Kind::Continue,
        "return" => Kind::Return,
        "and" => Kind::ShortCircuitAnd,
        "or" => Kind::ShortCircuitOr,
        "allocate_pages" => Kind::AllocatePages,
        "sqrt" | "abs" | "ceil" | "floor" | "nearest" | "truncate" | "leading_zeros"
        | "trailing_zeros" | "popcount" | "to_i32" | "to_i64" | "to_f32" | "to_f64" => {
            Kind::UnaryMath
        }
        "min" | "max" | "copy_sign" | "rotate_left" | "rotate_right" => Kind::MiscInfix,
        _ => return None,
    };

    Some(kind)
}

/// Interprets a string literal token: strips the quotes and decodes
/// backslash escapes.
pub fn string_value(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);

    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            value.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => value.push('\n'),
            Some('r') => value.push('\r'),
            Some('t') => value.push('\t'),
            Some(other) => value.push(other),
            None => {}
        }
    }
    value
}

/// `i32`, `i64`, `f32`, `f64` and the pointer storage forms
/// `i{32,64}_{s,u}{8,16,32}`.
pub fn is_type_name(word: &str) -> bool {
    let rest = match word {
        "f32" | "f64" => return true,
        _ if word.starts_with("i32") => &word[3..],
        _ if word.starts_with("i64") => &word[3..],
        _ => return false,
    };

    matches!(rest, "" | "_s8" | "_u8" | "_s16" | "_u16" | "_s32" | "_u32")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn kinds(src: &str) -> Vec<Kind> {
        Tokenizer::from_string(src)
            .tokens()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn round_trip_reproduces_source() {
        let src = "add: fn (a: i32, b: i32) i32 {\n  # sum\n  a + b\n}\nexport add as \"plus\"\n";
        let text: String = Tokenizer::from_string(src)
            .tokens()
            .iter()
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(text, src);
    }

    #[test]
    fn offsets_and_lengths() {
        let mut tokenizer = Tokenizer::from_string("a + 42");

        let token = tokenizer.next_token();
        assert_eq!((token.kind, token.offset, token.len), (Kind::Variable, 0, 1));

        let token = tokenizer.next_token();
        assert_eq!(token.kind, Kind::Whitespace);

        let token = tokenizer.next_token();
        assert_eq!((token.kind, token.offset, token.len), (Kind::Additive, 2, 1));

        tokenizer.next_token();
        let token = tokenizer.next_token();
        assert_eq!(
            (token.kind, token.offset, token.len),
            (Kind::Int32Literal, 4, 2)
        );

        assert_eq!(tokenizer.next_token().kind, Kind::EndOfInput);
    }

    #[test]
    fn keywords_are_anchored() {
        // Identifiers that merely start with a keyword stay identifiers.
        assert_eq!(
            kinds("iffy loops returning"),
            vec![
                Kind::Variable,
                Kind::Whitespace,
                Kind::Variable,
                Kind::Whitespace,
                Kind::Variable,
                Kind::EndOfInput
            ]
        );
        assert_eq!(kinds("if")[0], Kind::If);
        assert_eq!(kinds("fn_ptr")[0], Kind::FunctionPointer);
        assert_eq!(kinds("fn_ptrs")[0], Kind::Variable);
    }

    #[test]
    fn longest_prefix_operators() {
        assert_eq!(kinds("==")[0], Kind::EqualityCompare);
        assert_eq!(kinds("=")[0], Kind::Assign);
        assert_eq!(kinds(">=")[0], Kind::OrderCompare);
        assert_eq!(kinds(">")[0], Kind::OrderCompare);
        assert_eq!(kinds(">>")[0], Kind::BitwiseShift);
        assert_eq!(kinds(">>>")[0], Kind::BitwiseShift);
        assert_eq!(kinds("++")[0], Kind::SuffixOp);
        assert_eq!(kinds("+")[0], Kind::Additive);
    }

    #[test]
    fn call_and_memory_access_lookahead() {
        let tokens = Tokenizer::from_string("foo(bar) baz[0]").tokens();
        assert_eq!(tokens[0].kind, Kind::Call);
        assert_eq!(tokens[0].text, "foo");
        assert_eq!(tokens[1].kind, Kind::Parenthesis);
        assert_eq!(tokens[2].kind, Kind::Variable);
        assert_eq!(tokens[5].kind, Kind::MemoryAccess);
        assert_eq!(tokens[5].text, "baz");
        assert_eq!(tokens[6].kind, Kind::Brackets);

        // Keywords win over the call classification.
        assert_eq!(kinds("memory(1)")[0], Kind::DefaultMemory);
    }

    #[test]
    fn type_names() {
        assert_eq!(kinds("i32")[0], Kind::TypeName);
        assert_eq!(kinds("i64_u16")[0], Kind::TypeName);
        assert_eq!(kinds("f64")[0], Kind::TypeName);
        assert_eq!(kinds("i128")[0], Kind::Variable);
        assert_eq!(kinds("i32_u64")[0], Kind::Variable);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("42")[0], Kind::Int32Literal);
        assert_eq!(kinds("42x32")[0], Kind::Int32Literal);
        assert_eq!(kinds("42x64")[0], Kind::Int64Literal);
        assert_eq!(kinds("1.5")[0], Kind::Float64Literal);
        assert_eq!(kinds("1.5x32")[0], Kind::Float32Literal);
        assert_eq!(kinds("1.5x64")[0], Kind::Float64Literal);
        assert_eq!(kinds("42x99")[0], Kind::BadToken);
    }

    #[test]
    fn strings() {
        let tokens = Tokenizer::from_string("\"console/log\"").tokens();
        assert_eq!(tokens[0].kind, Kind::StringLiteral);
        assert_eq!(tokens[0].text, "\"console/log\"");

        assert_eq!(kinds("\"with \\\"escape\\\"\"")[0], Kind::StringLiteral);
        assert_eq!(kinds("\"unterminated")[0], Kind::BadToken);
    }

    #[test]
    fn terminators() {
        assert_eq!(
            kinds("a\nb;c"),
            vec![
                Kind::Variable,
                Kind::Terminator,
                Kind::Variable,
                Kind::Terminator,
                Kind::Variable,
                Kind::EndOfInput
            ]
        );
    }

    #[test]
    fn bad_token() {
        let tokens = Tokenizer::from_string("a ?").tokens();
        assert_matches!(tokens[2].kind, Kind::BadToken);
    }

    #[test]
    fn string_values() {
        assert_eq!(string_value("\"console/log\""), "console/log");
        assert_eq!(string_value("\"a\\nb\""), "a\nb");
        assert_eq!(string_value("\"say \\\"hi\\\"\""), "say \"hi\"");
    }

    #[test]
    fn peek_does_not_advance() {
        let mut tokenizer = Tokenizer::from_string("1 2");

        assert_eq!(tokenizer.peek_kind(), Kind::Int32Literal);
        assert_eq!(tokenizer.peek_kind(), Kind::Int32Literal);
        assert_eq!(tokenizer.next_token().text, "1");
    }
}
