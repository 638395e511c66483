use crate::error::ExprError;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Int(n) => n.to_string(),
            Token::Float(f) => f.to_string(),
            Token::Str(s) => format!("{s:?}"),
            Token::Ident(s) => s.clone(),
            Token::Punct(p) => format!("'{p}'"),
        }
    }
}

// Longest first so that `===` wins over `==` and `=`.
const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!",
    "?", ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

pub(crate) struct Tokenizer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    peeked: Option<(usize, Token)>,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            peeked: None,
        }
    }

    pub(crate) fn peek_token(&mut self) -> Result<Option<&Token>, ExprError> {
        if self.peeked.is_none() {
            self.peeked = self.next_token_inner()?;
        }
        Ok(self.peeked.as_ref().map(|(_, t)| t))
    }

    /// Next token together with its byte offset in the input.
    pub(crate) fn next_token(&mut self) -> Result<Option<(usize, Token)>, ExprError> {
        if let Some(t) = self.peeked.take() {
            return Ok(Some(t));
        }
        self.next_token_inner()
    }

    /// Byte offset of the next unread token, or the input length at the end.
    pub(crate) fn offset(&mut self) -> usize {
        if let Some((offset, _)) = &self.peeked {
            return *offset;
        }
        while let Some(&(_, c)) = self.chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.chars.next();
        }
        self.chars.peek().map(|&(i, _)| i).unwrap_or(self.input.len())
    }

    fn next_token_inner(&mut self) -> Result<Option<(usize, Token)>, ExprError> {
        while let Some(&(_, c)) = self.chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.chars.next();
        }

        let Some(&(start, c)) = self.chars.peek() else {
            return Ok(None);
        };

        if c == '\'' || c == '"' {
            self.chars.next();
            return self.read_string(c).map(|s| Some((start, Token::Str(s))));
        }

        if c.is_ascii_digit() {
            return self.read_number(start).map(|t| Some((start, t)));
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let mut end = start;
            while let Some(&(i, nc)) = self.chars.peek() {
                if nc.is_alphanumeric() || nc == '_' || nc == '$' {
                    end = i + nc.len_utf8();
                    self.chars.next();
                } else {
                    break;
                }
            }
            return Ok(Some((start, Token::Ident(self.input[start..end].to_string()))));
        }

        let rest = &self.input[start..];
        for punct in PUNCTS {
            if rest.starts_with(punct) {
                for _ in 0..punct.chars().count() {
                    self.chars.next();
                }
                return Ok(Some((start, Token::Punct(punct))));
            }
        }

        Err(ExprError::UnexpectedChar(c, start))
    }

    fn read_string(&mut self, quote: char) -> Result<String, ExprError> {
        let mut s = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => {
                    let Some((_, esc)) = self.chars.next() else {
                        return Err(ExprError::UnterminatedString);
                    };
                    match esc {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        'u' => {
                            let mut hex = String::with_capacity(4);
                            for _ in 0..4 {
                                match self.chars.next() {
                                    Some((_, h)) => hex.push(h),
                                    None => return Err(ExprError::UnterminatedString),
                                }
                            }
                            let ch = u32::from_str_radix(&hex, 16)
                                .ok()
                                .and_then(char::from_u32)
                                .ok_or(ExprError::InvalidNumber(hex))?;
                            s.push(ch);
                        }
                        other => s.push(other),
                    }
                }
                c if c == quote => return Ok(s),
                c => s.push(c),
            }
        }
        Err(ExprError::UnterminatedString)
    }

    fn read_number(&mut self, start: usize) -> Result<Token, ExprError> {
        let mut end = start;
        let mut is_float = false;
        let mut prev = '\0';
        while let Some(&(i, c)) = self.chars.peek() {
            let accept = c.is_ascii_digit()
                || (c == '.' && !is_float && self.digit_follows(i))
                || ((c == 'e' || c == 'E') && prev.is_ascii_digit())
                || ((c == '+' || c == '-') && (prev == 'e' || prev == 'E'));
            if !accept {
                break;
            }
            if c == '.' || c == 'e' || c == 'E' {
                is_float = true;
            }
            prev = c;
            end = i + 1;
            self.chars.next();
        }
        let text = &self.input[start..end];
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| ExprError::InvalidNumber(text.to_string()))
        } else {
            match text.parse::<i64>() {
                Ok(n) => Ok(Token::Int(n)),
                Err(_) => text
                    .parse::<f64>()
                    .map(Token::Float)
                    .map_err(|_| ExprError::InvalidNumber(text.to_string())),
            }
        }
    }

    fn digit_follows(&self, dot: usize) -> bool {
        self.input[dot + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut t = Tokenizer::new(input);
        let mut out = Vec::new();
        while let Some((_, token)) = t.next_token().unwrap() {
            out.push(token);
        }
        out
    }

    #[test]
    fn test_basic_read() {
        assert_eq!(
            tokens("a + 2"),
            vec![Token::Ident("a".into()), Token::Punct("+"), Token::Int(2)]
        );
    }

    #[test]
    fn test_member_and_strings() {
        assert_eq!(
            tokens(r#"_.name + " " + _.surname"#),
            vec![
                Token::Ident("_".into()),
                Token::Punct("."),
                Token::Ident("name".into()),
                Token::Punct("+"),
                Token::Str(" ".into()),
                Token::Punct("+"),
                Token::Ident("_".into()),
                Token::Punct("."),
                Token::Ident("surname".into()),
            ]
        );
    }

    #[test]
    fn test_numbers_and_longest_operator() {
        assert_eq!(
            tokens("1.5e2 === 150 !== 3"),
            vec![
                Token::Float(150.0),
                Token::Punct("==="),
                Token::Int(150),
                Token::Punct("!=="),
                Token::Int(3),
            ]
        );
        // a dot not followed by a digit stays member access
        assert_eq!(
            tokens("a[0].b"),
            vec![
                Token::Ident("a".into()),
                Token::Punct("["),
                Token::Int(0),
                Token::Punct("]"),
                Token::Punct("."),
                Token::Ident("b".into()),
            ]
        );
    }

    #[test]
    fn test_errors() {
        let mut t = Tokenizer::new("'open");
        assert_eq!(t.next_token(), Err(ExprError::UnterminatedString));
        let mut t = Tokenizer::new("a # b");
        t.next_token().unwrap();
        assert_eq!(t.next_token(), Err(ExprError::UnexpectedChar('#', 2)));
    }
}
