use std::iter::Peekable;

use num::{BigInt, BigRational, Num, One};
use thiserror::Error;

use super::{Atom, DomainError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },
    #[error("unexpected '{found}' at position {position}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        position: usize,
    },
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("malformed number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(BigRational),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Caret => "^".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Comma => ",".into(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Largest power of ten a decimal literal may scale by.
const MAX_DECIMAL_SHIFT: u32 = 4096;

fn parse_number(text: &str, position: usize) -> Result<BigRational, ParseError> {
    let invalid = || ParseError::InvalidNumber {
        text: text.to_string(),
        position,
    };
    let (mantissa, exponent) = match text.find(['e', 'E']) {
        Some(at) => (&text[..at], text[at + 1..].parse::<i32>().map_err(|_| invalid())?),
        None => (text, 0),
    };
    let (digits, decimals) = match mantissa.split_once('.') {
        Some((int, frac)) => (
            format!("{int}{frac}"),
            i32::try_from(frac.len()).map_err(|_| invalid())?,
        ),
        None => (mantissa.to_string(), 0),
    };
    let digits = BigInt::from_str_radix(&digits, 10).map_err(|_| invalid())?;
    let shift = exponent
        .checked_sub(decimals)
        .filter(|s| s.unsigned_abs() <= MAX_DECIMAL_SHIFT)
        .ok_or_else(invalid)?;
    let ten = BigRational::from_integer(BigInt::from(10));
    let scale = if shift >= 0 {
        ten.pow(shift)
    } else {
        BigRational::one() / ten.pow(-shift)
    };
    Ok(BigRational::from_integer(digits) * scale)
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let token = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // exponent marker only counts when digits follow
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push((Token::Number(parse_number(&text, start)?), start));
                continue;
            }
            c if is_ident_start(c) => {
                while i < chars.len() && is_ident_continue(chars[i]) {
                    i += 1;
                }
                tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
                continue;
            }
            ch => return Err(ParseError::UnexpectedChar { ch, position: i }),
        };
        tokens.push((token, start));
        i += 1;
    }
    Ok(tokens)
}

struct Parser<I: Iterator<Item = (Token, usize)>> {
    tokens: Peekable<I>,
}

impl<I: Iterator<Item = (Token, usize)>> Parser<I> {
    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(|(t, _)| t)
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<(), ParseError> {
        match self.tokens.next() {
            Some((t, _)) if t == expected => Ok(()),
            Some((t, position)) => Err(ParseError::UnexpectedToken {
                found: t.describe(),
                expected: what,
                position,
            }),
            None => Err(ParseError::UnexpectedEnd { expected: what }),
        }
    }

    fn sum(&mut self) -> Result<Atom, ParseError> {
        let mut terms = vec![self.product()?];
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.tokens.next();
                    terms.push(self.product()?);
                }
                Some(Token::Minus) => {
                    self.tokens.next();
                    terms.push(-self.product()?);
                }
                _ => break,
            }
        }
        Ok(Atom::add_all(terms))
    }

    fn product(&mut self) -> Result<Atom, ParseError> {
        let mut acc = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.tokens.next();
                    acc = acc * self.unary()?;
                }
                Some(Token::Slash) => {
                    self.tokens.next();
                    let rhs = self.unary()?;
                    acc = acc.checked_div(&rhs)?;
                }
                _ => break,
            }
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<Atom, ParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.tokens.next();
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.tokens.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Atom, ParseError> {
        let base = self.primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.tokens.next();
            let exp = self.unary()?;
            return Ok(base.pow(&exp)?);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Atom, ParseError> {
        const EXPECTED: &str = "a number, symbol, function or '('";
        match self.tokens.next() {
            Some((Token::Number(n), _)) => Ok(Atom::rational(n)),
            Some((Token::Ident(name), _)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.tokens.next();
                    let mut args = Vec::new();
                    if let Some(Token::RParen) = self.peek() {
                        self.tokens.next();
                        return Ok(Atom::fun(&name, args));
                    }
                    loop {
                        args.push(self.sum()?);
                        match self.tokens.next() {
                            Some((Token::Comma, _)) => continue,
                            Some((Token::RParen, _)) => break,
                            Some((t, position)) => {
                                return Err(ParseError::UnexpectedToken {
                                    found: t.describe(),
                                    expected: "',' or ')'",
                                    position,
                                })
                            }
                            None => return Err(ParseError::UnexpectedEnd { expected: "')'" }),
                        }
                    }
                    Ok(Atom::fun(&name, args))
                } else {
                    Ok(Atom::var(&name))
                }
            }
            Some((Token::LParen, _)) => {
                let inner = self.sum()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some((t, position)) => Err(ParseError::UnexpectedToken {
                found: t.describe(),
                expected: EXPECTED,
                position,
            }),
            None => Err(ParseError::UnexpectedEnd { expected: EXPECTED }),
        }
    }
}

/// Parses an expression into its canonical form.
///
/// The grammar is the usual infix one: `+ - * / ^`, parentheses, function
/// calls `f(a,b)`, decimal literals (read exactly as rationals) and identifiers
/// made of alphanumeric characters and `_`.
pub fn parse(input: &str) -> Result<Atom, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
    };
    let atom = parser.sum()?;
    match parser.tokens.next() {
        None => Ok(atom),
        Some((t, position)) => Err(ParseError::UnexpectedToken {
            found: t.describe(),
            expected: "an operator or end of input",
            position,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_are_exact() {
        assert_eq!(parse("0.25").unwrap(), Atom::new_frac(1, 4).unwrap());
        assert_eq!(parse("1.5e2").unwrap(), Atom::num(150));
        assert_eq!(parse("2E-1").unwrap(), Atom::new_frac(1, 5).unwrap());
        assert_eq!(parse("173").unwrap(), Atom::num(173));
    }

    #[test]
    fn precedence() {
        assert_eq!(parse("-x^2").unwrap(), -parse("x^2").unwrap());
        assert_eq!(parse("2^3^2").unwrap(), Atom::num(512));
        assert_eq!(parse("1-2-3").unwrap(), Atom::num(-4));
        assert_eq!(parse("8/2/2").unwrap(), Atom::num(2));
        assert_eq!(parse("2^-1").unwrap(), Atom::new_frac(1, 2).unwrap());
    }

    #[test]
    fn functions_and_unicode() {
        let atom = parse("γ(aind(loru(4,3),bis(4,2)), 𝑖)").unwrap();
        let (name, args) = atom.as_fun().unwrap();
        assert_eq!(name.as_str(), "γ");
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], Atom::i());
        assert_eq!(parse("f()").unwrap(), Atom::fun("f", []));
    }

    #[test]
    fn reports_positions() {
        assert_eq!(
            parse("x + $"),
            Err(ParseError::UnexpectedChar { ch: '$', position: 4 })
        );
        assert!(matches!(
            parse("f(x,"),
            Err(ParseError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            parse("(x))"),
            Err(ParseError::UnexpectedToken { position: 3, .. })
        ));
        assert!(matches!(
            parse("1.2.3"),
            Err(ParseError::InvalidNumber { position: 0, .. })
        ));
    }

    #[test]
    fn extreme_exponents_are_rejected() {
        for text in ["1e-2147483648", "1e999999999", "2*1.5e4097"] {
            assert!(
                matches!(parse(text), Err(ParseError::InvalidNumber { .. })),
                "{text}"
            );
        }
        assert!(parse("1e4096").is_ok());
        assert_eq!(parse("1e-300").unwrap(), Atom::num(10).powi(-300).unwrap());
    }
}
