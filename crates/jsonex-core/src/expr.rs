use crate::error::{EvalError, ExprError};
use crate::reader::{Token, Tokenizer};
use crate::scope::Scope;
use crate::value::Value;
use crate::vm::eval_expr;
use std::fmt;
use std::rc::Rc;

/// Parsed expression tree. Every operator is a direct enum variant, so
/// evaluation never matches on operator strings.
#[derive(Debug, Clone)]
pub enum Expr {
    // === Literals ===
    /// Scalar literal. Container literals are built per evaluation.
    Literal(Value),
    ArrayLit(Vec<Expr>),
    ObjectLit(Vec<(Rc<str>, Expr)>),

    // === Names ===
    Ident(Rc<str>),
    Member(Box<Expr>, Rc<str>),
    Index(Box<Expr>, Box<Expr>),

    // === Arithmetic ===
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Plus(Box<Expr>),

    // === Comparison ===
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),

    // === Logic ===
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Compiled expression: source text plus its tree.
///
/// `Expression::parse(text)?.evaluate(&scope)` is the whole collaborator
/// contract the document compiler relies on.
#[derive(Clone)]
pub struct Expression {
    source: Rc<str>,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let mut parser = Parser {
            tokens: Tokenizer::new(source),
        };
        let root = parser.parse_ternary()?;
        if let Some((offset, token)) = parser.tokens.next_token()? {
            return Err(ExprError::UnexpectedToken {
                found: token.describe(),
                offset,
            });
        }
        Ok(Self {
            source: Rc::from(source),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tree(&self) -> &Expr {
        &self.root
    }

    pub fn evaluate(&self, scope: &Scope) -> Result<Value, EvalError> {
        eval_expr(&self.root, scope)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

struct Parser<'a> {
    tokens: Tokenizer<'a>,
}

type Binary = fn(Box<Expr>, Box<Expr>) -> Expr;

impl<'a> Parser<'a> {
    fn peek_punct(&mut self, wanted: &[&'static str]) -> Result<Option<&'static str>, ExprError> {
        Ok(match self.tokens.peek_token()? {
            Some(Token::Punct(p)) if wanted.contains(p) => Some(*p),
            _ => None,
        })
    }

    fn expect_punct(&mut self, wanted: &'static str) -> Result<(), ExprError> {
        match self.tokens.next_token()? {
            Some((_, Token::Punct(p))) if p == wanted => Ok(()),
            Some((offset, token)) => Err(ExprError::UnexpectedToken {
                found: token.describe(),
                offset,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, ExprError> {
        let cond = self.parse_or()?;
        if self.peek_punct(&["?"])?.is_none() {
            return Ok(cond);
        }
        self.tokens.next_token()?;
        let then = self.parse_ternary()?;
        self.expect_punct(":")?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::If(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.peek_punct(&["||"])?.is_some() {
            self.tokens.next_token()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_equality()?;
        while self.peek_punct(&["&&"])?.is_some() {
            self.tokens.next_token()?;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&["==", "!=", "===", "!=="], Self::parse_relational, equality_op)
    }

    fn parse_relational(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&["<", ">", "<=", ">="], Self::parse_additive, relational_op)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.peek_punct(&["+", "-"])? {
            self.tokens.next_token()?;
            let right = self.parse_multiplicative()?;
            left = if op == "+" {
                try_fold_add(left, right)
            } else {
                Expr::Sub(Box::new(left), Box::new(right))
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&["*", "/", "%"], Self::parse_unary, multiplicative_op)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&'static str],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
        build: fn(&str) -> Binary,
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        while let Some(op) = self.peek_punct(ops)? {
            self.tokens.next_token()?;
            let right = next(self)?;
            left = build(op)(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek_punct(&["!", "-", "+"])? {
            Some(op) => {
                self.tokens.next_token()?;
                let operand = Box::new(self.parse_unary()?);
                Ok(match op {
                    "!" => Expr::Not(operand),
                    "-" => match *operand {
                        Expr::Literal(Value::Int(n)) => Expr::Literal(Value::Int(-n)),
                        Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
                        other => Expr::Neg(Box::new(other)),
                    },
                    _ => Expr::Plus(operand),
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_punct(&[".", "["])? {
                Some(".") => {
                    self.tokens.next_token()?;
                    match self.tokens.next_token()? {
                        Some((_, Token::Ident(name))) => {
                            expr = Expr::Member(Box::new(expr), Rc::from(name.as_str()));
                        }
                        Some((offset, token)) => {
                            return Err(ExprError::UnexpectedToken {
                                found: token.describe(),
                                offset,
                            });
                        }
                        None => return Err(ExprError::UnexpectedEnd),
                    }
                }
                Some(_) => {
                    self.tokens.next_token()?;
                    let index = self.parse_ternary()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                None => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let Some((offset, token)) = self.tokens.next_token()? else {
            return Err(ExprError::UnexpectedEnd);
        };
        match token {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::from(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(Rc::from(name.as_str())),
            }),
            Token::Punct("(") => {
                let inner = self.parse_ternary()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                if self.peek_punct(&["]"])?.is_none() {
                    loop {
                        items.push(self.parse_ternary()?);
                        if self.peek_punct(&[","])?.is_none() {
                            break;
                        }
                        self.tokens.next_token()?;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::ArrayLit(items))
            }
            Token::Punct("{") => {
                let mut entries = Vec::new();
                if self.peek_punct(&["}"])?.is_none() {
                    loop {
                        let key = match self.tokens.next_token()? {
                            Some((_, Token::Ident(k))) | Some((_, Token::Str(k))) => k,
                            Some((offset, token)) => {
                                return Err(ExprError::UnexpectedToken {
                                    found: token.describe(),
                                    offset,
                                });
                            }
                            None => return Err(ExprError::UnexpectedEnd),
                        };
                        self.expect_punct(":")?;
                        entries.push((Rc::from(key.as_str()), self.parse_ternary()?));
                        if self.peek_punct(&[","])?.is_none() {
                            break;
                        }
                        self.tokens.next_token()?;
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::ObjectLit(entries))
            }
            other => Err(ExprError::UnexpectedToken {
                found: other.describe(),
                offset,
            }),
        }
    }
}

fn equality_op(op: &str) -> Binary {
    match op {
        "==" | "===" => Expr::Eq,
        _ => Expr::Neq,
    }
}

fn relational_op(op: &str) -> Binary {
    match op {
        "<" => Expr::Lt,
        ">" => Expr::Gt,
        "<=" => Expr::Lte,
        _ => Expr::Gte,
    }
}

fn multiplicative_op(op: &str) -> Binary {
    match op {
        "*" => Expr::Mul,
        "/" => Expr::Div,
        _ => Expr::Mod,
    }
}

fn try_fold_add(left: Expr, right: Expr) -> Expr {
    match (&left, &right) {
        (Expr::Literal(Value::Int(a)), Expr::Literal(Value::Int(b))) => {
            if let Some(sum) = a.checked_add(*b) {
                return Expr::Literal(Value::Int(sum));
            }
        }
        (Expr::Literal(Value::Str(a)), Expr::Literal(Value::Str(b))) => {
            return Expr::Literal(Value::from(format!("{a}{b}")));
        }
        _ => {}
    }
    Expr::Add(Box::new(left), Box::new(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectRef;

    fn eval(source: &str, scope: &ObjectRef) -> Value {
        Expression::parse(source)
            .expect("parse")
            .evaluate(&Scope::from(scope.clone()))
            .expect("evaluate")
    }

    #[test]
    fn test_precedence() {
        let scope = ObjectRef::new();
        assert_eq!(eval("1 + 2 * 3", &scope), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3", &scope), Value::Int(9));
        assert_eq!(eval("-2 - -3", &scope), Value::Int(1));
        assert_eq!(eval("1 < 2 && 3 >= 3", &scope), Value::Bool(true));
        assert_eq!(eval("false ? 1 : true ? 2 : 3", &scope), Value::Int(2));
    }

    #[test]
    fn test_constant_folding() {
        let expr = Expression::parse("1 + 2").unwrap();
        assert!(matches!(expr.tree(), Expr::Literal(Value::Int(3))));
        let expr = Expression::parse("'a' + 'b'").unwrap();
        assert!(matches!(expr.tree(), Expr::Literal(Value::Str(s)) if s.as_ref() == "ab"));
    }

    #[test]
    fn test_member_index_and_literals() {
        let scope = ObjectRef::new();
        let user = ObjectRef::new();
        user.insert("tags", Value::from_json(&serde_json::json!(["a", "b"])));
        scope.insert("user", user);
        assert_eq!(eval("user.tags[1]", &scope), Value::from("b"));
        assert_eq!(eval("user['tags'].length", &scope), Value::Int(2));
        assert_eq!(eval("[1, 2][0] + {x: 5}.x", &scope), Value::Int(6));
        assert_eq!(eval("user.missing.deeper", &scope), Value::Null);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Expression::parse("1 +").unwrap_err(), ExprError::UnexpectedEnd);
        assert!(matches!(
            Expression::parse("a b"),
            Err(ExprError::UnexpectedToken { offset: 2, .. })
        ));
        assert!(matches!(
            Expression::parse("(1"),
            Err(ExprError::UnexpectedEnd)
        ));
    }
}
