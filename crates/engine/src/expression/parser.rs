//! Recursive-descent parser producing the expression AST.
//!
//! ```text
//! expr       := or
//! or         := and ( ("||" | "or") and )*
//! and        := unary ( ("&&" | "and") unary )*
//! unary      := ("!" | "not") unary | comparison
//! comparison := primary ( cmp_op primary )?
//! primary    := literal | variable | "(" expr ")"
//! ```

use serde_json::Value;

use crate::error::{EngineError, EngineResult};

use super::lexer::{tokenize, Token, TokenKind};

/// Deepest AST the parser builds. Parentheses, negations and each extra
/// `&&`/`||` operand count one level.
pub const MAX_DEPTH: usize = 128;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// Expression AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// Parse a complete expression.
pub fn parse(source: &str) -> EngineResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };

    if parser.peek().kind == TokenKind::Eof {
        return Err(EngineError::parse(0, "empty expression"));
    }

    let expr = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(EngineError::parse(
            trailing.offset,
            format!("unexpected {}", trailing.kind),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always terminates the stream with Eof
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self, offset: usize) -> EngineResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EngineError::parse(offset, "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_and()?;
        let mut chained = 0;
        while self.peek().kind == TokenKind::Or {
            let op = self.advance();
            self.enter(op.offset)?;
            chained += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_unary()?;
        let mut chained = 0;
        while self.peek().kind == TokenKind::And {
            let op = self.advance();
            self.enter(op.offset)?;
            chained += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth -= chained;
        Ok(left)
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if self.peek().kind == TokenKind::Not {
            let op = self.advance();
            self.enter(op.offset)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> EngineResult<Expr> {
        let left = self.parse_primary()?;

        let op = match self.peek().kind {
            TokenKind::EqEq => CompareOp::Eq,
            TokenKind::NotEq => CompareOp::Ne,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Ge => CompareOp::Ge,
            TokenKind::Le => CompareOp::Le,
            _ => return Ok(left),
        };
        self.advance();

        let right = self.parse_primary()?;

        let next = self.peek();
        if matches!(
            next.kind,
            TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Gt
                | TokenKind::Lt
                | TokenKind::Ge
                | TokenKind::Le
        ) {
            return Err(EngineError::parse(
                next.offset,
                "chained comparisons are not allowed, use parentheses",
            ));
        }

        Ok(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Value::Null)),
            TokenKind::Number(n) => Ok(Expr::Literal(n)),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Ident(name) => {
                if self.peek().kind == TokenKind::LParen {
                    return Err(EngineError::parse(
                        self.peek().offset,
                        format!("'{}' is not callable", name),
                    ));
                }
                Ok(Expr::Variable(name))
            }
            TokenKind::Minus => {
                let next = self.advance();
                match next.kind {
                    TokenKind::Number(n) => negate(n, token.offset).map(Expr::Literal),
                    other => Err(EngineError::parse(
                        next.offset,
                        format!("expected number after '-', found {}", other),
                    )),
                }
            }
            TokenKind::LParen => {
                self.enter(token.offset)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(EngineError::parse(
                        close.offset,
                        format!("expected ')', found {}", close.kind),
                    ));
                }
                Ok(inner)
            }
            other => Err(EngineError::parse(
                token.offset,
                format!("expected operand, found {}", other),
            )),
        }
    }
}

fn negate(number: Value, offset: usize) -> EngineResult<Value> {
    if let Some(i) = number.as_i64() {
        return Ok(Value::Number((-i).into()));
    }
    number
        .as_f64()
        .and_then(|f| serde_json::Number::from_f64(-f))
        .map(Value::Number)
        .ok_or_else(|| EngineError::parse(offset, "invalid negative number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.to_string()))
    }

    fn lit(value: Value) -> Box<Expr> {
        Box::new(Expr::Literal(value))
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse("a || b && c").unwrap();
        assert_eq!(
            expr,
            Expr::Or(var("a"), Box::new(Expr::And(var("b"), var("c"))))
        );
    }

    #[test]
    fn test_parentheses_group() {
        let expr = parse("(a || b) and c").unwrap();
        assert_eq!(
            expr,
            Expr::And(Box::new(Expr::Or(var("a"), var("b"))), var("c"))
        );
    }

    #[test]
    fn test_comparison_node() {
        let expr = parse("monto >= -10.5").unwrap();
        assert_eq!(
            expr,
            Expr::Compare {
                op: CompareOp::Ge,
                left: var("monto"),
                right: lit(json!(-10.5)),
            }
        );
    }

    #[test]
    fn test_not() {
        let expr = parse("!aprobado").unwrap();
        assert_eq!(expr, Expr::Not(var("aprobado")));
    }

    #[test]
    fn test_malformed_inputs() {
        for source in [
            "a >> 3",
            "",
            "   ",
            "a >",
            "(a == 1",
            "a == 1)",
            "a == b == c",
            "system('rm')",
            "a b",
            "&& a",
            "- x",
        ] {
            let err = parse(source).unwrap_err();
            assert!(err.is_parse(), "expected parse error for {:?}", source);
        }
    }

    #[test]
    fn test_error_offset_points_at_token() {
        match parse("a >> 3").unwrap_err() {
            EngineError::Parse { offset, .. } => assert_eq!(offset, 3),
            other => panic!("unexpected error {:?}", other),
        }
    }

    fn depth_error(source: &str) -> String {
        match parse(source).unwrap_err() {
            EngineError::Parse { message, .. } => message,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_deep_nesting_is_a_parse_error() {
        let parens = format!("{}a{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(depth_error(&parens), "expression nested too deeply");

        let negations = format!("{}a", "!".repeat(100_000));
        assert_eq!(depth_error(&negations), "expression nested too deeply");

        let chain = vec!["a"; 10_000].join(" && ");
        assert_eq!(depth_error(&chain), "expression nested too deeply");
    }

    #[test]
    fn test_depth_limit_boundary() {
        let within = format!("{}a{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(parse(&within).unwrap(), Expr::Variable("a".to_string()));

        let beyond = format!("{}a{}", "(".repeat(MAX_DEPTH + 1), ")".repeat(MAX_DEPTH + 1));
        assert!(parse(&beyond).is_err());

        // Siblings do not accumulate depth.
        let siblings = vec!["(a || b)"; 50].join(" || ");
        assert!(parse(&siblings).is_ok());
    }
}
