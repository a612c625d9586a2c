//! Turns the token stream into unresolved statements.
//!
//! Grammar, informally:
//!
//! ```text
//! program   := (statement (NEWLINE | ';'))*
//! statement := IDENT '=' command | command
//! command   := IDENT arg* | expr            -- `vortex 1, 1` or `vortex(1,1).scale(2,2,1)`
//! arg       := expr ','?
//! expr      := primary ('.' IDENT '(' args ')')*
//! primary   := literal | ('-' | '+') number | IDENT | IDENT '(' args ')' | '(' command ')'
//! ```
//!
//! Inside parentheses newlines do not end the statement.

use std::ops::Range;

use logos::Logos;

use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxExpr {
    Literal {
        value: Literal,
        offset: usize,
    },
    /// A bare identifier: value read or zero-argument call.
    Ident {
        name: String,
        offset: usize,
    },
    Call {
        name: String,
        offset: usize,
        args: Vec<SyntaxExpr>,
    },
}

impl SyntaxExpr {
    pub fn offset(&self) -> usize {
        match self {
            SyntaxExpr::Literal { offset, .. }
            | SyntaxExpr::Ident { offset, .. }
            | SyntaxExpr::Call { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxStatement {
    Assign {
        target: String,
        offset: usize,
        value: SyntaxExpr,
    },
    Command(SyntaxExpr),
}

/// One parsed statement and the byte range it covers in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedStatement {
    pub statement: SyntaxStatement,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

pub fn parse(source: &str) -> Result<Vec<ParsedStatement>, SyntaxError> {
    let mut tokens = Vec::new();
    for (token, span) in Token::lexer(source).spanned() {
        match token {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(SyntaxError::new(
                    format!("unexpected input {:?}", &source[span.clone()]),
                    span.start,
                ))
            }
        }
    }
    Parser {
        tokens,
        cursor: 0,
        depth: 0,
        end: source.len(),
    }
    .program()
}

struct Parser {
    tokens: Vec<(Token, Range<usize>)>,
    cursor: usize,
    /// Parenthesis nesting; newlines are insignificant while > 0.
    depth: usize,
    end: usize,
}

impl Parser {
    fn program(mut self) -> Result<Vec<ParsedStatement>, SyntaxError> {
        let mut statements = Vec::new();
        loop {
            while matches!(self.peek(), Some(Token::Newline | Token::Semicolon)) {
                self.advance();
            }
            let Some(start) = self.peek_offset() else {
                break;
            };
            let statement = self.statement()?;
            let end = self.previous_end();
            match self.peek() {
                None | Some(Token::Newline | Token::Semicolon) => {}
                Some(other) => {
                    return Err(SyntaxError::new(
                        format!("expected end of statement, found {}", other.describe()),
                        self.offset(),
                    ))
                }
            }
            statements.push(ParsedStatement {
                statement,
                span: start..end,
            });
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<SyntaxStatement, SyntaxError> {
        if let (Some(Token::Ident(name)), Some(Token::Assign)) = (self.peek(), self.peek_nth(1)) {
            let target = name.clone();
            let offset = self.offset();
            self.advance();
            self.advance();
            if self.at_terminator() {
                return Err(SyntaxError::new(
                    format!("missing value after '{target} ='"),
                    self.offset(),
                ));
            }
            let value = self.command()?;
            return Ok(SyntaxStatement::Assign {
                target,
                offset,
                value,
            });
        }
        Ok(SyntaxStatement::Command(self.command()?))
    }

    fn command(&mut self) -> Result<SyntaxExpr, SyntaxError> {
        let bare_call = matches!(self.peek(), Some(Token::Ident(_)))
            && !self.call_paren_follows()
            && !matches!(self.peek_nth(1), Some(Token::Dot));
        if !bare_call {
            return self.expr();
        }
        let offset = self.offset();
        let name = self.ident()?;
        let mut args = Vec::new();
        while !self.at_terminator() {
            args.push(self.expr()?);
            if matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
            }
        }
        if args.is_empty() {
            Ok(SyntaxExpr::Ident { name, offset })
        } else {
            Ok(SyntaxExpr::Call { name, offset, args })
        }
    }

    fn expr(&mut self) -> Result<SyntaxExpr, SyntaxError> {
        let mut expr = self.primary()?;
        while matches!(self.peek(), Some(Token::Dot)) {
            self.advance();
            let offset = self.offset();
            let name = self.ident()?;
            if !matches!(self.peek(), Some(Token::LParen)) {
                return Err(SyntaxError::new(
                    format!("expected '(' after .{name}"),
                    self.offset(),
                ));
            }
            let mut args = vec![expr];
            args.extend(self.paren_args()?);
            expr = SyntaxExpr::Call { name, offset, args };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<SyntaxExpr, SyntaxError> {
        let offset = self.offset();
        let Some(token) = self.peek().cloned() else {
            return Err(SyntaxError::new("unexpected end of input", offset));
        };
        match token {
            Token::Int(value) => {
                self.advance();
                Ok(literal(Literal::Int(value), offset))
            }
            Token::Float(value) => {
                self.advance();
                Ok(literal(Literal::Float(value), offset))
            }
            Token::Bool(value) => {
                self.advance();
                Ok(literal(Literal::Bool(value), offset))
            }
            Token::Str(value) => {
                self.advance();
                Ok(literal(Literal::Str(value), offset))
            }
            Token::Minus | Token::Plus => {
                let negate = token == Token::Minus;
                self.advance();
                let value = match self.peek() {
                    Some(Token::Int(value)) if negate => Literal::Int(-value),
                    Some(Token::Int(value)) => Literal::Int(*value),
                    Some(Token::Float(value)) if negate => Literal::Float(-value),
                    Some(Token::Float(value)) => Literal::Float(*value),
                    _ => {
                        return Err(SyntaxError::new(
                            "a sign must be followed by a number",
                            self.offset(),
                        ))
                    }
                };
                self.advance();
                Ok(literal(value, offset))
            }
            Token::Ident(name) => {
                let call = self.call_paren_follows();
                self.advance();
                if call {
                    let args = self.paren_args()?;
                    Ok(SyntaxExpr::Call { name, offset, args })
                } else {
                    Ok(SyntaxExpr::Ident { name, offset })
                }
            }
            Token::LParen => {
                self.advance();
                self.depth += 1;
                let inner = self.command()?;
                self.close_paren()?;
                Ok(inner)
            }
            other => Err(SyntaxError::new(
                format!("unexpected {}", other.describe()),
                offset,
            )),
        }
    }

    /// Parses `( arg, arg ... )`; the cursor sits on the opening parenthesis.
    fn paren_args(&mut self) -> Result<Vec<SyntaxExpr>, SyntaxError> {
        self.advance();
        self.depth += 1;
        let mut args = Vec::new();
        while !matches!(self.peek(), Some(Token::RParen) | None) {
            args.push(self.expr()?);
            if matches!(self.peek(), Some(Token::Comma)) {
                self.advance();
            }
        }
        self.close_paren()?;
        Ok(args)
    }

    fn close_paren(&mut self) -> Result<(), SyntaxError> {
        match self.peek() {
            Some(Token::RParen) => {
                self.advance();
                self.depth -= 1;
                Ok(())
            }
            Some(other) => Err(SyntaxError::new(
                format!("expected ')', found {}", other.describe()),
                self.offset(),
            )),
            None => Err(SyntaxError::new(
                "expected ')' before end of input",
                self.end,
            )),
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            Some(other) => Err(SyntaxError::new(
                format!("expected identifier, found {}", other.describe()),
                self.offset(),
            )),
            None => Err(SyntaxError::new("expected identifier", self.end)),
        }
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.peek(),
            None | Some(Token::Newline | Token::Semicolon | Token::RParen)
        )
    }

    /// Index of the `n`th significant token from the cursor.
    fn position(&self, n: usize) -> usize {
        let mut index = self.cursor;
        let mut remaining = n;
        loop {
            if self.depth > 0 {
                while matches!(self.tokens.get(index), Some((Token::Newline, _))) {
                    index += 1;
                }
            }
            if remaining == 0 {
                return index;
            }
            remaining -= 1;
            index += 1;
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.position(n)).map(|(token, _)| token)
    }

    /// True when the next token is `(` written directly after the current one,
    /// as in `vortex(1, 1)` but not `translate (vortex 1 1)`.
    fn call_paren_follows(&self) -> bool {
        match (
            self.tokens.get(self.position(0)),
            self.tokens.get(self.position(1)),
        ) {
            (Some((_, current)), Some((Token::LParen, next))) => current.end == next.start,
            _ => false,
        }
    }

    fn advance(&mut self) {
        self.cursor = self.position(0) + 1;
    }

    fn peek_offset(&self) -> Option<usize> {
        self.tokens.get(self.position(0)).map(|(_, span)| span.start)
    }

    fn offset(&self) -> usize {
        self.peek_offset().unwrap_or(self.end)
    }

    fn previous_end(&self) -> usize {
        self.cursor
            .checked_sub(1)
            .and_then(|index| self.tokens.get(index))
            .map(|(_, span)| span.end)
            .unwrap_or(self.end)
    }
}

fn literal(value: Literal, offset: usize) -> SyntaxExpr {
    SyntaxExpr::Literal { value, offset }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(source: &str) -> SyntaxStatement {
        let mut statements = parse(source).expect("source should parse");
        assert_eq!(statements.len(), 1, "{statements:?}");
        statements.remove(0).statement
    }

    fn call_shape(expr: &SyntaxExpr) -> String {
        match expr {
            SyntaxExpr::Literal { value, .. } => format!("{value:?}"),
            SyntaxExpr::Ident { name, .. } => name.clone(),
            SyntaxExpr::Call { name, args, .. } => {
                let inner: Vec<String> = args.iter().map(call_shape).collect();
                format!("{name}({})", inner.join(", "))
            }
        }
    }

    fn command_shape(source: &str) -> String {
        match single(source) {
            SyntaxStatement::Command(expr) => call_shape(&expr),
            other => panic!("expected command, got {other:?}"),
        }
    }

    #[test]
    fn bare_and_parenthesised_calls_agree() {
        assert_eq!(command_shape("vortex 1 -1"), "vortex(Int(1), Int(-1))");
        assert_eq!(command_shape("vortex 1, -1"), "vortex(Int(1), Int(-1))");
        assert_eq!(command_shape("vortex(1, -1)"), "vortex(Int(1), Int(-1))");
    }

    #[test]
    fn method_chains_desugar_to_nested_calls() {
        assert_eq!(
            command_shape("vortex(1,1).translate(1e-7, 0, 0).rotz(pi)"),
            "rotz(translate(vortex(Int(1), Int(1)), Float(1e-7), Int(0), Int(0)), pi)"
        );
    }

    #[test]
    fn parenthesised_sub_commands_nest() {
        assert_eq!(
            command_shape("translate (vortex 1 1) 5e-9 0 0"),
            "translate(vortex(Int(1), Int(1)), Float(5e-9), Int(0), Int(0))"
        );
    }

    #[test]
    fn assignments_take_bare_commands() {
        match single("m = uniform 1 0 0") {
            SyntaxStatement::Assign { target, value, .. } => {
                assert_eq!(target, "m");
                assert_eq!(call_shape(&value), "uniform(Int(1), Int(0), Int(0))");
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn newlines_inside_parentheses_continue_the_statement() {
        let statements = parse("twodomain(1, 0, 0,\n 0, 1, 0,\n -1, 0, 0)\nrun 1e-9").unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].span.start, 0);
    }

    #[test]
    fn separators_split_statements() {
        let statements = parse("\n\nalpha = 0.1; run 1e-9\n\n// trailing comment\n").unwrap();
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn syntax_errors_carry_offsets() {
        let err = parse("uniform(1, 0, 0\nrun 1").unwrap_err();
        assert!(err.message.contains("expected ')'"), "{err:?}");

        let err = parse("run 1 = 2").unwrap_err();
        assert_eq!(err.offset, 6);

        let err = parse("print @").unwrap_err();
        assert_eq!(err.offset, 6);
    }
}
