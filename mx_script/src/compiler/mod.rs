//! Script compiler.
//!
//! [`compile`] parses a whole script, resolves every identifier against a
//! [`Registry`] and type-checks every call before anything runs, producing a
//! [`StatementSequence`]. It never touches the execution context, so the same
//! source and registry always yield the same sequence or the same error.

mod lexer;
mod parser;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::registry::{Binding, EntryKind, Registry, RegistryEntry};
use crate::value::{EvalError, Type, Value};

use parser::{Literal, ParsedStatement, SyntaxExpr, SyntaxStatement};

/// 1-based line and column in the script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{location}: {kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub location: Location,
    /// Full text of the offending source line.
    pub line_text: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    #[error("syntax error: {message}")]
    Syntax { message: String },
    #[error("undefined identifier {name:?}")]
    UnknownIdentifier { name: String },
    #[error("{name}: argument {index}: expected {expected} arguments, got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
        /// First missing (too few) or first surplus (too many) argument.
        index: usize,
    },
    #[error("{name}: argument {index}: expected {expected}, got {found}")]
    TypeMismatch {
        name: String,
        index: usize,
        expected: Type,
        found: Type,
    },
    #[error("{name} cannot be assigned")]
    NotAssignable { name: String },
}

/// A resolved, type-checked expression.
pub enum Expr<C> {
    Literal(Value),
    Read(Arc<RegistryEntry<C>>),
    Call {
        entry: Arc<RegistryEntry<C>>,
        args: Vec<Expr<C>>,
    },
}

impl<C> Expr<C> {
    pub fn ty(&self) -> Type {
        match self {
            Expr::Literal(value) => value.ty(),
            Expr::Read(entry) | Expr::Call { entry, .. } => entry.signature().returns,
        }
    }

    pub fn eval(&self, context: &mut C) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Read(entry) => match entry.binding() {
                Binding::Value { get, .. } => Ok(get(context)),
                Binding::Function(_) => Err(EvalError::failed(format!(
                    "{} is a function, not a value",
                    entry.name()
                ))),
            },
            Expr::Call { entry, args } => {
                let Binding::Function(function) = entry.binding() else {
                    return Err(EvalError::failed(format!(
                        "{} is a value, not a function",
                        entry.name()
                    )));
                };
                let values = args
                    .iter()
                    .map(|arg| arg.eval(context))
                    .collect::<Result<Vec<_>, _>>()?;
                function(context, &values)
            }
        }
    }
}

impl<C> fmt::Debug for Expr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{value:?}"),
            Expr::Read(entry) => f.write_str(entry.name()),
            Expr::Call { entry, args } => {
                let mut tuple = f.debug_tuple(entry.name());
                for arg in args {
                    tuple.field(arg);
                }
                tuple.finish()
            }
        }
    }
}

pub enum Action<C> {
    Eval(Expr<C>),
    Assign {
        entry: Arc<RegistryEntry<C>>,
        value: Expr<C>,
    },
}

/// One compiled script line.
pub struct Statement<C> {
    source: String,
    location: Location,
    action: Action<C>,
}

impl<C> Statement<C> {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn action(&self) -> &Action<C> {
        &self.action
    }

    /// Name of the entry this statement calls, reads or assigns.
    pub fn target(&self) -> Option<&str> {
        match &self.action {
            Action::Eval(Expr::Literal(_)) => None,
            Action::Eval(Expr::Read(entry) | Expr::Call { entry, .. }) => Some(entry.name()),
            Action::Assign { entry, .. } => Some(entry.name()),
        }
    }

    /// Runs the statement; assignments yield [`Value::Void`].
    pub fn execute(&self, context: &mut C) -> Result<Value, EvalError> {
        match &self.action {
            Action::Eval(expr) => expr.eval(context),
            Action::Assign { entry, value } => {
                let value = value.eval(context)?;
                match entry.binding() {
                    Binding::Value { set: Some(set), .. } => {
                        set(context, value)?;
                        Ok(Value::Void)
                    }
                    _ => Err(EvalError::ReadOnly {
                        name: entry.name().to_string(),
                    }),
                }
            }
        }
    }
}

impl<C> fmt::Debug for Statement<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("location", &self.location)
            .field("source", &self.source)
            .finish()
    }
}

/// Ordered statements of a run; execution order is insertion order.
pub struct StatementSequence<C> {
    statements: Vec<Statement<C>>,
}

impl<C> Default for StatementSequence<C> {
    fn default() -> Self {
        Self {
            statements: Vec::new(),
        }
    }
}

impl<C> StatementSequence<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: Statement<C>) {
        self.statements.push(statement);
    }

    pub fn append(&mut self, other: StatementSequence<C>) {
        self.statements.extend(other.statements);
    }

    pub fn get(&self, index: usize) -> Option<&Statement<C>> {
        self.statements.get(index)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Statement<C>> {
        self.statements.iter()
    }
}

impl<C> IntoIterator for StatementSequence<C> {
    type Item = Statement<C>;
    type IntoIter = std::vec::IntoIter<Statement<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

impl<C> fmt::Debug for StatementSequence<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.statements.iter()).finish()
    }
}

/// Compiles a complete script. Nothing is executed.
pub fn compile<C>(
    source: &str,
    registry: &Registry<C>,
) -> Result<StatementSequence<C>, CompileError> {
    let lines = LineIndex::new(source);
    let parsed = parser::parse(source).map_err(|err| {
        lines.error(
            CompileErrorKind::Syntax {
                message: err.message,
            },
            err.offset,
        )
    })?;

    let resolver = Resolver {
        registry,
        lines: &lines,
    };
    let mut sequence = StatementSequence::new();
    for statement in parsed {
        sequence.push(resolver.statement(source, statement)?);
    }
    Ok(sequence)
}

struct Resolver<'a, C> {
    registry: &'a Registry<C>,
    lines: &'a LineIndex<'a>,
}

impl<C> Resolver<'_, C> {
    fn statement(
        &self,
        source: &str,
        parsed: ParsedStatement,
    ) -> Result<Statement<C>, CompileError> {
        let location = self.lines.locate(parsed.span.start);
        let text = source[parsed.span.clone()].trim().to_string();
        let action = match parsed.statement {
            SyntaxStatement::Command(expr) => Action::Eval(self.expr(&expr)?),
            SyntaxStatement::Assign {
                target,
                offset,
                value,
            } => {
                let entry = self.lookup(&target, offset)?;
                if !entry.is_writable() {
                    return Err(self
                        .lines
                        .error(CompileErrorKind::NotAssignable { name: target }, offset));
                }
                let value_offset = value.offset();
                let value = self.expr(&value)?;
                let expected = entry.signature().returns;
                if !expected.accepts(value.ty()) {
                    return Err(self.lines.error(
                        CompileErrorKind::TypeMismatch {
                            name: entry.name().to_string(),
                            index: 1,
                            expected,
                            found: value.ty(),
                        },
                        value_offset,
                    ));
                }
                Action::Assign { entry, value }
            }
        };
        Ok(Statement {
            source: text,
            location,
            action,
        })
    }

    fn expr(&self, expr: &SyntaxExpr) -> Result<Expr<C>, CompileError> {
        match expr {
            SyntaxExpr::Literal { value, .. } => Ok(Expr::Literal(match value {
                Literal::Int(v) => Value::Int(*v),
                Literal::Float(v) => Value::Float(*v),
                Literal::Bool(v) => Value::Bool(*v),
                Literal::Str(v) => Value::String(v.clone()),
            })),
            SyntaxExpr::Ident { name, offset } => {
                let entry = self.lookup(name, *offset)?;
                match entry.kind() {
                    EntryKind::Value => Ok(Expr::Read(entry)),
                    EntryKind::Function => self.call(entry, &[], *offset, *offset),
                }
            }
            SyntaxExpr::Call { name, offset, args } => {
                let entry = self.lookup(name, *offset)?;
                let end = args.last().map(SyntaxExpr::offset).unwrap_or(*offset);
                self.call(entry, args, *offset, end)
            }
        }
    }

    fn call(
        &self,
        entry: Arc<RegistryEntry<C>>,
        args: &[SyntaxExpr],
        offset: usize,
        end: usize,
    ) -> Result<Expr<C>, CompileError> {
        let params = &entry.signature().params;
        if args.len() != params.len() {
            let (index, at) = if args.len() < params.len() {
                (args.len() + 1, end)
            } else {
                (params.len() + 1, args[params.len()].offset())
            };
            return Err(self.lines.error(
                CompileErrorKind::Arity {
                    name: entry.name().to_string(),
                    expected: params.len(),
                    found: args.len(),
                    index,
                },
                at.max(offset),
            ));
        }

        let mut resolved = Vec::with_capacity(args.len());
        for (index, (arg, expected)) in args.iter().zip(params.iter()).enumerate() {
            let value = self.expr(arg)?;
            if !expected.accepts(value.ty()) {
                return Err(self.lines.error(
                    CompileErrorKind::TypeMismatch {
                        name: entry.name().to_string(),
                        index: index + 1,
                        expected: *expected,
                        found: value.ty(),
                    },
                    arg.offset(),
                ));
            }
            resolved.push(value);
        }
        Ok(Expr::Call {
            entry,
            args: resolved,
        })
    }

    fn lookup(&self, name: &str, offset: usize) -> Result<Arc<RegistryEntry<C>>, CompileError> {
        self.registry.resolve(name).cloned().map_err(|_| {
            self.lines.error(
                CompileErrorKind::UnknownIdentifier {
                    name: name.to_string(),
                },
                offset,
            )
        })
    }
}

/// Maps byte offsets to line/column pairs.
struct LineIndex<'a> {
    source: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(index, _)| index + 1));
        Self { source, starts }
    }

    fn locate(&self, offset: usize) -> Location {
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let column = self.source[self.starts[line]..offset].chars().count() + 1;
        Location {
            line: line + 1,
            column,
        }
    }

    fn line_text(&self, line: usize) -> &'a str {
        let start = self.starts[line - 1];
        let end = self
            .starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.source.len());
        self.source[start..end].trim_end_matches('\r')
    }

    fn error(&self, kind: CompileErrorKind, offset: usize) -> CompileError {
        let location = self.locate(offset.min(self.source.len()));
        CompileError {
            kind,
            location,
            line_text: self.line_text(location.line).to_string(),
        }
    }
}
