use crate::syntax::Token;
use thiserror::Error;

/// The single failure value produced by every stage of the pipeline.
///
/// `tokens` points at the offending source locations so external tooling can
/// format a message; the compiler itself never recovers, the first error
/// aborts the pipeline.
#[derive(Debug, Error, PartialEq)]
#[error("{kind}{}", location(.tokens))]
pub struct CompileError {
    pub kind: ErrorKind,
    pub tokens: Vec<Token>,
}

fn location(tokens: &[Token]) -> String {
    match tokens.first() {
        Some(token) => format!(" at offset {} (`{}`)", token.offset, token.text),
        None => String::new(),
    }
}

impl CompileError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            tokens: vec![],
        }
    }

    pub fn at(kind: ErrorKind, token: &Token) -> Self {
        Self {
            kind,
            tokens: vec![token.clone()],
        }
    }

    /// An error with a primary location and additional related locations,
    /// e.g. unreachable code plus the escape that caused it.
    pub fn related(kind: ErrorKind, tokens: Vec<Token>) -> Self {
        Self { kind, tokens }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
    // --- lexing / parsing
    #[error("mysterious symbol")]
    MysteriousSymbol,
    #[error("misplaced terminator or unfinished expression")]
    MisplacedTerminatorOrUnfinishedExpression,
    #[error("child type constraint violation")]
    ChildTypeConstraintViolation,
    #[error("parent type constraint violation")]
    ParentTypeConstraintViolation,

    // --- resolution
    #[error("unresolvable reference")]
    UnresolvableReference,
    #[error("duplicate definition")]
    DuplicateDefinition,
    #[error("duplicate default memory")]
    DuplicateDefaultMemory,
    #[error("duplicate default table")]
    DuplicateDefaultTable,
    #[error("bad reference kind")]
    BadReferenceKind,

    // --- validation
    #[error("assignment to immutable")]
    AssignmentToImmutable,
    #[error("assignment type mismatch")]
    AssignmentTypeMismatch,
    #[error("32-bit address required")]
    AddressMustBe32Bit,
    #[error("bad condition")]
    BadCondition,
    #[error("inconsistent type")]
    InconsistentType,
    #[error("inconsistent boolean type")]
    InconsistentBooleanType,
    #[error("inconsistent loop yield type")]
    InconsistentLoopYieldType,
    #[error("non-numeric boolean operand")]
    NonNumericBooleanOperand,
    #[error("undefined operator")]
    UndefinedOperator,
    #[error("wrong argument count")]
    WrongArgumentCount,
    #[error("function signature mismatch")]
    FunctionSignatureMismatch,
    #[error("implicit return type mismatch")]
    ImplicitReturnTypeMismatch,
    #[error("explicit return type mismatch")]
    ExplicitReturnTypeMismatch,
    #[error("infinite loop")]
    InfiniteLoop,
    #[error("break, yield or continue outside a loop")]
    JumpOutsideLoop,
    #[error("integer literal out of range")]
    IntegerLiteralOutOfRange,
    #[error("bad initializer")]
    BadInitializer,
    #[error("bad import source")]
    BadImportSource,
    #[error("unintelligible size")]
    UnintelligibleSize,
    #[error("export of a non-existent definition")]
    NonExistentExport,
    #[error("export of a mutable definition")]
    MutableExport,
    #[error("unreachable code")]
    UnreachableCode,
    #[error("bad placement for a function definition")]
    BadFunctionPlacement,
    #[error("no memory defined for pointer")]
    NoMemoryForPointer,
    #[error("no table defined for function pointer")]
    NoTableForFunctionPointer,

    // --- emission
    #[error("integer out of range in code generation")]
    CodegenIntegerOutOfRange,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Kind;

    #[test]
    fn display_includes_the_first_token() {
        let token = Token {
            kind: Kind::Variable,
            text: "foo".to_string(),
            offset: 12,
            len: 3,
        };
        let error = CompileError::at(ErrorKind::UnresolvableReference, &token);
        assert_eq!(
            error.to_string(),
            "unresolvable reference at offset 12 (`foo`)"
        );

        let error = CompileError::new(ErrorKind::InfiniteLoop);
        assert_eq!(error.to_string(), "infinite loop");
    }
}
