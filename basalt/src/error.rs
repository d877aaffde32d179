use thiserror::Error;

pub type OptResult<T> = anyhow::Result<T>;

/// Errors raised while building or optimizing a statement.
///
/// The variants are grouped into classes (see [`ErrorClass`]) whose numeric codes stay
/// stable across releases, so that callers can map them to client-facing error codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptimizerError {
    #[error("Operand should contain {0} column(s)")]
    OperandColumns(usize),
    #[error("Wildcard fields without any table name appears in wrong place")]
    InvalidWildCard,
    #[error("Row expression is not allowed in {0}")]
    InvalidRowExpression(&'static str),
    #[error("Cartesian product is unsupported")]
    CartesianProductUnsupported,
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Invalid use of group function")]
    InvalidGroupFuncUse,
    #[error("Illegal reference: {0}")]
    IllegalReference(String),
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
    #[error("Column '{0}' is ambiguous")]
    AmbiguousColumn(String),
    #[error("Table '{0}' doesn't exist")]
    UnknownTable(String),
    #[error("Internal optimizer error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    OperandColumns,
    InvalidWildCard,
    Unsupported,
    InvalidGroupFuncUse,
    IllegalReference,
    Internal,
}

impl ErrorClass {
    pub fn code(&self) -> u16 {
        match self {
            ErrorClass::OperandColumns => 1,
            ErrorClass::InvalidWildCard => 3,
            ErrorClass::Unsupported => 4,
            ErrorClass::InvalidGroupFuncUse => 5,
            ErrorClass::IllegalReference => 6,
            ErrorClass::Internal => 0,
        }
    }
}

impl OptimizerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OptimizerError::OperandColumns(_) => ErrorClass::OperandColumns,
            OptimizerError::InvalidWildCard | OptimizerError::InvalidRowExpression(_) => {
                ErrorClass::InvalidWildCard
            }
            OptimizerError::CartesianProductUnsupported | OptimizerError::Unsupported(_) => {
                ErrorClass::Unsupported
            }
            OptimizerError::InvalidGroupFuncUse => ErrorClass::InvalidGroupFuncUse,
            OptimizerError::IllegalReference(_)
            | OptimizerError::UnknownColumn(_)
            | OptimizerError::AmbiguousColumn(_)
            | OptimizerError::UnknownTable(_) => ErrorClass::IllegalReference,
            OptimizerError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn code(&self) -> u16 {
        self.class().code()
    }
}

/// Finds the optimizer error carried anywhere in a context chain.
pub fn optimizer_error(err: &anyhow::Error) -> Option<&OptimizerError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<OptimizerError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_codes() {
        assert_eq!(1, OptimizerError::OperandColumns(2).code());
        assert_eq!(3, OptimizerError::InvalidRowExpression("ORDER BY").code());
        assert_eq!(4, OptimizerError::CartesianProductUnsupported.code());
        assert_eq!(5, OptimizerError::InvalidGroupFuncUse.code());
        assert_eq!(6, OptimizerError::UnknownColumn("a".to_string()).code());
        assert_eq!(
            "Operand should contain 1 column(s)",
            OptimizerError::OperandColumns(1).to_string()
        );
    }

    #[test]
    fn test_find_error_through_context() {
        let result: OptResult<()> = Err(anyhow::Error::from(OptimizerError::InvalidWildCard))
            .context("build plan")
            .context("optimize");
        let err = result.unwrap_err();
        assert_eq!(
            Some(&OptimizerError::InvalidWildCard),
            optimizer_error(&err)
        );
    }
}
