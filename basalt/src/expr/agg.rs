use std::fmt::{Display, Formatter};

use arrow_schema::DataType;
use strum_macros::{AsRefStr, EnumString};

use super::types::is_integer;
use super::ScalarExpr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Max,
    Min,
    FirstRow,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AggregateCall {
    pub func: AggFunc,
    /// Empty for `COUNT(*)`.
    pub args: Vec<ScalarExpr>,
    pub distinct: bool,
}

impl AggregateCall {
    pub fn new(func: AggFunc, args: Vec<ScalarExpr>, distinct: bool) -> Self {
        Self {
            func,
            args,
            distinct,
        }
    }

    pub fn first_row(arg: ScalarExpr) -> Self {
        Self::new(AggFunc::FirstRow, vec![arg], false)
    }

    pub fn return_type(&self) -> DataType {
        let arg_type = self
            .args
            .first()
            .map(|arg| arg.data_type())
            .unwrap_or(DataType::Null);
        match self.func {
            AggFunc::Count => DataType::Int64,
            AggFunc::Sum => match arg_type {
                t if is_integer(&t) => DataType::Int64,
                DataType::Decimal128(_, scale) => DataType::Decimal128(38, scale),
                _ => DataType::Float64,
            },
            AggFunc::Avg => DataType::Float64,
            AggFunc::Max | AggFunc::Min | AggFunc::FirstRow => arg_type,
        }
    }

    /// Whether the aggregate can be split into a partial and a combining stage.
    pub fn is_decomposable(&self) -> bool {
        !self.distinct
            && matches!(
                self.func,
                AggFunc::Count | AggFunc::Sum | AggFunc::Max | AggFunc::Min | AggFunc::FirstRow
            )
    }

    /// The aggregate used to combine partial results produced by `self`.
    pub fn combining_func(&self) -> AggFunc {
        match self.func {
            AggFunc::Count => AggFunc::Sum,
            func => func,
        }
    }

    /// `COUNT(*)` or a count of a non null constant.
    pub fn is_count_star(&self) -> bool {
        self.func == AggFunc::Count
            && self.args.iter().all(|arg| match arg {
                ScalarExpr::Constant(v) => !v.is_null(),
                _ => false,
            })
    }
}

impl Display for AggregateCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.func.as_ref())?;
        if self.distinct {
            write!(f, "distinct ")?;
        }
        if self.args.is_empty() {
            write!(f, "*")?;
        } else {
            let args = self.args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
            write!(f, "{}", args.join(", "))?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lit_i64;
    use std::str::FromStr;

    #[test]
    fn test_parse_func_name() {
        assert_eq!(AggFunc::Sum, AggFunc::from_str("SUM").unwrap());
        assert_eq!(AggFunc::FirstRow, AggFunc::from_str("first_row").unwrap());
        assert!(AggFunc::from_str("concat").is_err());
    }

    #[test]
    fn test_return_type() {
        let int_col = ScalarExpr::column(1, DataType::Int32);
        let sum = AggregateCall::new(AggFunc::Sum, vec![int_col.clone()], false);
        assert_eq!(DataType::Int64, sum.return_type());
        let max = AggregateCall::new(AggFunc::Max, vec![int_col], false);
        assert_eq!(DataType::Int32, max.return_type());
        let count = AggregateCall::new(AggFunc::Count, vec![], false);
        assert_eq!(DataType::Int64, count.return_type());
        assert!(count.is_count_star());
        assert!(AggregateCall::new(AggFunc::Count, vec![lit_i64(1)], false).is_count_star());
        assert_eq!("count(*)", count.to_string());
    }

    #[test]
    fn test_decomposable() {
        let col = ScalarExpr::column(1, DataType::Int64);
        assert!(AggregateCall::new(AggFunc::Count, vec![col.clone()], false).is_decomposable());
        assert!(!AggregateCall::new(AggFunc::Count, vec![col.clone()], true).is_decomposable());
        assert!(!AggregateCall::new(AggFunc::Avg, vec![col], false).is_decomposable());
    }
}
