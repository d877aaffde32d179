use arrow_schema::DataType;

pub fn is_integer(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    )
}

pub fn is_floating(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Float16 | DataType::Float32 | DataType::Float64
    )
}

pub fn is_numeric(data_type: &DataType) -> bool {
    is_integer(data_type)
        || is_floating(data_type)
        || matches!(data_type, DataType::Decimal128(_, _))
}

/// Result type of an arithmetic operator applied to two inputs.
pub fn arithmetic_type(left: &DataType, right: &DataType) -> DataType {
    match (left, right) {
        (DataType::Null, other) | (other, DataType::Null) if is_numeric(other) => {
            widen(other)
        }
        (l, r) if is_integer(l) && is_integer(r) => DataType::Int64,
        _ => DataType::Float64,
    }
}

fn widen(data_type: &DataType) -> DataType {
    if is_integer(data_type) {
        DataType::Int64
    } else {
        DataType::Float64
    }
}

/// Common type of two union branches at the same position.
pub fn unify_types(left: &DataType, right: &DataType) -> DataType {
    match (left, right) {
        (l, r) if l == r => l.clone(),
        (DataType::Null, other) | (other, DataType::Null) => other.clone(),
        (l, r) if is_integer(l) && is_integer(r) => DataType::Int64,
        (l, r) if is_numeric(l) && is_numeric(r) => DataType::Float64,
        _ => DataType::Utf8,
    }
}
