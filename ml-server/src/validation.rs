//! Validation of client-supplied embeddings and model options.

use ndarray::Array2;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::ModelOptions;

/// Smallest accepted embedding dimensionality.
pub const MIN_DIMENSION: usize = 10;

/// Turn a JSON array of numbers (one vector) or array of equal-length number
/// arrays (a batch) into a matrix with one row per vector.
pub fn validate_embeddings(value: &Value) -> Result<Array2<f32>> {
    let embeddings = match value {
        Value::Array(items) if items.iter().all(Value::is_array) && !items.is_empty() => {
            let rows = items
                .iter()
                .map(|item| numeric_row(item, 2))
                .collect::<Result<Vec<_>>>()?;
            let ncols = rows[0].len();
            if rows.iter().any(|row| row.len() != ncols) {
                return Err(Error::InvalidRequest(
                    "Embeddings must all have the same dimension".to_string(),
                ));
            }
            let nrows = rows.len();
            Array2::from_shape_vec((nrows, ncols), rows.concat())
                .map_err(|e| Error::InvalidRequest(e.to_string()))?
        }
        Value::Array(_) => {
            let row = numeric_row(value, 1)?;
            let ncols = row.len();
            Array2::from_shape_vec((1, ncols), row)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?
        }
        _ => return Err(axes_error(0)),
    };

    if embeddings.ncols() < MIN_DIMENSION {
        return Err(Error::InvalidRequest(format!(
            "Dimension size must be at least {}; got {}",
            MIN_DIMENSION,
            embeddings.ncols()
        )));
    }
    Ok(embeddings)
}

/// Parse one array of numbers found at nesting depth `depth`.
fn numeric_row(value: &Value, depth: usize) -> Result<Vec<f32>> {
    let Value::Array(items) = value else {
        return Err(axes_error(depth - 1));
    };

    items
        .iter()
        .map(|item| match item {
            Value::Number(n) => n
                .as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::InvalidRequest(format!("Invalid embedding value: {}", n))),
            Value::Array(_) => Err(axes_error(depth + axes(item))),
            other => Err(Error::InvalidRequest(format!(
                "Embeddings must be numeric; got {}",
                other
            ))),
        })
        .collect()
}

/// Number of array axes of a JSON value, following first elements.
fn axes(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.first().map_or(0, axes),
        _ => 0,
    }
}

fn axes_error(axes: usize) -> Error {
    Error::InvalidRequest(format!(
        "Expected one or two axes for embeddings; got {}",
        axes
    ))
}

/// Parse the `options` form field. An empty string means no options.
pub fn parse_options(options: &str) -> Result<ModelOptions> {
    if options.trim().is_empty() {
        return Ok(ModelOptions::new());
    }

    match serde_json::from_str::<Value>(options) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(Error::InvalidRequest(format!(
            "Invalid options JSON: {}",
            options
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn floats(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32 * 0.5).collect()
    }

    fn message(result: Result<Array2<f32>>) -> String {
        match result {
            Err(Error::InvalidRequest(msg)) => msg,
            other => panic!("expected invalid request, got {:?}", other.map(|a| a.dim())),
        }
    }

    #[test]
    fn test_single_vector_is_promoted() {
        let embeddings = validate_embeddings(&json!(floats(10))).unwrap();

        assert_eq!(embeddings.dim(), (1, 10));
        assert_eq!(embeddings[[0, 3]], 1.5);
    }

    #[test]
    fn test_batch_is_accepted() {
        let embeddings = validate_embeddings(&json!([floats(12), floats(12), floats(12)])).unwrap();

        assert_eq!(embeddings.dim(), (3, 12));
    }

    #[test]
    fn test_scalar_is_rejected() {
        let msg = message(validate_embeddings(&json!(1.0)));
        assert_eq!(msg, "Expected one or two axes for embeddings; got 0");
    }

    #[test]
    fn test_three_axes_are_rejected() {
        let msg = message(validate_embeddings(&json!([[floats(10)], [floats(10)]])));
        assert_eq!(msg, "Expected one or two axes for embeddings; got 3");
    }

    #[test]
    fn test_small_dimension_is_rejected() {
        let msg = message(validate_embeddings(&json!([floats(9)])));
        assert_eq!(msg, "Dimension size must be at least 10; got 9");

        let msg = message(validate_embeddings(&json!(floats(3))));
        assert_eq!(msg, "Dimension size must be at least 10; got 3");
    }

    #[test]
    fn test_empty_array_is_rejected() {
        let msg = message(validate_embeddings(&json!([])));
        assert_eq!(msg, "Dimension size must be at least 10; got 0");
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        let msg = message(validate_embeddings(&json!([floats(10), floats(11)])));
        assert!(msg.contains("same dimension"));
    }

    #[test]
    fn test_mixed_nesting_is_rejected() {
        assert!(validate_embeddings(&json!([1.0, [2.0]])).is_err());
        assert!(validate_embeddings(&json!([[1.0], 2.0])).is_err());
    }

    #[test]
    fn test_non_numeric_is_rejected() {
        let msg = message(validate_embeddings(&json!(vec!["a"; 10])));
        assert!(msg.contains("numeric"));

        assert!(validate_embeddings(&json!({"embeddings": floats(10)})).is_err());
    }

    #[test]
    fn test_parse_options() {
        assert!(parse_options("").unwrap().is_empty());
        assert!(parse_options("{}").unwrap().is_empty());

        let options = parse_options(r#"{"batchSize": 4}"#).unwrap();
        assert_eq!(options.get("batchSize"), Some(&json!(4)));
    }

    #[test]
    fn test_parse_options_rejects_bad_json() {
        for bad in ["{", "[1, 2]", "\"text\"", "not json"] {
            let result = parse_options(bad);
            assert!(
                matches!(&result, Err(Error::InvalidRequest(msg)) if msg.starts_with("Invalid options JSON")),
                "accepted {}",
                bad
            );
        }
    }
}
