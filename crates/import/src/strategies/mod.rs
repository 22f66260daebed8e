//! Built-in import strategies.

mod component_breakdown;
mod price_list;
mod raw_line_items;

pub use component_breakdown::ComponentBreakdown;
pub use price_list::PriceList;
pub use raw_line_items::RawLineItems;

use crate::error::ImportError;

/// Extract a required string field from a chunk payload.
fn payload_str<'a>(payload: &'a serde_json::Value, field: &str) -> Result<&'a str, ImportError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ImportError::Strategy(format!("chunk payload missing '{field}'")))
}

fn payload_u64(payload: &serde_json::Value, field: &str) -> Result<u64, ImportError> {
    payload
        .get(field)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ImportError::Strategy(format!("chunk payload missing '{field}'")))
}

/// A CSV row as a JSON object keyed by header name.
fn row_object(headers: &[String], row: &[String]) -> serde_json::Value {
    let mut object = serde_json::Map::with_capacity(headers.len());
    for (i, header) in headers.iter().enumerate() {
        let value = row.get(i).map(String::as_str).unwrap_or("");
        object.insert(header.clone(), serde_json::Value::String(value.to_string()));
    }
    serde_json::Value::Object(object)
}

/// Lenient numeric parse for money-ish columns; empty and unparseable
/// cells become None rather than failing the chunk.
fn parse_amount(cell: Option<&String>) -> Option<f64> {
    let cell = cell?.trim().replace(',', "");
    if cell.is_empty() {
        return None;
    }
    cell.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_tolerates_formatting() {
        assert_eq!(parse_amount(Some(&"1,234.50".to_string())), Some(1234.5));
        assert_eq!(parse_amount(Some(&"  7 ".to_string())), Some(7.0));
        assert_eq!(parse_amount(Some(&"".to_string())), None);
        assert_eq!(parse_amount(Some(&"n/a".to_string())), None);
        assert_eq!(parse_amount(None), None);
    }

    #[test]
    fn test_row_object_pads_short_rows() {
        let headers = vec!["A".to_string(), "B".to_string()];
        let object = row_object(&headers, &["x".to_string()]);
        assert_eq!(object["A"], "x");
        assert_eq!(object["B"], "");
    }
}
