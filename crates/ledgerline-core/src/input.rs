//! Transaction batch files (CSV and JSON)
//!
//! Readers are lenient per row: an amount or date that does not parse is
//! carried through (as NaN / None) so the row resolves UNRESOLVED in the
//! batch instead of rejecting the whole file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::TransactionRecord;

/// Read a batch file, picking the format from the extension
pub fn read_transactions(path: &Path) -> Result<Vec<TransactionRecord>> {
    let file = File::open(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => parse_json(file),
        Some(ext) if ext.eq_ignore_ascii_case("csv") => parse_csv(file),
        _ => Err(Error::Input(format!(
            "Unsupported transaction file {} (expected .csv or .json)",
            path.display()
        ))),
    }
}

/// Parse a JSON array of transaction records
///
/// Only a document that is not an array fails; each row is read leniently.
pub fn parse_json<R: Read>(reader: R) -> Result<Vec<TransactionRecord>> {
    let rows: Vec<Value> = serde_json::from_reader(reader)?;
    Ok(rows.into_iter().map(TransactionRecord::from_json).collect())
}

/// Column positions resolved from the header row
#[derive(Debug, Default)]
struct Columns {
    id: Option<usize>,
    description: Option<usize>,
    merchant: Option<usize>,
    amount: Option<usize>,
    date: Option<usize>,
    account: Option<usize>,
    is_business: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self> {
        let mut columns = Columns::default();
        for (i, header) in headers.iter().enumerate() {
            match header.trim().to_lowercase().as_str() {
                "id" | "transaction_id" => columns.id = Some(i),
                "description" => columns.description = Some(i),
                "merchant" | "merchant_name" => columns.merchant = Some(i),
                "amount" => columns.amount = Some(i),
                "date" => columns.date = Some(i),
                "account" | "account_id" => columns.account = Some(i),
                "is_business" => columns.is_business = Some(i),
                _ => {}
            }
        }
        if columns.id.is_none() || columns.amount.is_none() {
            return Err(Error::Input(
                "CSV header must include id and amount columns".to_string(),
            ));
        }
        Ok(columns)
    }
}

/// Parse CSV with a header row naming the transaction fields
///
/// Columns the reader does not recognize are kept as record metadata.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<TransactionRecord>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let columns = Columns::from_headers(&headers)?;
    let mut records = Vec::new();

    for result in rdr.records() {
        let row = result?;
        let field = |index: Option<usize>| -> Option<String> {
            index
                .and_then(|i| row.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let id = field(columns.id).unwrap_or_default();
        let amount = field(columns.amount)
            .as_deref()
            .and_then(parse_amount)
            .unwrap_or(f64::NAN);
        if amount.is_nan() {
            debug!("Row {:?} has no parsable amount", id);
        }

        records.push(TransactionRecord {
            id,
            description: field(columns.description),
            merchant_name: field(columns.merchant),
            amount,
            date: field(columns.date).as_deref().and_then(parse_date),
            account_id: field(columns.account),
            is_business: field(columns.is_business).as_deref().and_then(parse_bool),
            metadata: extra_columns(&headers, &row, &columns),
        });
    }

    Ok(records)
}

fn extra_columns(headers: &StringRecord, row: &StringRecord, columns: &Columns) -> Option<Value> {
    let known = [
        columns.id,
        columns.description,
        columns.merchant,
        columns.amount,
        columns.date,
        columns.account,
        columns.is_business,
    ];
    let mut map = Map::new();
    for (i, header) in headers.iter().enumerate() {
        if known.contains(&Some(i)) {
            continue;
        }
        if let Some(value) = row.get(i).filter(|v| !v.is_empty()) {
            map.insert(header.to_string(), Value::String(value.to_string()));
        }
    }
    (!map.is_empty()).then_some(Value::Object(map))
}

/// Parse a date in the common feed formats
fn parse_date(s: &str) -> Option<NaiveDate> {
    let formats = ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%m-%d-%Y"];
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s.trim(), fmt).ok())
}

/// Parse an amount, handling currency symbols, separators and parentheses
fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .replace(['$', ',', ' '], "")
        .replace('(', "-")
        .replace(')', "");
    cleaned.parse::<f64>().ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("(100.00)"), Some(-100.0));
        assert_eq!(parse_amount("n/a"), None);
    }

    #[test]
    fn test_parse_csv() {
        let csv = "id,date,description,merchant,amount,memo\n\
                   t1,2024-01-15,STARBUCKS #1234,,-5.50,latte\n\
                   t2,01/16/2024,NETFLIX.COM,Netflix,15.99,\n";
        let records = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].id, "t1");
        assert_eq!(records[0].description.as_deref(), Some("STARBUCKS #1234"));
        assert!(records[0].merchant_name.is_none());
        assert_eq!(records[0].amount, -5.5);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(records[0].metadata, Some(serde_json::json!({"memo": "latte"})));

        assert_eq!(records[1].merchant_name.as_deref(), Some("Netflix"));
        assert_eq!(records[1].date, NaiveDate::from_ymd_opt(2024, 1, 16));
        assert!(records[1].metadata.is_none());
    }

    #[test]
    fn test_bad_amount_kept_as_nan() {
        let csv = "id,description,amount\nt1,COFFEE,abc\n";
        let records = parse_csv(csv.as_bytes()).unwrap();
        assert!(records[0].amount.is_nan());
    }

    #[test]
    fn test_missing_required_columns() {
        let csv = "description,amount\nCOFFEE,1.00\n";
        assert!(matches!(parse_csv(csv.as_bytes()), Err(Error::Input(_))));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"[{"id": "t1", "description": "COFFEE", "amount": 4.5}]"#;
        let records = parse_json(json.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, 4.5);
        assert!(records[0].merchant_name.is_none());
    }

    #[test]
    fn test_parse_json_bad_rows_kept() {
        let json = r#"[
            {"id": "t1", "description": "COFFEE", "amount": 4.5},
            {"id": "t2", "description": "TEA", "amount": null},
            {"id": "t3", "description": "JUICE", "amount": "NaN"},
            {"id": "t4", "description": "WATER"}
        ]"#;
        let records = parse_json(json.as_bytes()).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].amount, 4.5);
        assert!(records[1..].iter().all(|r| r.amount.is_nan()));
        assert_eq!(records[2].id, "t3");
    }

    #[test]
    fn test_parse_json_requires_array() {
        assert!(parse_json(r#"{"id": "t1"}"#.as_bytes()).is_err());
    }
}
