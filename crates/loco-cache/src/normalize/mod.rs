//! Normalizer: raw sheet grids to validated records
//!
//! Every function here is a pure transformation of its input grid. Structural
//! problems with a sheet (no header row, no key column) are errors; problems
//! with a single row are collected as [`RowIssue`]s and the row is skipped,
//! so one bad row never costs the rest of the sheet.

mod dates;
mod header;

pub use dates::parse_date;
pub use header::{header_token, ColumnSpec, HeaderMap};

use std::collections::HashSet;
use thiserror::Error;

use crate::model::{DetailRecord, FailureRecord, LocoKey, ScheduleRecord};

/// Key column of the details and modifications sheets
pub const DETAIL_KEY: ColumnSpec = ColumnSpec::with_aliases("Loco No.", &["Loco No", "Loco Number"]);

pub mod schedule_columns {
    use super::ColumnSpec;

    pub const KEY: ColumnSpec = ColumnSpec::with_aliases("Loco No.", &["Loco No", "Loco Number"]);
    pub const INCOMING_DATE: ColumnSpec = ColumnSpec::new("Incoming Date");
    pub const SCH: ColumnSpec = ColumnSpec::with_aliases("Sch", &["Schedule"]);
    pub const OUTGOING_DATE: ColumnSpec = ColumnSpec::new("Outgoing Date");
}

pub mod failure_columns {
    use super::ColumnSpec;

    pub const KEY: ColumnSpec = ColumnSpec::with_aliases("LOCO No.", &["Loco No", "Loco Number"]);
    pub const DATE_FAILED: ColumnSpec = ColumnSpec::new("Date Failed");
    pub const ICMS_MESSAGE: ColumnSpec = ColumnSpec::with_aliases("ICMS/ Message", &["ICMS Message"]);
    pub const MU_WITH: ColumnSpec = ColumnSpec::new("MU with");
    pub const DIV: ColumnSpec = ColumnSpec::with_aliases("Div", &["Division"]);
    pub const RLY: ColumnSpec = ColumnSpec::with_aliases("Rly", &["Railway"]);
    pub const BRIEF_MESSAGE: ColumnSpec = ColumnSpec::new("Brief Message");
    pub const CAUSE_OF_FAILURE: ColumnSpec = ColumnSpec::new("Cause of Failure");
    pub const COMPONENT: ColumnSpec = ColumnSpec::new("Component");
    pub const SYSTEM: ColumnSpec = ColumnSpec::new("System");
}

/// Structural problem that makes a whole sheet unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetError {
    #[error("sheet '{sheet}' is empty (no header row)")]
    EmptySheet { sheet: String },

    #[error("sheet '{sheet}' has no '{column}' column")]
    MissingColumn { sheet: String, column: &'static str },
}

/// Why a row was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowIssueReason {
    #[error("row has data but no loco number")]
    MissingKey,

    #[error("'{0}' is not a usable loco number")]
    InvalidKey(String),

    #[error("loco {0} already appeared earlier in the sheet")]
    DuplicateKey(LocoKey),
}

/// A skipped row, identified by its 1-based spreadsheet row number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIssue {
    pub row: usize,
    pub reason: RowIssueReason,
}

/// A record together with the key it belongs to and its source row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyedRow<T> {
    pub row: usize,
    pub key: LocoKey,
    pub record: T,
}

/// Output of normalizing one sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<T> {
    pub rows: Vec<KeyedRow<T>>,
    pub issues: Vec<RowIssue>,
    /// Optional columns the header row did not contain
    pub missing_columns: Vec<&'static str>,
}

/// Trimmed cell text, `None` when the cell is absent or blank.
pub fn clean_cell(row: &[String], column: Option<usize>) -> Option<String> {
    column
        .and_then(|i| row.get(i))
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Header row plus data rows of a grid, skipping leading blank rows.
struct Sheet<'g> {
    name: &'g str,
    header: HeaderMap,
    /// Spreadsheet row number of the header
    header_row: usize,
    data: &'g [Vec<String>],
}

impl<'g> Sheet<'g> {
    fn open(name: &'g str, grid: &'g [Vec<String>]) -> Result<Self, SheetError> {
        let position = grid
            .iter()
            .position(|row| !is_blank(row))
            .ok_or_else(|| SheetError::EmptySheet {
                sheet: name.to_string(),
            })?;

        Ok(Self {
            name,
            header: HeaderMap::new(&grid[position]),
            header_row: position + 1,
            data: &grid[position + 1..],
        })
    }

    fn require(&self, column: &ColumnSpec) -> Result<usize, SheetError> {
        self.header
            .resolve(column)
            .ok_or_else(|| SheetError::MissingColumn {
                sheet: self.name.to_string(),
                column: column.name,
            })
    }

    fn optional(&self, column: &ColumnSpec, missing: &mut Vec<&'static str>) -> Option<usize> {
        let resolved = self.header.resolve(column);
        if resolved.is_none() {
            missing.push(column.name);
        }
        resolved
    }

    /// Walk the data rows, keying each by `key_column` and building a record
    /// with `build`. Blank rows vanish; rows without a usable key become issues.
    fn collect<T>(
        &self,
        key_column: usize,
        missing_columns: Vec<&'static str>,
        mut build: impl FnMut(&LocoKey, &[String]) -> T,
    ) -> Normalized<T> {
        let mut rows = Vec::new();
        let mut issues = Vec::new();

        for (offset, cells) in self.data.iter().enumerate() {
            let row = self.header_row + 1 + offset;
            if is_blank(cells) {
                continue;
            }

            let Some(raw_key) = clean_cell(cells, Some(key_column)) else {
                issues.push(RowIssue {
                    row,
                    reason: RowIssueReason::MissingKey,
                });
                continue;
            };

            match LocoKey::parse(&raw_key) {
                Some(key) => {
                    let record = build(&key, cells);
                    rows.push(KeyedRow { row, key, record });
                }
                None => issues.push(RowIssue {
                    row,
                    reason: RowIssueReason::InvalidKey(raw_key),
                }),
            }
        }

        Normalized {
            rows,
            issues,
            missing_columns,
        }
    }
}

/// Normalize a wide attribute sheet (details or modifications).
///
/// Each non-empty cell of a row becomes a field/value pair in column order,
/// except the key column, columns named in `excluded_columns` and columns with
/// a blank header. Only the first row of a key is used; later rows for the
/// same key are reported as duplicates.
pub fn normalize_attributes(
    sheet: &str,
    grid: &[Vec<String>],
    excluded_columns: &[String],
) -> Result<Normalized<Vec<DetailRecord>>, SheetError> {
    let sheet = Sheet::open(sheet, grid)?;
    let key_column = sheet.require(&DETAIL_KEY)?;

    let excluded: HashSet<String> = excluded_columns.iter().map(|c| header_token(c)).collect();
    let attribute_columns: Vec<(usize, &str)> = sheet
        .header
        .names()
        .iter()
        .enumerate()
        .filter(|(i, name)| {
            *i != key_column && !name.is_empty() && !excluded.contains(&header_token(name))
        })
        .map(|(i, name)| (i, name.as_str()))
        .collect();

    let mut normalized = sheet.collect(key_column, Vec::new(), |_, cells| {
        attribute_columns
            .iter()
            .filter_map(|&(i, field)| {
                clean_cell(cells, Some(i)).map(|value| DetailRecord {
                    field: field.to_string(),
                    value,
                })
            })
            .collect::<Vec<_>>()
    });

    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(normalized.rows.len());
    for row in normalized.rows {
        if seen.insert(row.key.clone()) {
            rows.push(row);
        } else {
            normalized.issues.push(RowIssue {
                row: row.row,
                reason: RowIssueReason::DuplicateKey(row.key),
            });
        }
    }
    normalized.issues.sort_by_key(|issue| issue.row);
    normalized.rows = rows;

    Ok(normalized)
}

/// Normalize the details sheet.
pub fn normalize_details(
    sheet: &str,
    grid: &[Vec<String>],
    excluded_columns: &[String],
) -> Result<Normalized<Vec<DetailRecord>>, SheetError> {
    normalize_attributes(sheet, grid, excluded_columns)
}

/// Normalize the maintenance schedules sheet.
pub fn normalize_schedules(
    sheet: &str,
    grid: &[Vec<String>],
) -> Result<Normalized<ScheduleRecord>, SheetError> {
    use schedule_columns::*;

    let sheet = Sheet::open(sheet, grid)?;
    let key_column = sheet.require(&KEY)?;

    let mut missing = Vec::new();
    let incoming = sheet.optional(&INCOMING_DATE, &mut missing);
    let sch = sheet.optional(&SCH, &mut missing);
    let outgoing = sheet.optional(&OUTGOING_DATE, &mut missing);

    Ok(sheet.collect(key_column, missing, |_, cells| ScheduleRecord {
        incoming_date: clean_cell(cells, incoming).and_then(|d| parse_date(&d)),
        sch: clean_cell(cells, sch),
        outgoing_date: clean_cell(cells, outgoing).and_then(|d| parse_date(&d)),
    }))
}

/// Normalize the traction failures sheet.
pub fn normalize_failures(
    sheet: &str,
    grid: &[Vec<String>],
) -> Result<Normalized<FailureRecord>, SheetError> {
    use failure_columns::*;

    let sheet = Sheet::open(sheet, grid)?;
    let key_column = sheet.require(&KEY)?;

    let mut missing = Vec::new();
    let date_failed = sheet.optional(&DATE_FAILED, &mut missing);
    let icms_message = sheet.optional(&ICMS_MESSAGE, &mut missing);
    let mu_with = sheet.optional(&MU_WITH, &mut missing);
    let div = sheet.optional(&DIV, &mut missing);
    let rly = sheet.optional(&RLY, &mut missing);
    let brief_message = sheet.optional(&BRIEF_MESSAGE, &mut missing);
    let cause_of_failure = sheet.optional(&CAUSE_OF_FAILURE, &mut missing);
    let component = sheet.optional(&COMPONENT, &mut missing);
    let system = sheet.optional(&SYSTEM, &mut missing);

    Ok(sheet.collect(key_column, missing, |key, cells| FailureRecord {
        date_failed: clean_cell(cells, date_failed).and_then(|d| parse_date(&d)),
        icms_message: clean_cell(cells, icms_message),
        loco_no: key.clone(),
        mu_with: clean_cell(cells, mu_with),
        div: clean_cell(cells, div),
        rly: clean_cell(cells, rly),
        brief_message: clean_cell(cells, brief_message),
        cause_of_failure: clean_cell(cells, cause_of_failure),
        component: clean_cell(cells, component),
        system: clean_cell(cells, system),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    fn excluded() -> Vec<String> {
        vec!["Type".to_string()]
    }

    #[test]
    fn test_details_become_ordered_field_value_pairs() {
        let sheet = grid(&[
            &["Loco No.", "Type", "Class", "Shed", "Status"],
            &["27865.0", "ELEC", "WAG7", " BIA ", ""],
        ]);

        let out = normalize_details("Loco_list", &sheet, &excluded()).unwrap();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].key.as_str(), "27865");
        assert_eq!(out.rows[0].row, 2);
        assert_eq!(
            out.rows[0].record,
            vec![
                DetailRecord {
                    field: "Class".to_string(),
                    value: "WAG7".to_string(),
                },
                DetailRecord {
                    field: "Shed".to_string(),
                    value: "BIA".to_string(),
                },
            ]
        );
        assert!(out.issues.is_empty());
    }

    #[test]
    fn test_details_duplicate_key_keeps_first_row() {
        let sheet = grid(&[
            &["Loco No.", "Shed"],
            &["27865", "BIA"],
            &["27865.0", "TKD"],
        ]);

        let out = normalize_details("Loco_list", &sheet, &[]).unwrap();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].record[0].value, "BIA");
        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].row, 3);
        assert!(matches!(
            out.issues[0].reason,
            RowIssueReason::DuplicateKey(_)
        ));
    }

    #[test]
    fn test_bad_keys_are_skipped_not_fatal() {
        let sheet = grid(&[
            &["Loco No. ", "Incoming Date ", "Sch ", "Outgoing Date "],
            &["27865", "01-02-2024", "IA", "03-02-2024"],
            &["", "01-02-2024", "IB", ""],
            &["", "", "", ""],
            &["nan", "01-02-2024", "IC", ""],
            &["27866", "garbage", "POH", ""],
        ]);

        let out = normalize_schedules("Loco_Schedules", &sheet).unwrap();

        assert_eq!(out.rows.len(), 2);
        assert_eq!(
            out.issues,
            vec![
                RowIssue {
                    row: 3,
                    reason: RowIssueReason::MissingKey,
                },
                RowIssue {
                    row: 5,
                    reason: RowIssueReason::InvalidKey("nan".to_string()),
                },
            ]
        );
        assert_eq!(out.rows[1].record.incoming_date, None);
        assert_eq!(out.rows[1].record.sch.as_deref(), Some("POH"));
        assert_eq!(
            out.rows[0].record.outgoing_date,
            NaiveDate::from_ymd_opt(2024, 2, 3)
        );
    }

    #[test]
    fn test_failures_map_all_fields() {
        let sheet = grid(&[
            &[
                "Date Failed ",
                "ICMS/ Message ",
                "LOCO No. ",
                "MU with ",
                "Div ",
                "Rly ",
                "Brief Message ",
                "Cause of Failure ",
                "Component ",
                "System ",
            ],
            &[
                "12/03/2024",
                "ICMS 4411",
                "27865.0",
                "27866",
                "BSP",
                "SECR",
                "TM flash",
                "Insulation failure",
                "TM",
                "Traction",
            ],
        ]);

        let out = normalize_failures("Traction_failures", &sheet).unwrap();
        let failure = &out.rows[0].record;

        assert_eq!(failure.loco_no.as_str(), "27865");
        assert_eq!(failure.date_failed, NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(failure.icms_message.as_deref(), Some("ICMS 4411"));
        assert_eq!(failure.mu_with.as_deref(), Some("27866"));
        assert_eq!(failure.div.as_deref(), Some("BSP"));
        assert_eq!(failure.rly.as_deref(), Some("SECR"));
        assert_eq!(failure.brief_message.as_deref(), Some("TM flash"));
        assert_eq!(failure.cause_of_failure.as_deref(), Some("Insulation failure"));
        assert_eq!(failure.component.as_deref(), Some("TM"));
        assert_eq!(failure.system.as_deref(), Some("Traction"));
        assert!(out.missing_columns.is_empty());
    }

    #[test]
    fn test_missing_optional_columns_are_reported() {
        let sheet = grid(&[&["LOCO No.", "Date Failed"], &["27865", "bad date"]]);

        let out = normalize_failures("Traction_failures", &sheet).unwrap();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].record.date_failed, None);
        assert_eq!(out.rows[0].record.system, None);
        assert!(out.missing_columns.contains(&"System"));
        assert_eq!(out.missing_columns.len(), 8);
    }

    #[test]
    fn test_missing_key_column_is_a_sheet_error() {
        let sheet = grid(&[&["Number", "Sch"], &["27865", "IA"]]);

        let err = normalize_schedules("Loco_Schedules", &sheet).unwrap_err();

        assert_eq!(
            err,
            SheetError::MissingColumn {
                sheet: "Loco_Schedules".to_string(),
                column: "Loco No.",
            }
        );
    }

    #[test]
    fn test_empty_grid_is_a_sheet_error() {
        let err = normalize_failures("Traction_failures", &[]).unwrap_err();
        assert!(matches!(err, SheetError::EmptySheet { .. }));

        let blank = grid(&[&["", " "]]);
        assert!(normalize_details("Loco_list", &blank, &[]).is_err());
    }

    #[test]
    fn test_leading_blank_rows_shift_row_numbers() {
        let sheet = grid(&[&["", ""], &["Loco No.", "Shed"], &["", "BIA"]]);

        let out = normalize_details("Loco_list", &sheet, &[]).unwrap();

        assert_eq!(out.issues[0].row, 3);
    }

    #[test]
    fn test_short_rows_leave_fields_absent() {
        let sheet = grid(&[&["Loco No.", "Incoming Date", "Sch", "Outgoing Date"], &["27865"]]);

        let out = normalize_schedules("Loco_Schedules", &sheet).unwrap();

        assert_eq!(
            out.rows[0].record,
            ScheduleRecord {
                incoming_date: None,
                sch: None,
                outgoing_date: None,
            }
        );
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let sheet = grid(&[
            &["Loco No.", "Type", "Shed"],
            &["27865", "ELEC", "BIA"],
            &["", "ELEC", "BIA"],
            &["27866", "ELEC", "TKD"],
        ]);

        let first = normalize_details("Loco_list", &sheet, &excluded()).unwrap();
        let second = normalize_details("Loco_list", &sheet, &excluded()).unwrap();

        assert_eq!(first, second);
    }
}
