//! # Spreadsheet Export
//!
//! Single-sheet `.xlsx` workbooks: a bold, frozen header row followed by
//! one row per record.

use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, NaiveDate, Utc};
use muni_core::temporal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::error::AppError;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Excel's limit on worksheet names.
const SHEET_NAME_MAX: usize = 31;

/// One spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<Decimal> for Cell {
    fn from(value: Decimal) -> Self {
        value.to_f64().map_or(Cell::Empty, Cell::Number)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Text(if value { "Sí" } else { "No" }.to_string())
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::Text(temporal::display(&value))
    }
}

impl From<NaiveDate> for Cell {
    fn from(value: NaiveDate) -> Self {
        Cell::Text(temporal::display_date(&value))
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Empty, Into::into)
    }
}

/// A sheet ready to be written.
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub headers: &'static [&'static str],
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: &str, headers: &'static [&'static str]) -> Self {
        Self {
            name: name.chars().take(SHEET_NAME_MAX).collect(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// Render the workbook.
    pub fn to_xlsx(&self) -> Result<Vec<u8>, XlsxError> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&self.name)?;

        for (col, title) in self.headers.iter().enumerate() {
            let col = col as u16;
            worksheet.write_string_with_format(0, col, *title, &header_format)?;
            worksheet.set_column_width(col, (title.chars().count().max(12) + 2) as f64)?;
        }
        worksheet.set_freeze_panes(1, 0)?;

        for (i, row) in self.rows.iter().enumerate() {
            let r = (i + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Text(text) => {
                        worksheet.write_string(r, col, text)?;
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(r, col, *n)?;
                    }
                    Cell::Empty => {}
                }
            }
        }

        workbook.save_to_buffer()
    }

    /// Render as an attachment response named `filename`.
    pub fn into_response(self, filename: &str) -> Result<Response, AppError> {
        let bytes = self.to_xlsx().map_err(|e| {
            AppError::Internal(format!("failed to build {filename}: {e}"))
        })?;
        tracing::info!(filename, rows = self.rows.len(), "spreadsheet exported");
        Ok((
            [
                (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            bytes,
        )
            .into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workbook_is_a_zip_archive() {
        let mut sheet = Sheet::new("Pagos", &["ID", "Monto"]);
        sheet.push(vec!["abc".into(), Decimal::new(1050, 2).into()]);
        let bytes = sheet.to_xlsx().unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn sheet_name_is_truncated() {
        let sheet = Sheet::new(&"x".repeat(40), &["A"]);
        assert_eq!(sheet.name.len(), 31);
    }

    #[test]
    fn cells_from_values() {
        assert_eq!(Cell::from(Decimal::new(250, 2)), Cell::Number(2.5));
        assert_eq!(Cell::from(None::<String>), Cell::Empty);
        assert_eq!(Cell::from(true), Cell::Text("Sí".into()));
        let date: NaiveDate = "2025-03-09".parse().unwrap();
        assert_eq!(Cell::from(date), Cell::Text("09/03/2025".into()));
    }

    #[test]
    fn response_carries_attachment_headers() {
        let response = Sheet::new("Multas", &["ID"]).into_response("multas.xlsx").unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            XLSX_CONTENT_TYPE
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"multas.xlsx\""
        );
    }
}
