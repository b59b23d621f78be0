//! Section splitting for the catalog document.
//!
//! The input is one text file partitioned by delimiter lines of the form
//! `==== SECTION NAME ====`; each section is a small CSV table with a
//! header row.

use std::collections::BTreeMap;

/// One parsed section: header columns plus data rows
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of a named column, if present
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Field of `row` under the named column; empty cells read as absent
    pub fn field<'r>(&self, row: &'r [String], column: &str) -> Option<&'r str> {
        let idx = self.column(column)?;
        match row.get(idx).map(String::as_str) {
            Some("") | None => None,
            Some(value) => Some(value),
        }
    }

    /// Required field of `row`; missing cells become a per-row parse error
    pub fn require<'r>(
        &self,
        row_number: usize,
        row: &'r [String],
        column: &str,
    ) -> Result<&'r str, taktplan_core::LoadError> {
        self.field(row, column)
            .ok_or_else(|| taktplan_core::LoadError::Parse {
                section: self.name.clone(),
                row: row_number,
                field: column.to_string(),
            })
    }
}

/// Split a comma-separated line, honoring double quotes
pub fn split_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in line.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Split a document into named sections on `==== NAME ====` delimiter lines.
/// Blank lines are dropped; the first line of each section is its header.
pub fn split_sections(content: &str) -> BTreeMap<String, Table> {
    let mut sections = BTreeMap::new();
    let mut current_name: Option<String> = None;
    let mut current_lines: Vec<&str> = Vec::new();

    let flush = |name: &mut Option<String>, lines: &mut Vec<&str>, out: &mut BTreeMap<String, Table>| {
        if let Some(section_name) = name.take() {
            if let Some((header_line, data_lines)) = lines.split_first() {
                out.insert(
                    section_name.clone(),
                    Table {
                        name: section_name,
                        header: split_row(header_line),
                        rows: data_lines.iter().map(|l| split_row(l)).collect(),
                    },
                );
            }
        }
        lines.clear();
    };

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.trim_start().starts_with("====") && line.contains("====") {
            flush(&mut current_name, &mut current_lines, &mut sections);
            current_name = Some(line.replace('=', "").trim().to_string());
        } else if !line.trim().is_empty() {
            current_lines.push(line);
        }
    }
    flush(&mut current_name, &mut current_lines, &mut sections);

    sections
}
