//! CSV import/export for application records.
//!
//! Every encoded value is wrapped in double quotes. Inside the quotes a literal
//! quote is doubled and line breaks are written as `\n` / `\r` escapes (with `\\`
//! for a backslash), so each record always occupies exactly one line.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::models::{IdGenerator, ParseEnumError, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Id,
    Company,
    Position,
    Date,
    Location,
    Agent,
    Status,
    Requirements,
    OptionalRequirements,
    Benefits,
    FullDescription,
    Notes,
}

impl Column {
    const ALL: [Column; 12] = [
        Column::Id,
        Column::Company,
        Column::Position,
        Column::Date,
        Column::Location,
        Column::Agent,
        Column::Status,
        Column::Requirements,
        Column::OptionalRequirements,
        Column::Benefits,
        Column::FullDescription,
        Column::Notes,
    ];

    fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Company => "company",
            Column::Position => "position",
            Column::Date => "date",
            Column::Location => "location",
            Column::Agent => "agent",
            Column::Status => "status",
            Column::Requirements => "requirements",
            Column::OptionalRequirements => "optionalRequirements",
            Column::Benefits => "benefits",
            Column::FullDescription => "fullDescription",
            Column::Notes => "notes",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Column::ALL.into_iter().find(|c| c.name() == name)
    }

    fn read(self, record: &Record) -> String {
        match self {
            Column::Id => record.id.to_string(),
            Column::Company => record.company.clone(),
            Column::Position => record.position.clone(),
            Column::Date => record
                .date
                .map(|d| d.format(DATE_FORMAT).to_string())
                .unwrap_or_default(),
            Column::Location => record.location.map(|l| l.to_string()).unwrap_or_default(),
            Column::Agent => record.agent.map(|a| a.to_string()).unwrap_or_default(),
            Column::Status => record.status.to_string(),
            Column::Requirements => record.requirements.clone(),
            Column::OptionalRequirements => record.optional_requirements.clone(),
            Column::Benefits => record.benefits.clone(),
            Column::FullDescription => record.full_description.clone(),
            Column::Notes => record.notes.clone(),
        }
    }

    fn write(self, record: &mut Record, value: String) -> Result<(), DecodeErrorKind> {
        match self {
            // Imported rows always get a fresh id
            Column::Id => {}
            Column::Company => record.company = value,
            Column::Position => record.position = value,
            Column::Date => {
                record.date = if value.trim().is_empty() {
                    None
                } else {
                    let parsed = NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
                        .map_err(|_| DecodeErrorKind::InvalidDate(value.clone()))?;
                    Some(parsed)
                };
            }
            Column::Location => record.location = parse_optional(&value)?,
            Column::Agent => record.agent = parse_optional(&value)?,
            Column::Status => {
                record.status = if value.trim().is_empty() {
                    Default::default()
                } else {
                    value.parse()?
                };
            }
            Column::Requirements => record.requirements = value,
            Column::OptionalRequirements => record.optional_requirements = value,
            Column::Benefits => record.benefits = value,
            Column::FullDescription => record.full_description = value,
            Column::Notes => record.notes = value,
        }
        Ok(())
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

// A quoted run with "" as the only quote escape, or an unquoted run
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:"((?:[^"]|"")*)"|([^,"]*))"#).expect("cell pattern is valid"));

fn parse_optional<T>(value: &str) -> Result<Option<T>, DecodeErrorKind>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    if value.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(value.parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct DecodeError {
    pub line: usize,
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("row has {found} cells but the header has only {expected} columns")]
    TooManyCells { expected: usize, found: usize },

    #[error("unterminated quoted cell")]
    UnterminatedQuote,

    #[error("unexpected characters after a closing quote")]
    TrailingCharacters,

    #[error("quote inside an unquoted cell")]
    StrayQuote,

    #[error("unknown escape sequence '\\{0}'")]
    InvalidEscape(char),

    #[error("backslash at end of cell")]
    DanglingEscape,

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error(transparent)]
    InvalidValue(#[from] ParseEnumError),

    #[error("no record ids left")]
    IdsExhausted,
}

/// The fixed header line written by [`encode`].
pub fn header() -> String {
    Column::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn encode(records: &[Record]) -> String {
    let mut out = header();
    for record in records {
        let row: Vec<String> = Column::ALL
            .iter()
            .map(|column| quote(&column.read(record)))
            .collect();
        out.push('\n');
        out.push_str(&row.join(","));
    }
    out
}

/// Parses CSV text into records with fresh ids from `ids`.
///
/// The first non-blank line is the header and decides the column order; unknown
/// columns are ignored and short rows leave trailing fields empty. Any malformed
/// row fails the whole decode.
pub fn decode(text: &str, ids: &mut IdGenerator) -> Result<Vec<Record>, DecodeError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((header_line, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<Option<Column>> = split_cells(header)
        .map_err(|kind| DecodeError { line: header_line, kind })?
        .iter()
        .map(|name| Column::from_name(name.trim()))
        .collect();

    let mut records = Vec::new();
    for (line_no, line) in lines {
        let record = decode_row(&columns, line, ids)
            .map_err(|kind| DecodeError { line: line_no, kind })?;
        records.push(record);
    }
    Ok(records)
}

fn decode_row(
    columns: &[Option<Column>],
    line: &str,
    ids: &mut IdGenerator,
) -> Result<Record, DecodeErrorKind> {
    let mut cells = split_cells(line)?;
    if cells.len() > columns.len() {
        return Err(DecodeErrorKind::TooManyCells {
            expected: columns.len(),
            found: cells.len(),
        });
    }
    cells.resize(columns.len(), String::new());

    let id = ids.next_id().map_err(|_| DecodeErrorKind::IdsExhausted)?;
    let mut record = Record {
        id,
        ..Default::default()
    };
    for (column, value) in columns.iter().zip(cells) {
        if let Some(column) = column {
            column.write(&mut record, value)?;
        }
    }
    Ok(record)
}

fn split_cells(line: &str) -> Result<Vec<String>, DecodeErrorKind> {
    let mut cells = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &line[pos..];
        let caps = CELL_RE
            .captures(rest)
            .ok_or(DecodeErrorKind::UnterminatedQuote)?;
        let matched = caps.get(0).map_or(0, |m| m.end());

        let quoted = caps.get(1);
        if quoted.is_none() && rest.starts_with('"') {
            return Err(DecodeErrorKind::UnterminatedQuote);
        }
        match quoted {
            Some(inner) => cells.push(unescape(&inner.as_str().replace("\"\"", "\""))?),
            None => cells.push(caps.get(2).map_or("", |m| m.as_str()).to_string()),
        }

        pos += matched;
        match line[pos..].chars().next() {
            None => break,
            Some(',') => pos += 1,
            Some(_) if quoted.is_some() => return Err(DecodeErrorKind::TrailingCharacters),
            Some(_) => return Err(DecodeErrorKind::StrayQuote),
        }
    }

    Ok(cells)
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\"\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn unescape(value: &str) -> Result<String, DecodeErrorKind> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(DecodeErrorKind::InvalidEscape(other)),
            None => return Err(DecodeErrorKind::DanglingEscape),
        }
    }
    Ok(out)
}
