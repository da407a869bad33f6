use std::io;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use super::DataError;
use crate::fit::ParamRow;

/// One fitted parameter of one subject at one visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub subject: String,
    pub visit: String,
    pub parameter: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub stdev: f64,
}

/// Parameters exported by many fits, tagged by subject and visit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamTable {
    rows: Vec<TableRow>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the rows of one `export_params` call
    pub fn push(&mut self, subject: &str, visit: &str, rows: &[ParamRow]) {
        self.rows.extend(rows.iter().map(|r| TableRow {
            subject: subject.to_string(),
            visit: visit.to_string(),
            parameter: r.parameter.clone(),
            name: r.name.clone(),
            value: r.value,
            unit: r.unit.clone(),
            stdev: r.stdev,
        }));
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `parameter` for one subject and visit
    pub fn value(&self, subject: &str, visit: &str, parameter: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.subject == subject && r.visit == visit && r.parameter == parameter)
            .map(|r| r.value)
    }

    /// Values of `parameter` across subjects for one visit, in row order
    pub fn column(&self, visit: &str, parameter: &str) -> Vec<(&str, f64)> {
        self.rows
            .iter()
            .filter(|r| r.visit == visit && r.parameter == parameter)
            .map(|r| (r.subject.as_str(), r.value))
            .collect()
    }

    pub fn to_writer<W: io::Write>(&self, writer: W) -> Result<(), DataError> {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), DataError> {
        let file = std::fs::File::create(path)?;
        self.to_writer(file)
    }

    pub fn from_reader<R: io::Read>(source: R) -> Result<Self, DataError> {
        let mut reader = ReaderBuilder::new()
            .comment(Some(b'#'))
            .has_headers(true)
            .from_reader(source);
        let rows = reader
            .deserialize()
            .collect::<Result<Vec<TableRow>, csv::Error>>()?;
        Ok(Self { rows })
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn to_json(&self) -> Result<String, DataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DataError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<ParamRow> {
        vec![
            ParamRow {
                parameter: "khe".to_string(),
                name: "Intracellular uptake rate".to_string(),
                value: 0.01,
                unit: "mL/sec/cm3".to_string(),
                stdev: 0.001,
            },
            ParamRow {
                parameter: "kbh".to_string(),
                name: "Biliary excretion rate".to_string(),
                value: 0.0005,
                unit: "mL/sec/cm3".to_string(),
                stdev: 0.0,
            },
        ]
    }

    #[test]
    fn lookup_by_subject_and_visit() {
        let mut table = ParamTable::new();
        table.push("001", "baseline", &rows());
        table.push("002", "baseline", &rows());
        table.push("001", "rifampicin", &rows()[..1]);
        assert_eq!(table.len(), 5);
        assert_eq!(table.value("001", "rifampicin", "khe"), Some(0.01));
        assert_eq!(table.value("001", "rifampicin", "kbh"), None);
        assert_eq!(table.column("baseline", "kbh").len(), 2);
    }

    #[test]
    fn csv_and_json_preserve_rows() {
        let mut table = ParamTable::new();
        table.push("001", "baseline", &rows());
        let mut buffer = Vec::new();
        table.to_writer(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("subject,visit,parameter,name,value,unit,stdev"));
        assert_eq!(ParamTable::from_reader(buffer.as_slice()).unwrap(), table);
        let json = table.to_json().unwrap();
        assert_eq!(ParamTable::from_json(&json).unwrap(), table);
    }
}
