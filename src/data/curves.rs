use std::io;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use super::DataError;

/// Time curves of several regions of interest sampled on one time grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Curves {
    time: Vec<f64>,
    rois: Vec<(String, Vec<f64>)>,
}

impl Curves {
    pub fn new(time: Vec<f64>) -> Self {
        Self {
            time,
            rois: Vec::new(),
        }
    }

    /// Add a curve, keeping the insertion order
    pub fn with_roi(mut self, name: impl Into<String>, values: Vec<f64>) -> Result<Self, DataError> {
        let name = name.into();
        if values.len() != self.time.len() {
            return Err(DataError::Length {
                name,
                expected: self.time.len(),
                found: values.len(),
            });
        }
        if self.roi(&name).is_some() {
            return Err(DataError::DuplicateColumn(name));
        }
        self.rois.push((name, values));
        Ok(self)
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn roi(&self, name: &str) -> Option<&[f64]> {
        self.rois
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// ROI names in file order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rois.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.rois.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    /// Number of time points
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Write the curves as CSV with a leading `time` column
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<(), DataError> {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);
        let mut header = vec!["time"];
        header.extend(self.names());
        writer.write_record(&header)?;
        for (i, t) in self.time.iter().enumerate() {
            let mut record = vec![t.to_string()];
            record.extend(self.rois.iter().map(|(_, v)| v[i].to_string()));
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Read ROI curves from a CSV file
pub fn read_curves(path: impl AsRef<Path>) -> Result<Curves, DataError> {
    let file = std::fs::File::open(path)?;
    parse_curves(file)
}

/// Read ROI curves from any CSV source.
///
/// The `time` column is found case-insensitively and may sit anywhere in
/// the header. Empty cells are read as `NaN`.
pub fn parse_curves<R: io::Read>(source: R) -> Result<Curves, DataError> {
    let mut reader = ReaderBuilder::new()
        .comment(Some(b'#'))
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers: StringRecord = reader.headers()?.clone();
    let time_column = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("time"))
        .ok_or(DataError::MissingTime)?;
    let names: Vec<String> = headers.iter().map(str::to_string).collect();
    for (i, name) in names.iter().enumerate() {
        if names[..i].iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(DataError::DuplicateColumn(name.clone()));
        }
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        for (column, field) in record.iter().enumerate() {
            let value = if field.is_empty() {
                f64::NAN
            } else {
                field.parse::<f64>().map_err(|_| DataError::Parse {
                    row: row + 1,
                    column: names.get(column).cloned().unwrap_or_default(),
                    value: field.to_string(),
                })?
            };
            if let Some(values) = columns.get_mut(column) {
                values.push(value);
            }
        }
    }

    let time = std::mem::take(&mut columns[time_column]);
    for (row, w) in time.windows(2).enumerate() {
        if !(w[1] > w[0]) {
            return Err(DataError::NonIncreasingTime {
                row: row + 2,
                time: w[1],
            });
        }
    }
    let mut curves = Curves::new(time);
    for (i, (name, values)) in names.into_iter().zip(columns).enumerate() {
        if i != time_column {
            curves = curves.with_roi(name, values)?;
        }
    }
    tracing::debug!(
        samples = curves.len(),
        rois = curves.rois.len(),
        "Curves read"
    );
    Ok(curves)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
# aorta and liver, 2 sec resolution
Time,aorta,liver
0,100.5,80
2,101,80.5
4,150,82
";

    #[test]
    fn reads_columns_in_order() {
        let curves = parse_curves(CSV.as_bytes()).unwrap();
        assert_eq!(curves.time(), &[0.0, 2.0, 4.0]);
        assert_eq!(curves.names().collect::<Vec<_>>(), vec!["aorta", "liver"]);
        assert_eq!(curves.roi("liver").unwrap(), &[80.0, 80.5, 82.0]);
        assert!(curves.roi("kidney").is_none());
    }

    #[test]
    fn time_column_is_required() {
        let err = parse_curves("t,aorta\n0,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::MissingTime));
    }

    #[test]
    fn rejects_bad_values_and_time() {
        let err = parse_curves("time,aorta\n0,x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::Parse { row: 1, .. }));
        let err = parse_curves("time,aorta\n2,1\n1,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, DataError::NonIncreasingTime { row: 2, .. }));
    }

    #[test]
    fn written_curves_read_back() {
        let curves = parse_curves(CSV.as_bytes()).unwrap();
        let mut buffer = Vec::new();
        curves.write_csv(&mut buffer).unwrap();
        let again = parse_curves(buffer.as_slice()).unwrap();
        assert_eq!(again, curves);
    }
}
