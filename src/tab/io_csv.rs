// Primitives for reading CSV files.

use crate::tab::{io_common::Table, *};

fn delimiter_byte(source: &DataSource) -> BTabResult<u8> {
    match source.delimiter.as_deref() {
        None => Ok(b','),
        Some("\\t") | Some("\t") => Ok(b'\t'),
        Some(d) if d.len() == 1 => Ok(d.as_bytes()[0]),
        Some(d) => Err(Box::new(TabError::Whatever {
            message: format!("The delimiter must be a single character, got {:?}", d),
            source: None,
        })),
    }
}

/// Reads all the rows of a CSV file. The row before `firstDataRow` holds the
/// header.
pub fn read_csv_table(path: &str, source: &DataSource) -> BTabResult<Table> {
    let first_row = source.first_data_row()?;
    let rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter_byte(source)?)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;

    let mut header: Option<Vec<String>> = None;
    let mut rows: Vec<(usize, Vec<String>)> = Vec::new();
    for (idx, line_r) in rdr.into_records().enumerate() {
        // Line numbers start at 1 to respect the spreadsheet conventions.
        let lineno = idx + 1;
        let line = line_r.context(CsvLineParseSnafu { lineno })?;
        let cells: Vec<String> = line.iter().map(|s| s.to_string()).collect();
        if idx + 1 == first_row {
            debug!("read_csv_table: {}: header {:?}", path, cells);
            header = Some(cells);
        } else if idx >= first_row {
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            rows.push((lineno, cells));
        }
    }
    let header = header.context(MissingColumnSnafu {
        name: "header",
        path,
    })?;
    debug!("read_csv_table: {}: {} rows", path, rows.len());
    Ok(Table {
        path: path.to_string(),
        header,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn semicolon_delimited() {
        let dir = std::env::temp_dir().join("surveytab_io_csv_test");
        std::fs::create_dir_all(&dir).unwrap();
        let p = dir.join("responses.csv");
        let mut f = std::fs::File::create(&p).unwrap();
        writeln!(f, "id;NPS;SAT").unwrap();
        writeln!(f, "r1;9;5").unwrap();
        writeln!(f, ";;").unwrap();
        writeln!(f, "r2;3").unwrap();
        drop(f);

        let mut source = DataSource::from_path("csv", "responses.csv");
        source.delimiter = Some(";".to_string());
        let table = read_csv_table(&p.display().to_string(), &source).unwrap();
        assert_eq!(table.header, vec!["id", "NPS", "SAT"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].0, 4);
        assert_eq!(table.rows[1].1, vec!["r2", "3"]);

        source.delimiter = Some("::".to_string());
        assert!(read_csv_table(&p.display().to_string(), &source).is_err());
    }
}
