// Primitives for reading Excel workbooks.

use calamine::{open_workbook, DataType, Reader, Xlsx};

use crate::tab::{io_common::Table, *};

fn get_range(path: &str, source: &DataSource) -> BTabResult<calamine::Range<DataType>> {
    debug!(
        "get_range: path: {:?} worksheet: {:?}",
        path, &source.worksheet_name
    );
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let wrange = match &source.worksheet_name {
        Some(worksheet_name) => workbook
            .worksheet_range(worksheet_name)
            .context(MissingWorksheetSnafu {
                path,
                worksheet: worksheet_name.as_str(),
            })?
            .context(OpeningExcelSnafu { path })?,
        None => workbook
            .worksheet_range_at(0)
            .context(MissingWorksheetSnafu {
                path,
                worksheet: "#1",
            })?
            .context(OpeningExcelSnafu { path })?,
    };
    Ok(wrange)
}

fn cell_content(path: &str, lineno: usize, cell: &DataType) -> BTabResult<String> {
    match cell {
        DataType::Empty => Ok(String::new()),
        DataType::Error(e) => Err(Box::new(TabError::ExcelErrorCell {
            path: path.to_string(),
            lineno,
            content: format!("{:?}", e),
        })),
        x => Ok(x.to_string()),
    }
}

/// Reads all the rows of a worksheet, with the same conventions as the CSV
/// files.
pub fn read_excel_table(path: &str, source: &DataSource) -> BTabResult<Table> {
    let first_row = source.first_data_row()?;
    let wrange = get_range(path, source)?;
    // The range starts at the first non-empty row of the worksheet.
    let row_offset = wrange.start().map(|(r, _)| r as usize).unwrap_or(0);

    let mut header: Option<Vec<String>> = None;
    let mut rows: Vec<(usize, Vec<String>)> = Vec::new();
    for (idx, row) in wrange.rows().enumerate() {
        let lineno = idx + row_offset + 1;
        let cells = row
            .iter()
            .map(|c| cell_content(path, lineno, c))
            .collect::<BTabResult<Vec<String>>>()?;
        if lineno == first_row {
            header = Some(cells);
        } else if lineno > first_row && cells.iter().any(|c| !c.trim().is_empty()) {
            rows.push((lineno, cells));
        }
    }
    let header = header.context(MissingColumnSnafu {
        name: "header",
        path,
    })?;
    debug!("read_excel_table: {}: {} rows", path, rows.len());
    Ok(Table {
        path: path.to_string(),
        header,
        rows,
    })
}
