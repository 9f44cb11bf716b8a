use crate::domains::export::formatter::RowFormatter;
use crate::domains::export::types::*;
use crate::domains::export::writer::{Columns, FormatWriter, WriterSettings};
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::time::Instant;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Hard row limit of an Office Open XML worksheet.
pub const MAX_SHEET_ROWS: u32 = 1_048_576;
const MAX_SHEET_NAME_LEN: usize = 31;
const MAX_COLUMN_WIDTH: usize = 255;
const MIN_COLUMN_WIDTH: usize = 8;

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/></Relationships>"#;

// Style 1 is the bold header style.
const STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fonts count="2"><font><sz val="11"/><name val="Calibri"/></font><font><b/><sz val="11"/><name val="Calibri"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

/// Streaming spreadsheet writer.
///
/// Rows are serialized into a temporary file as they arrive, so memory use
/// stays at one page regardless of export size. Column widths are tracked
/// incrementally and written into the sheet on finalize, since the `<cols>`
/// element must precede the sheet data.
pub struct XlsxExportWriter<W: Write> {
    sink: W,
    sheet_data: BufWriter<File>,
    formatter: RowFormatter,
    field_keys: Vec<String>,
    sheet_name: String,
    widths: Vec<usize>,
    next_row: u32,
    stats: ExportStats,
    start_time: Instant,
}

impl<W: Write> XlsxExportWriter<W> {
    pub fn new(sink: W, columns: Columns<'_>, settings: &WriterSettings) -> ExportResult<Self> {
        validate_sheet_name(&settings.sheet_name)?;

        let file = tempfile::tempfile().map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;
        let mut xlsx = Self {
            sink,
            sheet_data: BufWriter::new(file),
            formatter: settings.formatter,
            field_keys: columns.field_keys.to_vec(),
            sheet_name: settings.sheet_name.clone(),
            widths: vec![0; columns.len()],
            next_row: 1,
            stats: ExportStats::default(),
            start_time: Instant::now(),
        };
        xlsx.write_header(columns.headers)?;
        Ok(xlsx)
    }

    fn write_header(&mut self, headers: &[String]) -> ExportResult<()> {
        let row = self.next_row;
        let mut cells = format!("<row r=\"{}\">", row);
        for (col, header) in headers.iter().enumerate() {
            if let Some(width) = self.widths.get_mut(col) {
                *width = (*width).max(display_width(header));
            }
            push_text_cell(&mut cells, col, row, header, Some(1));
        }
        cells.push_str("</row>");
        self.write_fragment(&cells)?;
        self.next_row += 1;
        Ok(())
    }

    fn write_row(&mut self, row: &Row) -> ExportResult<()> {
        if self.next_row > MAX_SHEET_ROWS {
            return Err(ExportError::write(
                ExportFormat::Xlsx,
                format!("worksheet row limit of {} exceeded", MAX_SHEET_ROWS),
            ));
        }

        let row_number = self.next_row;
        let mut cells = format!("<row r=\"{}\">", row_number);
        for (col, value) in row.project(&self.field_keys).enumerate() {
            if value.is_null() {
                continue;
            }
            let text = self.formatter.format(value);
            if let Some(width) = self.widths.get_mut(col) {
                *width = (*width).max(display_width(&text));
            }
            if value.is_numeric() {
                cells.push_str(&format!(
                    "<c r=\"{}{}\"><v>{}</v></c>",
                    column_name(col),
                    row_number,
                    text
                ));
            } else {
                push_text_cell(&mut cells, col, row_number, &text, None);
            }
        }
        cells.push_str("</row>");

        self.write_fragment(&cells)?;
        self.next_row += 1;
        self.stats.rows_written += 1;
        Ok(())
    }

    fn write_fragment(&mut self, xml: &str) -> ExportResult<()> {
        self.sheet_data
            .write_all(xml.as_bytes())
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))
    }

    fn sheet_prefix(&self) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
             <sheetViews><sheetView workbookViewId=\"0\">\
             <pane ySplit=\"1\" topLeftCell=\"A2\" activePane=\"bottomLeft\" state=\"frozen\"/>\
             </sheetView></sheetViews>",
        );
        if !self.widths.is_empty() {
            xml.push_str("<cols>");
            for (i, width) in self.widths.iter().enumerate() {
                xml.push_str(&format!(
                    "<col min=\"{n}\" max=\"{n}\" width=\"{w}\" customWidth=\"1\"/>",
                    n = i + 1,
                    w = column_width(*width)
                ));
            }
            xml.push_str("</cols>");
        }
        xml.push_str("<sheetData>");
        xml
    }

    fn workbook_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
             <workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
             <sheets><sheet name=\"{}\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
            escape_xml(&self.sheet_name)
        )
    }

    fn package(&self, sheet_rows: &mut File) -> zip::result::ZipResult<Vec<u8>> {
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        zip.start_file("[Content_Types].xml", options)?;
        zip.write_all(CONTENT_TYPES_XML.as_bytes())?;
        zip.start_file("_rels/.rels", options)?;
        zip.write_all(ROOT_RELS_XML.as_bytes())?;
        zip.start_file("xl/workbook.xml", options)?;
        zip.write_all(self.workbook_xml().as_bytes())?;
        zip.start_file("xl/_rels/workbook.xml.rels", options)?;
        zip.write_all(WORKBOOK_RELS_XML.as_bytes())?;
        zip.start_file("xl/styles.xml", options)?;
        zip.write_all(STYLES_XML.as_bytes())?;

        zip.start_file("xl/worksheets/sheet1.xml", options)?;
        zip.write_all(self.sheet_prefix().as_bytes())?;
        std::io::copy(sheet_rows, &mut zip)?;
        zip.write_all(b"</sheetData></worksheet>")?;

        Ok(zip.finish()?.into_inner())
    }
}

impl<W: Write> FormatWriter for XlsxExportWriter<W> {
    fn format(&self) -> ExportFormat {
        ExportFormat::Xlsx
    }

    fn write_page(&mut self, page: &[Row]) -> ExportResult<()> {
        for row in page {
            self.write_row(row)?;
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> ExportResult<ExportStats> {
        self.sheet_data
            .flush()
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;
        let mut rows = self
            .sheet_data
            .get_ref()
            .try_clone()
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;
        rows.seek(SeekFrom::Start(0))
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;

        let bytes = self
            .package(&mut rows)
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;
        self.sink
            .write_all(&bytes)
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;
        self.sink
            .flush()
            .map_err(|e| ExportError::write(ExportFormat::Xlsx, e))?;

        self.stats.bytes_written = bytes.len() as u64;
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        log::debug!(
            "Spreadsheet finalized: {} rows, {} bytes",
            self.stats.rows_written,
            self.stats.bytes_written
        );
        Ok(self.stats.clone())
    }
}

/// Worksheet names are 1..=31 characters and may not contain `[]:*?/\`.
pub fn validate_sheet_name(name: &str) -> ExportResult<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_SHEET_NAME_LEN {
        return Err(ExportError::Configuration(format!(
            "sheet name must be 1 to {} characters, got {}",
            MAX_SHEET_NAME_LEN, len
        )));
    }
    if let Some(c) = name.chars().find(|c| "[]:*?/\\".contains(*c)) {
        return Err(ExportError::Configuration(format!(
            "sheet name '{}' contains forbidden character '{}'",
            name, c
        )));
    }
    Ok(())
}

/// Spreadsheet column letters for a 0-based index: 0 -> A, 26 -> AA.
pub fn column_name(index: usize) -> String {
    let mut n = index + 1;
    let mut name = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

/// Approximate rendered width in character cells. East Asian wide
/// characters count double; multi-line text uses its longest line.
pub fn display_width(text: &str) -> usize {
    text.lines()
        .map(|line| {
            line.chars()
                .map(|c| if (c as u32) >= 0x1100 { 2 } else { 1 })
                .sum::<usize>()
        })
        .max()
        .unwrap_or(0)
}

fn column_width(observed: usize) -> usize {
    (observed.max(MIN_COLUMN_WIDTH) + 2).min(MAX_COLUMN_WIDTH)
}

fn push_text_cell(out: &mut String, col: usize, row: u32, text: &str, style: Option<u8>) {
    out.push_str(&format!("<c r=\"{}{}\" t=\"inlineStr\"", column_name(col), row));
    if let Some(style) = style {
        out.push_str(&format!(" s=\"{}\"", style));
    }
    out.push_str("><is><t xml:space=\"preserve\">");
    out.push_str(&escape_xml(text));
    out.push_str("</t></is></c>");
}

/// Escape markup characters and drop code points XML 1.0 cannot carry.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\t' | '\n' | '\r' => escaped.push(c),
            c if (c as u32) < 0x20 || c == '\u{FFFE}' || c == '\u{FFFF}' => {}
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        content
    }

    fn render(rows: &[Row]) -> (Vec<u8>, ExportStats) {
        let headers = vec!["Name".to_string(), "Pages".to_string()];
        let keys = vec!["name".to_string(), "pages".to_string()];
        let mut out = Vec::new();
        let mut writer = XlsxExportWriter::new(
            &mut out,
            Columns { headers: &headers, field_keys: &keys },
            &WriterSettings::default(),
        )
        .unwrap();
        writer.write_page(rows).unwrap();
        let stats = Box::new(writer).finalize().unwrap();
        (out, stats)
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn test_header_only_workbook_is_complete() {
        let (bytes, stats) = render(&[]);
        assert_eq!(stats.rows_written, 0);

        let archive = zip::ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/styles.xml",
            "xl/worksheets/sheet1.xml",
        ] {
            assert!(names.contains(&part), "missing {}", part);
        }

        let sheet = read_entry(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<row r=\"1\">"));
        assert!(!sheet.contains("<row r=\"2\">"));
        assert!(sheet.ends_with("</sheetData></worksheet>"));

        let workbook = read_entry(&bytes, "xl/workbook.xml");
        assert!(workbook.contains("name=\"Archives\""));
    }

    #[test]
    fn test_data_starts_on_row_two_with_typed_cells() {
        let (bytes, stats) = render(&[
            Row::new().with("name", "Tom & Jerry <1>").with("pages", 12i64),
            Row::new().with("name", "Blank pages"),
        ]);
        assert_eq!(stats.rows_written, 2);

        let sheet = read_entry(&bytes, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<c r=\"A2\" t=\"inlineStr\"><is><t xml:space=\"preserve\">Tom &amp; Jerry &lt;1&gt;</t></is></c>"));
        assert!(sheet.contains("<c r=\"B2\"><v>12</v></c>"));
        assert!(sheet.contains("<row r=\"3\">"));
        assert!(!sheet.contains("r=\"B3\""));
    }

    #[test]
    fn test_columns_sized_to_widest_cell() {
        let long_name = "A considerably longer archive title";
        let (bytes, _) = render(&[Row::new().with("name", long_name).with("pages", 3i64)]);
        let sheet = read_entry(&bytes, "xl/worksheets/sheet1.xml");
        let expected = format!("<col min=\"1\" max=\"1\" width=\"{}\"", long_name.len() + 2);
        assert!(sheet.contains(&expected), "{}", sheet);
        assert!(sheet.contains("<col min=\"2\" max=\"2\" width=\"10\""));
    }

    #[test]
    fn test_wide_characters_count_double() {
        assert_eq!(display_width("档案"), 4);
        assert_eq!(display_width("ab\nabcd"), 4);
    }

    #[test]
    fn test_invalid_sheet_names() {
        assert!(validate_sheet_name("").is_err());
        assert!(validate_sheet_name("a/b").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
        assert!(validate_sheet_name("Archives 2024").is_ok());
    }

    #[test]
    fn test_control_characters_dropped() {
        assert_eq!(escape_xml("a\u{0001}b\"c"), "ab&quot;c");
    }
}
