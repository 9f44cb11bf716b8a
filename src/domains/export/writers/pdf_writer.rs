use crate::domains::export::formatter::RowFormatter;
use crate::domains::export::types::*;
use crate::domains::export::writer::{Columns, FormatWriter, WriterSettings};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use std::time::Instant;

/// Page geometry for the rendered table, in PDF points.
#[derive(Debug, Clone, Copy)]
pub struct TableLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub title_size: f32,
    pub font_size: f32,
    pub row_height: f32,
}

impl Default for TableLayout {
    /// A4 landscape.
    fn default() -> Self {
        Self {
            page_width: 842.0,
            page_height: 595.0,
            margin: 36.0,
            title_size: 14.0,
            font_size: 8.0,
            row_height: 14.0,
        }
    }
}

impl TableLayout {
    fn title_baseline(&self) -> f32 {
        self.page_height - self.margin - self.title_size
    }

    fn table_top(&self) -> f32 {
        self.title_baseline() - self.title_size - 6.0
    }

    fn table_bottom(&self) -> f32 {
        self.margin + self.font_size + 4.0
    }

    /// Data rows that fit below the header row on one physical page.
    pub fn rows_per_page(&self) -> usize {
        let available = self.table_top() - self.table_bottom();
        ((available / self.row_height).floor() as usize).saturating_sub(1).max(1)
    }

    fn usable_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin
    }
}

/// Paginated-document writer.
///
/// Each physical page is laid out as soon as it fills and only the
/// operations of the page being built are held in memory. The header row is
/// repeated at the top of every physical page.
pub struct PdfExportWriter<W: Write> {
    sink: W,
    doc: Document,
    pages_id: ObjectId,
    resources_id: ObjectId,
    page_ids: Vec<ObjectId>,
    layout: TableLayout,
    headers: Vec<String>,
    field_keys: Vec<String>,
    formatter: RowFormatter,
    title: String,
    operations: Vec<Operation>,
    rows_on_page: usize,
    stats: ExportStats,
    start_time: Instant,
}

impl<W: Write> PdfExportWriter<W> {
    pub fn new(sink: W, columns: Columns<'_>, settings: &WriterSettings) -> ExportResult<Self> {
        let layout = TableLayout::default();
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => regular_id,
                "F2" => bold_id,
            },
        });

        let mut pdf = Self {
            sink,
            doc,
            pages_id,
            resources_id,
            page_ids: Vec::new(),
            layout,
            headers: columns.headers.to_vec(),
            field_keys: columns.field_keys.to_vec(),
            formatter: settings.formatter,
            title: settings.title.clone(),
            operations: Vec::new(),
            rows_on_page: 0,
            stats: ExportStats::default(),
            start_time: Instant::now(),
        };
        pdf.begin_page();
        Ok(pdf)
    }

    fn column_width(&self) -> f32 {
        self.layout.usable_width() / self.headers.len().max(1) as f32
    }

    fn begin_page(&mut self) {
        let layout = self.layout;
        let page_number = self.page_ids.len() + 1;
        let title = if page_number == 1 {
            self.title.clone()
        } else {
            format!("{} (continued)", self.title)
        };
        self.operations.clear();
        self.rows_on_page = 0;

        push_text(
            &mut self.operations,
            "F2",
            layout.title_size,
            layout.margin,
            layout.title_baseline(),
            &title,
        );
        push_text(
            &mut self.operations,
            "F1",
            layout.font_size,
            layout.margin,
            layout.margin,
            &format!("Page {}", page_number),
        );

        let width = self.column_width();
        let baseline = layout.table_top();
        let max_chars = max_chars(width, layout.font_size);
        for (i, header) in self.headers.iter().enumerate() {
            push_text(
                &mut self.operations,
                "F2",
                layout.font_size,
                layout.margin + i as f32 * width + 2.0,
                baseline,
                &truncate(header, max_chars),
            );
        }
        push_rule(
            &mut self.operations,
            layout.margin,
            layout.margin + layout.usable_width(),
            baseline - 4.0,
            0.8,
        );
    }

    fn write_row(&mut self, row: &Row) -> ExportResult<()> {
        if self.rows_on_page >= self.layout.rows_per_page() {
            self.finish_page()?;
            self.begin_page();
        }

        let layout = self.layout;
        let width = self.column_width();
        let max_chars = max_chars(width, layout.font_size);
        let baseline = layout.table_top() - (self.rows_on_page + 1) as f32 * layout.row_height;
        for (i, value) in row.project(&self.field_keys).enumerate() {
            if value.is_null() {
                continue;
            }
            let text = self.formatter.format(value);
            push_text(
                &mut self.operations,
                "F1",
                layout.font_size,
                layout.margin + i as f32 * width + 2.0,
                baseline,
                &truncate(&text, max_chars),
            );
        }
        push_rule(
            &mut self.operations,
            layout.margin,
            layout.margin + layout.usable_width(),
            baseline - 4.0,
            0.2,
        );

        self.rows_on_page += 1;
        self.stats.rows_written += 1;
        Ok(())
    }

    fn finish_page(&mut self) -> ExportResult<()> {
        let content = Content {
            operations: std::mem::take(&mut self.operations),
        };
        let encoded = content
            .encode()
            .map_err(|e| ExportError::write(ExportFormat::Pdf, e))?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => self.resources_id,
        });
        self.page_ids.push(page_id);
        Ok(())
    }
}

impl<W: Write> FormatWriter for PdfExportWriter<W> {
    fn format(&self) -> ExportFormat {
        ExportFormat::Pdf
    }

    fn write_page(&mut self, page: &[Row]) -> ExportResult<()> {
        for row in page {
            self.write_row(row)?;
        }
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> ExportResult<ExportStats> {
        self.finish_page()?;

        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => self.page_ids.len() as i64,
            "MediaBox" => vec![
                0i64.into(),
                0i64.into(),
                self.layout.page_width.into(),
                self.layout.page_height.into(),
            ],
        };
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|e| ExportError::write(ExportFormat::Pdf, e))?;
        self.sink
            .write_all(&bytes)
            .map_err(|e| ExportError::write(ExportFormat::Pdf, e))?;
        self.sink
            .flush()
            .map_err(|e| ExportError::write(ExportFormat::Pdf, e))?;

        self.stats.bytes_written = bytes.len() as u64;
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        log::debug!(
            "Document finalized: {} rows over {} pages",
            self.stats.rows_written,
            self.page_ids.len()
        );
        Ok(self.stats.clone())
    }
}

fn push_text(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::String(win_ansi(text), StringFormat::Literal)],
    ));
    ops.push(Operation::new("ET", vec![]));
}

fn push_rule(ops: &mut Vec<Operation>, x1: f32, x2: f32, y: f32, weight: f32) {
    ops.push(Operation::new("w", vec![weight.into()]));
    ops.push(Operation::new("m", vec![x1.into(), y.into()]));
    ops.push(Operation::new("l", vec![x2.into(), y.into()]));
    ops.push(Operation::new("S", vec![]));
}

/// Characters that fit a column, assuming an average glyph of half an em.
fn max_chars(column_width: f32, font_size: f32) -> usize {
    (((column_width - 4.0) / (font_size * 0.5)).floor() as usize).max(1)
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    // too narrow for an ellipsis: cut hard
    if max_chars <= 3 {
        return single_line.chars().take(max_chars).collect();
    }
    let mut truncated: String = single_line.chars().take(max_chars - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Encode for the standard Type1 fonts. Characters outside Latin-1 print as `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}
