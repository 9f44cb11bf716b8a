pub mod csv_writer;
pub mod pdf_writer;
pub mod xlsx_writer;

pub use csv_writer::{CsvExportWriter, UTF8_BOM};
pub use pdf_writer::{PdfExportWriter, TableLayout};
pub use xlsx_writer::XlsxExportWriter;
