// Small dev utility: stream a local spreadsheet through the codec and print what it sees.
//
// Usage:
//   cargo run --bin inspect_file -- <path> [xlsx|xls|csv] [max_rows]
//
// Columns are taken verbatim from the header row; no data type registry is involved.

use bulk_transfer_engine::domain::row::RowSchema;
use bulk_transfer_engine::importer::{BatchControl, SpreadsheetCodec};
use bulk_transfer_engine::{logging, FileFormat};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const PREVIEW_ROWS: usize = 5;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().ok_or("usage: inspect_file <path> [format] [max_rows]")?;

    let format = match args.next() {
        Some(value) => FileFormat::parse(&value).ok_or_else(|| format!("unknown format: {}", value))?,
        None => Path::new(&path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(FileFormat::parse)
            .ok_or("cannot infer format from file extension, pass it explicitly")?,
    };
    let max_rows = match args.next() {
        Some(value) => value.parse::<usize>()?,
        None => 1_000_000,
    };

    let codec = SpreadsheetCodec::new(max_rows);
    let estimated = codec.estimate_row_count(BufReader::new(File::open(&path)?), format)?;

    let mut preview = Vec::new();
    let mut malformed = Vec::new();
    let summary = codec.read_rows(
        BufReader::new(File::open(&path)?),
        format,
        &RowSchema::default(),
        500,
        |batch| {
            for row in batch {
                if preview.len() < PREVIEW_ROWS {
                    preview.push(row);
                }
            }
            Ok(BatchControl::Continue)
        },
        |error| {
            malformed.push(error);
            Ok(())
        },
    )?;

    println!("file={} format={}", path, format);
    println!("estimated_rows={} data_rows={}", estimated, summary.total_rows);

    for row in &preview {
        let mut fields: Vec<_> = row.values.iter().collect();
        fields.sort();
        println!("row {}: {:?}", row.row_number, fields);
    }

    println!("malformed_rows={}", malformed.len());
    for error in &malformed {
        println!("  row {}: {} ({})", error.row_number, error.message, error.raw_value);
    }
    Ok(())
}
