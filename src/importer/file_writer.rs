// ==========================================
// 批量导入导出引擎 - 表格编码器
// ==========================================
// 支持: .xlsx（rust_xlsxwriter，常量内存模式）/ .csv（csv，带 UTF-8 BOM）
// 说明: .xls 仅支持读取；所有单元格按文本写出
// ==========================================

use crate::domain::row::{RowRecord, RowSchema};
use crate::domain::types::FileFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::SpreadsheetCodec;
use rust_xlsxwriter::{Format, Workbook};
use std::io::{Seek, Write};
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// 分批写出结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub rows_written: u64,
    /// false 表示数据提供方中止（返回 None），输出不完整
    pub completed: bool,
}

impl SpreadsheetCodec {
    /// 一次性写出行数据（首行为表头）
    pub fn write_rows<W: Write + Seek + Send>(
        &self,
        sink: W,
        format: FileFormat,
        schema: &RowSchema,
        rows: &[RowRecord],
        sheet_name: &str,
    ) -> ImportResult<u64> {
        let mut writer = TableWriter::new(sink, format, schema, sheet_name)?;
        for row in rows {
            writer.write_row(schema, row)?;
        }
        writer.finish()?;
        Ok(rows.len() as u64)
    }

    /// 分页拉取并写出
    ///
    /// # 参数
    /// - provider: (offset, limit) → 一页数据；返回不足 limit 的页表示结束，
    ///   返回 None 表示中止
    pub fn write_rows_batched<W, P>(
        &self,
        sink: W,
        format: FileFormat,
        schema: &RowSchema,
        mut provider: P,
        sheet_name: &str,
        batch_size: usize,
    ) -> ImportResult<WriteOutcome>
    where
        W: Write + Seek + Send,
        P: FnMut(usize, usize) -> ImportResult<Option<Vec<RowRecord>>>,
    {
        let batch_size = batch_size.max(1);
        let mut writer = TableWriter::new(sink, format, schema, sheet_name)?;
        let mut offset = 0usize;

        loop {
            let Some(page) = provider(offset, batch_size)? else {
                debug!(rows_written = offset, "数据提供方中止写出");
                return Ok(WriteOutcome {
                    rows_written: offset as u64,
                    completed: false,
                });
            };

            for row in &page {
                writer.write_row(schema, row)?;
            }
            offset += page.len();

            if page.len() < batch_size {
                break;
            }
        }

        writer.finish()?;
        Ok(WriteOutcome {
            rows_written: offset as u64,
            completed: true,
        })
    }
}

// ==========================================
// TableWriter - 按格式分派的逐行写出
// ==========================================
// xlsx 工作表使用常量内存模式：已写完的行落到临时文件，内存只保留当前行
enum TableWriter<W: Write + Seek + Send> {
    Csv(csv::Writer<W>),
    Xlsx {
        sink: W,
        workbook: Workbook,
        next_row: u32,
    },
}

impl<W: Write + Seek + Send> TableWriter<W> {
    fn new(mut sink: W, format: FileFormat, schema: &RowSchema, sheet_name: &str) -> ImportResult<Self> {
        match format {
            FileFormat::Csv => {
                sink.write_all(UTF8_BOM)?;
                let mut writer = csv::WriterBuilder::new().from_writer(sink);
                writer.write_record(schema.headers())?;
                Ok(TableWriter::Csv(writer))
            }
            FileFormat::Xlsx => {
                let mut workbook = Workbook::new();
                let worksheet = workbook.add_worksheet_with_constant_memory();
                worksheet.set_name(sheet_name)?;
                let bold = Format::new().set_bold();
                for (idx, header) in schema.headers().into_iter().enumerate() {
                    worksheet.write_string_with_format(0, column_index(idx)?, header, &bold)?;
                }
                Ok(TableWriter::Xlsx {
                    sink,
                    workbook,
                    next_row: 1,
                })
            }
            FileFormat::Xls => Err(ImportError::UnsupportedFormat(
                "xls 仅支持读取，请改用 xlsx 或 csv".to_string(),
            )),
        }
    }

    fn write_row(&mut self, schema: &RowSchema, row: &RowRecord) -> ImportResult<()> {
        match self {
            TableWriter::Csv(writer) => {
                writer.write_record(schema.columns.iter().map(|c| row.value(&c.field)))?;
            }
            TableWriter::Xlsx {
                workbook,
                next_row,
                ..
            } => {
                let worksheet = workbook.worksheet_from_index(0)?;
                for (idx, column) in schema.columns.iter().enumerate() {
                    let value = row.value(&column.field);
                    if !value.is_empty() {
                        worksheet.write_string(*next_row, column_index(idx)?, value)?;
                    }
                }
                *next_row += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> ImportResult<()> {
        match self {
            TableWriter::Csv(mut writer) => {
                writer.flush()?;
            }
            TableWriter::Xlsx {
                mut sink,
                mut workbook,
                ..
            } => {
                workbook.save_to_writer(&mut sink)?;
                sink.flush()?;
            }
        }
        Ok(())
    }
}

fn column_index(idx: usize) -> ImportResult<u16> {
    u16::try_from(idx).map_err(|_| ImportError::FileWriteError(format!("列数过多: {}", idx + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::row::RowRecord;
    use crate::importer::file_parser::BatchControl;
    use std::io::Cursor;

    fn schema() -> RowSchema {
        RowSchema::from_pairs(&[("username", "用户名"), ("email", "邮箱")])
    }

    fn rows(n: usize) -> Vec<RowRecord> {
        (1..=n)
            .map(|i| {
                let username = format!("user{}", i);
                let email = format!("u{}@x.com", i);
                RowRecord::from_pairs(i, &[("username", username.as_str()), ("email", email.as_str())])
            })
            .collect()
    }

    fn read_back(codec: &SpreadsheetCodec, bytes: Vec<u8>, format: FileFormat) -> Vec<RowRecord> {
        let mut all = Vec::new();
        codec
            .read_rows(
                Cursor::new(bytes),
                format,
                &schema(),
                100,
                |batch| {
                    all.extend(batch);
                    Ok(BatchControl::Continue)
                },
                |_| Ok(()),
            )
            .unwrap();
        all
    }

    #[test]
    fn test_csv_write_has_bom_and_header() {
        let codec = SpreadsheetCodec::new(100);
        let mut out = Cursor::new(Vec::new());
        codec
            .write_rows(&mut out, FileFormat::Csv, &schema(), &rows(2), "Sheet1")
            .unwrap();

        let text = String::from_utf8(out.into_inner()).unwrap();
        assert!(text.starts_with('\u{feff}'));
        let lines: Vec<&str> = text.trim_start_matches('\u{feff}').lines().collect();
        assert_eq!(lines, vec!["用户名,邮箱", "user1,u1@x.com", "user2,u2@x.com"]);
    }

    #[test]
    fn test_xlsx_write_then_read() {
        let codec = SpreadsheetCodec::new(100);
        let mut out = Cursor::new(Vec::new());
        codec
            .write_rows(&mut out, FileFormat::Xlsx, &schema(), &rows(3), "用户")
            .unwrap();

        let back = read_back(&codec, out.into_inner(), FileFormat::Xlsx);
        assert_eq!(back.len(), 3);
        assert_eq!(back[2].row_number, 3);
        assert_eq!(back[2].value("username"), "user3");
        assert_eq!(back[2].value("email"), "u3@x.com");
    }

    #[test]
    fn test_batched_write_stops_on_short_page() {
        let codec = SpreadsheetCodec::new(100);
        let source = rows(5);
        let mut calls = Vec::new();
        let mut out = Cursor::new(Vec::new());

        let outcome = codec
            .write_rows_batched(
                &mut out,
                FileFormat::Csv,
                &schema(),
                |offset, limit| {
                    calls.push((offset, limit));
                    let end = (offset + limit).min(source.len());
                    Ok(Some(source[offset.min(end)..end].to_vec()))
                },
                "Sheet1",
                2,
            )
            .unwrap();

        assert_eq!(outcome, WriteOutcome { rows_written: 5, completed: true });
        assert_eq!(calls, vec![(0, 2), (2, 2), (4, 2)]);
        assert_eq!(read_back(&codec, out.into_inner(), FileFormat::Csv).len(), 5);
    }

    #[test]
    fn test_batched_write_exact_multiple_needs_empty_page() {
        let codec = SpreadsheetCodec::new(100);
        let source = rows(4);
        let mut pages = 0;

        let outcome = codec
            .write_rows_batched(
                Cursor::new(Vec::new()),
                FileFormat::Xlsx,
                &schema(),
                |offset, limit| {
                    pages += 1;
                    let end = (offset + limit).min(source.len());
                    Ok(Some(source[offset.min(end)..end].to_vec()))
                },
                "Sheet1",
                2,
            )
            .unwrap();

        assert_eq!(outcome.rows_written, 4);
        assert_eq!(pages, 3);
    }

    #[test]
    fn test_provider_abort() {
        let codec = SpreadsheetCodec::new(100);

        let outcome = codec
            .write_rows_batched(
                Cursor::new(Vec::new()),
                FileFormat::Csv,
                &schema(),
                |offset, _| Ok(if offset == 0 { Some(rows(2)) } else { None }),
                "Sheet1",
                2,
            )
            .unwrap();

        assert_eq!(outcome, WriteOutcome { rows_written: 2, completed: false });
    }

    #[test]
    fn test_xls_write_rejected() {
        let codec = SpreadsheetCodec::new(100);
        let result = codec.write_rows(Cursor::new(Vec::new()), FileFormat::Xls, &schema(), &rows(1), "Sheet1");
        assert!(matches!(result, Err(ImportError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_round_trip_keeps_surrounding_whitespace() {
        let codec = SpreadsheetCodec::new(100);
        let source = vec![
            RowRecord::from_pairs(1, &[("username", "  alice "), ("email", " a@x.com")]),
            RowRecord::from_pairs(2, &[("username", "bob"), ("email", "b@x.com\t")]),
        ];

        for format in [FileFormat::Csv, FileFormat::Xlsx] {
            let mut out = Cursor::new(Vec::new());
            codec
                .write_rows(&mut out, format, &schema(), &source, "Sheet1")
                .unwrap();

            let back = read_back(&codec, out.into_inner(), format);
            assert_eq!(back.len(), 2, "{}", format);
            assert_eq!(back[0].value("username"), "  alice ", "{}", format);
            assert_eq!(back[0].value("email"), " a@x.com", "{}", format);
            assert_eq!(back[1].value("email"), "b@x.com\t", "{}", format);
        }
    }

    #[test]
    fn test_xlsx_batched_write_many_pages() {
        let codec = SpreadsheetCodec::new(10_000);
        let source = rows(2_500);
        let mut out = Cursor::new(Vec::new());

        let outcome = codec
            .write_rows_batched(
                &mut out,
                FileFormat::Xlsx,
                &schema(),
                |offset, limit| {
                    let end = (offset + limit).min(source.len());
                    Ok(Some(source[offset.min(end)..end].to_vec()))
                },
                "Sheet1",
                500,
            )
            .unwrap();

        assert_eq!(outcome, WriteOutcome { rows_written: 2_500, completed: true });
        let back = read_back(&codec, out.into_inner(), FileFormat::Xlsx);
        assert_eq!(back.len(), 2_500);
        assert_eq!(back[2_499].row_number, 2_500);
        assert_eq!(back[2_499].value("username"), "user2500");
    }
}
