// ==========================================
// 批量导入导出引擎 - 表格解码器
// ==========================================
// 支持: Excel (.xlsx/.xls) / CSV (.csv)
// 读取: 逐行流式读取，按批回调；.xlsx 使用惰性单元格读取器
// 行号: 表头之后的第一条数据行为第 1 行；空白行跳过但占用行号
// ==========================================

use crate::domain::row::{RowError, RowRecord, RowSchema};
use crate::domain::types::{ErrorCategory, FileFormat};
use crate::importer::error::{ImportError, ImportResult};
use calamine::{Data, Reader, Xls, Xlsx};
use chrono::{Duration, NaiveDate};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::{self, Read, Seek};
use tracing::{debug, warn};

const UTF8_BOM: char = '\u{feff}';

/// 批回调的返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchControl {
    Continue,
    Stop,
}

/// 读取汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadSummary {
    /// 读取的数据行数（含格式错误行，不含空白行）
    pub total_rows: usize,
    /// 是否因批回调返回 Stop 而提前结束
    pub stopped_early: bool,
}

// ==========================================
// SpreadsheetCodec - 表格编解码器
// ==========================================
// 与业务结构无关，列映射由 RowSchema 提供
#[derive(Debug, Clone)]
pub struct SpreadsheetCodec {
    max_rows: usize,
}

impl SpreadsheetCodec {
    /// # 参数
    /// - max_rows: 单次读取的数据行上限
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// 流式读取数据行
    ///
    /// # 参数
    /// - source: 文件内容
    /// - format: 文件格式（由请求显式指定）
    /// - schema: 表头 ↔ 字段映射；为空时以表头原文作为字段键
    /// - batch_size: 每批行数
    /// - on_batch: 满批及末尾不足一批时各回调一次
    /// - on_error: 格式错误行（读取继续）
    ///
    /// # 错误
    /// - RowLimitExceeded: 读取行数超过上限（立即返回，已回调的批次不回滚）
    pub fn read_rows<R, B, E>(
        &self,
        source: R,
        format: FileFormat,
        schema: &RowSchema,
        batch_size: usize,
        on_batch: B,
        on_error: E,
    ) -> ImportResult<ReadSummary>
    where
        R: Read + Seek,
        B: FnMut(Vec<RowRecord>) -> ImportResult<BatchControl>,
        E: FnMut(RowError) -> ImportResult<()>,
    {
        let mut collector = RowCollector {
            schema,
            fields: Vec::new(),
            headers: Vec::new(),
            batch_size: batch_size.max(1),
            max_rows: self.max_rows,
            batch: Vec::new(),
            total_rows: 0,
            on_batch,
            on_error,
        };

        let flow = match format {
            FileFormat::Csv => read_csv(source, &mut collector)?,
            FileFormat::Xlsx => read_xlsx(source, &mut collector)?,
            FileFormat::Xls => read_xls(source, &mut collector)?,
        };

        let stopped_early = match flow {
            BatchControl::Stop => true,
            BatchControl::Continue => collector.flush()? == BatchControl::Stop,
        };

        debug!(
            format = %format,
            total_rows = collector.total_rows,
            stopped_early,
            "文件读取完成"
        );
        Ok(ReadSummary {
            total_rows: collector.total_rows,
            stopped_early,
        })
    }

    /// 估算数据行数（用于进度计算，不校验内容）
    pub fn estimate_row_count<R: Read + Seek>(
        &self,
        source: R,
        format: FileFormat,
    ) -> ImportResult<u64> {
        match format {
            FileFormat::Csv => {
                let mut reader = ReaderBuilder::new()
                    .has_headers(true)
                    .flexible(true)
                    .from_reader(source);
                let mut count = 0u64;
                let mut record = csv::ByteRecord::new();
                while reader.read_byte_record(&mut record)? {
                    count += 1;
                }
                Ok(count)
            }
            FileFormat::Xlsx => {
                let mut workbook: Xlsx<R> = Xlsx::new(source)?;
                let sheet_name = first_sheet_name(&workbook.sheet_names())?;
                let mut cells = workbook.worksheet_cells_reader(&sheet_name)?;
                let mut first_row: Option<u32> = None;
                let mut last_row: Option<u32> = None;
                while let Some(cell) = cells.next_cell()? {
                    let (row, _) = cell.get_position();
                    first_row.get_or_insert(row);
                    last_row = Some(row);
                }
                Ok(match (first_row, last_row) {
                    (Some(first), Some(last)) => u64::from(last - first),
                    _ => 0,
                })
            }
            FileFormat::Xls => {
                let mut workbook: Xls<R> = Xls::new(source)?;
                let sheet_name = first_sheet_name(&workbook.sheet_names())?;
                let range = workbook.worksheet_range(&sheet_name)?;
                Ok(range.height().saturating_sub(1) as u64)
            }
        }
    }
}

// ==========================================
// RowCollector - 行汇集（映射 / 计数 / 分批）
// ==========================================
struct RowCollector<'s, B, E> {
    schema: &'s RowSchema,
    fields: Vec<Option<String>>, // 按列序号映射到字段键
    headers: Vec<String>,
    batch_size: usize,
    max_rows: usize,
    batch: Vec<RowRecord>,
    total_rows: usize,
    on_batch: B,
    on_error: E,
}

impl<'s, B, E> RowCollector<'s, B, E>
where
    B: FnMut(Vec<RowRecord>) -> ImportResult<BatchControl>,
    E: FnMut(RowError) -> ImportResult<()>,
{
    fn set_headers(&mut self, headers: Vec<String>) {
        self.fields = headers
            .iter()
            .map(|h| {
                let h = h.trim();
                if h.is_empty() {
                    None
                } else if self.schema.is_empty() {
                    Some(h.to_string())
                } else {
                    self.schema.resolve_header(h).map(str::to_string)
                }
            })
            .collect();

        let unmapped: Vec<&str> = headers
            .iter()
            .zip(&self.fields)
            .filter(|(h, f)| f.is_none() && !h.trim().is_empty())
            .map(|(h, _)| h.as_str())
            .collect();
        if !unmapped.is_empty() {
            warn!(headers = ?unmapped, "存在未映射的表头列，已忽略");
        }
        self.headers = headers;
    }

    fn column_title(&self, col: usize) -> String {
        self.headers
            .get(col)
            .map(|h| h.trim().to_string())
            .unwrap_or_else(|| format!("第{}列", col + 1))
    }

    fn count_row(&mut self) -> ImportResult<()> {
        self.total_rows += 1;
        if self.total_rows > self.max_rows {
            return Err(ImportError::RowLimitExceeded {
                limit: self.max_rows,
            });
        }
        Ok(())
    }

    /// 接收一行（按列序号给出单元格文本）
    fn accept(
        &mut self,
        row_number: usize,
        cells: Vec<(usize, String)>,
    ) -> ImportResult<BatchControl> {
        if cells.iter().all(|(_, v)| v.trim().is_empty()) {
            return Ok(BatchControl::Continue);
        }
        self.count_row()?;

        let mut values = HashMap::with_capacity(self.fields.len());
        for (col, value) in cells {
            if let Some(Some(field)) = self.fields.get(col) {
                values.insert(field.clone(), value);
            }
        }
        self.batch.push(RowRecord::new(row_number, values));

        if self.batch.len() >= self.batch_size {
            self.flush()
        } else {
            Ok(BatchControl::Continue)
        }
    }

    /// 接收一条格式错误行
    fn reject(&mut self, error: RowError) -> ImportResult<()> {
        self.count_row()?;
        (self.on_error)(error)
    }

    fn flush(&mut self) -> ImportResult<BatchControl> {
        if self.batch.is_empty() {
            return Ok(BatchControl::Continue);
        }
        let batch = std::mem::take(&mut self.batch);
        (self.on_batch)(batch)
    }
}

// ==========================================
// CSV
// ==========================================

/// 记录底层已读取的字节数与末字节，用于判断最后一条记录是否以换行结尾
struct TrackedSource<R> {
    inner: R,
    total: u64,
    last_byte: Option<u8>,
    eof: bool,
}

impl<R: Read> Read for TrackedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.total += n as u64;
            self.last_byte = Some(buf[n - 1]);
        } else if !buf.is_empty() {
            self.eof = true;
        }
        Ok(n)
    }
}

impl<R> TrackedSource<R> {
    /// 读取位置已到文件末尾且末尾没有换行
    fn ends_without_newline_at(&self, byte: u64) -> bool {
        self.eof && byte >= self.total && self.last_byte != Some(b'\n')
    }
}

fn read_csv<R, B, E>(source: R, collector: &mut RowCollector<'_, B, E>) -> ImportResult<BatchControl>
where
    R: Read,
    B: FnMut(Vec<RowRecord>) -> ImportResult<BatchControl>,
    E: FnMut(RowError) -> ImportResult<()>,
{
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(TrackedSource {
            inner: source,
            total: 0,
            last_byte: None,
            eof: false,
        });

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(idx, h)| {
            if idx == 0 {
                h.trim_start_matches(UTF8_BOM).to_string()
            } else {
                h.to_string()
            }
        })
        .collect();
    collector.set_headers(headers);

    // csv 会直接跳过空行，行号需按物理行补回；引号内换行的记录仍算一行
    let mut line_after_previous = reader.position().line();
    let mut record = csv::StringRecord::new();
    let mut row_number = 0usize;
    loop {
        let result = reader.read_record(&mut record);
        if let Ok(false) = result {
            break;
        }

        let end = reader.position().clone();
        let embedded_newlines: u64 = record
            .as_byte_record()
            .iter()
            .map(|field| field.iter().filter(|b| **b == b'\n').count() as u64)
            .sum();
        let terminator = u64::from(!reader.get_ref().ends_without_newline_at(end.byte()));
        let start_line = end
            .line()
            .saturating_sub(embedded_newlines + terminator);
        let skipped_blank_lines = start_line.saturating_sub(line_after_previous) as usize;
        row_number += skipped_blank_lines + 1;
        line_after_previous = end.line();

        match result {
            Ok(_) => {
                let cells = record
                    .iter()
                    .enumerate()
                    .map(|(col, v)| (col, v.to_string()))
                    .collect();
                if collector.accept(row_number, cells)? == BatchControl::Stop {
                    return Ok(BatchControl::Stop);
                }
            }
            Err(e) => {
                if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                    return Err(e.into());
                }
                let message = match e.kind() {
                    csv::ErrorKind::UnequalLengths {
                        expected_len, len, ..
                    } => format!("字段数 {} 与表头列数 {} 不一致", len, expected_len),
                    csv::ErrorKind::Utf8 { .. } => "内容不是有效的 UTF-8 文本".to_string(),
                    _ => format!("行解析失败: {}", e),
                };
                collector.reject(RowError::new(
                    row_number,
                    "",
                    "",
                    record.iter().collect::<Vec<_>>().join(","),
                    ErrorCategory::FormatError,
                    message,
                ))?;
            }
        }
    }
    Ok(BatchControl::Continue)
}

// ==========================================
// Excel
// ==========================================
fn first_sheet_name(names: &[String]) -> ImportResult<String> {
    names
        .first()
        .cloned()
        .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))
}

/// Excel 序列日期 → 文本（1900 日期系统）
fn excel_serial_to_string(serial: f64) -> String {
    let Some(base) = NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return serial.to_string();
    };
    let millis = (serial * 86_400_000.0).round() as i64;
    let datetime = base + Duration::milliseconds(millis);
    if millis % 86_400_000 == 0 {
        datetime.format("%Y-%m-%d").to_string()
    } else {
        datetime.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// 单元格 → 文本；错误单元格返回 Err(错误文本)
fn cell_to_string(cell: &Data) -> Result<String, String> {
    match cell {
        Data::Empty => Ok(String::new()),
        Data::String(s) => Ok(s.clone()),
        Data::Int(i) => Ok(i.to_string()),
        // 整数值的浮点数不带小数位输出
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Ok(format!("{}", *f as i64)),
        Data::Float(f) => Ok(f.to_string()),
        Data::Bool(b) => Ok(b.to_string()),
        Data::DateTime(dt) => Ok(excel_serial_to_string(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Ok(s.clone()),
        Data::Error(e) => Err(e.to_string()),
    }
}

/// 处理一行 Excel 单元格（含错误单元格检查）
fn accept_excel_row<B, E>(
    collector: &mut RowCollector<'_, B, E>,
    row_number: usize,
    cells: Vec<(usize, Data)>,
) -> ImportResult<BatchControl>
where
    B: FnMut(Vec<RowRecord>) -> ImportResult<BatchControl>,
    E: FnMut(RowError) -> ImportResult<()>,
{
    let mut texts = Vec::with_capacity(cells.len());
    for (col, cell) in &cells {
        match cell_to_string(cell) {
            Ok(text) => texts.push((*col, text)),
            Err(raw) => {
                let field = collector
                    .fields
                    .get(*col)
                    .cloned()
                    .flatten()
                    .unwrap_or_default();
                let column = collector.column_title(*col);
                collector.reject(RowError::new(
                    row_number,
                    field,
                    column,
                    raw,
                    ErrorCategory::FormatError,
                    "单元格包含错误值",
                ))?;
                return Ok(BatchControl::Continue);
            }
        }
    }
    collector.accept(row_number, texts)
}

fn header_texts(cells: &[(usize, Data)]) -> Vec<String> {
    let width = cells.iter().map(|(col, _)| col + 1).max().unwrap_or(0);
    let mut headers = vec![String::new(); width];
    for (col, cell) in cells {
        headers[*col] = cell_to_string(cell).unwrap_or_default();
    }
    headers
}

fn read_xlsx<R, B, E>(source: R, collector: &mut RowCollector<'_, B, E>) -> ImportResult<BatchControl>
where
    R: Read + Seek,
    B: FnMut(Vec<RowRecord>) -> ImportResult<BatchControl>,
    E: FnMut(RowError) -> ImportResult<()>,
{
    let mut workbook: Xlsx<R> = Xlsx::new(source)?;
    let sheet_name = first_sheet_name(&workbook.sheet_names())?;
    let mut reader = workbook.worksheet_cells_reader(&sheet_name)?;

    // 单元格按行优先顺序产出，行切换时提交上一行
    let mut header_row: Option<u32> = None;
    let mut current_row: Option<u32> = None;
    let mut pending: Vec<(usize, Data)> = Vec::new();

    loop {
        let next = reader.next_cell()?;
        let next_row = next.as_ref().map(|cell| cell.get_position().0);

        if let Some(row) = current_row.filter(|r| next_row != Some(*r)) {
            let cells = std::mem::take(&mut pending);
            match header_row {
                None => {
                    header_row = Some(row);
                    collector.set_headers(header_texts(&cells));
                }
                Some(header) => {
                    let row_number = (row - header) as usize;
                    if accept_excel_row(collector, row_number, cells)? == BatchControl::Stop {
                        return Ok(BatchControl::Stop);
                    }
                }
            }
        }

        match next {
            Some(cell) => {
                let (row, col) = cell.get_position();
                current_row = Some(row);
                pending.push((col as usize, Data::from(cell.get_value().clone())));
            }
            None => break,
        }
    }
    Ok(BatchControl::Continue)
}

fn read_xls<R, B, E>(source: R, collector: &mut RowCollector<'_, B, E>) -> ImportResult<BatchControl>
where
    R: Read + Seek,
    B: FnMut(Vec<RowRecord>) -> ImportResult<BatchControl>,
    E: FnMut(RowError) -> ImportResult<()>,
{
    let mut workbook: Xls<R> = Xls::new(source)?;
    let sheet_name = first_sheet_name(&workbook.sheet_names())?;
    let range = workbook.worksheet_range(&sheet_name)?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(BatchControl::Continue);
    };
    let header_cells: Vec<(usize, Data)> = header.iter().cloned().enumerate().collect();
    collector.set_headers(header_texts(&header_cells));

    for (idx, row) in rows.enumerate() {
        let cells = row.iter().cloned().enumerate().collect();
        if accept_excel_row(collector, idx + 1, cells)? == BatchControl::Stop {
            return Ok(BatchControl::Stop);
        }
    }
    Ok(BatchControl::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn user_schema() -> RowSchema {
        RowSchema::from_pairs(&[("username", "用户名"), ("email", "邮箱")])
    }

    fn read_all(
        codec: &SpreadsheetCodec,
        content: &str,
        batch_size: usize,
    ) -> ImportResult<(Vec<Vec<RowRecord>>, Vec<RowError>, ReadSummary)> {
        let mut batches = Vec::new();
        let mut errors = Vec::new();
        let summary = codec.read_rows(
            Cursor::new(content.as_bytes().to_vec()),
            FileFormat::Csv,
            &user_schema(),
            batch_size,
            |batch| {
                batches.push(batch);
                Ok(BatchControl::Continue)
            },
            |error| {
                errors.push(error);
                Ok(())
            },
        )?;
        Ok((batches, errors, summary))
    }

    #[test]
    fn test_csv_batches_and_trailing_partial() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\na,a@x.com\nb,b@x.com\nc,c@x.com\nd,d@x.com\ne,e@x.com\n";

        let (batches, errors, summary) = read_all(&codec, content, 2).unwrap();

        assert_eq!(summary.total_rows, 5);
        assert!(errors.is_empty());
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batches[2][0].row_number, 5);
        assert_eq!(batches[0][1].value("email"), "b@x.com");
    }

    #[test]
    fn test_csv_bom_and_field_key_headers() {
        let codec = SpreadsheetCodec::new(100);
        let content = "\u{feff}username,邮箱\nalice,a@x.com\n";

        let (batches, _, _) = read_all(&codec, content, 10).unwrap();

        assert_eq!(batches[0][0].value("username"), "alice");
        assert_eq!(batches[0][0].value("email"), "a@x.com");
    }

    #[test]
    fn test_csv_malformed_row_reported_and_reading_continues() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\na,a@x.com\nb,b@x.com,extra\nc,c@x.com\n";

        let (batches, errors, summary) = read_all(&codec, content, 10).unwrap();

        assert_eq!(summary.total_rows, 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 2);
        assert_eq!(errors[0].category, ErrorCategory::FormatError);
        assert_eq!(batches[0][1].row_number, 3);
    }

    #[test]
    fn test_blank_rows_skipped_but_numbered() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\na,a@x.com\n,\nc,c@x.com\n";

        let (batches, _, summary) = read_all(&codec, content, 10).unwrap();

        assert_eq!(summary.total_rows, 2);
        let numbers: Vec<usize> = batches[0].iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_empty_lines_keep_row_numbers() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\nalice,a@x.com\n\ncarol,bad\n";

        let (batches, _, summary) = read_all(&codec, content, 10).unwrap();

        assert_eq!(summary.total_rows, 2);
        let numbers: Vec<usize> = batches[0].iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 3]);
    }

    #[test]
    fn test_empty_lines_before_malformed_and_unterminated_rows() {
        let codec = SpreadsheetCodec::new(100);
        // 第 2、3、5 行为空行；末行没有换行
        let content = "用户名,邮箱\na,1\n\n\nb,2,extra\n\nc,3";

        let (batches, errors, summary) = read_all(&codec, content, 10).unwrap();

        assert_eq!(summary.total_rows, 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row_number, 4);
        let numbers: Vec<usize> = batches[0].iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 6]);
    }

    #[test]
    fn test_quoted_newline_counts_as_one_row() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\n\"al\nice\",a@x.com\nbob,b@x.com\n";

        let (batches, _, _) = read_all(&codec, content, 10).unwrap();

        assert_eq!(batches[0][0].value("username"), "al\nice");
        let numbers: Vec<usize> = batches[0].iter().map(|r| r.row_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_cell_text_kept_verbatim() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\n  alice , a@x.com\n";

        let (batches, _, _) = read_all(&codec, content, 10).unwrap();

        assert_eq!(batches[0][0].value("username"), "  alice ");
        assert_eq!(batches[0][0].value("email"), " a@x.com");
    }

    #[test]
    fn test_row_limit_boundary() {
        let codec = SpreadsheetCodec::new(3);
        let three = "用户名,邮箱\na,1\nb,2\nc,3\n";
        let four = "用户名,邮箱\na,1\nb,2\nc,3\nd,4\n";

        assert_eq!(read_all(&codec, three, 10).unwrap().2.total_rows, 3);
        assert!(matches!(
            read_all(&codec, four, 10),
            Err(ImportError::RowLimitExceeded { limit: 3 })
        ));
    }

    #[test]
    fn test_stop_ends_reading() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\na,1\nb,2\nc,3\nd,4\n";
        let mut seen = 0;

        let summary = codec
            .read_rows(
                Cursor::new(content.as_bytes().to_vec()),
                FileFormat::Csv,
                &user_schema(),
                2,
                |batch| {
                    seen += batch.len();
                    Ok(BatchControl::Stop)
                },
                |_| Ok(()),
            )
            .unwrap();

        assert!(summary.stopped_early);
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_estimate_csv_rows() {
        let codec = SpreadsheetCodec::new(100);
        let content = "用户名,邮箱\na,1\nb,2\nc,3\n";

        let estimate = codec
            .estimate_row_count(Cursor::new(content.as_bytes().to_vec()), FileFormat::Csv)
            .unwrap();
        assert_eq!(estimate, 3);
    }

    #[test]
    fn test_excel_cell_text() {
        assert_eq!(cell_to_string(&Data::Float(42.0)), Ok("42".to_string()));
        assert_eq!(cell_to_string(&Data::Float(1.5)), Ok("1.5".to_string()));
        assert_eq!(cell_to_string(&Data::Int(7)), Ok("7".to_string()));
        assert_eq!(cell_to_string(&Data::Empty), Ok(String::new()));
        assert_eq!(excel_serial_to_string(45292.0), "2024-01-01");
        assert_eq!(excel_serial_to_string(45292.5), "2024-01-01 12:00:00");
    }
}
