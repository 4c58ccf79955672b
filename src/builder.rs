//! FDB 文件构建（写路径）
//!
//! 写出顺序：
//! ```text
//! HEADER        num_tables | → TABLE ARRAY
//! TABLE ARRAY   2 × num_tables 个延迟槽位：[desc₀, rows₀, desc₁, rows₁, ...]
//! desc_i        num_columns | name* | → columns | (tag, name*) × N | strings
//! rows_i        num_buckets | → buckets | bucket 槽位 × M (0xFF = 空)
//!               每个非空桶：节点链 [row*, next*] → row → entries → 外置值
//! ```
//! `*` 为延迟写入的指针，由 [`DeferredWriter`] 在 flush 时回填。

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Seek, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::common::{bit_ceil, bucket_index, FdbError, Result, RowKey};
use crate::variant::{Column, Value, Variant};
use crate::writer::DeferredWriter;

// ── 表定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name:    String,
    pub columns: Vec<Column>,
}

impl TableDef {
    pub fn new(name: &str) -> Self {
        Self { name: name.into(), columns: Vec::new() }
    }

    pub fn with_column(mut self, name: &str, variant: Variant) -> Self {
        self.columns.push(Column::new(name, variant)); self
    }
}

// ── 行数据提供者 ──────────────────────────────────────────────────────────────

/// 一张表的行序列；迭代结束即结束标记，`Err` 会中止整个构建
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Vec<Value>>> + 'a>;

/// 外部行数据来源（例如关系数据库适配器）
pub trait RowProvider {
    fn rows<'a>(&'a mut self, table: &TableDef) -> Result<RowIter<'a>>;
}

/// 内存中的行数据，按表名存放
#[derive(Debug, Default, Clone)]
pub struct MemoryRowProvider {
    tables: HashMap<String, Vec<Vec<Value>>>,
}

impl MemoryRowProvider {
    pub fn new() -> Self { Self::default() }

    pub fn push_row(&mut self, table: &str, row: Vec<Value>) {
        self.tables.entry(table.into()).or_default().push(row);
    }

    pub fn with_rows(mut self, table: &str, rows: Vec<Vec<Value>>) -> Self {
        self.tables.entry(table.into()).or_default().extend(rows); self
    }
}

impl RowProvider for MemoryRowProvider {
    fn rows<'a>(&'a mut self, table: &TableDef) -> Result<RowIter<'a>> {
        let rows = self.tables.get(&table.name).map(Vec::as_slice).unwrap_or(&[]);
        Ok(Box::new(rows.iter().cloned().map(Ok::<_, FdbError>)))
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// 按键分好的桶：`buckets[i]` 为落入第 i 桶的全部行
type Buckets = Vec<Vec<Vec<Value>>>;

pub struct Builder {
    tables: Vec<TableDef>,
}

impl Builder {
    /// 表按名称排序，输出与输入顺序无关
    pub fn new(mut tables: Vec<TableDef>) -> Self {
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Self { tables }
    }

    pub fn tables(&self) -> &[TableDef] { &self.tables }

    /// 把完整文件写入 `sink`，返回文件字节数
    ///
    /// 任何一张表出错（列数不符、行提供者报错、无键行）都会中止构建，
    /// 此时 `sink` 中的内容不是合法文件。
    pub fn flush_to<W, P>(&self, sink: W, provider: &mut P) -> Result<u64>
    where
        W: Write + Seek,
        P: RowProvider + ?Sized,
    {
        let mut w = DeferredWriter::new(sink)?;
        let tables = &self.tables;

        w.put_len(tables.len(), "table count")?;
        w.deferred_array(tables.len() * 2, true, 0x00, |w, slot| {
            let table = &tables[slot / 2];
            if slot % 2 == 0 {
                write_description(w, table)?;
            } else {
                let buckets = collect_buckets(table, &mut *provider)?;
                write_rows(w, &buckets)?;
            }
            Ok(true)
        })?;

        let strings = w.interned_strings();
        let (_, len) = w.finish()?;
        info!(tables = tables.len(), strings, bytes = len, "fdb build complete");
        Ok(len)
    }
}

/// 构建到 `path`：先写同目录临时文件，成功后原子改名；失败时不留下半成品
pub fn write_file<P>(path: &Path, builder: &Builder, provider: &mut P) -> Result<u64>
where
    P: RowProvider + ?Sized,
{
    let tmp_path = path.with_extension("fdb.tmp");
    let file = File::create(&tmp_path)
        .map_err(FdbError::io(format!("cannot create {}", tmp_path.display())))?;

    let result = write_tmp(file, &tmp_path, builder, provider).and_then(|len| {
        fs::rename(&tmp_path, path)
            .map_err(FdbError::io(format!("cannot rename to {}", path.display())))?;
        Ok(len)
    });
    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %e, "cannot remove partial fdb");
            }
        }
    }
    result
}

/// 写满临时文件并落盘；出错时由调用方负责删除
fn write_tmp<P>(file: File, tmp_path: &Path, builder: &Builder, provider: &mut P) -> Result<u64>
where
    P: RowProvider + ?Sized,
{
    let mut out = BufWriter::new(file);
    let len = builder.flush_to(&mut out, provider)?;
    let file = out.into_inner()
        .map_err(|e| FdbError::io(format!("cannot flush {}", tmp_path.display()))(e.into_error()))?;
    file.sync_all().map_err(FdbError::io(format!("cannot sync {}", tmp_path.display())))?;
    Ok(len)
}

// ── 表描述 ────────────────────────────────────────────────────────────────────

fn write_description<W: Write + Seek>(w: &mut DeferredWriter<W>, table: &TableDef) -> Result<()> {
    w.put_len(table.columns.len(), "column count")?;
    w.defer_string(&table.name)?;
    w.array(table.columns.len(), |w, i| {
        let column = &table.columns[i];
        w.put_u32(column.variant.tag())?;
        w.defer_string(&column.name)
    })?;
    w.flush()
}

// ── 分桶 ──────────────────────────────────────────────────────────────────────

fn collect_buckets<P>(table: &TableDef, provider: &mut P) -> Result<Buckets>
where
    P: RowProvider + ?Sized,
{
    let mut by_key: BTreeMap<RowKey, Vec<Vec<Value>>> = BTreeMap::new();
    let mut num_rows = 0usize;

    for row in provider.rows(table)? {
        let row = row?;
        if row.len() != table.columns.len() {
            return Err(FdbError::ColumnCountMismatch {
                table:    table.name.clone(),
                expected: table.columns.len(),
                actual:   row.len(),
            });
        }
        let key = row.first().ok_or(FdbError::NoKey)?.key()?;
        by_key.entry(key).or_default().push(row);
        num_rows += 1;
    }

    let num_buckets = bit_ceil(by_key.len())
        .ok_or(FdbError::OutOfRange { what: "distinct key count", value: by_key.len() as u64 })?;
    let mut buckets: Buckets = vec![Vec::new(); num_buckets as usize];
    for (key, rows) in by_key {
        buckets[bucket_index(key, num_buckets) as usize].extend(rows);
    }

    debug!(table = %table.name, rows = num_rows, buckets = num_buckets, "collected rows");
    Ok(buckets)
}

// ── 行与索引 ──────────────────────────────────────────────────────────────────

fn write_rows<W: Write + Seek>(w: &mut DeferredWriter<W>, buckets: &Buckets) -> Result<()> {
    w.put_len(buckets.len(), "bucket count")?;
    w.deferred_array(buckets.len(), true, 0xFF, |w, i| {
        let bucket = &buckets[i];
        if bucket.is_empty() {
            return Ok(false);
        }
        write_chain(w, bucket)?;
        Ok(true)
    })?;
    Ok(())
}

/// 把同一个桶的行写成单向链表
///
/// 每个节点是 2 槽延迟数组：槽 0 指向行数据，槽 1 指向下一节点（缺省为 0xFFFFFFFF）。
/// 节点依次追加在尾部，上一节点的槽 1 在下一节点写出时回填。
fn write_chain<W: Write + Seek>(w: &mut DeferredWriter<W>, rows: &[Vec<Value>]) -> Result<()> {
    let mut prev_next = None;
    for row in rows {
        if let Some(home) = prev_next {
            let here = w.position();
            w.patch(home, here)?;
        }
        let slots = w.deferred_array(2, false, 0xFF, |w, slot| {
            if slot == 0 {
                write_row(w, row)?;
                Ok(true)
            } else {
                Ok(false)
            }
        })?;
        prev_next = Some(slots + 4);
    }
    Ok(())
}

fn write_row<W: Write + Seek>(w: &mut DeferredWriter<W>, row: &[Value]) -> Result<()> {
    w.put_len(row.len(), "row column count")?;
    w.array(row.len(), |w, i| write_entry(w, &row[i]))?;
    // 行内的字符串 / 64 位值必须在引用该行之前落盘
    w.flush()
}

fn write_entry<W: Write + Seek>(w: &mut DeferredWriter<W>, value: &Value) -> Result<()> {
    w.put_u32(value.variant().tag())?;
    match value {
        Value::Null        => w.put_u32(0),
        Value::Int32(v)    => w.put_i32(*v),
        Value::Uint32(v)   => w.put_u32(*v),
        Value::Real(v)     => w.put_f32(*v),
        Value::Bool(v)     => w.put_bool(*v),
        Value::Int64(v)    => w.defer_i64(*v),
        Value::Uint64(v)   => w.defer_u64(*v),
        Value::NVarChar(s) | Value::Text(s) => w.defer_string(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;
    use std::io::Cursor;

    fn build(builder: &Builder, provider: &mut MemoryRowProvider) -> Result<Vec<u8>> {
        let mut cur = Cursor::new(Vec::new());
        builder.flush_to(&mut cur, provider)?;
        Ok(cur.into_inner())
    }

    fn items() -> TableDef {
        TableDef::new("Items")
            .with_column("id", Variant::Int32)
            .with_column("label", Variant::Text)
            .with_column("weight", Variant::Int64)
    }

    #[test]
    fn tables_are_sorted_by_name() {
        let b = Builder::new(vec![TableDef::new("b"), TableDef::new("a"), TableDef::new("C")]);
        let names: Vec<_> = b.tables().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["C", "a", "b"]);
    }

    #[test]
    fn column_count_mismatch_aborts_build() {
        let builder = Builder::new(vec![items()]);
        let mut provider = MemoryRowProvider::new()
            .with_rows("Items", vec![vec![Value::Int32(1), Value::Text("x".into())]]);
        match build(&builder, &mut provider) {
            Err(FdbError::ColumnCountMismatch { table, expected, actual }) => {
                assert_eq!((table.as_str(), expected, actual), ("Items", 3, 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn null_key_aborts_build() {
        let builder = Builder::new(vec![items()]);
        let mut provider = MemoryRowProvider::new()
            .with_rows("Items", vec![vec![Value::Null, Value::Null, Value::Null]]);
        assert!(matches!(build(&builder, &mut provider), Err(FdbError::NoKey)));
    }

    struct FailingProvider;

    impl RowProvider for FailingProvider {
        fn rows<'a>(&'a mut self, table: &TableDef) -> Result<RowIter<'a>> {
            let name = table.name.clone();
            Ok(Box::new(
                vec![
                    Ok(vec![Value::Int32(1), Value::Null, Value::Null]),
                    Err(FdbError::provider(&name, "connection reset")),
                ]
                .into_iter(),
            ))
        }
    }

    #[test]
    fn provider_error_aborts_build() {
        let builder = Builder::new(vec![items()]);
        let mut cur = Cursor::new(Vec::new());
        let err = builder.flush_to(&mut cur, &mut FailingProvider).err().unwrap();
        assert!(matches!(err, FdbError::Provider { .. }));
    }

    #[test]
    fn empty_table_has_zero_buckets() {
        let builder = Builder::new(vec![items()]);
        let bytes = build(&builder, &mut MemoryRowProvider::new()).unwrap();
        let reader = Reader::from_bytes(bytes).unwrap();
        let table = reader.table("Items").unwrap();
        assert_eq!(table.hash_table().num_buckets(), 0);
        assert_eq!(table.rows().count(), 0);
        assert!(table.find(1).unwrap_err().is_not_found());
    }

    #[test]
    fn bucket_count_is_bit_ceil_of_distinct_keys() {
        let builder = Builder::new(vec![items()]);
        let rows = [1, 2, 3, 4, 5, 5]
            .iter()
            .map(|&id| vec![Value::Int32(id), Value::Text("x".into()), Value::Int64(id as i64)])
            .collect();
        let mut provider = MemoryRowProvider::new().with_rows("Items", rows);
        let reader = Reader::from_bytes(build(&builder, &mut provider).unwrap()).unwrap();
        let table = reader.table("Items").unwrap();
        assert_eq!(table.hash_table().num_buckets(), 8);
        assert_eq!(table.rows().count(), 6);
        assert_eq!(table.find_all(5).unwrap().len(), 2);
    }

    #[test]
    fn colliding_keys_share_a_chain() {
        let builder = Builder::new(vec![items()]);
        // 2 个不同键 → 2 个桶；1 与 3 同落在桶 1
        let rows = [1, 3]
            .iter()
            .map(|&id| vec![Value::Int32(id), Value::Null, Value::Null])
            .collect();
        let mut provider = MemoryRowProvider::new().with_rows("Items", rows);
        let reader = Reader::from_bytes(build(&builder, &mut provider).unwrap()).unwrap();
        let ht = reader.table("Items").unwrap().hash_table();
        assert_eq!(ht.num_buckets(), 2);
        assert!(ht.bucket(0).unwrap().is_none());
        let chain: Vec<_> = ht.bucket(1).unwrap().unwrap().map(|r| r.unwrap().key().unwrap()).collect();
        assert_eq!(chain, [1, 3]);
        assert_eq!(ht.find(3).unwrap().column(0).unwrap().as_i32().unwrap(), 3);
    }

    #[test]
    fn out_of_line_values_round_trip() {
        let builder = Builder::new(vec![items()]);
        let mut provider = MemoryRowProvider::new().with_rows(
            "Items",
            vec![vec![Value::Int32(-4), Value::Text("crate".into()), Value::Int64(-(1 << 40))]],
        );
        let reader = Reader::from_bytes(build(&builder, &mut provider).unwrap()).unwrap();
        let row = reader.table("Items").unwrap().find(Value::Int32(-4).key().unwrap()).unwrap();
        assert_eq!(row.column(1).unwrap().as_string().unwrap(), "crate");
        assert_eq!(row.column(2).unwrap().as_i64().unwrap(), -(1 << 40));
        assert!(matches!(
            row.column(2).unwrap().as_i32(),
            Err(FdbError::TypeMismatch { expected: "Int32", found: Variant::Int64 })
        ));
    }
}
