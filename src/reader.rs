//! FDB 文件读取
//!
//! 文件格式（所有整数小端，所有偏移为文件内绝对位置）：
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ HEADER  num_tables(u32) | table_array(u32)   │
//! ├──────────────────────────────────────────────┤
//! │ TABLE ARRAY × num_tables                     │
//! │   description(u32) | hash_table(u32)         │
//! ├──────────────────────────────────────────────┤
//! │ DESCRIPTION                                  │
//! │   num_columns | name_ptr | column_array      │
//! │   COLUMN × N : variant_tag | name_ptr        │
//! ├──────────────────────────────────────────────┤
//! │ HASH TABLE   num_buckets | bucket_array      │  → index 模块
//! │ NODES / ROWS / ENTRIES / STRINGS / INT64     │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! 表结构（名称、列、桶数组位置）在打开时一次性解析并校验；
//! 行数据始终按需读取，不做缓存。

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::common::{FdbError, Offset, Result, RowKey};
use crate::entry::Row;
use crate::index::{HashTable, Rows};
use crate::source::{ReadAt, Source};
use crate::variant::{key_from_bytes, Column, Variant};

// ── 配置 ──────────────────────────────────────────────────────────────────────

/// 打开文件时的合法性上限，超出即视为损坏
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub max_tables:     u32,
    pub max_columns:    u32,
    pub max_string_len: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self { max_tables: 1 << 16, max_columns: 1 << 12, max_string_len: 1 << 20 }
    }
}

impl ReaderOptions {
    pub fn with_max_tables(mut self, n: u32) -> Self {
        self.max_tables = n; self
    }
    pub fn with_max_columns(mut self, n: u32) -> Self {
        self.max_columns = n; self
    }
    pub fn with_max_string_len(mut self, n: usize) -> Self {
        self.max_string_len = n; self
    }
}

// ── 表元数据 ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TableInfo {
    name:        String,
    columns:     Vec<Column>,
    num_buckets: u32,
    buckets_at:  Offset,
}

impl TableInfo {
    fn read<S: ReadAt>(
        src:        &Source<S>,
        desc_at:    Offset,
        hash_at:    Offset,
        options:    &ReaderOptions,
    ) -> Result<Self> {
        let num_columns = src.read_u32(desc_at)?;
        let (name_ptr, columns_at) = src.read_pair(desc_at + 4)?;
        if num_columns > options.max_columns {
            return Err(FdbError::OutOfRange { what: "column count", value: num_columns as u64 });
        }
        src.check_span(columns_at, num_columns as u64 * 8, "column array")?;

        let name = src.read_name(name_ptr)?;
        let columns = (0..num_columns)
            .map(|i| {
                let (tag, col_name) = src.read_pair(columns_at + 8 * i)?;
                Ok(Column { name: src.read_name(col_name)?, variant: Variant::try_from(tag)? })
            })
            .collect::<Result<Vec<_>>>()?;

        let (num_buckets, buckets_at) = src.read_pair(hash_at)?;
        src.check_span(buckets_at, num_buckets as u64 * 4, "bucket array")?;

        Ok(Self { name, columns, num_buckets, buckets_at })
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct Reader<S> {
    src:     Source<S>,
    tables:  Vec<TableInfo>,
    options: ReaderOptions,
}

impl Reader<Mmap> {
    /// 以内存映射方式打开 `.fdb` 文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let ctx = || format!("cannot open {}", path.display());
        let file = File::open(path).map_err(FdbError::io(ctx()))?;
        // 文件只读且一经写出不再修改
        let mmap = unsafe { Mmap::map(&file) }.map_err(FdbError::io(ctx()))?;
        Self::from_source(mmap, ReaderOptions::default())
    }
}

impl Reader<Vec<u8>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_source(bytes, ReaderOptions::default())
    }
}

impl<S: ReadAt> Reader<S> {
    pub fn from_source(inner: S, options: ReaderOptions) -> Result<Self> {
        let src = Source::new(inner, options.max_string_len)?;
        let (num_tables, tables_at) = src.read_pair(0)?;
        if num_tables > options.max_tables {
            return Err(FdbError::OutOfRange { what: "table count", value: num_tables as u64 });
        }
        src.check_span(tables_at, num_tables as u64 * 8, "table array")?;

        let tables = (0..num_tables)
            .map(|i| {
                let (desc_at, hash_at) = src.read_pair(tables_at + 8 * i)?;
                TableInfo::read(&src, desc_at, hash_at, &options)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(tables = tables.len(), bytes = src.len(), "opened fdb");
        Ok(Self { src, tables, options })
    }

    pub fn len(&self) -> usize { self.tables.len() }

    pub fn is_empty(&self) -> bool { self.tables.is_empty() }

    pub fn options(&self) -> &ReaderOptions { &self.options }

    pub fn tables(&self) -> impl Iterator<Item = Table<'_, S>> + '_ {
        self.tables.iter().map(move |info| Table { info, src: &self.src, max_columns: self.options.max_columns })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.tables.iter().map(|t| t.name.as_str())
    }

    /// 按名称线性查找（表数量总是很少）
    pub fn find_table(&self, name: &str) -> Option<Table<'_, S>> {
        self.tables().find(|t| t.name() == name)
    }

    pub fn table(&self, name: &str) -> Result<Table<'_, S>> {
        self.find_table(name).ok_or_else(|| FdbError::TableNotFound(name.into()))
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

pub struct Table<'a, S> {
    info:        &'a TableInfo,
    src:         &'a Source<S>,
    max_columns: u32,
}

impl<S> Clone for Table<'_, S> {
    fn clone(&self) -> Self { *self }
}
impl<S> Copy for Table<'_, S> {}

impl<'a, S: ReadAt> Table<'a, S> {
    pub fn name(&self) -> &'a str { &self.info.name }

    pub fn columns(&self) -> &'a [Column] { &self.info.columns }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.info.columns.iter().position(|c| c.name == name)
    }

    pub fn hash_table(&self) -> HashTable<'a, S> {
        HashTable::new(self.src, self.info.num_buckets, self.info.buckets_at, self.max_columns)
    }

    pub fn rows(&self) -> Rows<'a, S> {
        self.hash_table().rows()
    }

    /// 见 [`HashTable::scan_diagnostic`]
    pub fn scan_diagnostic(&self) -> Rows<'a, S> {
        self.hash_table().scan_diagnostic()
    }

    pub fn find(&self, key: RowKey) -> Result<Row<'a, S>> {
        self.hash_table().find(key)
    }

    pub fn find_all(&self, key: RowKey) -> Result<Vec<Row<'a, S>>> {
        self.hash_table().find_all(key)
    }

    /// 以字符串键查找（第 0 列为 NVarChar / Text 的表）
    pub fn find_str(&self, key: &str) -> Result<Row<'a, S>> {
        self.find(key_from_bytes(key.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn words(ws: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        for &w in ws {
            out.write_u32::<LittleEndian>(w).unwrap();
        }
        out
    }

    #[test]
    fn empty_file_is_truncated() {
        assert!(matches!(Reader::from_bytes(Vec::new()), Err(FdbError::Truncated { .. })));
        assert!(matches!(Reader::from_bytes(vec![0, 0, 0]), Err(FdbError::Truncated { .. })));
    }

    #[test]
    fn zero_tables_is_valid() {
        let reader = Reader::from_bytes(words(&[0, 8])).unwrap();
        assert!(reader.is_empty());
        assert!(reader.find_table("Anything").is_none());
        assert!(matches!(reader.table("Anything"), Err(FdbError::TableNotFound(_))));
    }

    #[test]
    fn table_array_beyond_file_is_out_of_range() {
        let err = Reader::from_bytes(words(&[3, 8])).err().unwrap();
        assert!(matches!(err, FdbError::OutOfRange { what: "table array", .. }));
    }

    #[test]
    fn table_count_limit_applies() {
        let opts = ReaderOptions::default().with_max_tables(1);
        let err = Reader::from_source(words(&[2, 8, 0, 0, 0, 0]), opts).err().unwrap();
        assert!(matches!(err, FdbError::OutOfRange { what: "table count", .. }));
    }

    #[test]
    fn unknown_column_variant_is_fatal() {
        // header | table array | description | column | name | hash table
        let bytes = words(&[
            1, 8,            // 0: header
            16, 44,          // 8: description@16, hash@44
            1, 40, 28,       // 16: 1 column, name@40, columns@28
            99, 40,          // 28: tag 99, name@40
            0,               // 36: pad
            0x0000_0054,     // 40: "T\0\0\0"
            0, 52,           // 44: 0 buckets @52
        ]);
        let err = Reader::from_bytes(bytes).err().unwrap();
        assert!(matches!(err, FdbError::UnknownVariant(99)));
    }
}
