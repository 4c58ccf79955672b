//! # fdb-engine
//!
//! FDB 表容器格式的 Rust 实现：单个文件内存放多张具名表，每张表有固定列结构，
//! 行通过磁盘上的哈希表索引，无需运行时数据库引擎。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────── 写路径 ────────────────────────┐
//! │  RowProvider ──rows──►  Builder                        │
//! │                          ├─ collect_buckets (key→桶)   │
//! │                          └─ DeferredWriter             │
//! │                               ├─ 占位 + 回填            │
//! │                               └─ 字符串驻留             │
//! └───────────────────────────┬────────────────────────────┘
//!                             ▼  .fdb（一次写出，之后只读）
//! ┌──────────────────────── 读路径 ────────────────────────┐
//! │  Reader (ReadAt 定位读取，无共享游标)                   │
//! │   └─ Table ── HashTable ── Bucket ── Row ── Entry      │
//! │                 │  find(key)    rows()     惰性解码     │
//! │                 └─ key % num_buckets → 桶链线性比较     │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! 字符串键通过 [`sfhash`] 折算为整数，必须与旧格式逐位一致。

pub mod common;
pub mod source;
pub mod variant;
pub mod sfhash;
pub mod writer;
pub mod entry;
pub mod index;
pub mod reader;
pub mod builder;

pub use builder::{write_file, Builder, MemoryRowProvider, RowIter, RowProvider, TableDef};
pub use common::{bit_ceil, FdbError, Offset, Result, RowKey, FILE_EXTENSION, SENTINEL};
pub use entry::{Entry, Row};
pub use index::{Bucket, HashTable, Rows};
pub use reader::{Reader, ReaderOptions, Table};
pub use source::ReadAt;
pub use variant::{Column, Value, Variant};
pub use writer::DeferredWriter;
