//! 行索引（读路径）
//!
//! ```text
//! HashTable : num_buckets(u32) | bucket_array_offset(u32)
//! Bucket[i] : head_offset(u32)                 0xFFFFFFFF = 空桶
//! Node      : row_data_offset(u32) | next(u32) 0xFFFFFFFF = 链尾
//! ```
//!
//! - **HashTable::find**：`key % num_buckets` 定位桶，沿链逐行比较重新计算的键
//! - **Bucket**：单桶链表迭代器
//! - **Rows**：全表扫描，按桶下标顺序逐桶耗尽

use tracing::warn;

use crate::common::{bucket_index, FdbError, Offset, Result, RowKey, SENTINEL};
use crate::entry::Row;
use crate::source::{ReadAt, Source};

/// 链表节点大小：row_data_offset + next
const NODE_SIZE: u64 = 8;

// ── HashTable ─────────────────────────────────────────────────────────────────

pub struct HashTable<'a, S> {
    src:          &'a Source<S>,
    num_buckets:  u32,
    buckets_at:   Offset,
    max_columns:  u32,
}

impl<S> Clone for HashTable<'_, S> {
    fn clone(&self) -> Self { *self }
}
impl<S> Copy for HashTable<'_, S> {}

impl<'a, S: ReadAt> HashTable<'a, S> {
    pub(crate) fn new(src: &'a Source<S>, num_buckets: u32, buckets_at: Offset, max_columns: u32) -> Self {
        Self { src, num_buckets, buckets_at, max_columns }
    }

    pub fn num_buckets(&self) -> u32 { self.num_buckets }

    /// 第 `i` 个桶；空桶返回 `Ok(None)`（正常情况，不是错误）
    pub fn bucket(&self, i: u32) -> Result<Option<Bucket<'a, S>>> {
        if i >= self.num_buckets {
            return Err(FdbError::OutOfRange { what: "bucket index", value: i as u64 });
        }
        let head = self.src.read_u32(self.buckets_at + 4 * i)?;
        if head == SENTINEL {
            return Ok(None);
        }
        Ok(Some(Bucket {
            src:         self.src,
            cursor:      head,
            finished:    false,
            hops:        0,
            max_hops:    self.src.len() / NODE_SIZE,
            max_columns: self.max_columns,
        }))
    }

    /// 链上第一个键等于 `key` 的行
    pub fn find(&self, key: RowKey) -> Result<Row<'a, S>> {
        let mut skipped_null = false;
        if let Some(bucket) = self.bucket_for(key)? {
            for row in bucket {
                let row = row?;
                match row.key() {
                    Ok(k) if k == key => return Ok(row),
                    Ok(_) => {}
                    Err(FdbError::NoKey) => skipped_null = true,
                    Err(e) => return Err(e),
                }
            }
        }
        Err(FdbError::NotFound {
            key,
            source: skipped_null.then(|| Box::new(FdbError::NoKey)),
        })
    }

    /// 链上所有键等于 `key` 的行（格式允许重复键）
    pub fn find_all(&self, key: RowKey) -> Result<Vec<Row<'a, S>>> {
        let mut out = Vec::new();
        if let Some(bucket) = self.bucket_for(key)? {
            for row in bucket {
                let row = row?;
                match row.key() {
                    Ok(k) if k == key => out.push(row),
                    Ok(_) | Err(FdbError::NoKey) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(out)
    }

    fn bucket_for(&self, key: RowKey) -> Result<Option<Bucket<'a, S>>> {
        if self.num_buckets == 0 {
            return Ok(None);
        }
        self.bucket(bucket_index(key, self.num_buckets))
    }

    /// 全表扫描；遇到错误时产出该错误并停止
    pub fn rows(&self) -> Rows<'a, S> {
        Rows::new(*self, false)
    }

    /// 诊断扫描：单行 / 单桶错误只产出不中断，结果不能当作完整读取
    pub fn scan_diagnostic(&self) -> Rows<'a, S> {
        Rows::new(*self, true)
    }
}

// ── Bucket ────────────────────────────────────────────────────────────────────

/// 单个桶的链表游标
pub struct Bucket<'a, S> {
    src:         &'a Source<S>,
    cursor:      Offset,
    finished:    bool,
    hops:        u64,
    /// 链长上限，防止损坏文件中的环
    max_hops:    u64,
    max_columns: u32,
}

impl<'a, S: ReadAt> Bucket<'a, S> {
    fn step(&mut self) -> Result<Row<'a, S>> {
        self.hops += 1;
        if self.hops > self.max_hops {
            return Err(FdbError::OutOfRange { what: "bucket chain length", value: self.hops });
        }
        let (row_at, next) = self.src.read_pair(self.cursor)?;
        let row = Row::read(self.src, row_at, self.max_columns)?;
        self.cursor = next;
        if next == SENTINEL {
            self.finished = true;
        }
        Ok(row)
    }
}

impl<'a, S: ReadAt> Iterator for Bucket<'a, S> {
    type Item = Result<Row<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let res = self.step();
        if res.is_err() {
            self.finished = true;
        }
        Some(res)
    }
}

// ── Rows ──────────────────────────────────────────────────────────────────────

pub struct Rows<'a, S> {
    table:       HashTable<'a, S>,
    next_bucket: u32,
    current:     Option<Bucket<'a, S>>,
    diagnostic:  bool,
    done:        bool,
}

impl<'a, S: ReadAt> Rows<'a, S> {
    fn new(table: HashTable<'a, S>, diagnostic: bool) -> Self {
        Self { table, next_bucket: 0, current: None, diagnostic, done: false }
    }

    fn fail(&mut self, bucket: u32, err: FdbError) -> Option<Result<Row<'a, S>>> {
        if self.diagnostic {
            warn!(bucket, error = %err, "skipping unreadable rows during diagnostic scan");
        } else {
            self.done = true;
        }
        Some(Err(err))
    }
}

impl<'a, S: ReadAt> Iterator for Rows<'a, S> {
    type Item = Result<Row<'a, S>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(bucket) = &mut self.current {
                match bucket.next() {
                    Some(Ok(row)) => return Some(Ok(row)),
                    Some(Err(e))  => {
                        let i = self.next_bucket - 1;
                        return self.fail(i, e);
                    }
                    None => self.current = None,
                }
            }

            if self.next_bucket >= self.table.num_buckets {
                self.done = true;
                return None;
            }
            let i = self.next_bucket;
            self.next_bucket += 1;
            match self.table.bucket(i) {
                Ok(Some(b)) => self.current = Some(b),
                Ok(None)    => {}
                Err(e)      => return self.fail(i, e),
            }
        }
    }
}
