//! 全局基础类型、常量与错误定义

use thiserror::Error;

use crate::variant::Variant;

// ── 类型别名 ──────────────────────────────────────────────────────────────────

/// 文件内绝对字节偏移（格式限定 32 位）
pub type Offset = u32;

/// 行键：第 0 列按 [`Variant`] 规则折算出的整数
pub type RowKey = u64;

// ── 格式常量 ──────────────────────────────────────────────────────────────────

/// 空桶 / 链表结束哨兵
pub const SENTINEL: u32 = 0xFFFF_FFFF;

/// 单个 Entry 的磁盘大小：tag(u32) + payload(u32)
pub const ENTRY_SIZE: u32 = 8;

/// 约定的文件扩展名
pub const FILE_EXTENSION: &str = "fdb";

// ── 桶计算 ────────────────────────────────────────────────────────────────────

/// 不小于 `n` 的最小 2 的幂；`0 → 0`。结果超出 u32 时返回 None
pub fn bit_ceil(n: usize) -> Option<u32> {
    if n == 0 {
        return Some(0);
    }
    u32::try_from(n).ok()?.checked_next_power_of_two()
}

/// 行键 → 桶下标
///
/// 键先截断为 32 位再取模。桶数为 2 的幂时与 64 位取模结果一致，
/// 非 2 的幂的旧文件也按 32 位键定位。
pub fn bucket_index(key: RowKey, num_buckets: u32) -> u32 {
    debug_assert!(num_buckets > 0);
    (key as u32) % num_buckets
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FdbError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        source:  std::io::Error,
    },
    #[error("truncated data: need {needed} bytes at offset {offset}, file has {len}")]
    Truncated { offset: u64, needed: u64, len: u64 },
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: u64 },
    #[error("unknown variant tag: {0}")]
    UnknownVariant(u32),
    #[error("unterminated string at offset {0}")]
    UnterminatedString(Offset),
    #[error("row has no key: first column is null")]
    NoKey,
    #[error("key not found: {key}")]
    NotFound {
        key:    RowKey,
        #[source]
        source: Option<Box<FdbError>>,
    },
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("table `{table}` expects {expected} columns, row has {actual}")]
    ColumnCountMismatch { table: String, expected: usize, actual: usize },
    #[error("row provider failed for table `{table}`: {message}")]
    Provider { table: String, message: String },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: Variant },
}

impl FdbError {
    /// 给 I/O 错误附加上下文，配合 `map_err` 使用
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> FdbError {
        let context = context.into();
        move |source| FdbError::Io { context, source }
    }

    /// 供外部 RowProvider 实现构造的错误
    pub fn provider(table: &str, message: impl std::fmt::Display) -> Self {
        Self::Provider { table: table.into(), message: message.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, FdbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ceil_rounds_up_to_power_of_two() {
        assert_eq!(bit_ceil(0), Some(0));
        assert_eq!(bit_ceil(1), Some(1));
        assert_eq!(bit_ceil(5), Some(8));
        assert_eq!(bit_ceil(8), Some(8));
        assert_eq!(bit_ceil(9), Some(16));
        assert_eq!(bit_ceil((1usize << 31) + 1), None);
    }

    #[test]
    fn bucket_index_matches_wide_modulo_for_powers_of_two() {
        let key: RowKey = 0x1_0000_0007;
        assert_eq!(bucket_index(key, 8), (key % 8) as u32);
        assert_eq!(bucket_index(13, 4), 1);
    }

    #[test]
    fn not_found_exposes_no_key_source() {
        use std::error::Error;
        let err = FdbError::NotFound { key: 3, source: Some(Box::new(FdbError::NoKey)) };
        assert!(err.is_not_found());
        assert!(err.source().is_some());
    }
}
