//! 单元格类型标签（Variant）与写入侧的值表示

use crate::common::{FdbError, Result, RowKey};
use crate::sfhash;

/// 单元格在 FDB 文件中的存储类型，数值即磁盘上的 tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Variant {
    Null     = 0,
    Int32    = 1,
    Uint32   = 2,
    /// 32 位浮点
    Real     = 3,
    NVarChar = 4,
    Bool     = 5,
    Int64    = 6,
    Uint64   = 7,
    /// 与 NVarChar 解码方式相同，仅写入意图不同
    Text     = 8,
}

impl Variant {
    /// payload 是否为指向文件内其它位置的偏移
    pub fn is_out_of_line(self) -> bool {
        matches!(self, Self::NVarChar | Self::Text | Self::Int64 | Self::Uint64)
    }

    pub fn is_string(self) -> bool {
        matches!(self, Self::NVarChar | Self::Text)
    }

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Null     => "Null",
            Self::Int32    => "Int32",
            Self::Uint32   => "Uint32",
            Self::Real     => "Real",
            Self::NVarChar => "NVarChar",
            Self::Bool     => "Bool",
            Self::Int64    => "Int64",
            Self::Uint64   => "Uint64",
            Self::Text     => "Text",
        }
    }
}

impl TryFrom<u32> for Variant {
    type Error = FdbError;

    fn try_from(tag: u32) -> Result<Self> {
        Ok(match tag {
            0 => Self::Null,
            1 => Self::Int32,
            2 => Self::Uint32,
            3 => Self::Real,
            4 => Self::NVarChar,
            5 => Self::Bool,
            6 => Self::Int64,
            7 => Self::Uint64,
            8 => Self::Text,
            other => return Err(FdbError::UnknownVariant(other)),
        })
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name:    String,
    pub variant: Variant,
}

impl Column {
    pub fn new(name: &str, variant: Variant) -> Self {
        Self { name: name.into(), variant }
    }
}

// ── 行键折算 ──────────────────────────────────────────────────────────────────
//
// 读写两侧共用，保证写入时分桶与读取时查找使用同一个键。

pub(crate) fn key_from_fixed(variant: Variant, payload: u32) -> Result<RowKey> {
    match variant {
        Variant::Null => Err(FdbError::NoKey),
        Variant::Bool => Ok((payload != 0) as RowKey),
        _             => Ok(payload as RowKey),
    }
}

pub(crate) fn key_from_bytes(bytes: &[u8]) -> RowKey {
    sfhash::digest(bytes) as RowKey
}

// ── Value ─────────────────────────────────────────────────────────────────────

/// 单元格的值（运行时表示，写入侧输入 / 读取侧物化结果）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int32(i32),
    Uint32(u32),
    Real(f32),
    NVarChar(String),
    Bool(bool),
    Int64(i64),
    Uint64(u64),
    Text(String),
}

impl Value {
    pub fn variant(&self) -> Variant {
        match self {
            Self::Null        => Variant::Null,
            Self::Int32(_)    => Variant::Int32,
            Self::Uint32(_)   => Variant::Uint32,
            Self::Real(_)     => Variant::Real,
            Self::NVarChar(_) => Variant::NVarChar,
            Self::Bool(_)     => Variant::Bool,
            Self::Int64(_)    => Variant::Int64,
            Self::Uint64(_)   => Variant::Uint64,
            Self::Text(_)     => Variant::Text,
        }
    }

    /// 该值作为第 0 列时的行键
    pub fn key(&self) -> Result<RowKey> {
        match self {
            Self::Null        => Err(FdbError::NoKey),
            Self::Int32(v)    => Ok(*v as u32 as RowKey),
            Self::Uint32(v)   => Ok(*v as RowKey),
            Self::Real(v)     => Ok(v.to_bits() as RowKey),
            Self::Bool(v)     => Ok(*v as RowKey),
            Self::Int64(v)    => Ok(*v as RowKey),
            Self::Uint64(v)   => Ok(*v),
            Self::NVarChar(s) | Self::Text(s) => Ok(key_from_bytes(s.as_bytes())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::NVarChar(s) | Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::Int32(v) }
}
impl From<u32> for Value {
    fn from(v: u32) -> Self { Self::Uint32(v) }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self { Self::Real(v) }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::Int64(v) }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self { Self::Uint64(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::NVarChar(v.into()) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Self::NVarChar(v) }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null        => write!(f, "NULL"),
            Self::Int32(v)    => write!(f, "{v}"),
            Self::Uint32(v)   => write!(f, "{v}"),
            Self::Real(v)     => write!(f, "{v}"),
            Self::NVarChar(s) => write!(f, "{s}"),
            Self::Bool(v)     => write!(f, "{v}"),
            Self::Int64(v)    => write!(f, "{v}"),
            Self::Uint64(v)   => write!(f, "{v}"),
            Self::Text(s)     => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_follow_disk_numbering() {
        for tag in 0..=8u32 {
            let v = Variant::try_from(tag).unwrap();
            assert_eq!(v.tag(), tag);
        }
        assert!(matches!(Variant::try_from(9), Err(FdbError::UnknownVariant(9))));
    }

    #[test]
    fn out_of_line_variants() {
        assert!(Variant::Text.is_out_of_line());
        assert!(Variant::Uint64.is_out_of_line());
        assert!(!Variant::Real.is_out_of_line());
        assert!(!Variant::Null.is_out_of_line());
    }

    #[test]
    fn value_keys() {
        assert!(matches!(Value::Null.key(), Err(FdbError::NoKey)));
        assert_eq!(Value::Bool(true).key().unwrap(), 1);
        assert_eq!(Value::Bool(false).key().unwrap(), 0);
        assert_eq!(Value::Int32(-1).key().unwrap(), 0xFFFF_FFFF);
        assert_eq!(Value::Uint32(42).key().unwrap(), 42);
        assert_eq!(Value::Real(1.0).key().unwrap(), 0x3F80_0000);
        assert_eq!(Value::Int64(1 << 40).key().unwrap(), 1 << 40);
        assert_eq!(Value::from("Alice").key().unwrap(), 0xF98F_A6FF);
        assert_eq!(
            Value::Text("Alice".into()).key().unwrap(),
            Value::NVarChar("Alice".into()).key().unwrap(),
        );
    }

    #[test]
    fn fixed_keys_agree_with_values() {
        assert_eq!(key_from_fixed(Variant::Int32, (-7i32) as u32).unwrap(), Value::Int32(-7).key().unwrap());
        assert_eq!(key_from_fixed(Variant::Bool, 5).unwrap(), 1);
        assert!(matches!(key_from_fixed(Variant::Null, 0), Err(FdbError::NoKey)));
    }
}
