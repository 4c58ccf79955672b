//! 读取侧的单元格（Entry）与行（Row）
//!
//! ```text
//! Row data   : num_columns(u32) | entry_array_offset(u32)
//! Entry × N  : variant_tag(u32) | payload(u32)
//! ```
//!
//! 行解码时只读取 8 字节的 Entry 本身；字符串与 64 位整数位于文件其它位置，
//! 调用对应访问器时才读取。

use byteorder::{ByteOrder, LittleEndian};

use crate::common::{FdbError, Offset, Result, RowKey, ENTRY_SIZE};
use crate::source::{ReadAt, Source};
use crate::variant::{key_from_bytes, key_from_fixed, Value, Variant};

// ── Entry ─────────────────────────────────────────────────────────────────────

pub struct Entry<'a, S> {
    src:     &'a Source<S>,
    variant: Variant,
    payload: u32,
}

impl<S> Clone for Entry<'_, S> {
    fn clone(&self) -> Self { *self }
}
impl<S> Copy for Entry<'_, S> {}

impl<S> std::fmt::Debug for Entry<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("variant", &self.variant)
            .field("payload", &self.payload)
            .finish()
    }
}

impl<'a, S: ReadAt> Entry<'a, S> {
    pub fn variant(&self) -> Variant { self.variant }

    /// 原始 4 字节 payload（定长值本身，或外置值的偏移）
    pub fn payload(&self) -> u32 { self.payload }

    pub fn is_null(&self) -> bool { self.variant == Variant::Null }

    fn check_variant(&self, expected: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(FdbError::TypeMismatch { expected, found: self.variant })
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        self.check_variant("Int32", self.variant == Variant::Int32)?;
        Ok(self.payload as i32)
    }

    pub fn as_u32(&self) -> Result<u32> {
        self.check_variant("Uint32", self.variant == Variant::Uint32)?;
        Ok(self.payload)
    }

    pub fn as_f32(&self) -> Result<f32> {
        self.check_variant("Real", self.variant == Variant::Real)?;
        Ok(f32::from_bits(self.payload))
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.check_variant("Bool", self.variant == Variant::Bool)?;
        Ok(self.payload != 0)
    }

    pub fn as_i64(&self) -> Result<i64> {
        self.check_variant("Int64", self.variant == Variant::Int64)?;
        Ok(self.src.read_u64(self.payload)? as i64)
    }

    pub fn as_u64(&self) -> Result<u64> {
        self.check_variant("Uint64", self.variant == Variant::Uint64)?;
        self.src.read_u64(self.payload)
    }

    /// 字符串原始字节（NVarChar / Text）
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        self.check_variant("string", self.variant.is_string())?;
        self.src.read_cstr(self.payload)
    }

    pub fn as_string(&self) -> Result<String> {
        let bytes = self.as_bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// 该单元格作为第 0 列时的行键
    pub fn key(&self) -> Result<RowKey> {
        match self.variant {
            Variant::NVarChar | Variant::Text => Ok(key_from_bytes(&self.as_bytes()?)),
            Variant::Int64 | Variant::Uint64  => Ok(self.src.read_u64(self.payload)?),
            v => key_from_fixed(v, self.payload),
        }
    }

    /// 物化为自有的 [`Value`]
    pub fn to_value(&self) -> Result<Value> {
        Ok(match self.variant {
            Variant::Null     => Value::Null,
            Variant::Int32    => Value::Int32(self.payload as i32),
            Variant::Uint32   => Value::Uint32(self.payload),
            Variant::Real     => Value::Real(f32::from_bits(self.payload)),
            Variant::Bool     => Value::Bool(self.payload != 0),
            Variant::Int64    => Value::Int64(self.as_i64()?),
            Variant::Uint64   => Value::Uint64(self.as_u64()?),
            Variant::NVarChar => Value::NVarChar(self.as_string()?),
            Variant::Text     => Value::Text(self.as_string()?),
        })
    }
}

// ── Row ───────────────────────────────────────────────────────────────────────

pub struct Row<'a, S> {
    offset:  Offset,
    entries: Vec<Entry<'a, S>>,
}

impl<S> Clone for Row<'_, S> {
    fn clone(&self) -> Self {
        Self { offset: self.offset, entries: self.entries.clone() }
    }
}

impl<S> std::fmt::Debug for Row<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("offset", &self.offset)
            .field("entries", &self.entries)
            .finish()
    }
}

impl<'a, S: ReadAt> Row<'a, S> {
    /// 解码 `offset` 处的行头与全部 Entry
    pub(crate) fn read(src: &'a Source<S>, offset: Offset, max_columns: u32) -> Result<Self> {
        let (num_columns, entries_at) = src.read_pair(offset)?;
        if num_columns > max_columns {
            return Err(FdbError::OutOfRange { what: "row column count", value: num_columns as u64 });
        }
        let size = num_columns as u64 * ENTRY_SIZE as u64;
        src.check_span(entries_at, size, "row entry array")?;

        let mut raw = vec![0u8; size as usize];
        src.read_exact(entries_at as u64, &mut raw)?;

        let entries = raw
            .chunks_exact(ENTRY_SIZE as usize)
            .map(|e| {
                Ok(Entry {
                    src,
                    variant: Variant::try_from(LittleEndian::read_u32(&e[..4]))?,
                    payload: LittleEndian::read_u32(&e[4..]),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { offset, entries })
    }

    /// 行数据在文件中的偏移
    pub fn offset(&self) -> Offset { self.offset }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn column(&self, i: usize) -> Option<Entry<'a, S>> {
        self.entries.get(i).copied()
    }

    pub fn entries(&self) -> &[Entry<'a, S>] { &self.entries }

    /// 第 0 列折算出的行键；第 0 列为 Null 时返回 `NoKey`
    pub fn key(&self) -> Result<RowKey> {
        self.entries.first().ok_or(FdbError::NoKey)?.key()
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        self.entries.iter().map(Entry::to_value).collect()
    }
}
