//! 延迟回填写入器（DeferredWriter）
//!
//! 顺序写入 + 前向引用：先写 4 字节占位，记录 `(home, 待写值)`，
//! 等数据真正落盘后再回到 home 把地址补上。
//!
//! ```text
//!  home ──┐                         flush()
//!  [0000] │ ... 其它结构 ...  ──►  [addr] ... 其它结构 ... [b"name\0" pad]
//!         └────────────────────────────────────────────────▲ addr
//! ```
//!
//! 规则：引用某个单元的延迟内容之前，必须先对该单元调用 [`DeferredWriter::flush`]，
//! 在此之前其地址尚不存在。

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::common::{FdbError, Offset, Result};

/// 尚未落盘的值
#[derive(Debug)]
enum Pending {
    Str(String),
    I64(i64),
    U64(u64),
}

pub struct DeferredWriter<W> {
    inner:   W,
    /// 尾部写入位置（也是当前游标，回填后总会回到这里）
    pos:     Offset,
    /// (占位偏移, 待写值)，按登记顺序解析
    pending: Vec<(Offset, Pending)>,
    /// 字符串驻留表：字符串 → 首次写入地址
    strings: HashMap<String, Offset>,
}

impl<W: Write + Seek> DeferredWriter<W> {
    /// 偏移均相对文件起点，因此总是从 0 开始写
    pub fn new(mut inner: W) -> Result<Self> {
        inner.seek(SeekFrom::Start(0)).map_err(FdbError::io("cannot rewind fdb sink"))?;
        Ok(Self {
            inner,
            pos:     0,
            pending: Vec::new(),
            strings: HashMap::new(),
        })
    }

    pub fn position(&self) -> Offset { self.pos }

    /// 已驻留（实际写出）的不同字符串个数
    pub fn interned_strings(&self) -> usize { self.strings.len() }

    fn advance(&mut self, n: usize) -> Result<()> {
        self.pos = u32::try_from(n).ok()
            .and_then(|n| self.pos.checked_add(n))
            .ok_or(FdbError::OutOfRange { what: "fdb file size", value: self.pos as u64 + n as u64 })?;
        Ok(())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)
            .map_err(FdbError::io(format!("write failed at offset {}", self.pos)))?;
        self.advance(bytes.len())
    }

    // ── 立即写入 ──────────────────────────────────────────────────────────────

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.inner.write_u32::<LittleEndian>(v)
            .map_err(FdbError::io(format!("write failed at offset {}", self.pos)))?;
        self.advance(4)
    }

    /// 写入计数（表数 / 列数 / 桶数），超出 u32 即报错而不是截断
    pub fn put_len(&mut self, n: usize, what: &'static str) -> Result<()> {
        let n = u32::try_from(n).map_err(|_| FdbError::OutOfRange { what, value: n as u64 })?;
        self.put_u32(n)
    }

    pub fn put_i32(&mut self, v: i32) -> Result<()> {
        self.put_u32(v as u32)
    }

    pub fn put_f32(&mut self, v: f32) -> Result<()> {
        self.put_u32(v.to_bits())
    }

    pub fn put_bool(&mut self, v: bool) -> Result<()> {
        self.put_u32(v as u32)
    }

    // ── 延迟写入 ──────────────────────────────────────────────────────────────

    fn defer(&mut self, value: Pending) -> Result<()> {
        let home = self.pos;
        self.put_u32(0)?;
        self.pending.push((home, value));
        Ok(())
    }

    pub fn defer_string(&mut self, s: &str) -> Result<()> {
        self.defer(Pending::Str(s.into()))
    }

    pub fn defer_i64(&mut self, v: i64) -> Result<()> {
        self.defer(Pending::I64(v))
    }

    pub fn defer_u64(&mut self, v: u64) -> Result<()> {
        self.defer(Pending::U64(v))
    }

    /// 把 `home` 处的 4 字节改写为 `value`，然后回到尾部
    pub fn patch(&mut self, home: Offset, value: u32) -> Result<()> {
        let ctx = || format!("patch failed at offset {home}");
        self.inner.seek(SeekFrom::Start(home as u64)).map_err(FdbError::io(ctx()))?;
        self.inner.write_u32::<LittleEndian>(value).map_err(FdbError::io(ctx()))?;
        self.inner.seek(SeekFrom::Start(self.pos as u64)).map_err(FdbError::io(ctx()))?;
        Ok(())
    }

    // ── 数组 ──────────────────────────────────────────────────────────────────

    /// 写一个指向紧随其后位置的指针，再对每个下标调用 `emit` 连续追加内容
    pub fn array<F>(&mut self, len: usize, mut emit: F) -> Result<()>
    where
        F: FnMut(&mut Self, usize) -> Result<()>,
    {
        let here = self.pos.checked_add(4)
            .ok_or(FdbError::OutOfRange { what: "fdb file size", value: self.pos as u64 + 4 })?;
        self.put_u32(here)?;
        for i in 0..len {
            emit(self, i)?;
        }
        Ok(())
    }

    /// 预留 `len` 个以 `fill` 填充的 4 字节槽位；`emit` 返回 true 时
    /// 该槽位被回填为本次写出数据的起始地址。返回槽位区起始偏移。
    pub fn deferred_array<F>(
        &mut self,
        len:             usize,
        leading_pointer: bool,
        fill:            u8,
        mut emit:        F,
    ) -> Result<Offset>
    where
        F: FnMut(&mut Self, usize) -> Result<bool>,
    {
        if leading_pointer {
            let slots = self.pos.checked_add(4)
                .ok_or(FdbError::OutOfRange { what: "fdb file size", value: self.pos as u64 + 4 })?;
            self.put_u32(slots)?;
        }
        let base = self.pos;
        let reserved = len.checked_mul(4)
            .ok_or(FdbError::OutOfRange { what: "slot count", value: len as u64 })?;
        self.put_bytes(&vec![fill; reserved])?;

        for i in 0..len {
            let start = self.pos;
            if emit(self, i)? {
                self.patch(base + 4 * i as u32, start)?;
            }
        }
        Ok(base)
    }

    // ── 解析延迟值 ────────────────────────────────────────────────────────────

    /// 按登记顺序写出所有待写值并回填其占位
    ///
    /// 字符串全文件驻留：重复字符串只回填已有地址；64 位整数每次都在尾部重新写出。
    pub fn flush(&mut self) -> Result<()> {
        for (home, value) in std::mem::take(&mut self.pending) {
            let addr = match value {
                Pending::Str(s) => match self.strings.get(&s) {
                    Some(&addr) => addr,
                    None => {
                        let addr = self.pos;
                        self.put_string(&s)?;
                        self.strings.insert(s, addr);
                        addr
                    }
                },
                Pending::I64(v) => {
                    let addr = self.pos;
                    self.put_bytes(&v.to_le_bytes())?;
                    addr
                }
                Pending::U64(v) => {
                    let addr = self.pos;
                    self.put_bytes(&v.to_le_bytes())?;
                    addr
                }
            };
            self.patch(home, addr)?;
        }
        Ok(())
    }

    /// 以 NUL 结尾并补齐到 4 字节
    fn put_string(&mut self, s: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(s.len() + 4);
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
        self.put_bytes(&buf)
    }

    /// 解析剩余的延迟值，冲刷底层写入器并交还，附带文件总长度
    pub fn finish(mut self) -> Result<(W, u64)> {
        self.flush()?;
        self.inner.flush().map_err(FdbError::io("flush of fdb sink failed"))?;
        Ok((self.inner, self.pos as u64))
    }
}
