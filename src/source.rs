//! 定位读取（read-at-offset）抽象
//!
//! 读路径不共享任何游标：每次读取都显式给出绝对偏移，
//! 因此 `Reader` / `Table` / `Row` / `Entry` 在底层数据可共享时即可跨线程使用。

use std::io;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::common::{FdbError, Offset, Result};

/// 按绝对偏移读取的数据源
pub trait ReadAt {
    /// 从 `offset` 起读满 `buf`；越界返回 `UnexpectedEof`
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// 数据源总字节数
    fn size(&self) -> io::Result<u64>;
}

impl ReadAt for [u8] {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start.checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for Vec<u8> {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.as_slice().read_exact_at(buf, offset)
    }
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for memmap2::Mmap {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        (**self).read_exact_at(buf, offset)
    }
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

#[cfg(unix)]
impl ReadAt for std::fs::File {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        (**self).read_exact_at(buf, offset)
    }
    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        (**self).read_exact_at(buf, offset)
    }
    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

// ── Source：带长度与边界检查的读取器 ─────────────────────────────────────────

/// 名称 / 字符串扫描时每次读取的字节数
const STRING_CHUNK: u64 = 64;

pub struct Source<S> {
    inner:          S,
    len:            u64,
    max_string_len: usize,
}

impl<S: ReadAt> Source<S> {
    pub fn new(inner: S, max_string_len: usize) -> Result<Self> {
        let len = inner.size().map_err(FdbError::io("cannot determine fdb size"))?;
        Ok(Self { inner, len, max_string_len })
    }

    pub fn len(&self) -> u64 { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn inner(&self) -> &S { &self.inner }

    /// 确认 `[offset, offset + size)` 位于文件内
    pub fn check_span(&self, offset: Offset, size: u64, what: &'static str) -> Result<()> {
        let end = offset as u64 + size;
        if end > self.len {
            return Err(FdbError::OutOfRange { what, value: end });
        }
        Ok(())
    }

    pub fn read_exact(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact_at(buf, offset) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FdbError::Truncated {
                offset,
                needed: buf.len() as u64,
                len:    self.len,
            }),
            Err(e) => Err(FdbError::io(format!("read failed at offset {offset}"))(e)),
        }
    }

    pub fn read_u32(&self, offset: Offset) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(offset as u64, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    pub fn read_u64(&self, offset: Offset) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(offset as u64, &mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    /// 读取相邻的两个 u32（格式中大多数结构都是成对的偏移）
    pub fn read_pair(&self, offset: Offset) -> Result<(u32, u32)> {
        let mut buf = [0u8; 8];
        self.read_exact(offset as u64, &mut buf)?;
        Ok((LittleEndian::read_u32(&buf[..4]), LittleEndian::read_u32(&buf[4..])))
    }

    /// 读取以 NUL 结尾的字节串（不含 NUL）
    pub fn read_cstr(&self, offset: Offset) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut pos = offset as u64;
        loop {
            if pos >= self.len {
                return Err(FdbError::UnterminatedString(offset));
            }
            let n = STRING_CHUNK.min(self.len - pos) as usize;
            let mut chunk = [0u8; STRING_CHUNK as usize];
            self.read_exact(pos, &mut chunk[..n])?;

            let (body, done) = match chunk[..n].iter().position(|&b| b == 0) {
                Some(nul) => (&chunk[..nul], true),
                None      => (&chunk[..n], false),
            };
            out.extend_from_slice(body);
            if out.len() > self.max_string_len {
                return Err(FdbError::OutOfRange {
                    what:  "string length",
                    value: out.len() as u64,
                });
            }
            if done {
                return Ok(out);
            }
            pos += n as u64;
        }
    }

    /// 读取名称（表名 / 列名），非 UTF-8 字节按替换字符处理
    pub fn read_name(&self, offset: Offset) -> Result<String> {
        let bytes = self.read_cstr(offset)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(bytes: &[u8]) -> Source<Vec<u8>> {
        Source::new(bytes.to_vec(), 1024).unwrap()
    }

    #[test]
    fn reads_little_endian_pairs() {
        let src = source(&[1, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(src.read_pair(0).unwrap(), (1, 0xFFFF_FFFF));
        assert_eq!(src.read_u32(4).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn short_read_is_truncated() {
        let src = source(&[1, 2, 3]);
        match src.read_u32(0) {
            Err(FdbError::Truncated { offset, needed, len }) => {
                assert_eq!((offset, needed, len), (0, 4, 3));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn cstr_spans_multiple_chunks() {
        let mut bytes = vec![b'x'; 150];
        bytes.push(0);
        let src = source(&bytes);
        assert_eq!(src.read_cstr(0).unwrap().len(), 150);
        assert_eq!(src.read_cstr(149).unwrap(), b"x");
    }

    #[test]
    fn cstr_without_terminator_fails() {
        let src = source(b"abc");
        assert!(matches!(src.read_cstr(0), Err(FdbError::UnterminatedString(0))));
    }

    #[test]
    fn cstr_respects_max_length() {
        let mut bytes = vec![b'y'; 40];
        bytes.push(0);
        let src = Source::new(bytes, 16).unwrap();
        assert!(matches!(src.read_cstr(0), Err(FdbError::OutOfRange { .. })));
    }

    #[test]
    fn check_span_rejects_overflowing_ranges() {
        let src = source(&[0u8; 16]);
        assert!(src.check_span(8, 8, "x").is_ok());
        assert!(src.check_span(8, 9, "x").is_err());
    }
}
