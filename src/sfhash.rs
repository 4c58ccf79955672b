//! Sfhash：字符串键使用的 32 位 SuperFastHash 变体
//!
//! 旧文件中字符串键的桶位置由它决定，必须逐位一致：
//! 小端 16 位字读取、余数字节按有符号 char 参与运算、全部 32 位回绕。

fn word(data: &[u8]) -> u32 {
    u16::from_le_bytes([data[0], data[1]]) as u32
}

fn signed(b: u8) -> u32 {
    b as i8 as i32 as u32
}

pub fn digest(data: &[u8]) -> u32 {
    if data.is_empty() {
        return 0;
    }

    let mut hash = data.len() as u32;
    let mut chunks = data.chunks_exact(4);

    for c in &mut chunks {
        hash = hash.wrapping_add(word(c));
        let tmp = (word(&c[2..]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }

    let rem = chunks.remainder();
    match rem.len() {
        3 => {
            hash = hash.wrapping_add(word(rem));
            hash ^= hash << 16;
            hash ^= signed(rem[2]) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(word(rem));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(signed(rem[0]));
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }

    // avalanche
    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}
