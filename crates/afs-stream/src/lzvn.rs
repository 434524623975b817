#![forbid(unsafe_code)]
//! LZVN block decoder.
//!
//! Opcode layout (first byte, `L` literal count, `M` match length,
//! `D` match distance):
//!
//! | Opcode | Kind | Bytes |
//! |--------|------|-------|
//! | `LLMMMDDD DDDDDDDD` | small distance | 2 |
//! | `101LLMMM DDDDDDMM DDDDDDDD` | medium distance | 3 |
//! | `LLMMM111 DDDDDDDD DDDDDDDD` | large distance | 3 |
//! | `LLMMM110` | previous distance | 1 |
//! | `1110LLLL` / `11100000 LLLLLLLL` | literals | 1 / 2 |
//! | `1111MMMM` / `11110000 MMMMMMMM` | match, previous distance | 1 / 2 |
//! | `0x06` | end of stream | 1 |
//! | `0x0E`, `0x16` | nop | 1 |
//!
//! Distance opcodes copy `L` literals that follow the opcode bytes and then
//! `M` bytes from `D` bytes back in the output.

/// Decode an LZVN stream into `output`, returning the decoded length.
pub(crate) fn decode(input: &[u8], output: &mut [u8]) -> Result<usize, String> {
    let mut src = 0_usize;
    let mut dst = 0_usize;
    let mut distance = 0_usize;

    loop {
        let Some(&op) = input.get(src) else {
            return Err(format!("truncated stream: no end marker after {src} bytes"));
        };

        let (literals, match_len, header) = match op {
            0x06 => return Ok(dst),
            0x0E | 0x16 => {
                src += 1;
                continue;
            }
            0x1E | 0x26 | 0x2E | 0x36 | 0x3E | 0x70..=0x7F | 0xD0..=0xDF => {
                return Err(format!("undefined opcode {op:#04x} at offset {src}"));
            }
            0xA0..=0xBF => {
                let b1 = operand(input, src, 1)?;
                let b2 = operand(input, src, 2)?;
                distance = (usize::from(b2) << 6) | usize::from(b1 >> 2);
                let literals = usize::from((op >> 3) & 0x03);
                let match_len = ((usize::from(op & 0x07) << 2) | usize::from(b1 & 0x03)) + 3;
                (literals, match_len, 3)
            }
            0xE0 => {
                let literals = usize::from(operand(input, src, 1)?) + 16;
                (literals, 0, 2)
            }
            0xE1..=0xEF => (usize::from(op & 0x0F), 0, 1),
            0xF0 => {
                let match_len = usize::from(operand(input, src, 1)?) + 16;
                (0, match_len, 2)
            }
            0xF1..=0xFF => (0, usize::from(op & 0x0F), 1),
            _ => {
                let literals = usize::from(op >> 6);
                let match_len = usize::from((op >> 3) & 0x07) + 3;
                match op & 0x07 {
                    0x06 => (literals, match_len, 1),
                    0x07 => {
                        let b1 = operand(input, src, 1)?;
                        let b2 = operand(input, src, 2)?;
                        distance = usize::from(b1) | (usize::from(b2) << 8);
                        (literals, match_len, 3)
                    }
                    _ => {
                        let b1 = operand(input, src, 1)?;
                        distance = (usize::from(op & 0x07) << 8) | usize::from(b1);
                        (literals, match_len, 2)
                    }
                }
            }
        };
        src += header;

        if literals > 0 {
            let end = src + literals;
            let Some(bytes) = input.get(src..end) else {
                return Err(format!("truncated literals at offset {src}"));
            };
            let Some(out) = output.get_mut(dst..dst + literals) else {
                return Err(format!("output overflow writing {literals} literals at {dst}"));
            };
            out.copy_from_slice(bytes);
            src = end;
            dst += literals;
        }

        if match_len > 0 {
            if distance == 0 || distance > dst {
                return Err(format!("invalid match distance {distance} at output {dst}"));
            }
            if dst + match_len > output.len() {
                return Err(format!("output overflow copying {match_len} bytes at {dst}"));
            }
            // Byte-wise: matches may overlap their own output.
            for _ in 0..match_len {
                output[dst] = output[dst - distance];
                dst += 1;
            }
        }
    }
}

fn operand(input: &[u8], src: usize, index: usize) -> Result<u8, String> {
    input
        .get(src + index)
        .copied()
        .ok_or_else(|| format!("truncated opcode at offset {src}"))
}
