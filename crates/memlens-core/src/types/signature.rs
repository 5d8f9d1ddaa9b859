use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A byte pattern locating an instruction that references a global by
/// RIP-relative displacement, e.g. `mov rax, [rip+disp32]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSignature {
    /// Hex bytes separated by spaces, `??` for wildcards
    pub pattern: String,
    /// Offset of the instruction from the pattern match
    pub instr_offset: usize,
    /// Offset of the 32-bit displacement within the instruction
    pub disp_offset: usize,
    pub instr_len: usize,
    #[serde(default)]
    pub addend: i64,
}

impl CodeSignature {
    pub fn new(pattern: impl Into<String>, disp_offset: usize, instr_len: usize) -> Self {
        Self {
            pattern: pattern.into(),
            instr_offset: 0,
            disp_offset,
            instr_len,
            addend: 0,
        }
    }

    pub fn pattern_bytes(&self) -> Result<Vec<Option<u8>>> {
        parse_pattern(&self.pattern)
    }

    /// Address referenced by the first match in `image`, which was read
    /// from `image_base`.
    pub fn resolve(&self, image: &[u8], image_base: u64) -> Result<Option<u64>> {
        let pattern = self.pattern_bytes()?;
        let Some(pos) = find_pattern(image, &pattern) else {
            return Ok(None);
        };

        let disp_pos = pos + self.instr_offset + self.disp_offset;
        let Some(disp_bytes) = image.get(disp_pos..disp_pos + 4) else {
            return Ok(None);
        };
        let disp = i32::from_le_bytes([disp_bytes[0], disp_bytes[1], disp_bytes[2], disp_bytes[3]]);

        let next_ip = image_base + (pos + self.instr_offset + self.instr_len) as u64;
        let target = next_ip
            .wrapping_add_signed(disp as i64)
            .wrapping_add_signed(self.addend);
        Ok(Some(target))
    }
}

/// Parse `"48 8B 05 ?? ?? ?? ??"`; `?` and `??` are wildcards.
///
/// A pattern needs at least one concrete byte to anchor the scan.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let bytes = pattern
        .split_whitespace()
        .enumerate()
        .map(|(pos, token)| match token {
            "?" | "??" => Ok(None),
            _ => match hex::decode(token).as_deref() {
                Ok([byte]) => Ok(Some(*byte)),
                _ => Err(Error::Config(format!(
                    "signature token {} ('{}') is not a hex byte",
                    pos, token
                ))),
            },
        })
        .collect::<Result<Vec<_>>>()?;

    if bytes.iter().all(Option::is_none) {
        return Err(Error::Config(format!(
            "signature '{}' has no concrete byte",
            pattern
        )));
    }
    Ok(bytes)
}

/// Position of the first match of `pattern` in `buffer`
pub fn find_pattern(buffer: &[u8], pattern: &[Option<u8>]) -> Option<usize> {
    if pattern.is_empty() || buffer.len() < pattern.len() {
        return None;
    }

    // Anchor on the first concrete byte so memchr can skip ahead
    let (anchor_pos, anchor) = pattern
        .iter()
        .enumerate()
        .find_map(|(i, b)| b.map(|value| (i, value)))?;

    let last = buffer.len() - pattern.len();
    let mut start = 0;
    while start <= last {
        let found = memchr::memchr(anchor, &buffer[start + anchor_pos..=last + anchor_pos])?;
        let candidate = start + found;
        let matches = pattern
            .iter()
            .zip(&buffer[candidate..])
            .all(|(p, b)| p.is_none_or(|value| value == *b));
        if matches {
            return Some(candidate);
        }
        start = candidate + 1;
    }
    None
}
