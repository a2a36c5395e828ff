//! Byte-to-text decoding cascade for mailbox files.
//!
//! Mirrors the original implementation's order: BOM-tagged UTF-8/UTF-16,
//! strict UTF-8, lossy UTF-8 gated by a replacement-ratio/ASCII-share
//! heuristic, NUL-ratio-driven UTF-16 guess (LE before BE), GB18030, and
//! finally Latin-1 as the encoding that can never fail.

/// Outcome of [`smart_decode`]: the text, the encoding label used, and
/// whether the decode was lossy (anything other than a clean strict pass).
pub struct Decoded {
    pub text: String,
    pub encoding: &'static str,
    pub lossy: bool,
}

pub fn smart_decode(raw: &[u8]) -> Decoded {
    if let Some(d) = decode_bom(raw) {
        return d;
    }
    if let Ok(text) = std::str::from_utf8(raw) {
        return Decoded {
            text: text.to_string(),
            encoding: "utf-8",
            lossy: false,
        };
    }
    if let Some(d) = decode_utf8_salvage(raw) {
        return d;
    }
    if let Some(d) = decode_utf16_heuristic(raw) {
        return d;
    }
    if let Some(d) = decode_gb18030_strict(raw) {
        return d;
    }
    Decoded {
        text: raw.iter().map(|&b| b as char).collect(),
        encoding: "latin1(ignore)",
        lossy: true,
    }
}

fn decode_bom(raw: &[u8]) -> Option<Decoded> {
    if let Some(rest) = raw.strip_prefix(b"\xef\xbb\xbf") {
        return std::str::from_utf8(rest).ok().map(|text| Decoded {
            text: text.to_string(),
            encoding: "utf-8-sig",
            lossy: false,
        });
    }
    if raw.starts_with(b"\xff\xfe") {
        return decode_utf16_strict(&raw[2..], true).map(|text| Decoded {
            text,
            encoding: "utf-16-le",
            lossy: false,
        });
    }
    if raw.starts_with(b"\xfe\xff") {
        return decode_utf16_strict(&raw[2..], false).map(|text| Decoded {
            text,
            encoding: "utf-16-be",
            lossy: false,
        });
    }
    None
}

fn decode_utf8_salvage(raw: &[u8]) -> Option<Decoded> {
    let tmp = String::from_utf8_lossy(raw).into_owned();
    let replacements = tmp.chars().filter(|&c| c == '\u{fffd}').count();
    if replacements == 0 {
        return Some(Decoded {
            text: tmp,
            encoding: "utf-8",
            lossy: false,
        });
    }
    let total = tmp.chars().count().max(1);
    let ascii_count = tmp.chars().filter(|c| (*c as u32) < 128).count();
    let replacement_ratio = replacements as f64 / total as f64;
    let ascii_share = ascii_count as f64 / total as f64;
    if replacement_ratio <= 0.02 && ascii_share >= 0.6 {
        Some(Decoded {
            text: tmp,
            encoding: "utf-8(replace)",
            lossy: true,
        })
    } else {
        None
    }
}

fn decode_utf16_heuristic(raw: &[u8]) -> Option<Decoded> {
    let nul_count = raw.iter().filter(|&&b| b == 0).count();
    if nul_count <= 4.max(raw.len() / 8) {
        return None;
    }
    if let Some(text) = decode_utf16_strict(raw, true) {
        return Some(Decoded {
            text,
            encoding: "utf-16-le",
            lossy: false,
        });
    }
    if let Some(text) = decode_utf16_strict(raw, false) {
        return Some(Decoded {
            text,
            encoding: "utf-16-be",
            lossy: false,
        });
    }
    Some(Decoded {
        text: decode_utf16_lossy(raw, true),
        encoding: "utf-16-le(ignore)",
        lossy: true,
    })
}

fn decode_utf16_strict(raw: &[u8], little_endian: bool) -> Option<String> {
    if raw.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| {
            if little_endian {
                u16::from_le_bytes([c[0], c[1]])
            } else {
                u16::from_be_bytes([c[0], c[1]])
            }
        })
        .collect();
    String::from_utf16(&units).ok()
}

fn decode_utf16_lossy(raw: &[u8], little_endian: bool) -> String {
    let units: Vec<u16> = raw
        .chunks(2)
        .map(|c| {
            let lo = c[0];
            let hi = c.get(1).copied().unwrap_or(0);
            if little_endian {
                u16::from_le_bytes([lo, hi])
            } else {
                u16::from_be_bytes([lo, hi])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_gb18030_strict(raw: &[u8]) -> Option<Decoded> {
    let (text, _, had_errors) = encoding_rs::GB18030.decode(raw);
    if had_errors {
        None
    } else {
        Some(Decoded {
            text: text.into_owned(),
            encoding: "gb18030",
            lossy: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_utf8() {
        let d = smart_decode("hello world".as_bytes());
        assert_eq!(d.encoding, "utf-8");
        assert!(!d.lossy);
        assert_eq!(d.text, "hello world");
    }

    #[test]
    fn decodes_utf8_bom() {
        let mut raw = vec![0xef, 0xbb, 0xbf];
        raw.extend_from_slice("hi".as_bytes());
        let d = smart_decode(&raw);
        assert_eq!(d.encoding, "utf-8-sig");
        assert_eq!(d.text, "hi");
    }

    #[test]
    fn decodes_utf16_le_without_bom_via_nul_ratio() {
        let text = "hello";
        let raw: Vec<u8> = text
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let d = smart_decode(&raw);
        assert_eq!(d.encoding, "utf-16-le");
        assert_eq!(d.text, text);
    }

    #[test]
    fn falls_back_to_latin1_for_garbage() {
        let raw: Vec<u8> = vec![0xff, 0xfe, 0x00, 0x01, 0xff, 0xff, 0xff];
        let d = smart_decode(&raw);
        assert!(d.lossy);
    }
}
