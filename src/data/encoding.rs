use std::borrow::Cow;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};

/// How many leading bytes the BOM-less UTF-16 heuristic looks at.
const UTF16_SNIFF_LEN: usize = 512;
/// How many leading bytes the legacy-encoding detector is fed.
const DETECT_LEN: usize = 64 * 1024;

/// Best guess at the text encoding of `bytes`. Never fails.
///
/// Order: byte-order mark, BOM-less UTF-16 (NUL in every other byte), valid
/// UTF-8, then a statistical guess among legacy encodings (windows-1251,
/// windows-1252, Shift_JIS, ...).
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _bom_len)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if let Some(encoding) = sniff_utf16(bytes) {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let sample = &bytes[..bytes.len().min(DETECT_LEN)];
    let mut detector = EncodingDetector::new();
    detector.feed(sample, sample.len() == bytes.len());
    detector.guess(None, false)
}

/// Detect and decode in one go. A BOM is stripped; malformed sequences become
/// U+FFFD and are reported with a warning.
pub fn decode<'a>(bytes: &'a [u8], label: &str) -> (Cow<'a, str>, &'static Encoding) {
    let encoding = detect_encoding(bytes);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        log::warn!(
            "{label}: some bytes are not valid {}, replaced with U+FFFD",
            used.name()
        );
    }
    (text, used)
}

fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    let sample = &bytes[..bytes.len().min(UTF16_SNIFF_LEN)];
    let pairs = sample.len() / 2;
    if pairs < 2 {
        return None;
    }
    let (mut even_nul, mut odd_nul) = (0usize, 0usize);
    for pair in sample.chunks_exact(2) {
        if pair[0] == 0 {
            even_nul += 1;
        }
        if pair[1] == 0 {
            odd_nul += 1;
        }
    }
    // Mostly-ASCII UTF-16 text has a NUL high byte in nearly every code unit.
    let threshold = pairs * 2 / 5;
    if odd_nul > threshold && even_nul == 0 {
        Some(UTF_16LE)
    } else if even_nul > threshold && odd_nul == 0 {
        Some(UTF_16BE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1251;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut out = if bom { vec![0xFF, 0xFE] } else { Vec::new() };
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    #[test]
    fn bom_wins() {
        assert_eq!(detect_encoding(&utf16le("a;b\n1;2\n", true)), UTF_16LE);
        assert_eq!(detect_encoding(b"\xEF\xBB\xBFa,b\n"), UTF_8);
    }

    #[test]
    fn bomless_utf16_is_sniffed() {
        assert_eq!(detect_encoding(&utf16le("name;age\nAnna;31\n", false)), UTF_16LE);
    }

    #[test]
    fn plain_utf8_is_utf8() {
        assert_eq!(detect_encoding("naïve,größe\n".as_bytes()), UTF_8);
    }

    #[test]
    fn cyrillic_code_page_is_detected() {
        let text = "Город,Страна,Население\n\
                    Москва,Россия,миллионы жителей\n\
                    Киев,Украина,столица и крупнейший город\n\
                    Минск,Беларусь,красивый зелёный город\n";
        let (bytes, _, unmappable) = WINDOWS_1251.encode(text);
        assert!(!unmappable);

        assert_eq!(detect_encoding(&bytes), WINDOWS_1251);
        let (decoded, _) = decode(&bytes, "test");
        assert_eq!(decoded, text);
    }

    #[test]
    fn decode_strips_bom_and_reads_legacy_text() {
        let bytes = utf16le("x,y", true);
        let (text, enc) = decode(&bytes, "test");
        assert_eq!(text, "x,y");
        assert_eq!(enc, UTF_16LE);

        // "Größe,Gewicht" in windows-1252
        let (text, _) = decode(b"Gr\xF6\xDFe,Gewicht\n", "test");
        assert_eq!(text, "Größe,Gewicht\n");
    }
}
