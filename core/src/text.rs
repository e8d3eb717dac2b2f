/// Undoes the export's text defect: UTF-8 bytes stored one byte per Latin-1
/// code point. Returns the input unchanged when it cannot be reinterpreted.
///
/// Not idempotent. Call it once, on text read from the export's JSON only.
pub fn fix_mojibake(input: &str) -> String {
    let mut bytes = Vec::with_capacity(input.len());
    for ch in input.chars() {
        let code = ch as u32;
        if code > 0xFF {
            return input.to_string();
        }
        bytes.push(code as u8);
    }
    match String::from_utf8(bytes) {
        Ok(decoded) => decoded,
        Err(_) => input.to_string(),
    }
}

pub fn fix_optional(input: Option<&str>) -> Option<String> {
    input
        .map(fix_mojibake)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn decode_html_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        let end = match tail.find(';') {
            Some(end) if end <= 10 => end,
            _ => {
                out.push('&');
                rest = &tail[1..];
                continue;
            }
        };
        let entity = &tail[1..end];
        match decode_entity(entity) {
            Some(ch) => out.push(ch),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let num = entity.strip_prefix('#')?;
            let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixes_latin1_encoded_utf8() {
        // "café" as UTF-8 bytes read back as Latin-1
        assert_eq!(fix_mojibake("caf\u{00c3}\u{00a9}"), "café");
        assert_eq!(fix_mojibake("\u{00f0}\u{009f}\u{0098}\u{0080}"), "😀");
    }

    #[test]
    fn leaves_undecodable_input_alone() {
        assert_eq!(fix_mojibake("plain ascii"), "plain ascii");
        // lone Latin-1 byte is not valid UTF-8
        assert_eq!(fix_mojibake("caf\u{00e9}"), "caf\u{00e9}");
        // already-correct text beyond Latin-1
        assert_eq!(fix_mojibake("日本"), "日本");
    }

    #[test]
    fn fix_optional_drops_blank_values() {
        assert_eq!(fix_optional(Some("   ")), None);
        assert_eq!(fix_optional(None), None);
        assert_eq!(fix_optional(Some(" hi ")), Some("hi".to_string()));
    }

    #[test]
    fn decodes_common_entities() {
        assert_eq!(decode_html_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_html_entities("&#233;t&#xE9;"), "été");
        assert_eq!(decode_html_entities("a & b"), "a & b");
        assert_eq!(decode_html_entities("&bogus;"), "&bogus;");
    }
}
