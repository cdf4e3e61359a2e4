//! SMS user-data alphabets: GSM 7-bit packed, UCS-2, and 8-bit binary.
//!
//! The GSM default alphabet (3GPP TS 23.038 §6.2.1) maps septet values to
//! characters, with 0x1B escaping into the basic extension table for the
//! handful of characters added later (braces, brackets, the Euro sign).
//! Septets are packed LSB-first, eight septets to seven octets.

use log::debug;

/// Escape septet that shifts the next septet into the extension table.
pub const GSM7_ESCAPE: u8 = 0x1B;

/// The GSM default alphabet, indexed by septet value.
///
/// Index 0x1B holds a placeholder; the escape septet never decodes to a
/// character on its own.
const GSM7_BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

/// Basic extension table (TS 23.038 §6.2.1.1), reached via the escape septet.
const GSM7_EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0C}'), // form feed
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// User-data alphabet selected by the data coding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alphabet {
    Gsm7,
    EightBit,
    Ucs2,
}

impl Alphabet {
    /// Maximum user-data units per PDU: septets for GSM7, UTF-16 code units
    /// for UCS-2. A concatenated part loses room to the 6-octet UDH.
    pub fn part_budget(self, concatenated: bool) -> usize {
        match (self, concatenated) {
            (Alphabet::Gsm7, false) => 160,
            (Alphabet::Gsm7, true) => 153,
            (Alphabet::Ucs2, false) => 70,
            (Alphabet::Ucs2, true) => 67,
            // 8-bit is decode-only here, but the octet budget is well defined.
            (Alphabet::EightBit, false) => 140,
            (Alphabet::EightBit, true) => 134,
        }
    }
}

/// Text encoded for transmission, held in its splittable unit form.
///
/// GSM7 keeps unpacked septets (an escaped character is two units), UCS-2
/// keeps big-endian UTF-16 code units. Packing to wire bytes happens at
/// PDU-build time so that multipart splitting can work on unit boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedText {
    Gsm7(Vec<u8>),
    Ucs2(Vec<u16>),
}

impl EncodedText {
    pub fn alphabet(&self) -> Alphabet {
        match self {
            EncodedText::Gsm7(_) => Alphabet::Gsm7,
            EncodedText::Ucs2(_) => Alphabet::Ucs2,
        }
    }

    /// Number of user-data units (septets or UTF-16 code units).
    pub fn len_units(&self) -> usize {
        match self {
            EncodedText::Gsm7(septets) => septets.len(),
            EncodedText::Ucs2(units) => units.len(),
        }
    }

    /// Copy out the unit range `start..end` as a standalone part.
    pub fn slice(&self, start: usize, end: usize) -> EncodedText {
        match self {
            EncodedText::Gsm7(septets) => EncodedText::Gsm7(septets[start..end].to_vec()),
            EncodedText::Ucs2(units) => EncodedText::Ucs2(units[start..end].to_vec()),
        }
    }

    /// Largest cut point `<= start + budget` that does not divide a GSM7
    /// escape pair or a UTF-16 surrogate pair. Returns `start` only when the
    /// budget cannot hold even one whole character, which callers treat as
    /// an internal invariant violation.
    pub fn safe_cut(&self, start: usize, budget: usize) -> usize {
        let len = self.len_units();
        let mut end = (start + budget).min(len);
        if end >= len {
            return len;
        }
        match self {
            EncodedText::Gsm7(septets) => {
                if end > start && septets[end - 1] == GSM7_ESCAPE {
                    end -= 1;
                }
            }
            EncodedText::Ucs2(units) => {
                if end > start && (0xD800..0xDC00).contains(&units[end - 1]) {
                    end -= 1;
                }
            }
        }
        end
    }
}

/// Choose the narrowest alphabet that represents `text` losslessly.
///
/// GSM 7-bit when every character is in the default or extension table,
/// UCS-2 otherwise.
pub fn encode_for(text: &str) -> EncodedText {
    match gsm7_encode(text) {
        Some(septets) => EncodedText::Gsm7(septets),
        None => EncodedText::Ucs2(text.encode_utf16().collect()),
    }
}

/// Encode `text` as GSM7 septets, or `None` if any character has no mapping.
pub fn gsm7_encode(text: &str) -> Option<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if let Some(code) = basic_septet(ch) {
            septets.push(code);
        } else if let Some(code) = extension_septet(ch) {
            septets.push(GSM7_ESCAPE);
            septets.push(code);
        } else {
            return None;
        }
    }
    Some(septets)
}

fn basic_septet(ch: char) -> Option<u8> {
    if ch == '\u{1b}' {
        return None;
    }
    GSM7_BASIC.iter().position(|&c| c == ch).map(|i| i as u8)
}

fn extension_septet(ch: char) -> Option<u8> {
    GSM7_EXTENSION
        .iter()
        .find(|&&(_, c)| c == ch)
        .map(|&(code, _)| code)
}

/// Pack septets into octets, LSB-first (eight septets fill seven octets).
pub fn pack_septets(septets: &[u8]) -> Vec<u8> {
    let total_bits = septets.len() * 7;
    let mut out = vec![0u8; total_bits.div_ceil(8)];
    for (i, &s) in septets.iter().enumerate() {
        let bit = i * 7;
        let byte = bit / 8;
        let shift = bit % 8;
        out[byte] |= (s & 0x7F) << shift;
        if shift > 1 {
            out[byte + 1] |= (s & 0x7F) >> (8 - shift);
        }
    }
    out
}

/// Unpack `count` septets from a packed octet stream. Runs out of input
/// gracefully: whatever septets fit in `packed` are returned.
pub fn unpack_septets(packed: &[u8], count: usize) -> Vec<u8> {
    let available = packed.len() * 8 / 7;
    if count > available {
        debug!(
            "septet stream short: wanted {} septets, payload holds {}",
            count, available
        );
    }
    let mut out = Vec::with_capacity(count.min(available));
    for i in 0..count.min(available) {
        let bit = i * 7;
        let byte = bit / 8;
        let shift = bit % 8;
        let mut s = packed[byte] >> shift;
        if shift > 1 {
            if let Some(&next) = packed.get(byte + 1) {
                s |= next << (8 - shift);
            }
        }
        out.push(s & 0x7F);
    }
    out
}

/// Decode a packed GSM7 user-data field.
///
/// `septet_count` is the full TP-UDL (including any UDH septets) and
/// `skip_septets` drops the leading septets consumed by the UDH plus its
/// fill bits. Decoding is best-effort: a trailing lone escape becomes the
/// replacement character instead of failing the fragment.
pub fn decode_gsm7(packed: &[u8], septet_count: usize, skip_septets: usize) -> String {
    let septets = unpack_septets(packed, septet_count);
    let mut text = String::with_capacity(septets.len());
    let mut iter = septets.iter().skip(skip_septets).copied().peekable();
    while let Some(s) = iter.next() {
        if s == GSM7_ESCAPE {
            match iter.next() {
                Some(next) => match GSM7_EXTENSION.iter().find(|&&(code, _)| code == next) {
                    Some(&(_, ch)) => text.push(ch),
                    // Unknown escape: TS 23.038 says render the plain character.
                    None => text.push(GSM7_BASIC[(next & 0x7F) as usize]),
                },
                None => {
                    debug!("GSM7 stream ends on a lone escape septet");
                    text.push(char::REPLACEMENT_CHARACTER);
                }
            }
        } else {
            text.push(GSM7_BASIC[(s & 0x7F) as usize]);
        }
    }
    text
}

/// Decode big-endian UTF-16 user data.
///
/// An unpaired surrogate becomes U+FFFD rather than failing the message;
/// corrupt telecom data should degrade, not vanish. Odd byte length is the
/// caller's error to raise (the trailing byte is ignored here).
pub fn decode_ucs2(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Decode 8-bit user data as Latin-1 fallback text.
pub fn decode_8bit(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
