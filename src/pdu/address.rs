//! Semi-octet BCD address codec with type-of-address handling.
//!
//! An SMS address field is a digit count, a type-of-address octet, then the
//! digits packed two per octet low-nibble-first, padded with 0xF when the
//! count is odd. Alphanumeric addresses (sender names) pack GSM7 septets
//! into the same field instead.

use super::{alphabet, DecodeError, Reader};
use crate::validation::{self, NumberError};

/// Type-of-address octet for international ISDN numbers.
pub const TOA_INTERNATIONAL: u8 = 0x91;
/// Type-of-address octet for unknown-format ISDN numbers.
pub const TOA_UNKNOWN: u8 = 0x81;

const TON_MASK: u8 = 0x70;
const TON_INTERNATIONAL: u8 = 0x10;
const TON_ALPHANUMERIC: u8 = 0x50;

/// Decode an originating or destination address from the PDU stream.
///
/// Returns the number in normalized string form: `+`-prefixed for
/// international type, bare digits otherwise, or the decoded name for an
/// alphanumeric sender.
pub fn decode(r: &mut Reader) -> Result<String, DecodeError> {
    let digit_count = r.u8("address length")? as usize;
    if digit_count > 2 * validation::MAX_ADDRESS_DIGITS {
        return Err(DecodeError::AddressOverflow {
            digits: digit_count,
        });
    }
    let toa = r.u8("type of address")?;
    let payload = r.take(digit_count.div_ceil(2), "address digits")?;

    if toa & TON_MASK == TON_ALPHANUMERIC {
        // Alphanumeric: GSM7 packed into the digit field. The length is
        // still a nibble count, four bits per nibble, seven per septet.
        let septets = digit_count * 4 / 7;
        return Ok(alphabet::decode_gsm7(payload, septets, 0));
    }

    let mut number = String::with_capacity(digit_count + 1);
    if toa & TON_MASK == TON_INTERNATIONAL {
        number.push('+');
    }
    for (i, &byte) in payload.iter().enumerate() {
        let low = byte & 0x0F;
        let high = byte >> 4;
        number.push(bcd_digit(low));
        // Filler nibble terminates an odd-length number.
        if 2 * i + 1 < digit_count {
            number.push(bcd_digit(high));
        }
    }
    Ok(number)
}

fn bcd_digit(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        // Out-of-range BCD shows up in the wild; pass through the GSM
        // "overdecadic" digits rather than failing the address.
        0xA => '*',
        0xB => '#',
        0xC => 'a',
        0xD => 'b',
        0xE => 'c',
        _ => 'F',
    }
}

/// Encode a phone number as an address field (length, TOA, packed digits).
///
/// International type is chosen when the normalized number starts with `+`.
pub fn encode(number: &str) -> Result<Vec<u8>, NumberError> {
    let normalized = validation::normalize_msisdn(number)?;
    let international = validation::is_international(&normalized);
    let digits: Vec<u8> = normalized
        .chars()
        .filter(|c| c.is_ascii_digit())
        .map(|c| c as u8 - b'0')
        .collect();

    let mut out = Vec::with_capacity(2 + digits.len().div_ceil(2));
    out.push(digits.len() as u8);
    out.push(if international {
        TOA_INTERNATIONAL
    } else {
        TOA_UNKNOWN
    });
    for pair in digits.chunks(2) {
        let low = pair[0];
        let high = pair.get(1).copied().unwrap_or(0xF);
        out.push((high << 4) | low);
    }
    Ok(out)
}
