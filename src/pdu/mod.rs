//! GSM/3GPP SMS PDU parsing and construction.
//!
//! A raw PDU as reported by a modem in text mode is a hex string: optional
//! SMSC info, a type octet, the counterpart address, protocol and coding
//! octets, a service-centre timestamp (deliver only), then the user data
//! with an optional User Data Header carrying concatenation info.
//!
//! The parsed form is a tagged union: [`Pdu::Deliver`] for received
//! messages and [`Pdu::Submit`] for stored outbound ones, each holding only
//! the fields that exist for its type. Per-fragment decode failures are
//! [`DecodeError`] values the batch layer counts and skips; they never
//! abort a whole modem read.

pub mod address;
pub mod alphabet;
pub mod timestamp;

use alphabet::Alphabet;
use chrono::{DateTime, FixedOffset};
use log::{debug, warn};

use crate::logutil::hex_snippet;

/// Recoverable per-PDU decode failure.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("PDU hex contains a non-hex character or odd length")]
    InvalidHex,

    #[error("PDU truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("unsupported TP-MTI value {0:#04b}")]
    UnsupportedMessageType(u8),

    #[error("UCS-2 user data has odd byte length {0}")]
    OddUcs2Length(usize),

    #[error("address digit count {digits} exceeds the address field maximum")]
    AddressOverflow { digits: usize },

    #[error("invalid service-centre timestamp: bad {0}")]
    InvalidTimestamp(&'static str),

    #[error("user data header overruns the user data field")]
    MalformedUdh,
}

/// Concatenation info carried in a UDH information element.
///
/// References are unique only modulo their width and the sender address,
/// so grouping always keys on `(address, wide_ref, reference, total_parts)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConcatInfo {
    pub reference: u16,
    /// True for the 16-bit reference IE (0x08), false for 8-bit (0x00).
    pub wide_ref: bool,
    pub total_parts: u8,
    /// 1-based part index, `<= total_parts`.
    pub part_index: u8,
}

impl ConcatInfo {
    /// UDH bytes for this element, including the leading UDH length octet.
    pub fn to_udh_bytes(&self) -> Vec<u8> {
        if self.wide_ref {
            let [hi, lo] = self.reference.to_be_bytes();
            vec![0x06, 0x08, 0x04, hi, lo, self.total_parts, self.part_index]
        } else {
            vec![
                0x05,
                0x00,
                0x03,
                self.reference as u8,
                self.total_parts,
                self.part_index,
            ]
        }
    }
}

/// Data coding scheme, reduced to what the relay needs: the alphabet, an
/// optional message class, and whether the DCS group was one we do not
/// implement (decoded best-effort as 8-bit and flagged).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCoding {
    pub alphabet: Alphabet,
    pub class: Option<u8>,
    pub unsupported: bool,
}

impl DataCoding {
    /// Decode a DCS octet (TS 23.038 §4).
    pub fn from_byte(dcs: u8) -> Self {
        if dcs & 0xC0 == 0x00 {
            // General data coding: bits 2-3 alphabet, bit 4 class present.
            let alphabet = match (dcs >> 2) & 0x03 {
                0 => Alphabet::Gsm7,
                1 => Alphabet::EightBit,
                2 => Alphabet::Ucs2,
                _ => {
                    return DataCoding {
                        alphabet: Alphabet::EightBit,
                        class: None,
                        unsupported: true,
                    }
                }
            };
            let class = (dcs & 0x10 != 0).then_some(dcs & 0x03);
            DataCoding {
                alphabet,
                class,
                unsupported: false,
            }
        } else if dcs & 0xF0 == 0xF0 {
            // Data coding/message class group: bit 2 picks the alphabet.
            let alphabet = if dcs & 0x04 == 0 {
                Alphabet::Gsm7
            } else {
                Alphabet::EightBit
            };
            DataCoding {
                alphabet,
                class: Some(dcs & 0x03),
                unsupported: false,
            }
        } else if dcs & 0xF0 == 0xE0 {
            // Message-waiting group with UCS-2 text.
            DataCoding {
                alphabet: Alphabet::Ucs2,
                class: None,
                unsupported: false,
            }
        } else {
            DataCoding {
                alphabet: Alphabet::EightBit,
                class: None,
                unsupported: true,
            }
        }
    }

    /// DCS octet for an outbound submit: general group, no class.
    pub fn to_byte(alphabet: Alphabet) -> u8 {
        match alphabet {
            Alphabet::Gsm7 => 0x00,
            Alphabet::EightBit => 0x04,
            Alphabet::Ucs2 => 0x08,
        }
    }
}

/// A decoded single PDU.
///
/// The variant split keeps deliver-only fields (the service-centre
/// timestamp) inaccessible on submits at the type level.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    /// SMS-DELIVER: a message received from the network.
    Deliver {
        originator: String,
        scts: DateTime<FixedOffset>,
        coding: DataCoding,
        concat: Option<ConcatInfo>,
        text: String,
    },
    /// SMS-SUBMIT: a message stored for (or after) transmission.
    Submit {
        destination: String,
        coding: DataCoding,
        concat: Option<ConcatInfo>,
        text: String,
    },
}

impl Pdu {
    /// The counterpart phone number: originator for deliver, destination
    /// for submit.
    pub fn counterpart(&self) -> &str {
        match self {
            Pdu::Deliver { originator, .. } => originator,
            Pdu::Submit { destination, .. } => destination,
        }
    }

    pub fn concat(&self) -> Option<ConcatInfo> {
        match self {
            Pdu::Deliver { concat, .. } | Pdu::Submit { concat, .. } => *concat,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Pdu::Deliver { text, .. } | Pdu::Submit { text, .. } => text,
        }
    }

    pub fn coding(&self) -> DataCoding {
        match self {
            Pdu::Deliver { coding, .. } | Pdu::Submit { coding, .. } => *coding,
        }
    }
}

/// Cursor over the decoded PDU bytes with field-aware truncation errors.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(DecodeError::Truncated { field })?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn take(
        &mut self,
        n: usize,
        field: &'static str,
    ) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(DecodeError::Truncated { field });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }
}

fn from_hex(hex: &str) -> Result<Vec<u8>, DecodeError> {
    let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(DecodeError::InvalidHex);
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).map_err(|_| DecodeError::InvalidHex))
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
    out
}

const FO_MTI_MASK: u8 = 0x03;
const FO_MTI_DELIVER: u8 = 0x00;
const FO_MTI_SUBMIT: u8 = 0x01;
const FO_UDHI: u8 = 0x40;
const FO_VPF_MASK: u8 = 0x18;
const FO_VPF_RELATIVE: u8 = 0x10;
const FO_VPF_NONE: u8 = 0x00;

/// Parse one raw PDU hex string.
pub fn parse_pdu(hex: &str) -> Result<Pdu, DecodeError> {
    let bytes = from_hex(hex)?;
    let mut r = Reader::new(&bytes);

    // SMSC info segment: length-prefixed, zero when absent.
    let smsc_len = r.u8("SMSC length")? as usize;
    r.take(smsc_len, "SMSC info")?;

    let first = r.u8("PDU type")?;
    let udhi = first & FO_UDHI != 0;
    match first & FO_MTI_MASK {
        FO_MTI_DELIVER => parse_deliver(&mut r, udhi),
        FO_MTI_SUBMIT => parse_submit(&mut r, first, udhi),
        other => Err(DecodeError::UnsupportedMessageType(other)),
    }
}

fn parse_deliver(r: &mut Reader, udhi: bool) -> Result<Pdu, DecodeError> {
    let originator = address::decode(r)?;
    let _pid = r.u8("protocol identifier")?;
    let dcs = r.u8("data coding scheme")?;
    let coding = DataCoding::from_byte(dcs);
    if coding.unsupported {
        warn!(
            "reserved DCS {:#04X} from {}; decoding user data as 8-bit",
            dcs, originator
        );
    }
    let scts_bytes: [u8; 7] = r
        .take(7, "service centre timestamp")?
        .try_into()
        .expect("take(7) yields 7 bytes");
    let scts = timestamp::decode_scts(&scts_bytes)?;
    let udl = r.u8("user data length")? as usize;
    let ud = r.rest();
    let (concat, text) = decode_user_data(coding, udhi, udl, ud)?;
    Ok(Pdu::Deliver {
        originator,
        scts,
        coding,
        concat,
        text,
    })
}

fn parse_submit(r: &mut Reader, first: u8, udhi: bool) -> Result<Pdu, DecodeError> {
    let _mr = r.u8("message reference")?;
    let destination = address::decode(r)?;
    let _pid = r.u8("protocol identifier")?;
    let dcs = r.u8("data coding scheme")?;
    let coding = DataCoding::from_byte(dcs);
    // Validity period: relative is one octet, enhanced/absolute are seven.
    match first & FO_VPF_MASK {
        FO_VPF_NONE => {}
        FO_VPF_RELATIVE => {
            r.u8("validity period")?;
        }
        _ => {
            r.take(7, "validity period")?;
        }
    }
    let udl = r.u8("user data length")? as usize;
    let ud = r.rest();
    let (concat, text) = decode_user_data(coding, udhi, udl, ud)?;
    Ok(Pdu::Submit {
        destination,
        coding,
        concat,
        text,
    })
}

/// Split the user data field into concatenation info and decoded text.
fn decode_user_data(
    coding: DataCoding,
    udhi: bool,
    udl: usize,
    ud: &[u8],
) -> Result<(Option<ConcatInfo>, String), DecodeError> {
    let mut concat = None;
    let mut payload = ud;
    let mut udh_octets = 0usize;

    if udhi {
        let udhl = *ud.first().ok_or(DecodeError::MalformedUdh)? as usize;
        if 1 + udhl > ud.len() {
            return Err(DecodeError::MalformedUdh);
        }
        concat = parse_udh(&ud[1..1 + udhl])?;
        udh_octets = 1 + udhl;
        payload = &ud[udh_octets..];
    }

    let text = match coding.alphabet {
        Alphabet::Gsm7 => {
            // TP-UDL counts septets including the UDH; the header plus its
            // fill bits occupy ceil(udh_octets*8/7) leading septets.
            let skip = (udh_octets * 8).div_ceil(7);
            alphabet::decode_gsm7(ud, udl, skip)
        }
        Alphabet::Ucs2 => {
            let declared = udl.saturating_sub(udh_octets);
            if declared % 2 != 0 {
                return Err(DecodeError::OddUcs2Length(declared));
            }
            let available = declared.min(payload.len());
            if available < declared {
                debug!(
                    "UCS-2 user data short: declared {} octets, {} present",
                    declared, available
                );
            }
            alphabet::decode_ucs2(&payload[..available - available % 2])
        }
        Alphabet::EightBit => {
            let declared = udl.saturating_sub(udh_octets);
            let available = declared.min(payload.len());
            alphabet::decode_8bit(&payload[..available])
        }
    };
    Ok((concat, text))
}

/// Walk the UDH information elements, extracting concatenation info.
///
/// IE 0x00 is the 8-bit reference form, IE 0x08 the 16-bit form; anything
/// else is skipped by its declared length.
fn parse_udh(udh: &[u8]) -> Result<Option<ConcatInfo>, DecodeError> {
    let mut concat = None;
    let mut pos = 0;
    while pos < udh.len() {
        if pos + 2 > udh.len() {
            return Err(DecodeError::MalformedUdh);
        }
        let iei = udh[pos];
        let ielen = udh[pos + 1] as usize;
        let body = udh
            .get(pos + 2..pos + 2 + ielen)
            .ok_or(DecodeError::MalformedUdh)?;
        match (iei, ielen) {
            (0x00, 3) => {
                concat = Some(ConcatInfo {
                    reference: body[0] as u16,
                    wide_ref: false,
                    total_parts: body[1],
                    part_index: body[2],
                });
            }
            (0x08, 4) => {
                concat = Some(ConcatInfo {
                    reference: u16::from_be_bytes([body[0], body[1]]),
                    wide_ref: true,
                    total_parts: body[2],
                    part_index: body[3],
                });
            }
            _ => {
                debug!("skipping UDH IE {:#04X} ({} bytes)", iei, ielen);
            }
        }
        pos += 2 + ielen;
    }
    // total_parts of zero or index out of range means a broken header;
    // treat the fragment as a singleton rather than poisoning a group.
    if let Some(c) = concat {
        if c.total_parts == 0 || c.part_index == 0 || c.part_index > c.total_parts {
            warn!(
                "dropping inconsistent concatenation IE (ref {}, {}/{})",
                c.reference, c.part_index, c.total_parts
            );
            concat = None;
        } else if c.total_parts == 1 {
            // A 1-of-1 header carries no grouping information.
            concat = None;
        }
    }
    Ok(concat)
}

/// Build an SMS-SUBMIT PDU for one outbound part.
///
/// The SMSC segment is left empty (length 0) so the modem uses its default
/// centre; TP-MR is 0 (the modem assigns its own); PID and validity stay at
/// their defaults. When `concat` is present the UDH indicator bit is set
/// and TP-UDL counts the header septets/octets.
pub fn build_submit_pdu(
    destination: &str,
    data: &alphabet::EncodedText,
    concat: Option<ConcatInfo>,
) -> Result<String, crate::validation::NumberError> {
    let mut out = Vec::with_capacity(32);
    out.push(0x00); // no SMSC info
    let mut first = FO_MTI_SUBMIT;
    if concat.is_some() {
        first |= FO_UDHI;
    }
    out.push(first);
    out.push(0x00); // TP-MR
    out.extend(address::encode(destination)?);
    out.push(0x00); // PID: default store-and-forward
    out.push(DataCoding::to_byte(data.alphabet()));

    let udh = concat.map(|c| c.to_udh_bytes());
    match data {
        alphabet::EncodedText::Gsm7(septets) => match udh {
            Some(udh) => {
                let udh_septets = (udh.len() * 8).div_ceil(7);
                let mut stream = vec![0u8; udh_septets];
                stream.extend_from_slice(septets);
                let mut packed = alphabet::pack_septets(&stream);
                packed[..udh.len()].copy_from_slice(&udh);
                out.push(stream.len() as u8);
                out.extend(packed);
            }
            None => {
                out.push(septets.len() as u8);
                out.extend(alphabet::pack_septets(septets));
            }
        },
        alphabet::EncodedText::Ucs2(units) => {
            let mut ud = udh.unwrap_or_default();
            for unit in units {
                ud.extend_from_slice(&unit.to_be_bytes());
            }
            out.push(ud.len() as u8);
            out.extend(ud);
        }
    }

    let pdu = to_hex(&out);
    debug!("built submit PDU {}", hex_snippet(&pdu, 32));
    Ok(pdu)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLOHELLO: &str =
        "07911326040000F0040B911346610089F600003180215193832A0AE8329BFD4697D9EC37";

    #[test]
    fn parses_classic_deliver() {
        let pdu = parse_pdu(HELLOHELLO).unwrap();
        match pdu {
            Pdu::Deliver {
                originator,
                scts,
                coding,
                concat,
                text,
            } => {
                assert_eq!(originator, "+31641600986");
                assert_eq!(text, "hellohello");
                assert_eq!(coding.alphabet, Alphabet::Gsm7);
                assert!(concat.is_none());
                assert_eq!(scts.format("%Y-%m-%d %H:%M:%S").to_string(), "2013-08-12 15:39:38");
            }
            other => panic!("expected deliver, got {:?}", other),
        }
    }

    #[test]
    fn rejects_bad_hex() {
        assert!(matches!(parse_pdu("zz"), Err(DecodeError::InvalidHex)));
        assert!(matches!(parse_pdu("012"), Err(DecodeError::InvalidHex)));
    }

    #[test]
    fn rejects_truncated_pdu() {
        assert!(matches!(
            parse_pdu("07911326"),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_status_report_mti() {
        // MTI 0b10 is SMS-STATUS-REPORT, out of scope.
        assert!(matches!(
            parse_pdu("0006"),
            Err(DecodeError::UnsupportedMessageType(0b10))
        ));
    }

    #[test]
    fn dcs_general_group() {
        let c = DataCoding::from_byte(0x00);
        assert_eq!(c.alphabet, Alphabet::Gsm7);
        assert_eq!(c.class, None);
        let c = DataCoding::from_byte(0x08);
        assert_eq!(c.alphabet, Alphabet::Ucs2);
        let c = DataCoding::from_byte(0x11);
        assert_eq!(c.alphabet, Alphabet::Gsm7);
        assert_eq!(c.class, Some(1));
    }

    #[test]
    fn dcs_reserved_group_flags_unsupported() {
        let c = DataCoding::from_byte(0x8C);
        assert!(c.unsupported);
        assert_eq!(c.alphabet, Alphabet::EightBit);
    }

    #[test]
    fn udh_concat_8bit_reference() {
        let concat = parse_udh(&[0x00, 0x03, 0x5A, 0x02, 0x01]).unwrap().unwrap();
        assert_eq!(concat.reference, 0x5A);
        assert!(!concat.wide_ref);
        assert_eq!((concat.total_parts, concat.part_index), (2, 1));
    }

    #[test]
    fn udh_concat_16bit_reference() {
        let concat = parse_udh(&[0x08, 0x04, 0x01, 0xF4, 0x03, 0x02])
            .unwrap()
            .unwrap();
        assert_eq!(concat.reference, 0x01F4);
        assert!(concat.wide_ref);
        assert_eq!((concat.total_parts, concat.part_index), (3, 2));
    }

    #[test]
    fn udh_skips_unknown_ie() {
        // Port-addressing IE first, concat IE second.
        let concat = parse_udh(&[0x05, 0x04, 0x0B, 0x84, 0x23, 0xF0, 0x00, 0x03, 0x11, 0x02, 0x02])
            .unwrap()
            .unwrap();
        assert_eq!(concat.reference, 0x11);
    }

    #[test]
    fn udh_truncated_ie_errors() {
        assert!(matches!(
            parse_udh(&[0x00, 0x03, 0x5A]),
            Err(DecodeError::MalformedUdh)
        ));
    }

    #[test]
    fn udh_inconsistent_concat_dropped() {
        // Index beyond total.
        assert!(parse_udh(&[0x00, 0x03, 0x5A, 0x02, 0x05])
            .unwrap()
            .is_none());
        // 1-of-1 carries no grouping.
        assert!(parse_udh(&[0x00, 0x03, 0x5A, 0x01, 0x01])
            .unwrap()
            .is_none());
    }

    #[test]
    fn build_single_part_gsm7() {
        let data = alphabet::encode_for("hellohello");
        let pdu = build_submit_pdu("+31641600986", &data, None).unwrap();
        assert_eq!(
            pdu,
            "0001000B911346610089F600000AE8329BFD4697D9EC37"
        );
    }

    #[test]
    fn build_then_parse_concatenated_ucs2() {
        let data = alphabet::encode_for("سلام دنیا");
        let concat = ConcatInfo {
            reference: 0x42,
            wide_ref: false,
            total_parts: 2,
            part_index: 1,
        };
        let hex = build_submit_pdu("+989121234567", &data, Some(concat)).unwrap();
        let parsed = parse_pdu(&hex).unwrap();
        match parsed {
            Pdu::Submit {
                destination,
                coding,
                concat: parsed_concat,
                text,
            } => {
                assert_eq!(destination, "+989121234567");
                assert_eq!(coding.alphabet, Alphabet::Ucs2);
                assert_eq!(parsed_concat, Some(concat));
                assert_eq!(text, "سلام دنیا");
            }
            other => panic!("expected submit, got {:?}", other),
        }
    }

    #[test]
    fn build_then_parse_concatenated_gsm7_fill_bits() {
        let data = alphabet::encode_for("part one text");
        let concat = ConcatInfo {
            reference: 0x5A,
            wide_ref: false,
            total_parts: 2,
            part_index: 1,
        };
        let hex = build_submit_pdu("+31641600986", &data, Some(concat)).unwrap();
        let parsed = parse_pdu(&hex).unwrap();
        assert_eq!(parsed.text(), "part one text");
        assert_eq!(parsed.concat(), Some(concat));
    }
}
