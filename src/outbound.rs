//! Outbound message planning: alphabet choice, multipart splitting, and
//! reference allocation.
//!
//! A compose action becomes an [`OutboundPlan`]: one PDU when the text fits
//! a single part, otherwise the minimum number of UDH-bearing parts sharing
//! one reference number. Parts must be transmitted in order, one at a time;
//! each carries its index so a failure partway through is attributable.

use crate::pdu::alphabet::{self, Alphabet, EncodedText};
use crate::pdu::{build_submit_pdu, ConcatInfo};
use crate::validation::NumberError;
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::collections::VecDeque;

/// Planning failure for one compose action.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    InvalidNumber(#[from] NumberError),

    #[error("message needs {0} parts, beyond the 255-part concatenation limit")]
    TooManyParts(usize),

    /// Budget math guarantees every part fits; hitting this is a bug, and
    /// it fails only the one send.
    #[error("internal error: split produced a part of {got} units against a budget of {budget}")]
    EncodingOverflow { got: usize, budget: usize },
}

/// One PDU of a plan, with enough context to report per-part outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPart {
    /// 1-based index within the plan.
    pub part_index: u8,
    pub total_parts: u8,
    /// Hex PDU string ready for the modem transmit command.
    pub raw_pdu: String,
}

/// Ordered PDUs for one compose action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPlan {
    pub destination: String,
    pub alphabet: Alphabet,
    /// Shared concatenation reference; `None` for a single-part plan.
    pub reference: Option<u8>,
    pub parts: Vec<OutboundPart>,
}

/// Allocates concatenation reference numbers.
///
/// A process-wide counter seeded randomly, wrapping modulo 256 but skipping
/// references recently handed out for the same destination, so a wrapped
/// counter cannot collide with a message that destination may still be
/// reassembling.
#[derive(Debug)]
pub struct ReferenceAllocator {
    next: u8,
    recent: HashMap<String, VecDeque<u8>>,
    guard_depth: usize,
}

impl ReferenceAllocator {
    /// `guard_depth` above 255 would exclude the whole reference space, so
    /// it is clamped to leave at least one free candidate.
    pub fn new(guard_depth: usize) -> Self {
        ReferenceAllocator {
            next: rand::thread_rng().gen(),
            recent: HashMap::new(),
            guard_depth: guard_depth.min(u8::MAX as usize),
        }
    }

    /// Next reference for `destination`, avoiding its recent ones.
    pub fn allocate(&mut self, destination: &str) -> u8 {
        let recent = self
            .recent
            .entry(destination.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.guard_depth));
        // guard_depth is clamped to 255, so the 256 candidates always
        // contain a free one.
        let mut candidate = self.next;
        while recent.contains(&candidate) {
            candidate = candidate.wrapping_add(1);
        }
        self.next = candidate.wrapping_add(1);
        if self.guard_depth > 0 {
            if recent.len() == self.guard_depth {
                recent.pop_front();
            }
            recent.push_back(candidate);
        }
        candidate
    }
}

impl Default for ReferenceAllocator {
    fn default() -> Self {
        ReferenceAllocator::new(8)
    }
}

/// Plan the PDUs for sending `text` to `destination`.
pub fn plan_send(
    destination: &str,
    text: &str,
    allocator: &mut ReferenceAllocator,
) -> Result<OutboundPlan, PlanError> {
    let encoded = alphabet::encode_for(text);
    let alphabet = encoded.alphabet();

    if encoded.len_units() <= alphabet.part_budget(false) {
        let raw_pdu = build_submit_pdu(destination, &encoded, None)?;
        return Ok(OutboundPlan {
            destination: destination.to_string(),
            alphabet,
            reference: None,
            parts: vec![OutboundPart {
                part_index: 1,
                total_parts: 1,
                raw_pdu,
            }],
        });
    }

    let budget = alphabet.part_budget(true);
    let slices = split_units(&encoded, budget)?;
    if slices.len() > u8::MAX as usize {
        return Err(PlanError::TooManyParts(slices.len()));
    }
    let total = slices.len() as u8;
    let reference = allocator.allocate(destination);
    debug!(
        "planning {}-part send to {} (alphabet {:?}, ref {})",
        total, destination, alphabet, reference
    );

    let mut parts = Vec::with_capacity(slices.len());
    for (i, part_data) in slices.into_iter().enumerate() {
        let concat = ConcatInfo {
            reference: reference as u16,
            wide_ref: false,
            total_parts: total,
            part_index: (i + 1) as u8,
        };
        let raw_pdu = build_submit_pdu(destination, &part_data, Some(concat))?;
        parts.push(OutboundPart {
            part_index: (i + 1) as u8,
            total_parts: total,
            raw_pdu,
        });
    }

    Ok(OutboundPlan {
        destination: destination.to_string(),
        alphabet,
        reference: Some(reference),
        parts,
    })
}

/// Split encoded text into budget-sized parts on safe unit boundaries.
fn split_units(encoded: &EncodedText, budget: usize) -> Result<Vec<EncodedText>, PlanError> {
    let len = encoded.len_units();
    let mut out = Vec::with_capacity(len.div_ceil(budget));
    let mut start = 0;
    while start < len {
        let end = encoded.safe_cut(start, budget);
        if end <= start || end - start > budget {
            return Err(PlanError::EncodingOverflow {
                got: end.saturating_sub(start),
                budget,
            });
        }
        out.push(encoded.slice(start, end));
        start = end;
    }
    Ok(out)
}
