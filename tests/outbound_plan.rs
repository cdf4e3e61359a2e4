//! Outbound planning scenarios: budget boundaries and full round trips
//! through the parser and reassembler.

use chrono::Utc;
use smsrelay::modem::Direction;
use smsrelay::outbound::{plan_send, ReferenceAllocator};
use smsrelay::pdu::alphabet::Alphabet;
use smsrelay::pdu::{parse_pdu, Pdu};
use smsrelay::reassembly::{FeedResult, Fragment, Reassembler, ReassemblyConfig};

#[test]
fn exactly_160_gsm7_chars_fit_one_pdu() {
    let text = "x".repeat(160);
    let plan = plan_send("+31641600986", &text, &mut ReferenceAllocator::default()).unwrap();
    assert_eq!(plan.alphabet, Alphabet::Gsm7);
    assert_eq!(plan.parts.len(), 1);
    assert_eq!(plan.reference, None);
    let parsed = parse_pdu(&plan.parts[0].raw_pdu).unwrap();
    assert!(parsed.concat().is_none(), "no UDH on a single part");
}

#[test]
fn one_char_over_budget_forces_two_parts() {
    let text = "x".repeat(161);
    let plan = plan_send("+31641600986", &text, &mut ReferenceAllocator::default()).unwrap();
    assert_eq!(plan.parts.len(), 2);
    let reference = plan.reference.expect("shared reference");
    for (i, part) in plan.parts.iter().enumerate() {
        let concat = parse_pdu(&part.raw_pdu).unwrap().concat().unwrap();
        assert_eq!(concat.reference, reference as u16);
        assert_eq!(concat.total_parts, 2);
        assert_eq!(concat.part_index as usize, i + 1);
        assert!(parse_pdu(&part.raw_pdu).unwrap().text().len() <= 153);
    }
}

#[test]
fn persian_300_chars_yields_five_ascending_parts() {
    let text: String = std::iter::repeat("صبح بخیر! ")
        .flat_map(|s| s.chars())
        .take(300)
        .collect();
    assert_eq!(text.chars().count(), 300);

    let plan = plan_send("+989121234567", &text, &mut ReferenceAllocator::default()).unwrap();
    assert_eq!(plan.alphabet, Alphabet::Ucs2);
    assert_eq!(plan.parts.len(), 5); // ceil(300 / 67)
    for (i, part) in plan.parts.iter().enumerate() {
        assert_eq!(part.part_index as usize, i + 1);
        assert_eq!(part.total_parts, 5);
    }
}

#[test]
fn planned_parts_reassemble_to_the_original_text() {
    let text: String = "متن بلند برای ارسال چندبخشی ".repeat(12);
    let plan = plan_send("+989121234567", &text, &mut ReferenceAllocator::default()).unwrap();
    assert!(plan.parts.len() > 1);

    let mut engine = Reassembler::new(ReassemblyConfig::default());
    let now = Utc::now();
    let mut completed = None;
    // Feed in reverse order to exercise out-of-order arrival too.
    for part in plan.parts.iter().rev() {
        let parsed = parse_pdu(&part.raw_pdu).unwrap();
        let Pdu::Submit {
            destination,
            coding,
            concat,
            text,
        } = parsed
        else {
            panic!("plans build submits");
        };
        let result = engine.feed(
            Fragment {
                direction: Direction::Out,
                address: destination,
                timestamp: now,
                alphabet: coding.alphabet,
                text,
                concat,
                storage_index: part.part_index.to_string(),
                unsupported_dcs: false,
            },
            now,
        );
        if let FeedResult::Completed(msg) = result {
            completed = Some(msg);
        }
    }
    let msg = completed.expect("all parts fed");
    assert_eq!(msg.body, text);
    assert_eq!(msg.direction, Direction::Out);
}

#[test]
fn consecutive_plans_to_one_destination_get_distinct_references() {
    let mut allocator = ReferenceAllocator::default();
    let text = "y".repeat(200);
    let first = plan_send("+989121234567", &text, &mut allocator).unwrap();
    let second = plan_send("+989121234567", &text, &mut allocator).unwrap();
    assert_ne!(first.reference, second.reference);
}
