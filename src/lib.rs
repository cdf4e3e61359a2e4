//! # Smsrelay - SMS PDU codec and inbox sync engine
//!
//! Smsrelay turns the raw PDUs a cellular modem reports over a router's
//! AT-command channel into a deduplicated, reassembled message history, and
//! turns outbound text into ready-to-transmit PDU strings. Router web UIs
//! mangle non-Latin SMS text; reading the telecom-standard binary format
//! directly is the only way to get Persian, Arabic, or emoji messages out
//! intact.
//!
//! ## Features
//!
//! - **Full PDU codec**: SMS-DELIVER and SMS-SUBMIT parsing and building,
//!   semi-octet addresses (including alphanumeric sender names), SCTS
//!   timestamps with timezone, and the DCS alphabet/class bit layout.
//! - **Three alphabets**: GSM 7-bit packed (default + extension tables),
//!   UCS-2 with graceful handling of corrupt surrogates, and 8-bit binary
//!   fallback.
//! - **Concatenation**: UDH parsing (8- and 16-bit references), ordered
//!   reassembly keyed per sender, duplicate replay protection, and a
//!   configurable retention policy for groups that never complete.
//! - **Outbound planning**: minimal multipart splits that never divide an
//!   escape sequence or surrogate pair, with per-destination reference
//!   allocation.
//! - **Idempotent sync**: content-derived message identities make repeated
//!   syncs insert nothing new, and destructive cleanup only ever touches
//!   fully-assembled storage indices.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smsrelay::config::Config;
//! use smsrelay::reassembly::Reassembler;
//! use smsrelay::sync::{reconcile, SyncOptions};
//! use std::collections::HashSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut reassembler = Reassembler::new(config.reassembly.clone());
//!
//!     // The I/O layer reads `AT+CMGL=4` output from the router.
//!     let batch = smsrelay::modem::parse_cmgl("...modem response...");
//!     let known: HashSet<String> = HashSet::new(); // from the store
//!
//!     let outcome = reconcile(
//!         &batch,
//!         &known,
//!         &mut reassembler,
//!         &SyncOptions::default(),
//!         chrono::Utc::now(),
//!     );
//!     for message in &outcome.inserted {
//!         println!("{}: {}", message.address, message.body);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`pdu`] - PDU parsing/building with the alphabet, address, and
//!   timestamp codecs
//! - [`modem`] - Raw-PDU boundary types, CMGL parsing, and the per-profile
//!   access lock
//! - [`reassembly`] - Concatenated-message state machine and logical
//!   message identity
//! - [`outbound`] - Multipart send planning and reference allocation
//! - [`sync`] - Batch reconciliation against the persisted history
//! - [`config`] - Retention and outbound policy configuration
//! - [`validation`] - Phone number normalization
//! - [`logutil`] - Log sanitization helpers
//!
//! ## Data Flow
//!
//! ```text
//! modem ──► RawPdu batch ──► pdu::parse_pdu ──► Fragment
//!                                                  │
//!                                       reassembly::Reassembler
//!                                                  │
//!                             sync::reconcile ──► LogicalMessage ──► store
//!
//! compose ──► outbound::plan_send ──► raw PDU strings ──► modem transmit
//! ```
//!
//! The engine does no I/O of its own: modem access, persistence, and the
//! management API live outside and hand plain data across the boundary.
//! All modem access for one router profile must hold that profile's
//! [`modem::ProfileLock`], since the AT channel corrupts under interleaving.

pub mod config;
pub mod logutil;
pub mod modem;
pub mod outbound;
pub mod pdu;
pub mod reassembly;
pub mod sync;
pub mod validation;

pub use modem::{Direction, MessageStatus, RawPdu};
pub use outbound::{plan_send, OutboundPlan, OutboundPart, ReferenceAllocator};
pub use pdu::{build_submit_pdu, parse_pdu, Pdu};
pub use reassembly::{LogicalMessage, Reassembler};
pub use sync::{reconcile, SyncOptions, SyncOutcome};
