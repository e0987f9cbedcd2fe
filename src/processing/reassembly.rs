//! Per-anchor fragment reassembly
//!
//! Anchors split large reports into `[seq/total]`-prefixed chunks. A chunk
//! with `seq == 1` opens a new session and discards whatever was buffered
//! before; the session completes as soon as it holds `total` distinct keys,
//! at which point the bodies are joined in ascending `seq` order and decoded.

use crate::core::{AnchorId, PROGRESS_LOG_EVERY};
use crate::processing::parser::{self, DecodeResult, DeviceReport, Fragment, Frame};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Outcome of feeding one payload
#[derive(Debug, Clone, PartialEq)]
pub enum Reassembly {
    /// A full report was reassembled and decoded
    Complete(DeviceReport),
    /// More fragments are needed, or the payload was ignored
    Pending,
}

/// Fragments collected for the current session
#[derive(Debug, Clone, Default)]
pub struct ReassemblyBuffer {
    expected_total: u32,
    fragments: BTreeMap<u32, Vec<u8>>,
}

impl ReassemblyBuffer {
    fn new(expected_total: u32) -> Self {
        Self {
            expected_total,
            fragments: BTreeMap::new(),
        }
    }

    fn is_complete(&self) -> bool {
        self.fragments.len() == self.expected_total as usize
    }

    /// Join bodies in ascending sequence order
    fn concat(self) -> Vec<u8> {
        let size = self.fragments.values().map(Vec::len).sum();
        self.fragments
            .into_values()
            .fold(Vec::with_capacity(size), |mut body, chunk| {
                body.extend_from_slice(&chunk);
                body
            })
    }
}

/// Counters kept by a reassembler over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub reports_completed: u64,
    pub decode_errors: u64,
    /// Fragments dropped because no session was open
    pub orphan_fragments: u64,
    /// Sessions abandoned by a new `seq == 1` before completing
    pub sessions_reset: u64,
}

/// Turns one anchor's stream of raw payloads into decoded device reports
#[derive(Debug)]
pub struct FragmentReassembler {
    anchor: AnchorId,
    session: Option<ReassemblyBuffer>,
    stats: ReassemblyStats,
}

impl FragmentReassembler {
    pub fn new(anchor: AnchorId) -> Self {
        Self {
            anchor,
            session: None,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn anchor(&self) -> &AnchorId {
        &self.anchor
    }

    /// Feed one raw payload in delivery order.
    ///
    /// Returns `Complete` with the decoded report once a session (or an
    /// unframed payload) is whole, `Pending` otherwise. A body that fails to
    /// decode yields `Err` and the session buffer is cleared either way.
    pub fn feed(&mut self, raw: &[u8]) -> DecodeResult<Reassembly> {
        if raw.is_empty() {
            return Ok(Reassembly::Pending);
        }

        match parser::parse_frame(raw) {
            Ok(Frame::Whole(body)) => self.decode(&body).map(Reassembly::Complete),
            Ok(Frame::Fragment(fragment)) => self.accept(fragment),
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(anchor = %self.anchor, error = %e, "Dropping payload");
                Err(e)
            }
        }
    }

    fn accept(&mut self, fragment: Fragment) -> DecodeResult<Reassembly> {
        let Fragment { seq, total, body } = fragment;

        if seq == 1 {
            if let Some(abandoned) = self.session.take() {
                self.stats.sessions_reset += 1;
                debug!(
                    anchor = %self.anchor,
                    buffered = abandoned.fragments.len(),
                    expected = abandoned.expected_total,
                    "Discarding incomplete session"
                );
            }
            info!(anchor = %self.anchor, total, "Receiving fragmented report");
            self.session = Some(ReassemblyBuffer::new(total));
        }

        let Some(session) = self.session.as_mut() else {
            self.stats.orphan_fragments += 1;
            debug!(anchor = %self.anchor, seq, total, "Fragment outside any session, dropped");
            return Ok(Reassembly::Pending);
        };

        session.fragments.insert(seq, body);

        if seq % PROGRESS_LOG_EVERY == 0 || seq == session.expected_total {
            debug!(
                anchor = %self.anchor,
                seq,
                total = session.expected_total,
                buffered = session.fragments.len(),
                "Fragment progress"
            );
        }

        if !session.is_complete() {
            return Ok(Reassembly::Pending);
        }

        let Some(complete) = self.session.take() else {
            return Ok(Reassembly::Pending);
        };
        debug!(anchor = %self.anchor, total = complete.expected_total, "Reassembling report");

        let body = complete.concat();
        self.decode(&body).map(Reassembly::Complete)
    }

    fn decode(&mut self, body: &[u8]) -> DecodeResult<DeviceReport> {
        match parser::decode_report(body) {
            Ok(report) => {
                self.stats.reports_completed += 1;
                info!(anchor = %self.anchor, devices = report.devices.len(), "Report complete");
                Ok(report)
            }
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!(anchor = %self.anchor, error = %e, bytes = body.len(), "Report failed to decode");
                Err(e)
            }
        }
    }

    /// Number of fragments held by the open session (0 when none is open)
    pub fn buffered_fragments(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.fragments.len())
    }

    /// Total fragment count of the open session
    pub fn expected_total(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.expected_total)
    }

    pub fn has_open_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::parser::DecodeError;
    use proptest::prelude::*;

    const REPORT: &str = r#"{"devices":[{"mac":"AA:01","distance":3.5,"rssi":-60,"id":"0123456789"},{"mac":"AA:02","distance":7.25,"rssi":-72,"id":"abcdefabcd"}]}"#;

    fn reassembler() -> FragmentReassembler {
        FragmentReassembler::new(AnchorId::new("ESP32-A"))
    }

    fn frames(body: &[u8], parts: usize) -> Vec<Vec<u8>> {
        let size = (body.len() + parts - 1) / parts;
        parser::fragment_payload(body, size)
    }

    fn expect_complete(outcome: DecodeResult<Reassembly>) -> DeviceReport {
        match outcome {
            Ok(Reassembly::Complete(report)) => report,
            other => panic!("expected complete report, got {:?}", other),
        }
    }

    #[test]
    fn test_unframed_payload_decodes_directly() {
        let mut r = reassembler();
        let report = expect_complete(r.feed(REPORT.as_bytes()));
        assert_eq!(report.devices.len(), 2);
        assert!(!r.has_open_session());
    }

    #[test]
    fn test_in_order_fragments_complete_on_last() {
        let mut r = reassembler();
        let parts = frames(REPORT.as_bytes(), 4);
        assert_eq!(parts.len(), 4);

        for part in &parts[..3] {
            assert_eq!(r.feed(part).unwrap(), Reassembly::Pending);
        }
        assert_eq!(r.buffered_fragments(), 3);

        let report = expect_complete(r.feed(&parts[3]));
        assert_eq!(report, parser::decode_report(REPORT.as_bytes()).unwrap());
        assert_eq!(r.buffered_fragments(), 0);
        assert_eq!(r.stats().reports_completed, 1);
    }

    #[test]
    fn test_single_fragment_session() {
        let mut r = reassembler();
        let mut payload = b"[1/1]".to_vec();
        payload.extend_from_slice(REPORT.as_bytes());
        expect_complete(r.feed(&payload));
    }

    #[test]
    fn test_seq_one_resets_incomplete_session() {
        let mut r = reassembler();
        r.feed(b"[1/3]aaa").unwrap();
        r.feed(b"[2/3]bbb").unwrap();
        assert_eq!(r.buffered_fragments(), 2);

        r.feed(b"[1/5]ccc").unwrap();
        assert_eq!(r.buffered_fragments(), 1);
        assert_eq!(r.expected_total(), Some(5));
        assert_eq!(r.stats().sessions_reset, 1);
    }

    #[test]
    fn test_fragments_before_first_are_dropped() {
        let mut r = reassembler();
        assert_eq!(r.feed(b"[2/2]tail").unwrap(), Reassembly::Pending);
        assert!(!r.has_open_session());
        assert_eq!(r.stats().orphan_fragments, 1);

        // After a completed session nothing is open either
        let parts = frames(REPORT.as_bytes(), 2);
        r.feed(&parts[0]).unwrap();
        expect_complete(r.feed(&parts[1]));
        assert_eq!(r.feed(&parts[1]).unwrap(), Reassembly::Pending);
        assert_eq!(r.stats().orphan_fragments, 2);
    }

    #[test]
    fn test_duplicates_overwrite() {
        let mut r = reassembler();
        let parts = frames(REPORT.as_bytes(), 3);
        r.feed(&parts[0]).unwrap();
        r.feed(b"[2/3]garbage").unwrap();
        r.feed(&parts[1]).unwrap();
        assert_eq!(r.buffered_fragments(), 2);

        let report = expect_complete(r.feed(&parts[2]));
        assert_eq!(report.devices.len(), 2);
    }

    #[test]
    fn test_completion_counts_keys_not_values() {
        // seq 7 is outside 1..=3 but still counts towards the total
        let mut r = reassembler();
        r.feed(b"[1/3]{\"devices\":").unwrap();
        r.feed(b"[7/3]]}").unwrap();
        let report = expect_complete(r.feed(b"[3/3]["));
        assert!(report.devices.is_empty());
    }

    #[test]
    fn test_malformed_report_clears_buffer() {
        let mut r = reassembler();
        r.feed(b"[1/2]{\"nodes\":").unwrap();
        let outcome = r.feed(b"[2/2][]}");
        assert!(matches!(outcome, Err(DecodeError::MalformedReport(_))));
        assert!(!r.has_open_session());
        assert_eq!(r.stats().decode_errors, 1);

        // Next session starts fresh
        let parts = frames(REPORT.as_bytes(), 2);
        r.feed(&parts[0]).unwrap();
        expect_complete(r.feed(&parts[1]));
    }

    #[test]
    fn test_invalid_header_leaves_session_untouched() {
        let mut r = reassembler();
        r.feed(b"[1/3]abc").unwrap();
        assert!(matches!(r.feed(b"[0/3]x"), Err(DecodeError::InvalidHeader { .. })));
        assert_eq!(r.buffered_fragments(), 1);
    }

    #[test]
    fn test_empty_payload_ignored() {
        let mut r = reassembler();
        r.feed(b"[1/2]abc").unwrap();
        assert_eq!(r.feed(b"").unwrap(), Reassembly::Pending);
        assert_eq!(r.buffered_fragments(), 1);
    }

    proptest! {
        /// Property: once `seq == 1` opens the session, the remaining
        /// fragments may arrive in any order and yield the same report.
        #[test]
        fn prop_order_independent_after_first(
            parts in 2usize..12,
            keys in proptest::collection::vec(any::<u32>(), 12),
        ) {
            let body = REPORT.as_bytes();
            let framed = frames(body, parts);
            let n = framed.len();

            let mut rest: Vec<usize> = (1..n).collect();
            rest.sort_by_key(|&i| keys[i]);

            let mut r = reassembler();
            let mut outcome = r.feed(&framed[0]).unwrap();
            for i in rest {
                outcome = r.feed(&framed[i]).unwrap();
            }

            let expected = parser::decode_report(body).unwrap();
            prop_assert_eq!(outcome, Reassembly::Complete(expected));
            prop_assert_eq!(r.buffered_fragments(), 0);
        }

        /// Property: in-order delivery reproduces the concatenated bodies.
        #[test]
        fn prop_in_order_concatenation(chunk in 1usize..40) {
            let body = REPORT.as_bytes();
            let mut r = reassembler();
            let mut last = Reassembly::Pending;
            for frame in parser::fragment_payload(body, chunk) {
                last = r.feed(&frame).unwrap();
            }
            prop_assert_eq!(last, Reassembly::Complete(parser::decode_report(body).unwrap()));
        }
    }
}
