//! Candidate scoring and assignment
//!
//! score = 100 for a phone match, plus `max(0, 100 - |Δt|)` with Δt in
//! seconds between the call's creation and the conversation's start. A
//! candidate outside the acceptance window, or with nothing to transcribe, is
//! not eligible at all. Highest score wins; ties go to the smaller |Δt|, then
//! to the earlier candidate in listing order.

use std::collections::HashSet;

use super::candidate::ExternalCandidate;
use crate::database::CallRecord;
use crate::phone;

pub const PHONE_MATCH_SCORE: i64 = 100;
pub const MAX_PROXIMITY_SCORE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchScore {
    pub score: i64,
    pub delta_secs: i64,
    pub phone_match: bool,
}

/// Score one candidate against one call, `None` when ineligible
pub fn score(call: &CallRecord, candidate: &ExternalCandidate, window_secs: i64) -> Option<MatchScore> {
    let start = candidate.start_time?;
    if candidate.turns.is_empty() {
        return None;
    }

    let delta_secs = (call.created_at - start).num_seconds().abs();
    if delta_secs > window_secs {
        return None;
    }

    let phone_match = !call.counterparty_number.trim().is_empty()
        && candidate
            .phone_numbers
            .iter()
            .any(|number| phone::phones_match(number, &call.counterparty_number));

    let proximity = (MAX_PROXIMITY_SCORE - delta_secs).max(0);
    let phone_score = if phone_match { PHONE_MATCH_SCORE } else { 0 };
    Some(MatchScore {
        score: phone_score + proximity,
        delta_secs,
        phone_match,
    })
}

/// Best unclaimed candidate for a call, as an index into `candidates`
pub fn best_candidate(
    call: &CallRecord,
    candidates: &[ExternalCandidate],
    claimed: &HashSet<String>,
    window_secs: i64,
) -> Option<(usize, MatchScore)> {
    let mut best: Option<(usize, MatchScore)> = None;
    for (idx, candidate) in candidates.iter().enumerate() {
        if claimed.contains(&candidate.conversation_id) {
            continue;
        }
        let Some(scored) = score(call, candidate, window_secs) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((_, current)) => {
                scored.score > current.score || (scored.score == current.score && scored.delta_secs < current.delta_secs)
            }
        };
        if better {
            best = Some((idx, scored));
        }
    }
    best
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub session_id: String,
    pub candidate_index: usize,
    pub score: MatchScore,
}

/// Greedy assignment in call order
///
/// Calls should be ordered oldest first so earlier calls get first pick of
/// ambiguous candidates. A candidate is claimed by at most one call; ids in
/// `claimed` on entry are unavailable from the start.
pub fn assign(
    calls: &[CallRecord],
    candidates: &[ExternalCandidate],
    mut claimed: HashSet<String>,
    window_secs: i64,
) -> Vec<Assignment> {
    let mut assignments = Vec::new();
    for call in calls {
        if let Some((idx, score)) = best_candidate(call, candidates, &claimed, window_secs) {
            claimed.insert(candidates[idx].conversation_id.clone());
            assignments.push(Assignment {
                session_id: call.session_id.clone(),
                candidate_index: idx,
                score,
            });
        }
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::candidate::TranscriptTurn;
    use crate::database::{CallDirection, CallStatus};
    use chrono::{DateTime, Duration, Utc};

    fn call(sid: &str, counterparty: &str, created_at: DateTime<Utc>) -> CallRecord {
        CallRecord {
            session_id: sid.to_string(),
            direction: CallDirection::Inbound,
            counterparty_number: counterparty.to_string(),
            counterparty_canonical: phone::canonical(counterparty),
            internal_number: "+61290000000".to_string(),
            internal_canonical: "+61290000000".to_string(),
            status: CallStatus::Completed,
            duration_seconds: 60,
            recording_url: None,
            recording_sid: None,
            transcript: None,
            ai_summary: None,
            summary_is_placeholder: false,
            external_conversation_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn candidate(id: &str, phone: Option<&str>, start: DateTime<Utc>) -> ExternalCandidate {
        ExternalCandidate {
            conversation_id: id.to_string(),
            phone_numbers: phone.map(|p| vec![p.to_string()]).unwrap_or_default(),
            provider_call_sid: None,
            start_time: Some(start),
            turns: vec![TranscriptTurn {
                role: "user".to_string(),
                text: format!("transcript of {}", id),
            }],
            platform_summary: None,
        }
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_717_200_000, 0).unwrap()
    }

    #[test]
    fn test_phone_match_beats_closer_time() {
        let c = call("CA1", "0412345678", t0());
        let candidates = vec![
            candidate("no-phone", None, t0() + Duration::seconds(5)),
            candidate("phone", Some("+61412345678"), t0() + Duration::seconds(40)),
        ];
        let (idx, scored) = best_candidate(&c, &candidates, &HashSet::new(), 900).unwrap();
        assert_eq!(candidates[idx].conversation_id, "phone");
        assert_eq!(scored.score, 160);
        assert!(scored.phone_match);
    }

    #[test]
    fn test_outside_window_is_never_selected() {
        let c = call("CA1", "0412345678", t0());
        let perfect_but_late = candidate("late", Some("+61412345678"), t0() + Duration::seconds(901));
        assert!(score(&c, &perfect_but_late, 900).is_none());
        assert!(score(&c, &perfect_but_late, 1200).is_some());

        let early = candidate("early", Some("0412345678"), t0() - Duration::seconds(901));
        assert!(best_candidate(&c, &[early], &HashSet::new(), 900).is_none());
    }

    #[test]
    fn test_tie_goes_to_smaller_delta() {
        let c = call("CA1", "0412345678", t0());
        // both beyond the 100 s proximity range, so both score 100
        let candidates = vec![
            candidate("far", Some("0412345678"), t0() + Duration::seconds(600)),
            candidate("near", Some("0412345678"), t0() - Duration::seconds(300)),
        ];
        let (idx, scored) = best_candidate(&c, &candidates, &HashSet::new(), 900).unwrap();
        assert_eq!(scored.score, 100);
        assert_eq!(candidates[idx].conversation_id, "near");
    }

    #[test]
    fn test_candidate_without_transcript_or_start_is_ineligible() {
        let c = call("CA1", "0412345678", t0());
        let mut empty = candidate("empty", Some("0412345678"), t0());
        empty.turns.clear();
        assert!(score(&c, &empty, 900).is_none());

        let mut undated = candidate("undated", Some("0412345678"), t0());
        undated.start_time = None;
        assert!(score(&c, &undated, 900).is_none());
    }

    #[test]
    fn test_assignment_is_exclusive_and_oldest_first() {
        let calls = vec![
            call("older", "0412345678", t0()),
            call("newer", "0412345678", t0() + Duration::seconds(30)),
        ];
        let candidates = vec![candidate("only", Some("0412345678"), t0() + Duration::seconds(30))];

        let assignments = assign(&calls, &candidates, HashSet::new(), 1200);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].session_id, "older");
    }

    #[test]
    fn test_assignment_many_calls_many_candidates() {
        let calls: Vec<CallRecord> = (0..6)
            .map(|i| call(&format!("CA{}", i), "0412345678", t0() + Duration::seconds(i * 20)))
            .collect();
        let candidates: Vec<ExternalCandidate> = (0..4)
            .map(|i| candidate(&format!("conv{}", i), Some("+61412345678"), t0() + Duration::seconds(i * 25)))
            .collect();

        let assignments = assign(&calls, &candidates, HashSet::new(), 1200);
        let mut used: Vec<usize> = assignments.iter().map(|a| a.candidate_index).collect();
        let before = used.len();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used.len(), before);
        assert_eq!(assignments.len(), 4);
    }

    #[test]
    fn test_previously_claimed_candidates_are_skipped() {
        let c = call("CA1", "0412345678", t0());
        let candidates = vec![candidate("taken", Some("0412345678"), t0())];
        let claimed: HashSet<String> = ["taken".to_string()].into_iter().collect();
        assert!(assign(&[c], &candidates, claimed, 900).is_empty());
    }
}
