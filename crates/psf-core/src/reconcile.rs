//! Incremental-ingestion reconciliation.
//!
//! Decides which rootnames found on disk still have to be ingested and are
//! out of their proprietary period.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::error::{PsfError, Result};
use crate::models::ql_root;
use crate::time_utils::is_public;

// ── ObservationTimes ──────────────────────────────────────────────────────────

/// Remote metadata inventory: observation times keyed by QL root.
///
/// Returning an `Err` means the store itself could not be queried, which
/// aborts the reconciliation. Zero or several times for one root is a
/// per-candidate failure handled by the caller.
pub trait ObservationTimes {
    fn observation_times(&self, ql_root: &str) -> Result<Vec<NaiveDateTime>>;
}

impl ObservationTimes for HashMap<String, Vec<NaiveDateTime>> {
    fn observation_times(&self, ql_root: &str) -> Result<Vec<NaiveDateTime>> {
        Ok(self.get(ql_root).cloned().unwrap_or_default())
    }
}

impl ObservationTimes for [(String, NaiveDateTime)] {
    fn observation_times(&self, ql_root: &str) -> Result<Vec<NaiveDateTime>> {
        Ok(self
            .iter()
            .filter(|(id, _)| id == ql_root)
            .map(|(_, t)| *t)
            .collect())
    }
}

impl ObservationTimes for Vec<(String, NaiveDateTime)> {
    fn observation_times(&self, ql_root: &str) -> Result<Vec<NaiveDateTime>> {
        self.as_slice().observation_times(ql_root)
    }
}

// ── Policy & result ───────────────────────────────────────────────────────────

/// How locally discovered rootnames are narrowed to candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Exclude rootnames that already have rows in the PSF database.
    ///
    /// Off by default: every discovered rootname is a candidate and
    /// duplicate rows are rejected at insertion time instead.
    // TODO: enable by default once the exclusion path has been checked
    // against a full re-ingest of one filter.
    pub skip_existing: bool,
}

/// Outcome of [`find_new_eligible_records`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Number of candidates after the set difference.
    pub candidates: usize,
    /// Public candidates, in discovery order.
    pub eligible: Vec<String>,
    /// Candidates still inside the proprietary period.
    pub proprietary: Vec<String>,
    /// Candidates dropped because their metadata lookup failed.
    pub failed: Vec<(String, String)>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Narrow the local inventory to candidates, first discovery wins.
pub fn select_candidates(
    local: &[String],
    ingested: &HashSet<String>,
    policy: ReconcilePolicy,
) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    local
        .iter()
        .filter(|root| seen.insert(root.as_str()))
        .filter(|root| !(policy.skip_existing && ingested.contains(root.as_str())))
        .cloned()
        .collect()
}

/// Find the locally discovered rootnames that are new and public at `now`.
///
/// Each candidate must map to exactly one observation time in `remote`;
/// otherwise it is dropped with a warning and the batch continues. An
/// observation is public when it predates `now` minus one calendar year.
pub fn find_new_eligible_records<R: ObservationTimes + ?Sized>(
    local: &[String],
    ingested: &HashSet<String>,
    remote: &R,
    now: NaiveDateTime,
    policy: ReconcilePolicy,
) -> Result<Reconciliation> {
    let candidates = select_candidates(local, ingested, policy);
    info!(
        "{} candidate rootnames ({} discovered, skip_existing = {})",
        candidates.len(),
        local.len(),
        policy.skip_existing
    );

    let mut outcome = Reconciliation {
        candidates: candidates.len(),
        ..Default::default()
    };

    for rootname in candidates {
        let observed = match single_observation_time(remote, &rootname) {
            Ok(t) => t,
            Err(err) if err.is_per_item() => {
                warn!(rootname = %rootname, error = %err, "dropping candidate");
                outcome.failed.push((rootname, err.to_string()));
                continue;
            }
            Err(err) => return Err(err),
        };

        if is_public(observed, now) {
            outcome.eligible.push(rootname);
        } else {
            debug!(rootname = %rootname, %observed, "still proprietary");
            outcome.proprietary.push(rootname);
        }
    }

    info!(
        "{} non-proprietary rootnames to ingest ({} proprietary, {} lookup failures)",
        outcome.eligible.len(),
        outcome.proprietary.len(),
        outcome.failed.len()
    );
    Ok(outcome)
}

fn single_observation_time<R: ObservationTimes + ?Sized>(
    remote: &R,
    rootname: &str,
) -> Result<NaiveDateTime> {
    let root = ql_root(rootname);
    let times = remote.observation_times(root)?;
    match times.as_slice() {
        [only] => Ok(*only),
        _ => Err(PsfError::MetadataLookup {
            ql_root: root.to_string(),
            matches: times.len(),
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn remote(entries: &[(&str, NaiveDateTime)]) -> Vec<(String, NaiveDateTime)> {
        entries.iter().map(|(id, t)| (id.to_string(), *t)).collect()
    }

    /// A store whose every query fails.
    struct Unreachable;

    impl ObservationTimes for Unreachable {
        fn observation_times(&self, _ql_root: &str) -> Result<Vec<NaiveDateTime>> {
            Err(PsfError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "ql down",
            )))
        }
    }

    // ── eligibility ───────────────────────────────────────────────────────────

    #[test]
    fn test_embargo_example() {
        let n = now();
        let inventory = remote(&[
            ("A", n - TimeDelta::days(400)),
            ("B", n - TimeDelta::days(10)),
            ("C", n - TimeDelta::days(370)),
        ]);
        let out = find_new_eligible_records(
            &ids(&["A", "B", "C"]),
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        assert_eq!(out.eligible, ids(&["A", "C"]));
        assert_eq!(out.proprietary, ids(&["B"]));
        assert_eq!(out.candidates, 3);
    }

    #[test]
    fn test_discovery_order_preserved() {
        let n = now();
        let old = n - TimeDelta::days(800);
        let inventory = remote(&[("z", old), ("a", old), ("m", old)]);
        let out = find_new_eligible_records(
            &ids(&["z", "a", "m"]),
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        assert_eq!(out.eligible, ids(&["z", "a", "m"]));
    }

    #[test]
    fn test_boundary_instant_and_one_second_around() {
        let n = now();
        let boundary = NaiveDate::from_ymd_opt(2022, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let inventory = remote(&[
            ("EXACT", boundary),
            ("OLDER", boundary - TimeDelta::seconds(1)),
            ("NEWER", boundary + TimeDelta::seconds(1)),
        ]);
        let out = find_new_eligible_records(
            &ids(&["EXACT", "OLDER", "NEWER"]),
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        assert_eq!(out.eligible, ids(&["OLDER"]));
        assert_eq!(out.proprietary, ids(&["EXACT", "NEWER"]));
    }

    #[test]
    fn test_rootname_suffix_is_stripped_for_lookup() {
        let n = now();
        let inventory = remote(&[("ibcf01ab", n - TimeDelta::days(1000))]);
        let out = find_new_eligible_records(
            &ids(&["ibcf01abq"]),
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        assert_eq!(out.eligible, ids(&["ibcf01abq"]));
    }

    // ── lookup failures ───────────────────────────────────────────────────────

    #[test]
    fn test_missing_and_ambiguous_metadata_are_dropped() {
        let n = now();
        let old = n - TimeDelta::days(500);
        let inventory = remote(&[("A", old), ("DUP", old), ("DUP", old)]);
        let out = find_new_eligible_records(
            &ids(&["MISSING", "DUP", "A"]),
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        assert_eq!(out.eligible, ids(&["A"]));
        assert_eq!(out.failed.len(), 2);
        assert_eq!(out.failed[0].0, "MISSING");
        assert!(out.failed[0].1.contains("found 0"));
        assert_eq!(out.failed[1].0, "DUP");
        assert!(out.failed[1].1.contains("found 2"));
    }

    #[test]
    fn test_unreachable_store_is_fatal() {
        let result = find_new_eligible_records(
            &ids(&["A"]),
            &HashSet::new(),
            &Unreachable,
            now(),
            ReconcilePolicy::default(),
        );
        assert!(matches!(result, Err(PsfError::Io(_))));
    }

    // ── set difference ────────────────────────────────────────────────────────

    #[test]
    fn test_pass_through_keeps_ingested() {
        let ingested: HashSet<String> = ["A".to_string()].into_iter().collect();
        let c = select_candidates(&ids(&["A", "B"]), &ingested, ReconcilePolicy::default());
        assert_eq!(c, ids(&["A", "B"]));
    }

    #[test]
    fn test_skip_existing_excludes_ingested() {
        let ingested: HashSet<String> = ["A".to_string()].into_iter().collect();
        let policy = ReconcilePolicy {
            skip_existing: true,
        };
        let c = select_candidates(&ids(&["A", "B"]), &ingested, policy);
        assert_eq!(c, ids(&["B"]));
    }

    #[test]
    fn test_local_duplicates_collapse() {
        let c = select_candidates(
            &ids(&["B", "A", "B"]),
            &HashSet::new(),
            ReconcilePolicy::default(),
        );
        assert_eq!(c, ids(&["B", "A"]));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let n = now();
        let mut inventory: HashMap<String, Vec<NaiveDateTime>> = HashMap::new();
        inventory.insert("A".into(), vec![n - TimeDelta::days(400)]);
        inventory.insert("B".into(), vec![n - TimeDelta::days(10)]);
        let local = ids(&["A", "B"]);
        let first = find_new_eligible_records(
            &local,
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        let second = find_new_eligible_records(
            &local,
            &HashSet::new(),
            &inventory,
            n,
            ReconcilePolicy::default(),
        )
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.eligible, ids(&["A"]));
    }
}
