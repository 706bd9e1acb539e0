//! Per-revision access log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RevisionId;
use crate::collab::UserId;

/// One recorded access (download, view) of a revision.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AccessEntry {
    pub revision_id: RevisionId,
    pub actor: Option<UserId>,
    pub at: DateTime<Utc>,
}

/// Accesses of one actor, aggregated.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessSummary {
    pub actor: Option<UserId>,
    pub count: usize,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

/// Group entries by actor, ordered by first access.
pub fn summarize<'a, I>(entries: I) -> Vec<AccessSummary>
where
    I: IntoIterator<Item = &'a AccessEntry>,
{
    let mut summaries: Vec<AccessSummary> = Vec::new();
    for entry in entries {
        match summaries.iter_mut().find(|s| s.actor == entry.actor) {
            Some(summary) => {
                summary.count += 1;
                summary.first_at = summary.first_at.min(entry.at);
                summary.last_at = summary.last_at.max(entry.at);
            }
            None => summaries.push(AccessSummary {
                actor: entry.actor,
                count: 1,
                first_at: entry.at,
                last_at: entry.at,
            }),
        }
    }
    summaries.sort_by_key(|s| s.first_at);
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[test]
    fn test_summarize_groups_by_actor() {
        let alice = Some(Uuid::new_v4());
        let bob = Some(Uuid::new_v4());
        let t0 = Utc::now();
        let entry = |actor, minutes| AccessEntry {
            revision_id: RevisionId(1),
            actor,
            at: t0 + Duration::minutes(minutes),
        };
        let entries = vec![entry(bob, 5), entry(alice, 1), entry(bob, 2), entry(alice, 9), entry(None, 3)];

        let summaries = summarize(&entries);
        assert_eq!(summaries.len(), 3);

        assert_eq!(summaries[0].actor, alice);
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].first_at, t0 + Duration::minutes(1));
        assert_eq!(summaries[0].last_at, t0 + Duration::minutes(9));

        assert_eq!(summaries[1].actor, bob);
        assert_eq!(summaries[1].first_at, t0 + Duration::minutes(2));
        assert_eq!(summaries[2].actor, None);
    }
}
