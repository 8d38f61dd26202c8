use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::*;

/// Order entries contending for one date, first come first served.
/// Priority 1 goes to the oldest request; identical timestamps fall back to id.
pub fn rank<'a>(contenders: impl IntoIterator<Item = &'a WaitingListEntry>) -> Vec<Contender> {
    let mut sorted: Vec<&WaitingListEntry> = contenders.into_iter().collect();
    sorted.sort_by_key(|e| e.priority_key());
    sorted.dedup_by_key(|e| e.id);
    sorted
        .into_iter()
        .zip(1u32..)
        .map(|(entry, priority)| Contender {
            entry: entry.clone(),
            priority,
        })
        .collect()
}

/// Fold `(date, entry)` pairs into per-date groups and keep the dates that
/// more than one entry wants. Output is ascending by date.
pub fn group_conflicts<'a>(
    pairs: impl IntoIterator<Item = (NaiveDate, &'a WaitingListEntry)>,
) -> Vec<DateConflict> {
    let by_date = pairs.into_iter().fold(
        BTreeMap::<NaiveDate, Vec<&WaitingListEntry>>::new(),
        |mut acc, (date, entry)| {
            acc.entry(date).or_default().push(entry);
            acc
        },
    );

    by_date
        .into_iter()
        .filter(|(_, entries)| entries.len() > 1)
        .map(|(date, entries)| DateConflict {
            date,
            contenders: rank(entries),
        })
        .filter(|conflict| conflict.contenders.len() > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use ulid::Ulid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry_created_on(day: u32) -> WaitingListEntry {
        WaitingListEntry {
            id: Ulid::new(),
            site_id: Ulid::nil(),
            client_id: Ulid::new(),
            rule: Rule::SpecificDates(BTreeSet::from([date(2025, 3, 15)])),
            expiration_date: date(2025, 12, 31).and_hms_opt(0, 0, 0).unwrap().and_utc(),
            status: EntryStatus::Pending,
            linked_event_id: None,
            notes: None,
            created_at: date(2025, 1, day).and_hms_opt(12, 0, 0).unwrap().and_utc(),
        }
    }

    #[test]
    fn oldest_request_ranks_first() {
        let a = entry_created_on(1);
        let b = entry_created_on(2);
        let c = entry_created_on(3);
        let ranked = rank([&c, &a, &b]);
        let order: Vec<_> = ranked.iter().map(|r| (r.entry.id, r.priority)).collect();
        assert_eq!(order, vec![(a.id, 1), (b.id, 2), (c.id, 3)]);
    }

    #[test]
    fn timestamp_ties_broken_by_id() {
        let mut a = entry_created_on(1);
        let mut b = entry_created_on(1);
        a.id = Ulid::from_parts(1, 2);
        b.id = Ulid::from_parts(1, 1);
        let ranked = rank([&a, &b]);
        assert_eq!(ranked[0].entry.id, b.id);
        assert_eq!(ranked[1].entry.id, a.id);

        // input order does not matter
        let reversed = rank([&b, &a]);
        assert_eq!(reversed, ranked);
    }

    #[test]
    fn single_contender_is_not_a_conflict() {
        let a = entry_created_on(1);
        let b = entry_created_on(2);
        let conflicts = group_conflicts([
            (date(2025, 3, 15), &a),
            (date(2025, 3, 16), &b),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn conflicts_grouped_and_sorted_by_date() {
        let a = entry_created_on(1);
        let b = entry_created_on(2);
        let c = entry_created_on(3);
        let conflicts = group_conflicts([
            (date(2025, 3, 20), &c),
            (date(2025, 3, 15), &b),
            (date(2025, 3, 20), &a),
            (date(2025, 3, 15), &a),
            (date(2025, 3, 17), &c),
        ]);
        assert_eq!(conflicts.len(), 2);

        assert_eq!(conflicts[0].date, date(2025, 3, 15));
        assert_eq!(conflicts[0].contenders[0].entry.id, a.id);
        assert_eq!(conflicts[0].contenders[1].entry.id, b.id);

        assert_eq!(conflicts[1].date, date(2025, 3, 20));
        assert_eq!(conflicts[1].contenders[0].entry.id, a.id);
        assert_eq!(conflicts[1].contenders[0].priority, 1);
        assert_eq!(conflicts[1].contenders[1].entry.id, c.id);
        assert_eq!(conflicts[1].contenders[1].priority, 2);
    }

    #[test]
    fn duplicate_pairs_do_not_fake_a_conflict() {
        let a = entry_created_on(1);
        let conflicts = group_conflicts([(date(2025, 3, 15), &a), (date(2025, 3, 15), &a)]);
        assert!(conflicts.is_empty());
    }
}
