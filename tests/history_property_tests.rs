use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use tempfile::TempDir;
use upkeep::history::{HistoryStore, TransactionRecord};
use upkeep::BackendKind;

fn backend() -> impl Strategy<Value = BackendKind> {
    prop::sample::select(BackendKind::ALL.to_vec())
}

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_000_000_000, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

fn record() -> impl Strategy<Value = TransactionRecord> {
    (
        timestamp(),
        "[A-Za-z0-9.:-]{1,24}",
        backend(),
        any::<String>(),
        any::<String>(),
        any::<String>(),
    )
        .prop_map(|(ts, batch, backend, unit, before, after)| {
            TransactionRecord::update(ts, batch, backend, unit, before, after)
        })
}

proptest! {
    #[test]
    fn encode_then_parse_is_identity(record in record()) {
        let line = record.encode();
        prop_assert!(!line.contains('\n'));
        prop_assert_eq!(TransactionRecord::parse(&line).unwrap(), record);
    }

    #[test]
    fn scan_reverse_mirrors_append_order(
        specs in prop::collection::vec((0usize..3, "[a-z]{1,12}"), 0..40),
    ) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("transactions.log");
        let store = HistoryStore::open(&path);
        let batches = ["B1", "B2", "B3"];

        let mut appended = Vec::new();
        for (i, (batch, unit)) in specs.iter().enumerate() {
            let record = TransactionRecord::update(
                Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
                batches[*batch],
                BackendKind::Apt,
                unit.as_str(),
                "1.0",
                "1.1",
            );
            store.append(&record).unwrap();
            appended.push(record);
        }

        let scanned: Vec<TransactionRecord> = store
            .scan_reverse(None)
            .unwrap()
            .map(|entry| entry.unwrap())
            .collect();
        let mut expected = appended.clone();
        expected.reverse();
        prop_assert_eq!(&scanned, &expected);

        // The filter selects exactly one batch and keeps reverse order.
        for batch in batches {
            let filtered: Vec<TransactionRecord> = store
                .scan_reverse(Some(batch))
                .unwrap()
                .map(|entry| entry.unwrap())
                .collect();
            let expected: Vec<TransactionRecord> = expected
                .iter()
                .filter(|record| record.batch_id == batch)
                .cloned()
                .collect();
            prop_assert_eq!(filtered, expected);
        }
    }
}
