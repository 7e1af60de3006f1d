//! Episode records, persistence, and the JSONL log format.

pub mod log;
mod record;
mod store;

pub use record::{EpisodeRecord, StepRecord};
pub use store::{EpisodeStore, FileStore, InMemoryStore, StoreError};

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::ledger::EpisodeLedger;
    use crate::testing;
    use crate::vocabulary::{FsmState, LayerId, TemplateId};

    use super::*;

    fn make_record(correlation_id: &str) -> EpisodeRecord {
        let envelope = testing::EnvelopeBuilder::new().build();
        let mut ledger = EpisodeLedger::create(correlation_id, &envelope.budgets, FsmState::S0Idle);
        let observation = testing::observation(correlation_id, testing::t0());
        ledger.apply(&observation).unwrap();

        EpisodeRecord {
            correlation_id: correlation_id.to_string(),
            template_id: TemplateId::A,
            campaign_id: None,
            success: true,
            final_state: FsmState::S1Sense,
            failed_step: None,
            steps: vec![StepRecord {
                step_id: "sense".to_string(),
                sequence: 0,
                owner_layer: LayerId::TaskProsecution,
                success: true,
                error: None,
                packets_admitted: vec![observation.header.packet_id.clone()],
                state_after: FsmState::S1Sense,
            }],
            packets: vec![observation],
            snapshot: ledger.snapshot(),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_store_round_trip() {
        let mut store = InMemoryStore::new();
        let record = make_record("corr_store");

        store.save(&record).unwrap();
        assert!(store.exists("corr_store").unwrap());
        assert_eq!(store.load("corr_store").unwrap().unwrap(), record);
        assert_eq!(store.list().unwrap(), vec!["corr_store".to_string()]);

        assert!(store.delete("corr_store").unwrap());
        assert!(!store.delete("corr_store").unwrap());
        assert!(store.load("corr_store").unwrap().is_none());
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        let record = make_record("corr_file");

        store.save(&record).unwrap();
        assert!(store.exists("corr_file").unwrap());
        assert_eq!(store.load("corr_file").unwrap().unwrap(), record);
        assert_eq!(store.list().unwrap(), vec!["corr_file".to_string()]);

        assert!(store.delete("corr_file").unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.load("corr_missing").unwrap().is_none());
        assert!(!store.exists("corr_missing").unwrap());
    }

    #[test]
    fn test_file_store_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("corr_bad.json"), "not json").unwrap();
        assert!(matches!(
            store.load("corr_bad"),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
