mod common;

use std::sync::{Arc, Mutex};

use common::*;
use ugnos_blocks::{
    DbError, DbEvent, DbEventListener, EntrySetFactory, MemTable, ReaderConfig, SeriesIdSet,
    TableReader, TagValueEntries, TagValuePredicate, TagValueReader,
};

fn reader() -> TagValueReader {
    TagValueReader::new(vec![Arc::new(tag_table()) as Arc<dyn TableReader>])
}

fn ids(set: &SeriesIdSet) -> Vec<u32> {
    set.iter().collect()
}

/// Entry set whose trie never decodes.
struct BrokenEntries {
    ids: SeriesIdSet,
}

impl TagValueEntries for BrokenEntries {
    fn trie(&self) -> Result<&ugnos_blocks::trie::Trie, DbError> {
        Err(DbError::corruption("err"))
    }

    fn all_value_ids(&self) -> &SeriesIdSet {
        &self.ids
    }
}

#[derive(Debug)]
struct BrokenFactory;

impl EntrySetFactory for BrokenFactory {
    fn create<'a>(&self, _block: &'a [u8]) -> Result<Box<dyn TagValueEntries + 'a>, DbError> {
        Ok(Box::new(BrokenEntries {
            ids: SeriesIdSet::new(),
        }))
    }
}

#[derive(Debug, Default)]
struct RecordingListener {
    events: Mutex<Vec<DbEvent>>,
}

impl DbEventListener for RecordingListener {
    fn on_event(&self, event: DbEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[test]
fn all_value_ids_for_present_and_absent_keys() {
    let r = reader();
    assert!(r.get_all_value_ids(MISSING_KEY).unwrap_err().is_not_found());
    assert_eq!(ids(&r.get_all_value_ids(ZONE_KEY).unwrap()), vec![1, 2, 3]);
    assert_eq!(ids(&r.get_all_value_ids(HOST_KEY).unwrap()).len(), 9);
}

#[test]
fn empty_block_is_an_empty_set_not_an_error() {
    let table = MemTable::new().with_block(7, tag_block(&[]));
    let r = TagValueReader::new(vec![Arc::new(table) as Arc<dyn TableReader>]);
    assert!(r.get_all_value_ids(7).unwrap().is_empty());
    assert!(r
        .find_value_ids(7, &TagValuePredicate::equals("x"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn find_on_missing_key_fails() {
    let err = reader()
        .find_value_ids(MISSING_KEY, &TagValuePredicate::equals("nj"))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn malformed_predicate_fails() {
    let err = reader()
        .find_value_ids(ZONE_KEY, &TagValuePredicate::In(vec![]))
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidPredicate(_)));
}

#[test]
fn equals_predicate() {
    let r = reader();
    let set = r
        .find_value_ids(HOST_KEY, &TagValuePredicate::equals("eleme-dev-sh-4"))
        .unwrap();
    assert_eq!(ids(&set), vec![4]);
    assert!(r
        .find_value_ids(HOST_KEY, &TagValuePredicate::equals("eleme-dev-sh-41"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn in_predicate() {
    let r = reader();
    let set = r
        .find_value_ids(
            HOST_KEY,
            &TagValuePredicate::in_values(["eleme-dev-sh-4", "eleme-dev-sh-5", "eleme-dev-sh-55"]),
        )
        .unwrap();
    assert_eq!(ids(&set), vec![4, 5]);
    assert!(r
        .find_value_ids(HOST_KEY, &TagValuePredicate::in_values(["eleme-dev-sh-55"]))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn like_predicate() {
    let r = reader();
    let set = r
        .find_value_ids(HOST_KEY, &TagValuePredicate::like("eleme-dev-sh-"))
        .unwrap();
    assert_eq!(ids(&set), vec![4, 5, 6]);

    let set = r
        .find_value_ids(HOST_KEY, &TagValuePredicate::like("eleme-*-bj-*"))
        .unwrap();
    assert_eq!(ids(&set), vec![7, 8, 9]);

    assert!(r
        .find_value_ids(HOST_KEY, &TagValuePredicate::like("eleme-dev-sh---"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn regex_predicate() {
    let r = reader();
    let set = r
        .find_value_ids(HOST_KEY, &TagValuePredicate::regex("eleme-dev-sh-"))
        .unwrap();
    assert_eq!(ids(&set), vec![4, 5, 6]);

    let set = r
        .find_value_ids(HOST_KEY, &TagValuePredicate::regex("-(nj|bj)-[179]$"))
        .unwrap();
    assert_eq!(ids(&set), vec![1, 7, 9]);

    assert!(r
        .find_value_ids(HOST_KEY, &TagValuePredicate::regex("eleme-prod-sh-"))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn trie_failure_is_an_error_for_find() {
    let r = reader().with_factory(Arc::new(BrokenFactory));
    let err = r
        .find_value_ids(HOST_KEY, &TagValuePredicate::equals("eleme-dev-sh-4"))
        .unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn corrupted_block_is_an_error_for_find_and_all_ids() {
    let table = MemTable::new().with_block(18, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
    let r = TagValueReader::new(vec![Arc::new(table) as Arc<dyn TableReader>]);
    assert!(r.get_all_value_ids(18).unwrap_err().is_corruption());
    assert!(r
        .find_value_ids(18, &TagValuePredicate::like("a"))
        .unwrap_err()
        .is_corruption());
}

#[test]
fn suggest_values() {
    let r = reader();
    assert!(r.suggest_values(MISSING_KEY, "", 10_000_000).is_empty());
    assert_eq!(r.suggest_values(IP_KEY, "192", 1000).len(), 9);
    assert_eq!(
        r.suggest_values(IP_KEY, "192", 3),
        vec!["192.168.1.1", "192.168.1.2", "192.168.1.3"]
    );
    assert_eq!(r.suggest_values(ZONE_KEY, "", 10), vec!["bj", "nj", "sh"]);
    assert!(r.suggest_values(IP_KEY, "10.", 10).is_empty());
    assert!(r.suggest_values(IP_KEY, "192", 0).is_empty());
}

#[test]
fn suggest_skips_undecodable_sources() {
    let listener = Arc::new(RecordingListener::default());
    let table = MemTable::new().with_block(18, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 0]);
    let r = TagValueReader::with_config(
        vec![Arc::new(table) as Arc<dyn TableReader>],
        ReaderConfig::default().with_event_listener(listener.clone()),
    )
    .unwrap();
    assert!(r.suggest_values(18, "", 10_000_000).is_empty());

    let events = listener.events.lock().unwrap();
    assert!(matches!(
        events.as_slice(),
        [DbEvent::TagEntryDecodeSkipped { tag_key_id: 18, .. }]
    ));

    let broken = reader().with_factory(Arc::new(BrokenFactory));
    assert!(broken.suggest_values(IP_KEY, "192", 1000).is_empty());
}

#[test]
fn walk_values() {
    let r = reader();
    r.walk_values(MISSING_KEY, "", |_, _| panic!("tag key does not exist"));

    let mut seen = Vec::new();
    r.walk_values(IP_KEY, "192", |value, id| {
        seen.push((String::from_utf8(value.to_vec()).unwrap(), id));
        true
    });
    assert_eq!(seen.len(), 9);
    assert_eq!(seen[0], ("192.168.1.1".to_string(), 1));
    assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));

    let mut count = 0;
    r.walk_values(IP_KEY, "192", |_, _| {
        count += 1;
        count != 3
    });
    assert_eq!(count, 3);
}

#[test]
fn walk_skips_undecodable_sources() {
    let r = reader().with_factory(Arc::new(BrokenFactory));
    let mut count = 0;
    r.walk_values(IP_KEY, "192", |_, _| {
        count += 1;
        true
    });
    assert_eq!(count, 0);
}

#[test]
fn sources_are_unioned_across_generations() {
    let old = MemTable::new().with_block(HOST_KEY, tag_block(&HOSTS[..5]));
    let new = MemTable::new().with_block(HOST_KEY, tag_block(&HOSTS[3..]));
    let empty = MemTable::new();
    let sources: Vec<Arc<dyn TableReader>> =
        vec![Arc::new(old), Arc::new(empty), Arc::new(new)];

    // threshold 1 exercises the rayon path, the default the sequential one
    let parallel = TagValueReader::with_config(
        sources.clone(),
        ReaderConfig {
            parallel_source_threshold: 1,
            ..ReaderConfig::default()
        },
    )
    .unwrap();
    let sequential = TagValueReader::new(sources);

    for r in [&parallel, &sequential] {
        assert_eq!(ids(&r.get_all_value_ids(HOST_KEY).unwrap()).len(), 9);
        let set = r
            .find_value_ids(HOST_KEY, &TagValuePredicate::like("eleme-dev-sh"))
            .unwrap();
        assert_eq!(ids(&set), vec![4, 5, 6]);
        // overlapping values appear once
        let suggested = r.suggest_values(HOST_KEY, "eleme-dev-sh", 100);
        assert_eq!(
            suggested,
            vec!["eleme-dev-sh-4", "eleme-dev-sh-5", "eleme-dev-sh-6"]
        );
    }
}

#[test]
fn invalid_config_is_rejected() {
    let err = TagValueReader::with_config(
        vec![],
        ReaderConfig {
            max_regex_pattern_len: 0,
            ..ReaderConfig::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, DbError::ConfigError(_)));
}
