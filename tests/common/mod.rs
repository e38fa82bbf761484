#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ugnos_blocks::encoding::crc32;
use ugnos_blocks::metric_block::FOOTER_LEN;
use ugnos_blocks::{
    AggregateBlock, AggregatorContext, BlockHandle, FamilyTime, FieldAggregate, FieldId,
    FieldMeta, FieldType, FixedOffsetIndex, MemTable, MetricBlockWriter, SeriesId,
    StorageQueryFlow, TagValueBlockWriter, TimeSlot,
};

pub const ZONE_KEY: u32 = 20;
pub const IP_KEY: u32 = 21;
pub const HOST_KEY: u32 = 22;
pub const MISSING_KEY: u32 = 19;

pub const ZONES: &[(u32, &str)] = &[(1, "nj"), (2, "sh"), (3, "bj")];

pub const IPS: &[(u32, &str)] = &[
    (1, "192.168.1.1"),
    (2, "192.168.1.2"),
    (3, "192.168.1.3"),
    (4, "192.168.2.4"),
    (5, "192.168.2.5"),
    (6, "192.168.2.6"),
    (7, "192.168.3.7"),
    (8, "192.168.3.8"),
    (9, "192.168.3.9"),
];

pub const HOSTS: &[(u32, &str)] = &[
    (1, "eleme-dev-nj-1"),
    (2, "eleme-dev-nj-2"),
    (3, "eleme-dev-nj-3"),
    (4, "eleme-dev-sh-4"),
    (5, "eleme-dev-sh-5"),
    (6, "eleme-dev-sh-6"),
    (7, "eleme-dev-bj-7"),
    (8, "eleme-dev-bj-8"),
    (9, "eleme-dev-bj-9"),
];

pub fn tag_block(mapping: &[(u32, &str)]) -> Vec<u8> {
    let mut w = TagValueBlockWriter::new();
    for (id, value) in mapping {
        w.add(value, *id);
    }
    w.finish().expect("tag block encodes")
}

/// zone (20), ip (21) and host (22) blocks; 19 is absent.
pub fn tag_table() -> MemTable {
    MemTable::new()
        .with_block(ZONE_KEY, tag_block(ZONES))
        .with_block(IP_KEY, tag_block(IPS))
        .with_block(HOST_KEY, tag_block(HOSTS))
}

/// Sink collecting every appended point; asks to stop once `cap` points arrived.
#[derive(Debug, Default)]
pub struct CollectBlock {
    pub points: Vec<(TimeSlot, f64)>,
    pub cap: Option<usize>,
}

impl AggregateBlock for CollectBlock {
    fn append(&mut self, slot: TimeSlot, value: f64) -> bool {
        self.points.push((slot, value));
        self.cap.map_or(false, |c| self.points.len() >= c)
    }
}

pub type Sink = Arc<Mutex<CollectBlock>>;

pub fn sink() -> Sink {
    Arc::new(Mutex::new(CollectBlock::default()))
}

pub fn capped_sink(cap: usize) -> Sink {
    Arc::new(Mutex::new(CollectBlock {
        points: Vec::new(),
        cap: Some(cap),
    }))
}

pub fn points(s: &Sink) -> Vec<(TimeSlot, f64)> {
    s.lock().unwrap().points.clone()
}

/// Hands out its sink only for `family_time` (or any family time when unset).
pub struct TestFieldAggregate {
    pub sink: Option<Sink>,
    pub family_time: Option<FamilyTime>,
}

impl FieldAggregate for TestFieldAggregate {
    fn aggregate_block(&self, family_time: FamilyTime) -> Option<BlockHandle> {
        if self.family_time.map_or(false, |ft| ft != family_time) {
            return None;
        }
        self.sink.clone().map(|s| s as BlockHandle)
    }
}

pub struct TestContext {
    pub aggregates: Vec<Arc<dyn FieldAggregate>>,
}

impl AggregatorContext for TestContext {
    fn field_aggregates(&self) -> &[Arc<dyn FieldAggregate>] {
        &self.aggregates
    }
}

/// Same context for every high key.
pub struct TestFlow {
    pub ctx: Arc<TestContext>,
}

impl StorageQueryFlow for TestFlow {
    fn aggregator(&self, _high_key: u16) -> Arc<dyn AggregatorContext> {
        self.ctx.clone()
    }
}

/// Flow with one sink per entry of `sinks`, in requested-field order.
pub fn flow(sinks: &[Option<Sink>]) -> TestFlow {
    TestFlow {
        ctx: Arc::new(TestContext {
            aggregates: sinks
                .iter()
                .map(|s| {
                    Arc::new(TestFieldAggregate {
                        sink: s.clone(),
                        family_time: None,
                    }) as Arc<dyn FieldAggregate>
                })
                .collect(),
        }),
    }
}

pub fn fields(defs: &[(u8, FieldType)]) -> Vec<FieldMeta> {
    defs.iter()
        .map(|&(id, t)| FieldMeta::new(FieldId(id), t))
        .collect()
}

/// Deterministic points for (series, field): every third slot is empty.
pub fn series_points(
    series: SeriesId,
    field: usize,
    start: TimeSlot,
    end: TimeSlot,
) -> Vec<(TimeSlot, f64)> {
    (start..=end)
        .filter(|s| (*s as u32 + series + field as u32) % 3 != 0)
        .map(|s| (s, series as f64 * 100.0 + field as f64 + s as f64 * 0.25))
        .collect()
}

/// Encodes a block holding `series` with `fields`, values from [`series_points`].
pub fn metric_block(
    start: TimeSlot,
    end: TimeSlot,
    metas: Vec<FieldMeta>,
    series: &[SeriesId],
) -> Vec<u8> {
    let field_count = metas.len();
    let mut w = MetricBlockWriter::new(start, end, metas).expect("writer");
    for &id in series {
        let values: Vec<Vec<(TimeSlot, f64)>> = (0..field_count)
            .map(|f| series_points(id, f, start, end))
            .collect();
        w.add_series(id, &values).expect("series appends");
    }
    w.finish().expect("block encodes")
}

/// Rewrites the entry count of the `container`-th series offset index and recomputes the
/// checksum, leaving the stored series ids untouched.
pub fn set_container_offset_count(block: &mut [u8], container: usize, count: u32) {
    let footer = block.len() - FOOTER_LEN;
    let high = u32::from_le_bytes(block[footer + 12..footer + 16].try_into().unwrap()) as usize;
    let pos = FixedOffsetIndex::decode(&block[high..footer])
        .unwrap()
        .get(container)
        .unwrap();
    block[pos + 1..pos + 5].copy_from_slice(&count.to_le_bytes());
    let body = block.len() - 4;
    let sum = crc32(&block[..body]);
    block[body..].copy_from_slice(&sum.to_le_bytes());
}
