use fatc_chain::{
    BlockNumber, CacheConfig, ChainPosition, ClusterNumber, ErrorReporter, FatEntry, FatError,
    FatFile, FatKind, FatVolume, FileAttrs, FileCluster, Geometry, InodeNumber, MemFatTable,
    ReporterConfig, Run, TracingReporter,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct RecordingReporter {
    messages: Mutex<Vec<(bool, u64, String)>>,
}

impl RecordingReporter {
    fn messages(&self) -> Vec<(bool, u64, String)> {
        self.messages.lock().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn fs_error(&self, i_pos: u64, message: &str) {
        self.messages.lock().push((false, i_pos, message.to_owned()));
    }

    fn fs_error_ratelimit(&self, i_pos: u64, message: &str) {
        self.messages.lock().push((true, i_pos, message.to_owned()));
    }
}

const I_POS: u64 = 0x2_0040;

fn geometry() -> Geometry {
    Geometry {
        kind: FatKind::Fat32,
        block_size: 512,
        sec_per_clus: 8,
        data_start: 2048,
        dir_start: 0,
        dir_entries: 0,
        max_cluster: 64,
        max_bytes: 1 << 32,
    }
}

fn mount() -> (FatVolume<MemFatTable>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    let volume = FatVolume::new(
        geometry(),
        MemFatTable::new(FatKind::Fat32, 64),
        CacheConfig::default(),
    )
    .expect("mount")
    .with_reporter(reporter.clone());
    (volume, reporter)
}

fn open(volume: &FatVolume<MemFatTable>, start: u64, clusters: u64) -> FatFile {
    volume.open_file(FileAttrs {
        ino: InodeNumber(100),
        i_pos: I_POS,
        start: Some(ClusterNumber(start)),
        size: clusters * 4096,
    })
}

fn reached(file_cluster: u64, disk_cluster: u64) -> ChainPosition {
    ChainPosition::Reached {
        file_cluster: FileCluster(file_cluster),
        disk_cluster: ClusterNumber(disk_cluster),
    }
}

#[test]
fn cold_walk_caches_one_run() {
    let (vol, _) = mount();
    vol.table().link(&[5, 6, 7, 8]);
    let file = open(&vol, 5, 4);

    let pos = vol.get_cluster(&file, FileCluster(3)).expect("resolve");
    assert_eq!(pos, reached(3, 8));
    assert_eq!(
        file.cache().runs(),
        vec![Run {
            file_cluster: FileCluster(0),
            disk_cluster: ClusterNumber(5),
            run_length: 3,
        }]
    );
}

#[test]
fn warm_lookup_hits_without_fat_reads() {
    let (vol, _) = mount();
    vol.table().link(&[5, 6, 7, 8]);
    let file = open(&vol, 5, 4);
    vol.get_cluster(&file, FileCluster(3)).expect("warm");
    vol.table().reset_reads();

    let pos = vol.get_cluster(&file, FileCluster(2)).expect("resolve");
    assert_eq!(pos, reached(2, 7));
    assert_eq!(vol.table().reads(), 0);
    assert!(file.cache().stats().hits >= 1);
}

#[test]
fn ninth_run_evicts_least_recently_used() {
    let (vol, _) = mount();
    // every link jumps, so each cluster is its own run
    let chain: Vec<u64> = (0..9).map(|i| 10 + 2 * i).collect();
    vol.table().link(&chain);
    let file = open(&vol, 10, 9);

    let pos = vol.get_cluster(&file, FileCluster(8)).expect("resolve");
    assert_eq!(pos, reached(8, 26));
    assert_eq!(file.cache().len(), 8);
    assert_eq!(file.cache().stats().evictions, 1);

    // the first run discovered was the least recently used
    let starts: Vec<u64> = file.cache().runs().iter().map(|r| r.file_cluster.0).collect();
    assert!(!starts.contains(&0));
    assert!(starts.contains(&8));
}

#[test]
fn invalidate_forces_full_rewalk() {
    let (vol, _) = mount();
    vol.table().link(&[5, 6, 7, 8]);
    let file = open(&vol, 5, 4);
    vol.get_cluster(&file, FileCluster(3)).expect("warm");

    vol.invalidate(&file);
    assert!(file.cache().is_empty());
    vol.table().reset_reads();

    let pos = vol.get_cluster(&file, FileCluster(2)).expect("resolve");
    assert_eq!(pos, reached(2, 7));
    assert_eq!(vol.table().reads(), 2);
    assert_eq!(file.cache().len(), 1);
    assert_eq!(file.cache().runs()[0].file_cluster, FileCluster(0));
}

#[test]
fn cyclic_chain_is_a_structural_error() {
    let (vol, reporter) = mount();
    vol.table().link(&[5, 6, 7, 8]);
    vol.table().set(8, FatEntry::Next(ClusterNumber(5)));
    let file = open(&vol, 5, 4);

    let err = vol.get_cluster(&file, FileCluster(100)).expect_err("loop");
    assert!(matches!(err, FatError::ChainLoop { i_pos: I_POS, .. }));
    assert!(err.is_structural());
    assert_eq!(err.to_errno(), libc::EIO);

    let messages = reporter.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].0, "loop report should be rate limited");
    assert_eq!(messages[0].1, I_POS);
    assert!(messages[0].2.contains("cluster chain loop"));
}

#[test]
fn free_entry_inside_chain_is_reported() {
    let (vol, reporter) = mount();
    vol.table().link(&[5, 6, 7]);
    vol.table().set(6, FatEntry::Free);
    let file = open(&vol, 5, 3);

    let err = vol.get_cluster(&file, FileCluster(2)).expect_err("free");
    assert!(matches!(err, FatError::Corruption { cluster: 6, .. }));
    let messages = reporter.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].2.contains("invalid cluster chain"));
}

#[test]
fn io_error_propagates_without_report() {
    let (vol, reporter) = mount();
    vol.table().link(&[5, 6, 7]);
    vol.table().fail_reads_at(Some(ClusterNumber(6)));
    let file = open(&vol, 5, 3);

    let err = vol.get_cluster(&file, FileCluster(2)).expect_err("io");
    assert!(matches!(err, FatError::Io(_)));
    assert!(!err.is_structural());
    assert!(reporter.messages().is_empty());

    // nothing half-walked was cached; a retry walks cleanly
    vol.table().fail_reads_at(None);
    let pos = vol.get_cluster(&file, FileCluster(2)).expect("resolve");
    assert_eq!(pos, reached(2, 7));
}

#[test]
fn eof_before_target_is_end_of_chain() {
    let (vol, reporter) = mount();
    vol.table().link(&[5, 6]);
    let file = open(&vol, 5, 2);

    let pos = vol.get_cluster(&file, FileCluster(5)).expect("resolve");
    assert_eq!(
        pos,
        ChainPosition::EndOfChain {
            file_cluster: FileCluster(1),
            disk_cluster: ClusterNumber(6),
        }
    );
    assert!(!pos.is_reached());
    assert!(reporter.messages().is_empty());

    let err = vol
        .bmap_cluster(&file, FileCluster(5))
        .expect_err("beyond eof");
    assert!(matches!(err, FatError::BeyondEof { cluster: 5, .. }));
    let messages = reporter.messages();
    assert_eq!(messages.len(), 1);
    assert!(!messages[0].0, "beyond-EOF is reported unconditionally");
    assert!(messages[0].2.contains("request beyond EOF"));
}

#[test]
fn fragmented_file_resolves_every_cluster() {
    let (vol, _) = mount();
    let chain = [3_u64, 4, 5, 20, 21, 40, 9, 10, 11, 12];
    vol.table().link(&chain);
    let file = open(&vol, 3, chain.len() as u64);

    // resolve back to front so every walk after the first starts from cache
    for (idx, &disk) in chain.iter().enumerate().rev() {
        let pos = vol.get_cluster(&file, FileCluster(idx as u64)).expect("resolve");
        assert_eq!(pos, reached(idx as u64, disk));
    }

    let mut runs = file.cache().runs();
    runs.sort_by_key(|r| r.file_cluster);
    let shape: Vec<_> = runs
        .iter()
        .map(|r| (r.file_cluster.0, r.disk_cluster.0, r.run_length))
        .collect();
    assert_eq!(shape, vec![(0, 3, 2), (3, 20, 1), (5, 40, 0), (6, 9, 3)]);
    for pair in runs.windows(2) {
        assert!(!pair[0].overlaps(&pair[1]));
    }
}

#[test]
fn bmap_spans_cluster_and_file_tail() {
    let (vol, _) = mount();
    vol.table().link(&[5, 6, 30]);
    let file = vol.open_file(FileAttrs {
        ino: InodeNumber(101),
        i_pos: I_POS,
        start: Some(ClusterNumber(5)),
        // 2 full clusters plus 3 sectors
        size: (16 + 3) * 512,
    });

    let m = vol.bmap(&file, 0, false).expect("bmap").expect("mapped");
    assert_eq!(m.phys, BlockNumber(2048 + 3 * 8));
    assert_eq!(m.mapped_blocks, 8);

    let m = vol.bmap(&file, 13, false).expect("bmap").expect("mapped");
    assert_eq!(m.phys, BlockNumber(2048 + 4 * 8 + 5));
    assert_eq!(m.mapped_blocks, 3);

    let m = vol.bmap(&file, 17, false).expect("bmap").expect("mapped");
    assert_eq!(m.phys, BlockNumber(2048 + 28 * 8 + 1));
    assert_eq!(m.mapped_blocks, 2);

    assert_eq!(vol.bmap(&file, 19, false).expect("bmap"), None);
}

#[test]
fn bmap_create_uses_allocated_tail() {
    let (vol, _) = mount();
    vol.table().link(&[5, 6]);
    let file = vol.open_file(FileAttrs {
        ino: InodeNumber(102),
        i_pos: I_POS,
        start: Some(ClusterNumber(5)),
        size: 512,
    });
    assert_eq!(vol.bmap(&file, 9, true).expect("bmap"), None);

    file.set_mmu_private(16 * 512);
    let m = vol.bmap(&file, 9, true).expect("bmap").expect("mapped");
    assert_eq!(m.phys, BlockNumber(2048 + 4 * 8 + 1));
    assert_eq!(m.mapped_blocks, 7);
}

#[test]
fn fat12_root_directory_uses_fixed_region() {
    let geometry = Geometry {
        kind: FatKind::Fat12,
        block_size: 512,
        sec_per_clus: 1,
        data_start: 33,
        dir_start: 19,
        dir_entries: 224,
        max_cluster: 2849,
        max_bytes: u64::from(u32::MAX),
    };
    let vol = FatVolume::new(
        geometry,
        MemFatTable::new(FatKind::Fat12, 2849),
        CacheConfig::default(),
    )
    .expect("mount");
    let root = vol.open_file(FileAttrs {
        ino: InodeNumber::ROOT,
        i_pos: 0,
        start: None,
        size: 0,
    });

    // 224 entries / 16 per sector
    for sector in 0..14 {
        let m = vol.bmap(&root, sector, false).expect("bmap").expect("mapped");
        assert_eq!(m.phys, BlockNumber(19 + sector));
        assert_eq!(m.mapped_blocks, 1);
    }
    assert_eq!(vol.bmap(&root, 14, false).expect("bmap"), None);
    assert_eq!(vol.table().reads(), 0);
}

#[test]
fn rewrite_chain_replaces_cached_layout() {
    let (vol, _) = mount();
    vol.table().link(&[5, 6, 7, 8]);
    let file = open(&vol, 5, 4);
    vol.get_cluster(&file, FileCluster(3)).expect("warm");

    file.rewrite_chain(Some(ClusterNumber(40)), 4 * 4096, || {
        vol.table().link(&[40, 41, 50, 51]);
    });
    let pos = vol.get_cluster(&file, FileCluster(3)).expect("resolve");
    assert_eq!(pos, reached(3, 51));
    assert_eq!(file.cache().stats().stale_drops, 0);
}

#[test]
fn tracing_reporter_latches_needs_check_on_corruption() {
    let reporter = Arc::new(TracingReporter::new(ReporterConfig {
        burst: 1,
        interval_ms: 60_000,
    }));
    let vol = FatVolume::new(
        geometry(),
        MemFatTable::new(FatKind::Fat32, 64),
        CacheConfig::default(),
    )
    .expect("mount")
    .with_reporter(reporter.clone());
    vol.table().link(&[5, 6]);
    vol.table().set(6, FatEntry::Bad);
    let file = open(&vol, 5, 2);

    for _ in 0..3 {
        assert!(vol.get_cluster(&file, FileCluster(1)).is_ok());
        assert!(vol.get_cluster(&file, FileCluster(2)).is_err());
    }
    assert!(reporter.needs_check());
    assert_eq!(reporter.reported(), 1);
    assert_eq!(reporter.suppressed(), 2);
}

fn mount_fat64() -> (FatVolume<MemFatTable>, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::default());
    let geometry = Geometry {
        kind: FatKind::Fat64,
        ..geometry()
    };
    let volume = FatVolume::new(geometry, MemFatTable::new(FatKind::Fat64, 64), CacheConfig::default())
        .expect("mount")
        .with_reporter(reporter.clone());
    (volume, reporter)
}

#[test]
fn corrupt_link_past_volume_end_is_not_mapped() {
    let (vol, reporter) = mount_fat64();
    vol.table().set(5, FatEntry::Next(ClusterNumber(0xFFFF_FFFF_FFFF_FF00)));
    let file = open(&vol, 5, 4);

    let err = vol.get_cluster(&file, FileCluster(1)).expect_err("corrupt link");
    assert!(matches!(
        err,
        FatError::Corruption {
            cluster: 0xFFFF_FFFF_FFFF_FF00,
            ..
        }
    ));

    // sector 8 is the first sector of logical cluster 1
    let err = vol.bmap(&file, 8, false).expect_err("corrupt link");
    assert!(err.is_structural());
    assert_eq!(err.to_errno(), libc::EIO);

    let messages = reporter.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|(limited, pos, msg)| {
        *limited && *pos == I_POS && msg.contains("invalid cluster chain")
    }));
}

#[test]
fn reserved_start_cluster_is_not_mapped() {
    let (vol, reporter) = mount_fat64();
    let file = open(&vol, 0, 1);

    let err = vol.bmap(&file, 0, false).expect_err("start cluster 0");
    assert!(matches!(err, FatError::Corruption { cluster: 0, .. }));
    let err = vol.bmap_cluster(&file, FileCluster(0)).expect_err("start cluster 0");
    assert!(err.is_structural());
    assert_eq!(reporter.messages().len(), 2);
    assert_eq!(vol.table().reads(), 0);
}
