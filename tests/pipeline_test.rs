//! End-to-end tests of the framing pipeline over DAT files on disk.

use ncars_sbt::output::npy;
use ncars_sbt::source::SourceError;
use ncars_sbt::{
    BatchDriver, Category, Config, DatOpener, EventSource, Mode, OpenSource, RecordingOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Encode `(t, x, y, p)` events as a version 2 DAT file.
fn write_dat(path: &Path, events: &[(u32, u16, u16, bool)]) {
    let mut bytes = b"% Date 2016-08-19 11:46:41\n% Version 2\n".to_vec();
    bytes.extend_from_slice(&[0x0C, 8]);
    for &(t, x, y, p) in events {
        let data = u32::from(x) | (u32::from(y) << 14) | (u32::from(p) << 28);
        bytes.extend_from_slice(&t.to_le_bytes());
        bytes.extend_from_slice(&data.to_le_bytes());
    }
    std::fs::write(path, bytes).unwrap();
}

/// Counts every source opened.
#[derive(Clone, Default)]
struct CountingOpener {
    opened: Arc<AtomicUsize>,
}

impl OpenSource for CountingOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn EventSource>, SourceError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        DatOpener.open(path)
    }
}

struct Dataset {
    _dir: tempfile::TempDir,
    root: PathBuf,
    save: PathBuf,
}

impl Dataset {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Prophesee_Dataset_n_cars");
        let save = dir.path().join("ncars_framing");
        Self {
            _dir: dir,
            root,
            save,
        }
    }

    fn group(&self, mode: &str, category: &str) -> PathBuf {
        let dir = self.root.join(format!("n-cars_{mode}")).join(category);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.root_path = self.root.clone();
        config.save_path = self.save.clone();
        config
    }

    fn output(&self, relative: &str) -> PathBuf {
        self.save.join("SBT10ms_S10C1").join(relative)
    }
}

const EXAMPLE: [(u32, u16, u16, bool); 3] =
    [(0, 1, 2, true), (5_000, 1, 2, false), (15_000, 0, 0, true)];

#[test]
fn test_example_recording_end_to_end() {
    let data = Dataset::new();
    write_dat(&data.group("train", "cars").join("obj_000001_td.dat"), &EXAMPLE);

    let summary = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.stats.written, 1);
    assert_eq!(summary.stats.frames_written, 2);
    assert_eq!(summary.missing_groups.len(), 3);

    let path = data.output("train_cars/obj_000001.npy");
    let array = npy::read_i8(&mut std::fs::File::open(path).unwrap()).unwrap();
    assert_eq!(array.shape, vec![2, 1, 3, 2]);

    #[rustfmt::skip]
    let expected: Vec<i8> = vec![
        // frame 0: +1 at (2, 1) overwritten to -1
        0, 0,
        0, 0,
        0, -1,
        // frame 1: +1 at (0, 0)
        1, 0,
        0, 0,
        0, 0,
    ];
    assert_eq!(array.data, expected);
}

#[test]
fn test_geometry_spans_the_whole_recording() {
    let data = Dataset::new();
    let events = [(0, 3, 0, true), (20_000, 0, 5, false), (40_000, 1, 1, true)];
    write_dat(&data.group("test", "background").join("obj_7_td.dat"), &events);

    BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();

    let path = data.output("test_background/obj_7.npy");
    let array = npy::read_i8(&mut std::fs::File::open(path).unwrap()).unwrap();
    // Three active windows separated by idle ones.
    assert_eq!(array.shape, vec![3, 1, 6, 4]);
    assert!(array.data.iter().all(|v| (-1..=1).contains(v)));
    assert_eq!(array.data.iter().filter(|&&v| v != 0).count(), 3);
}

#[test]
fn test_rerun_is_idempotent_and_skips_decoding() {
    let data = Dataset::new();
    let cars = data.group("train", "cars");
    write_dat(&cars.join("obj_004395_td.dat"), &EXAMPLE);
    write_dat(&cars.join("obj_004396_td.dat"), &EXAMPLE[..2]);

    let opener = CountingOpener::default();
    let first = BatchDriver::new(data.config(), opener.clone())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(first.stats.written, 2);
    assert_eq!(opener.opened.load(Ordering::SeqCst), 2);

    let train = data.output("train_cars/obj_004395.npy");
    let validate = data.output("validate_cars/obj_004396.npy");
    let before = (std::fs::read(&train).unwrap(), std::fs::read(&validate).unwrap());

    let second = BatchDriver::new(data.config(), opener.clone())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(second.stats.written, 0);
    assert_eq!(second.stats.skipped_existing, 2);
    assert_eq!(opener.opened.load(Ordering::SeqCst), 2);

    // A fresh tree produced from the same input is byte-identical.
    std::fs::remove_dir_all(&data.save).unwrap();
    BatchDriver::new(data.config(), opener.clone())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(std::fs::read(&train).unwrap(), before.0);
    assert_eq!(std::fs::read(&validate).unwrap(), before.1);
}

#[test]
fn test_subset_routing() {
    let data = Dataset::new();
    write_dat(&data.group("train", "background").join("obj_4211_td.dat"), &EXAMPLE);
    write_dat(&data.group("train", "cars").join("obj_sample_td.dat"), &EXAMPLE);
    write_dat(&data.group("test", "cars").join("obj_5000_td.dat"), &EXAMPLE);

    let summary = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert!(summary.failures.is_empty());
    assert_eq!(summary.stats.written, 3);

    assert!(data.output("validate_background/obj_4211.npy").exists());
    assert!(data.output("train_cars/obj_sample.npy").exists());
    assert!(data.output("test_cars/obj_5000.npy").exists());
}

#[test]
fn test_empty_directory_produces_nothing() {
    let data = Dataset::new();
    data.group("train", "cars");

    let summary = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.stats.recordings_seen, 0);
    assert_eq!(summary.stats.groups_processed, 1);
    assert!(summary.failures.is_empty());
    assert!(!data.output("train_cars").exists());
}

#[test]
fn test_corrupt_file_does_not_stop_the_batch() {
    let data = Dataset::new();
    let cars = data.group("train", "cars");
    write_dat(&cars.join("obj_1_td.dat"), &EXAMPLE);
    let mut broken = std::fs::read(cars.join("obj_1_td.dat")).unwrap();
    broken.truncate(broken.len() - 3);
    std::fs::write(cars.join("obj_2_td.dat"), broken).unwrap();
    write_dat(&cars.join("obj_3_td.dat"), &EXAMPLE);

    let summary = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.stats.written, 2);
    assert_eq!(summary.stats.failed, 1);
    assert!(summary.failures[0].path.ends_with("obj_2_td.dat"));
    assert!(!data.output("train_cars/obj_2.npy").exists());
    assert!(!data.output("train_cars/obj_2.npy.partial").exists());
}

#[test]
fn test_parallel_workers_match_sequential_output() {
    let data = Dataset::new();
    let cars = data.group("train", "cars");
    for id in 0..12u32 {
        let events: Vec<_> = (0..=id)
            .map(|i| (i * 7_000, (i % 5) as u16, (id % 3) as u16, i % 2 == 0))
            .collect();
        write_dat(&cars.join(format!("obj_{id}_td.dat")), &events);
    }

    let sequential = BatchDriver::new(data.config(), DatOpener).unwrap();
    let recordings = sequential.discover(Mode::Train, Category::Cars).unwrap().unwrap();
    let expected: Vec<RecordingOutcome> = sequential
        .process_all(&recordings)
        .into_iter()
        .map(|r| r.outcome)
        .collect();
    let expected_bytes: Vec<Vec<u8>> = (0..12)
        .map(|id| std::fs::read(data.output(&format!("train_cars/obj_{id}.npy"))).unwrap())
        .collect();

    std::fs::remove_dir_all(&data.save).unwrap();
    let mut config = data.config();
    config.workers = 4;
    let parallel = BatchDriver::new(config, DatOpener).unwrap();
    let outcomes: Vec<RecordingOutcome> = parallel
        .process_all(&recordings)
        .into_iter()
        .map(|r| r.outcome)
        .collect();

    assert_eq!(outcomes, expected);
    for (id, bytes) in expected_bytes.iter().enumerate() {
        let path = data.output(&format!("train_cars/obj_{id}.npy"));
        assert_eq!(&std::fs::read(path).unwrap(), bytes);
    }
}

#[test]
fn test_unwritable_output_root_is_fatal() {
    let data = Dataset::new();
    std::fs::create_dir_all(data.save.parent().unwrap()).unwrap();
    std::fs::write(&data.save, b"not a directory").unwrap();

    let driver = BatchDriver::new(data.config(), DatOpener).unwrap();
    assert!(driver.run().is_err());
}

#[test]
fn test_claim_left_by_interrupted_run_is_taken_over() {
    let data = Dataset::new();
    write_dat(&data.group("train", "cars").join("obj_1_td.dat"), &EXAMPLE);

    // A killed run leaves its claim file behind with no final object.
    let partial = data.output("train_cars/obj_1.npy.partial");
    std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
    std::fs::write(&partial, b"").unwrap();
    let aged = std::time::SystemTime::now() - std::time::Duration::from_secs(600);
    std::fs::File::options()
        .write(true)
        .open(&partial)
        .unwrap()
        .set_modified(aged)
        .unwrap();

    let summary = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.stats.written, 1);
    assert_eq!(summary.stats.skipped_claimed, 0);
    assert!(data.output("train_cars/obj_1.npy").exists());
    assert!(!partial.exists());

    let rerun = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(rerun.stats.skipped_existing, 1);
}

#[cfg(target_os = "linux")]
#[test]
fn test_claim_of_exited_process_is_taken_over() {
    let data = Dataset::new();
    write_dat(&data.group("test", "cars").join("obj_8_td.dat"), &EXAMPLE);

    let partial = data.output("test_cars/obj_8.npy.partial");
    std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
    let owner = ncars_sbt::output::ClaimOwner {
        pid: u32::MAX,
        run_id: uuid::Uuid::new_v4(),
        claimed_at: chrono::Utc::now(),
    };
    std::fs::write(&partial, serde_json::to_vec(&owner).unwrap()).unwrap();

    let summary = BatchDriver::new(data.config(), DatOpener)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(summary.stats.written, 1);
    assert!(data.output("test_cars/obj_8.npy").exists());
}
