//! End-to-end reconciliation runs against `file://` catalogue fixtures:
//! initial mirror, partial update, vanished sink objects, tombstone
//! behaviour, legacy primary keys, and corrupted downloads.

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use url::Url;

use thredds_mirror::core::definition::{
    CatalogueSource, DownloadDefinition, Output, SinkKind,
};
use thredds_mirror::core::metadata::{unique_key, DatasetMetadata, Status};
use thredds_mirror::notify::Notifier;
use thredds_mirror::ops::{DownloadOutput, Reconciler};
use thredds_mirror::scan::NetcdfScanner;
use thredds_mirror::store::MemoryStore;
use thredds_mirror::util::config::RunConfig;
use thredds_mirror::MirrorResult;

const DEF_ID: &str = "downloads/gbr4_v2";

const D10: &str = "gbr4_simple_2018-10.nc";
const D11: &str = "gbr4_simple_2018-11.nc";
const D12: &str = "gbr4_simple_2018-12.nc";
const D01: &str = "gbr4_simple_2019-01.nc";
const D02: &str = "gbr4_simple_2019-02.nc";

const T10: &str = "2018-11-05T12:46:10Z";
const T11: &str = "2018-12-02T14:05:34Z";
const T12: &str = "2018-12-10T08:52:59Z";
const T01: &str = "2019-01-19T01:09:58Z";
const T12B: &str = "2019-01-08T08:52:59Z";
const T01B: &str = "2019-01-20T01:09:58Z";
const T02: &str = "2019-01-20T02:09:58Z";

#[derive(Default)]
struct RecordingNotifier {
    sent: RefCell<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn subjects_on(&self, channel: &str) -> Vec<String> {
        self.sent
            .borrow()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn publish(&self, channel: &str, subject: &str, _message: &str) -> MirrorResult<()> {
        self.sent
            .borrow_mut()
            .push((channel.to_string(), subject.to_string()));
        Ok(())
    }
}

struct Fixture {
    root: tempfile::TempDir,
    store: MemoryStore,
}

impl Fixture {
    fn new() -> Fixture {
        Fixture {
            root: tempfile::tempdir().unwrap(),
            store: MemoryStore::new(),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.root.path().join("src").join("data").join("set")
    }

    fn mirror_dir(&self) -> PathBuf {
        self.root.path().join("mirror")
    }

    fn mirror_path(&self, name: &str) -> PathBuf {
        self.mirror_dir().join(name)
    }

    fn download_dir(&self) -> PathBuf {
        self.root.path().join("dl")
    }

    /// Writes one upstream data file.
    fn write_data(&self, name: &str, content: &[u8]) {
        let dir = self.data_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    /// Rewrites the catalogue to advertise the given files.
    fn write_catalogue(&self, files: &[(&str, &str)]) {
        let mut body = String::from(
            r#"<catalog name="fixture">
  <service name="all" serviceType="Compound" base="">
    <service name="http" serviceType="HTTPServer" base="data/"/>
  </service>
  <dataset name="gbr4_v2" ID="fx3/gbr4_v2">
    <metadata inherited="true"><serviceName>http</serviceName></metadata>
"#,
        );
        for (name, modified) in files {
            body.push_str(&format!(
                r#"    <dataset name="{name}" ID="set/{name}" urlPath="set/{name}">
      <dataSize units="bytes">64</dataSize>
      <date type="modified">{modified}</date>
    </dataset>
"#,
                name = name,
                modified = modified
            ));
        }
        body.push_str("  </dataset>\n</catalog>\n");
        let dir = self.root.path().join("src");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("catalog.xml"), body).unwrap();
    }

    fn definition(&self) -> DownloadDefinition {
        let catalogue_url =
            Url::from_file_path(self.root.path().join("src").join("catalog.xml"))
                .unwrap()
                .to_string();
        DownloadDefinition {
            id: DEF_ID.to_string(),
            enabled: true,
            catalogue_urls: vec![CatalogueSource {
                catalogue_url,
                sub_directory: None,
            }],
            filename_regex: None,
            files: None,
            output: Output {
                kind: SinkKind::File,
                destination: Url::from_file_path(self.mirror_dir()).unwrap().to_string(),
                download_dir: self.download_dir(),
            },
        }
    }

    fn run(&self, notifier: &RecordingNotifier, config: &RunConfig) -> DownloadOutput {
        let scanner = NetcdfScanner::new();
        let reconciler = Reconciler::new(&self.store, &scanner, notifier, config);
        reconciler.run(&self.definition())
    }

    fn record(&self, dataset_id: &str) -> DatasetMetadata {
        self.store.all()[&unique_key(DEF_ID, dataset_id)].clone()
    }
}

fn netcdf(tag: &str) -> Vec<u8> {
    let mut bytes = b"CDF\x01".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

fn dataset_id(name: &str) -> String {
    format!("set/{}", name)
}

fn seed_scenario_a(fixture: &Fixture) {
    for name in [D10, D11, D12, D01] {
        fixture.write_data(name, &netcdf(name));
    }
    fixture.write_catalogue(&[(D10, T10), (D11, T11), (D12, T12), (D01, T01)]);
}

#[test]
fn scenario_a_initial_download() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();

    let output = fixture.run(&notifier, &RunConfig::default());

    assert_eq!(output.successes.len(), 4);
    assert!(output.warnings.is_empty());
    assert!(output.errors.is_empty());

    for name in [D10, D11, D12, D01] {
        assert_eq!(
            fs::read(fixture.mirror_path(name)).unwrap(),
            netcdf(name),
            "mirror copy of {} must match the source bytes",
            name
        );
        let record = fixture.record(&dataset_id(name));
        assert_eq!(record.status, Status::Valid);
        assert!(record.checksum.starts_with("MD5:"));
        assert!(record.last_downloaded >= record.last_modified);
        assert!(record.file_uri.ends_with(name));
    }
    assert_eq!(fixture.record(&dataset_id(D10)).last_modified, 1541421970000);

    // One per-definition summary, no administrative alerts.
    assert_eq!(notifier.subjects_on("downloads").len(), 1);
    assert!(notifier.subjects_on("admin").is_empty());

    // The temp directory holds nothing once the run is over.
    let leftovers: Vec<_> = fs::read_dir(fixture.download_dir())
        .map(|entries| entries.collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty());
}

#[test]
fn two_stable_runs_are_idempotent() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();

    fixture.run(&notifier, &RunConfig::default());
    let before = fixture.store.all();
    let second = fixture.run(&notifier, &RunConfig::default());

    assert!(second.successes.is_empty());
    assert!(second.is_empty());
    let after = fixture.store.all();
    assert_eq!(before.len(), after.len());
    for (key, record) in &before {
        assert_eq!(record.checksum, after[key].checksum);
        assert_eq!(record.last_downloaded, after[key].last_downloaded);
        assert_eq!(record.last_modified, after[key].last_modified);
    }
}

#[test]
fn scenario_b_partial_update() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    fixture.run(&notifier, &RunConfig::default());

    let checksum_12_before = fixture.record(&dataset_id(D12)).checksum.clone();
    let record_01_before = fixture.record(&dataset_id(D01));
    let mtime = |name: &str| {
        fs::metadata(fixture.mirror_path(name))
            .unwrap()
            .modified()
            .unwrap()
    };
    let mtime_10 = mtime(D10);
    let mtime_11 = mtime(D11);
    let mtime_01 = mtime(D01);

    // 12 gains new content and a new modified date; 01 keeps identical
    // content under a new modified date; 02 is new.
    fixture.write_data(D12, &netcdf("gbr4_simple_2018-12.nc rev2"));
    fixture.write_data(D02, &netcdf(D02));
    fixture.write_catalogue(&[(D10, T10), (D11, T11), (D12, T12B), (D01, T01B), (D02, T02)]);

    let output = fixture.run(&notifier, &RunConfig::default());
    assert_eq!(output.successes.len(), 2);
    assert!(output.errors.is_empty());

    // Untouched files keep their mtimes.
    assert_eq!(mtime(D10), mtime_10);
    assert_eq!(mtime(D11), mtime_11);

    // 12 was re-written with new content.
    let record_12 = fixture.record(&dataset_id(D12));
    assert_ne!(record_12.checksum, checksum_12_before);
    assert_eq!(
        fs::read(fixture.mirror_path(D12)).unwrap(),
        netcdf("gbr4_simple_2018-12.nc rev2")
    );

    // 01: content unchanged, so the sink was not touched but both
    // timestamps advanced.
    assert_eq!(mtime(D01), mtime_01);
    let record_01 = fixture.record(&dataset_id(D01));
    assert_eq!(record_01.checksum, record_01_before.checksum);
    assert_eq!(record_01.last_modified, 1547946598000);
    assert!(record_01.last_downloaded >= record_01_before.last_downloaded);
    assert_eq!(record_01.status, Status::Valid);

    // 02 is a brand new record.
    let record_02 = fixture.record(&dataset_id(D02));
    assert_eq!(record_02.status, Status::Valid);
    assert_eq!(fs::read(fixture.mirror_path(D02)).unwrap(), netcdf(D02));
}

#[test]
fn scenario_c_vanished_files_are_tombstoned() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    fixture.run(&notifier, &RunConfig::default());
    let before = fixture.store.all();

    for name in [D11, D12, D01] {
        fs::remove_file(fixture.mirror_path(name)).unwrap();
    }

    let output = fixture.run(&notifier, &RunConfig::default());
    assert!(output.successes.is_empty());

    assert_eq!(fixture.record(&dataset_id(D10)).status, Status::Valid);
    for name in [D11, D12, D01] {
        let record = fixture.record(&dataset_id(name));
        let old = &before[&unique_key(DEF_ID, &dataset_id(name))];
        assert_eq!(record.status, Status::Deleted);
        // Only the status flipped.
        assert_eq!(record.checksum, old.checksum);
        assert_eq!(record.last_modified, old.last_modified);
        assert_eq!(record.last_downloaded, old.last_downloaded);
        // The file is not restored.
        assert!(!fixture.mirror_path(name).exists());
    }
}

#[test]
fn scenario_d_resurrection_needs_changed_content() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    fixture.run(&notifier, &RunConfig::default());
    for name in [D11, D12, D01] {
        fs::remove_file(fixture.mirror_path(name)).unwrap();
    }
    fixture.run(&notifier, &RunConfig::default());

    // Upstream: 12 truly changed, 01 only re-advertised, 02 is new.
    fixture.write_data(D12, &netcdf("gbr4_simple_2018-12.nc rev2"));
    fixture.write_data(D02, &netcdf(D02));
    fixture.write_catalogue(&[(D10, T10), (D11, T11), (D12, T12B), (D01, T01B), (D02, T02)]);

    let output = fixture.run(&notifier, &RunConfig::default());
    assert_eq!(output.successes.len(), 2);

    // 12 came back to life with the new content.
    let record_12 = fixture.record(&dataset_id(D12));
    assert_eq!(record_12.status, Status::Valid);
    assert!(fixture.mirror_path(D12).exists());

    // 01's content hash still matches the stored record, so the manual
    // deletion sticks: the record stays DELETED with advanced
    // timestamps and the file is not republished.
    let record_01 = fixture.record(&dataset_id(D01));
    assert_eq!(record_01.status, Status::Deleted);
    assert_eq!(record_01.last_modified, 1547946598000);
    assert!(!fixture.mirror_path(D01).exists());

    // 11 was not re-advertised, so its tombstone is untouched.
    assert_eq!(fixture.record(&dataset_id(D11)).status, Status::Deleted);

    let record_02 = fixture.record(&dataset_id(D02));
    assert_eq!(record_02.status, Status::Valid);
}

#[test]
fn scenario_e_legacy_keys_are_ignored_not_reconciled() {
    let fixture = Fixture::new();
    fixture.write_data(D10, &netcdf(D10));
    fixture.write_catalogue(&[(D10, T10)]);

    // A record persisted before key normalisation: raw dots in the key.
    let legacy_key = format!("{}/set/{}", DEF_ID, D10);
    let legacy = DatasetMetadata {
        id: legacy_key.clone(),
        definition_id: DEF_ID.to_string(),
        dataset_id: dataset_id(D10),
        file_uri: "file:///old/location/gbr4_simple_2018-10.nc".to_string(),
        checksum: "MD5:deadbeefdeadbeefdeadbeefdeadbeef".to_string(),
        status: Status::Valid,
        last_modified: 9_999_999_999_999,
        last_downloaded: 9_999_999_999_999,
        error_message: None,
        stacktrace: Vec::new(),
        extracted: serde_json::Map::new(),
    };
    fixture.store.insert(legacy.clone());

    let notifier = RecordingNotifier::default();
    let output = fixture.run(&notifier, &RunConfig::default());

    // The legacy record is invisible to the lookup, so the dataset is
    // downloaded fresh under the canonical key.
    assert_eq!(output.successes.len(), 1);
    let all = fixture.store.all();
    assert_eq!(all.len(), 2);
    let canonical = &all[&unique_key(DEF_ID, &dataset_id(D10))];
    assert_eq!(canonical.status, Status::Valid);
    let untouched = &all[&legacy_key];
    assert_eq!(untouched.last_modified, legacy.last_modified);
    assert_eq!(untouched.checksum, legacy.checksum);
}

#[test]
fn scenario_f_corrupted_download() {
    let fixture = Fixture::new();
    fixture.write_data(D10, b"<html>503 Service Unavailable</html>");
    fixture.write_catalogue(&[(D10, T10)]);
    let notifier = RecordingNotifier::default();

    let output = fixture.run(&notifier, &RunConfig::default());

    assert!(output.successes.is_empty());
    assert_eq!(output.warnings.len(), 1);

    let record = fixture.record(&dataset_id(D10));
    assert_eq!(record.status, Status::Corrupted);
    assert!(record.error_message.is_some());

    assert!(!fixture.mirror_path(D10).exists());
    assert_eq!(notifier.subjects_on("admin"), vec!["Corrupted download"]);

    let leftovers: Vec<_> = fs::read_dir(fixture.download_dir())
        .map(|entries| entries.collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty());
}

#[test]
fn corrupted_tombstone_clears_on_source_change() {
    let fixture = Fixture::new();
    fixture.write_data(D10, b"garbage");
    fixture.write_catalogue(&[(D10, T10)]);
    let notifier = RecordingNotifier::default();
    fixture.run(&notifier, &RunConfig::default());
    assert_eq!(fixture.record(&dataset_id(D10)).status, Status::Corrupted);

    // Re-running with an unchanged catalogue leaves the tombstone alone.
    let output = fixture.run(&notifier, &RunConfig::default());
    assert!(output.is_empty());

    // A strictly newer modified date with sound content re-downloads.
    fixture.write_data(D10, &netcdf(D10));
    fixture.write_catalogue(&[(D10, T11)]);
    let output = fixture.run(&notifier, &RunConfig::default());
    assert_eq!(output.successes.len(), 1);
    assert_eq!(fixture.record(&dataset_id(D10)).status, Status::Valid);
    assert!(fixture.mirror_path(D10).exists());
}

#[test]
fn limit_zero_does_nothing_at_all() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    let config = RunConfig {
        limit: 0,
        ..RunConfig::default()
    };

    let output = fixture.run(&notifier, &config);
    assert!(output.is_empty());
    assert!(fixture.store.all().is_empty());
    assert!(!fixture.mirror_dir().exists());
    assert!(notifier.sent.borrow().is_empty());
}

#[test]
fn limit_caps_successful_downloads() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();

    let config = RunConfig {
        limit: 1,
        ..RunConfig::default()
    };
    let output = fixture.run(&notifier, &config);
    assert_eq!(output.successes.len(), 1);
    assert_eq!(fixture.store.all().len(), 1);

    // The rest arrives once the cap is lifted.
    let output = fixture.run(&notifier, &RunConfig::default());
    assert_eq!(output.successes.len(), 3);
    assert_eq!(fixture.store.all().len(), 4);
}

#[test]
fn verify_and_unchanged_content_do_not_consume_quota() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    fixture.run(&notifier, &RunConfig::default());

    // Same update as scenario B, but capped to one download. Sorted
    // order visits 10 and 11 (verify) and 12 (download) before 01
    // (unchanged content) and 02; only 12 consumes the quota.
    fixture.write_data(D12, &netcdf("gbr4_simple_2018-12.nc rev2"));
    fixture.write_data(D02, &netcdf(D02));
    fixture.write_catalogue(&[(D10, T10), (D11, T11), (D12, T12B), (D01, T01B), (D02, T02)]);

    let config = RunConfig {
        limit: 1,
        ..RunConfig::default()
    };
    let output = fixture.run(&notifier, &config);
    assert_eq!(output.successes.len(), 1);
    assert_eq!(output.successes[0].dataset_id, dataset_id(D12));
    assert!(!fixture.mirror_path(D02).exists());
}

#[test]
fn dry_run_only_logs() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    let config = RunConfig {
        dry_run: true,
        ..RunConfig::default()
    };

    let output = fixture.run(&notifier, &config);
    assert!(output.is_empty());
    assert!(fixture.store.all().is_empty());
    assert!(!fixture.mirror_dir().exists());
}

#[test]
fn archives_are_expanded_before_publishing() {
    let fixture = Fixture::new();
    let archive_name = "gbr4_simple_2018-10.nc.gz";
    let dir = fixture.data_dir();
    fs::create_dir_all(&dir).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(
        fs::File::create(dir.join(archive_name)).unwrap(),
        flate2::Compression::default(),
    );
    encoder.write_all(&netcdf(D10)).unwrap();
    encoder.finish().unwrap();
    fixture.write_catalogue(&[(archive_name, T10)]);

    let notifier = RecordingNotifier::default();
    let output = fixture.run(&notifier, &RunConfig::default());

    assert_eq!(output.successes.len(), 1);
    // The destination drops the archive extension and holds the
    // expanded bytes.
    assert_eq!(fs::read(fixture.mirror_path(D10)).unwrap(), netcdf(D10));
    assert!(!fixture.mirror_path(archive_name).exists());
    let record = fixture.record(&dataset_id(archive_name));
    assert!(record.file_uri.ends_with(D10));
    assert_eq!(record.status, Status::Valid);

    let leftovers: Vec<_> = fs::read_dir(fixture.download_dir())
        .map(|entries| entries.collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty());
}

#[test]
fn filename_filter_restricts_the_run() {
    let fixture = Fixture::new();
    seed_scenario_a(&fixture);
    let notifier = RecordingNotifier::default();
    let config = RunConfig {
        definition_id: Some(DEF_ID.to_string()),
        files: Some(vec![D10.to_string(), D12.to_string()]),
        ..RunConfig::default()
    };

    let output = fixture.run(&notifier, &config);
    assert_eq!(output.successes.len(), 2);
    assert!(fixture.mirror_path(D10).exists());
    assert!(!fixture.mirror_path(D11).exists());
    assert!(fixture.mirror_path(D12).exists());
    assert!(!fixture.mirror_path(D01).exists());
}
