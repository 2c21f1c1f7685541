use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::*;
use crate::common::{IngestConfig, OffsetWidth, Result, VaultError};
use crate::upload::UploadRegistry;

const DATASET: &str = "6f1c2a7e-3b4d-4e5f-8a9b-0c1d2e3f4a5b";
const FILE: &str = "0a1b2c3d-4e5f-4a6b-8c7d-9e0f1a2b3c4d";

#[derive(Default)]
struct RecordingSink {
    finished: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl UploadFinishSink for RecordingSink {
    fn mark_upload_finished(&self, dataset_id: &str, file_id: &str) -> Result<()> {
        if self.fail {
            return Err(VaultError::not_found(format!("dataset {}", dataset_id)));
        }
        self.finished
            .lock()
            .unwrap()
            .push((dataset_id.to_string(), file_id.to_string()));
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    registry: Arc<UploadRegistry>,
    sink: Arc<RecordingSink>,
    dispatcher: IngestDispatcher,
}

fn fixture_with(config: IngestConfig, sink: RecordingSink) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(UploadRegistry::new(dir.path().join("staging")).unwrap());
    let sink = Arc::new(sink);
    let dispatcher = IngestDispatcher::new(Arc::clone(&registry), sink.clone(), config);
    Fixture {
        _dir: dir,
        registry,
        sink,
        dispatcher,
    }
}

fn fixture() -> Fixture {
    fixture_with(IngestConfig::default(), RecordingSink::default())
}

fn structured(offset: u64, chunk: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(80 + chunk.len());
    frame.extend_from_slice(DATASET.as_bytes());
    frame.extend_from_slice(FILE.as_bytes());
    frame.extend_from_slice(&offset.to_le_bytes());
    frame.extend_from_slice(chunk);
    frame
}

fn legacy(offset: u64, chunk: &[u8]) -> Vec<u8> {
    format!("{},{},{},{}", DATASET, FILE, offset, URL_SAFE_NO_PAD.encode(chunk)).into_bytes()
}

fn finished(fixture: &Fixture) -> Vec<(String, String)> {
    fixture.sink.finished.lock().unwrap().clone()
}

#[test]
fn detects_framing_from_byte_36() {
    assert_eq!(Framing::detect(&structured(0, b"x")).unwrap(), Framing::Structured);
    assert_eq!(Framing::detect(&legacy(0, b"x")).unwrap(), Framing::Legacy);
    assert!(matches!(Framing::detect(&[0u8; 36]).unwrap_err(), VaultError::Parse(_)));
}

#[test]
fn structured_frame_fields() {
    let data = structured(4096, b"chunk");
    let frame = IngestFrame::decode(&data, OffsetWidth::U64).unwrap();
    assert_eq!(frame.dataset_id, DATASET);
    assert_eq!(frame.file_id, FILE);
    assert_eq!(frame.offset, 4096);
    assert_eq!(&*frame.bytes, b"chunk");
    assert_eq!(frame.is_last, None);
}

#[test]
fn structured_ids_are_nul_trimmed() {
    let mut data = vec![0u8; 80];
    data[..3].copy_from_slice(b"set");
    data[36..40].copy_from_slice(b"file");
    let frame = IngestFrame::decode(&data, OffsetWidth::U64).unwrap();
    assert_eq!(frame.dataset_id, "set");
    assert_eq!(frame.file_id, "file");
    assert!(frame.is_empty());
}

#[test]
fn structured_u32_offsets() {
    let mut data = Vec::new();
    data.extend_from_slice(DATASET.as_bytes());
    data.extend_from_slice(FILE.as_bytes());
    data.extend_from_slice(&7u32.to_le_bytes());
    data.extend_from_slice(b"abc");
    let frame = IngestFrame::decode(&data, OffsetWidth::U32).unwrap();
    assert_eq!(frame.offset, 7);
    assert_eq!(&*frame.bytes, b"abc");
}

#[test]
fn short_structured_preamble_is_parse_error() {
    let data = structured(0, b"")[..75].to_vec();
    assert!(matches!(
        IngestFrame::decode(&data, OffsetWidth::U64).unwrap_err(),
        VaultError::Parse(_)
    ));
}

#[test]
fn legacy_frame_decodes_url_safe_payload() {
    let chunk = [0xfbu8, 0xff, 0xbf, 0x01];
    let data = legacy(12, &chunk);
    let frame = IngestFrame::decode(&data, OffsetWidth::U64).unwrap();
    assert_eq!(frame.dataset_id, DATASET);
    assert_eq!(frame.file_id, FILE);
    assert_eq!(frame.offset, 12);
    assert_eq!(&*frame.bytes, &chunk);
}

#[test]
fn legacy_frame_needs_four_fields() {
    let data = format!("{},{},0", DATASET, FILE).into_bytes();
    assert!(matches!(
        IngestFrame::decode(&data, OffsetWidth::U64).unwrap_err(),
        VaultError::Parse(_)
    ));
    let data = format!("{},{},0,AAAA,extra", DATASET, FILE).into_bytes();
    assert!(IngestFrame::decode(&data, OffsetWidth::U64).is_err());
    let data = format!("{},{},zero,AAAA", DATASET, FILE).into_bytes();
    assert!(IngestFrame::decode(&data, OffsetWidth::U64).is_err());
}

#[test]
fn base64url_normalization() {
    assert_eq!(normalize_base64url("-_8"), "+/8=");
    assert_eq!(normalize_base64url("ab"), "ab==");
    assert_eq!(normalize_base64url("abcd"), "abcd");
}

#[test]
fn heuristic_boundary_is_strict() {
    let fx = fixture();
    let full = 96 * 1024;
    fx.registry.init_new_file(FILE, (2 * full - 1) as u64).unwrap();

    let outcome = fx.dispatcher.handle_frame(&structured(0, &vec![1u8; full]));
    assert_eq!(outcome, IngestOutcome::Stored);
    assert!(finished(&fx).is_empty());

    let outcome = fx
        .dispatcher
        .handle_frame(&structured(full as u64, &vec![2u8; full - 1]));
    assert_eq!(outcome, IngestOutcome::Completed);
    assert_eq!(finished(&fx), vec![(DATASET.to_string(), FILE.to_string())]);

    let data = fx.registry.get_data(FILE).unwrap();
    assert!(data[..full].iter().all(|&b| b == 1));
    assert!(data[full..].iter().all(|&b| b == 2));
}

#[test]
fn explicit_flag_overrides_size() {
    let fx = fixture();
    fx.registry.init_new_file(FILE, 16).unwrap();

    assert_eq!(
        fx.dispatcher.handle_envelope(&structured(0, b"tiny"), false),
        IngestOutcome::Stored
    );
    assert!(finished(&fx).is_empty());
    assert_eq!(
        fx.dispatcher.handle_envelope(&legacy(4, b"tail"), true),
        IngestOutcome::Completed
    );
    assert_eq!(finished(&fx).len(), 1);
    assert_eq!(&fx.registry.get_data(FILE).unwrap()[..8], b"tinytail");
}

#[test]
fn heuristic_can_be_disabled() {
    let config = IngestConfig {
        size_heuristic: false,
        ..IngestConfig::default()
    };
    let fx = fixture_with(config, RecordingSink::default());
    fx.registry.init_new_file(FILE, 4).unwrap();

    assert_eq!(fx.dispatcher.handle_frame(&structured(0, b"last")), IngestOutcome::Stored);
    assert!(finished(&fx).is_empty());
}

#[test]
fn failures_drop_the_frame() {
    let fx = fixture();

    // too short
    assert_eq!(fx.dispatcher.handle_frame(b"short"), IngestOutcome::Dropped);
    // unknown upload
    assert_eq!(fx.dispatcher.handle_frame(&structured(0, b"x")), IngestOutcome::Dropped);
    // bad base64
    let bad = format!("{},{},0,@@@@", DATASET, FILE).into_bytes();
    fx.registry.init_new_file(FILE, 4).unwrap();
    assert_eq!(fx.dispatcher.handle_frame(&bad), IngestOutcome::Dropped);
    // past the declared size
    assert_eq!(fx.dispatcher.handle_frame(&structured(2, b"xyz")), IngestOutcome::Dropped);

    assert!(finished(&fx).is_empty());
    assert_eq!(fx.registry.get_data(FILE).unwrap(), vec![0; 4]);
}

#[test]
fn sink_failure_keeps_written_chunk_unconfirmed() {
    let sink = RecordingSink {
        fail: true,
        ..RecordingSink::default()
    };
    let fx = fixture_with(IngestConfig::default(), sink);
    fx.registry.init_new_file(FILE, 2).unwrap();

    assert_eq!(
        fx.dispatcher.handle_frame(&structured(0, b"ok")),
        IngestOutcome::Unconfirmed
    );
    assert_eq!(fx.registry.get_data(FILE).unwrap(), b"ok");
    assert!(fx.registry.contains(FILE));

    // Resending the last chunk is idempotent and retries the notification.
    assert_eq!(
        fx.dispatcher.handle_envelope(&structured(0, b"ok"), true),
        IngestOutcome::Unconfirmed
    );
    assert_eq!(fx.registry.get_data(FILE).unwrap(), b"ok");
}
