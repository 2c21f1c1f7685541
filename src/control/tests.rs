use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::*;
use crate::common::{Result, VaultError};
use crate::container::{decode_values, ContainerHeader, DatasetFile, ImageHeader};
use crate::session::Session;

struct Fixture {
    dir: tempfile::TempDir,
    sink: Arc<FileLogSink>,
    dispatcher: ControlDispatcher,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let results = ResultStore::new(dir.path().join("results")).unwrap();
    let sink = Arc::new(FileLogSink::new(dir.path().join("audit"), dir.path().join("errors")).unwrap());
    let dispatcher = ControlDispatcher::new(results, sink.clone());
    Fixture {
        dir,
        sink,
        dispatcher,
    }
}

#[derive(Default)]
struct RecordingSession {
    replies: Mutex<Vec<Vec<u8>>>,
}

impl Session for RecordingSession {
    fn send_response(&self, data: &[u8]) -> Result<()> {
        self.replies.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

fn sample_dataset(path: &Path) -> Vec<f32> {
    let header = ContainerHeader::Image(ImageHeader::new(2, 1, 1, 2));
    let file = DatasetFile::create(path, "pairs", header).unwrap();
    let values = vec![0.25, 0.5, 1.0, 0.75, 1.0, 0.0];
    file.add_block(0, &values).unwrap();
    values
}

fn request(location: &Path, column: &str) -> Vec<u8> {
    ControlMessage::DatasetRequest {
        location: location.display().to_string(),
        column: column.to_string(),
    }
    .encode()
}

#[test]
fn message_codec_layout() {
    let bytes = ControlMessage::SnapshotPull {
        location: "ab".to_string(),
    }
    .encode();
    assert_eq!(bytes, vec![2, 2, 0, 0, 0, b'a', b'b']);

    let push = ControlMessage::ResultPush {
        id: "r1".to_string(),
        blob: vec![0, 255, 7],
    };
    assert_eq!(ControlMessage::decode(&push.encode()).unwrap(), push);

    let log = ControlMessage::ErrorLog(ErrorRecord {
        user: "u".to_string(),
        component: "torii".to_string(),
        context: String::new(),
        values: String::new(),
        error: "boom".to_string(),
    });
    let encoded = log.encode();
    assert_eq!(encoded[0], 255);
    assert_eq!(ControlMessage::decode(&encoded).unwrap(), log);
}

#[test]
fn decode_rejects_trailing_and_truncated_fields() {
    let mut bytes = ControlMessage::SnapshotPull {
        location: "x".to_string(),
    }
    .encode();
    bytes.push(0);
    assert!(matches!(ControlMessage::decode(&bytes).unwrap_err(), VaultError::Parse(_)));

    let bytes = [1u8, 10, 0, 0, 0, b'a'];
    assert!(matches!(ControlMessage::decode(&bytes).unwrap_err(), VaultError::Parse(_)));
    assert!(ControlMessage::decode(&[]).is_err());
}

#[test]
fn broken_requests_get_failure_token() {
    let fx = fixture();
    assert_eq!(fx.dispatcher.process(&[9, 0, 0]), Some(FAILURE_TOKEN.to_vec()));
    assert_eq!(fx.dispatcher.process(&[]), Some(FAILURE_TOKEN.to_vec()));
    assert_eq!(fx.dispatcher.process(&[1, 4, 0]), Some(FAILURE_TOKEN.to_vec()));
    // broken log messages are only logged
    assert_eq!(fx.dispatcher.process(&[4, 1, 0]), None);
    assert_eq!(fx.dispatcher.process(&[255]), None);
}

#[test]
fn dataset_request_serves_payload_and_columns() {
    let fx = fixture();
    let path = fx.dir.path().join("pairs.bin");
    let values = sample_dataset(&path);

    let whole = fx.dispatcher.process(&request(&path, "")).unwrap();
    assert_eq!(decode_values(&whole), values);

    let output = fx.dispatcher.process(&request(&path, "output")).unwrap();
    assert_eq!(decode_values(&output), vec![1.0, 0.0]);

    let unknown = fx.dispatcher.process(&request(&path, "label")).unwrap();
    assert_eq!(unknown, FAILURE_TOKEN);

    let missing = fx
        .dispatcher
        .process(&request(&fx.dir.path().join("missing.bin"), ""))
        .unwrap();
    assert_eq!(missing, FAILURE_TOKEN);
}

#[test]
fn snapshot_pull_returns_file_bytes() {
    let fx = fixture();
    let path = fx.dir.path().join("snapshot");
    fs::write(&path, b"cluster state").unwrap();

    let pull = |location: &Path| {
        fx.dispatcher.process(
            &ControlMessage::SnapshotPull {
                location: location.display().to_string(),
            }
            .encode(),
        )
    };
    assert_eq!(pull(&path).unwrap(), b"cluster state");
    assert_eq!(pull(&fx.dir.path().join("nope")).unwrap(), FAILURE_TOKEN);
}

#[test]
fn result_push_writes_result_file() {
    let fx = fixture();
    let push = |id: &str| {
        fx.dispatcher.process(
            &ControlMessage::ResultPush {
                id: id.to_string(),
                blob: b"[1,2,3]".to_vec(),
            }
            .encode(),
        )
    };

    assert_eq!(push("req-1").unwrap(), RESULT_STORED);
    assert_eq!(
        fs::read(fx.dir.path().join("results").join("req-1")).unwrap(),
        b"[1,2,3]"
    );
    assert_eq!(push("../escape").unwrap(), RESULT_FAILED);
}

#[test]
fn result_store_lifecycle() {
    let fx = fixture();
    let store = fx.dispatcher.results();
    store.write("b", b"2").unwrap();
    store.write("a", b"1").unwrap();

    assert_eq!(store.list().unwrap(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(store.read("a").unwrap(), b"1");

    store.remove("a").unwrap();
    assert!(matches!(store.read("a").unwrap_err(), VaultError::NotFound(_)));
    assert!(matches!(store.remove("a").unwrap_err(), VaultError::NotFound(_)));
    assert_eq!(store.list().unwrap(), vec!["b".to_string()]);
}

#[test]
fn audit_log_appends_records_per_user() {
    let fx = fixture();
    let audit = |user: &str, endpoint: &str| {
        let message = ControlMessage::AuditLog(AuditRecord {
            user: user.to_string(),
            component: "sagiri".to_string(),
            endpoint: endpoint.to_string(),
            request_type: "GET".to_string(),
        });
        assert_eq!(fx.dispatcher.process(&message.encode()), None);
    };

    audit("alice", "v1/data_set");
    audit("alice", "v1/cluster_snapshot");
    audit("", "v1/request_result");

    let text = fx.sink.read(LogKind::Audit, "alice").unwrap();
    assert_eq!(text.matches("| timestamp").count(), 2);
    assert!(text.contains("v1/data_set"));
    assert!(text.contains("v1/cluster_snapshot"));
    assert!(text.ends_with("\n\n\n"));

    let generic = fx.dir.path().join("audit").join(GENERIC_USER);
    assert!(fs::read_to_string(generic).unwrap().contains("v1/request_result"));
}

#[test]
fn error_log_omits_empty_rows() {
    let fx = fixture();
    let message = ControlMessage::ErrorLog(ErrorRecord {
        user: "bob".to_string(),
        component: "kyouko".to_string(),
        context: String::new(),
        values: "x=1".to_string(),
        error: "segment missing".to_string(),
    });
    assert_eq!(fx.dispatcher.process(&message.encode()), None);

    let text = fx.sink.read(LogKind::Error, "bob").unwrap();
    assert!(!text.contains("context"));
    assert!(text.contains("| values"));
    assert!(text.contains("segment missing"));

    // timestamp row comes first
    let first_row = text.lines().nth(3).unwrap();
    assert!(first_row.starts_with("| timestamp"));
}

#[test]
fn render_table_layout() {
    let table = render_table(&[("a", "1"), ("long key", "two\nlines")]);
    let expected = "\
+----------+-------+
| key      | value |
+==========+=======+
| a        | 1     |
| long key | two   |
|          | lines |
+----------+-------+
";
    assert_eq!(table, expected);
}

#[test]
fn handle_sends_replies_only_for_requests() {
    let fx = fixture();
    let session = RecordingSession::default();

    fx.dispatcher.handle(&session, &[42]).unwrap();
    let log = ControlMessage::AuditLog(AuditRecord {
        user: "carol".to_string(),
        component: "c".to_string(),
        endpoint: "e".to_string(),
        request_type: "POST".to_string(),
    });
    fx.dispatcher.handle(&session, &log.encode()).unwrap();

    let replies = session.replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0], FAILURE_TOKEN);
}
