//! Settings files feeding the store and engine

use crate::common::{CountingEmbedder, policy_chunks};
use docsift::store::ChunkFormat;
use docsift::{DocumentId, DocumentIndexStore, IndexKind, RetrievalError, Settings};
use tempfile::TempDir;

#[test]
fn test_settings_file_configures_store() {
    let temp_dir = TempDir::new().unwrap();
    let index_dir = temp_dir.path().join("artifacts");
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
index_path = '{}'

[index]
kind = "clustered"
clusters = 2
probes = 1

[storage]
chunk_format = "delimited"
"#,
            index_dir.display()
        ),
    )
    .unwrap();

    let settings = Settings::load_from(&config_path).unwrap();
    settings.validate().unwrap();
    assert_eq!(settings.index.kind, IndexKind::Clustered);
    assert_eq!(settings.index_dir(), index_dir);

    let store = DocumentIndexStore::from_settings(&settings);
    let id = DocumentId::new("policy").unwrap();
    let index = store
        .get_or_build(&id, &policy_chunks(), &CountingEmbedder::new())
        .unwrap();
    assert_eq!(index.index().kind(), IndexKind::Clustered);

    let chunk_text = std::fs::read_to_string(index_dir.join("policy.chunks")).unwrap();
    assert!(chunk_text.contains("<<<END>>>"));
    assert_eq!(settings.storage.chunk_format, ChunkFormat::Delimited);
}

#[test]
fn test_invalid_settings_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        "[chunking]\nchunk_size = 100\noverlap = 100\n",
    )
    .unwrap();

    let settings = Settings::load_from(&config_path).unwrap();
    assert!(matches!(
        settings.validate(),
        Err(RetrievalError::Config { .. })
    ));
}
