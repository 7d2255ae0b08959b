//! CLI integration tests
//!
//! File round trips through the upload/download commands, plus a few checks
//! against the compiled radioctl binary.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use cloudradio_blob::{MemoryBlobService, ObjectStoreBlobService};
use cloudradio_cli::commands::{transfer, DownloadArgs, UploadArgs};
use object_store::local::LocalFileSystem;

/// Interleaved f32 I/Q samples, 8 bytes per item.
fn write_capture(path: &Path, items: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..items)
        .flat_map(|i| {
            let phase = i as f32 * 0.01;
            let mut item = phase.cos().to_le_bytes().to_vec();
            item.extend_from_slice(&phase.sin().to_le_bytes());
            item
        })
        .collect();
    std::fs::write(path, &data).unwrap();
    data
}

fn upload_args(file: &Path, blob: &str) -> UploadArgs {
    UploadArgs {
        file: file.to_path_buf(),
        container: "captures".to_string(),
        blob: blob.to_string(),
        format: "complex64".to_string(),
        vlen: 1,
        block_len: 1000,
        queue_size: 2,
        background: false,
        items_per_call: 333,
        sigmf: false,
        sample_rate: None,
        center_freq: None,
        description: None,
    }
}

fn download_args(output: &Path, blob: &str) -> DownloadArgs {
    DownloadArgs {
        container: "captures".to_string(),
        blob: blob.to_string(),
        output: output.to_path_buf(),
        format: "complex64".to_string(),
        vlen: 1,
        queue_size: 4,
        repeat: false,
        limit: None,
        items_per_call: 512,
    }
}

#[tokio::test]
async fn test_upload_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("capture.cf32");
    let output = dir.path().join("copy.cf32");
    let data = write_capture(&input, 4_321);

    let service = MemoryBlobService::new();
    service.create_container("captures");

    let stats = transfer::upload(&upload_args(&input, "pass-1"), Arc::new(service.clone()))
        .await
        .unwrap();
    assert_eq!(stats.items, 4_321);
    assert_eq!(service.committed_block_ids("captures", "pass-1").len(), 5);

    let stats = transfer::download(&download_args(&output, "pass-1"), Arc::new(service))
        .await
        .unwrap();
    assert_eq!(stats.items, 4_321);
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn test_background_sigmf_upload() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("capture.cf32");
    write_capture(&input, 2_500);

    let service = MemoryBlobService::new();
    service.create_container("captures");

    let args = UploadArgs {
        background: true,
        sigmf: true,
        sample_rate: Some(1e6),
        center_freq: Some(1.42e9),
        ..upload_args(&input, "hydrogen")
    };
    transfer::upload(&args, Arc::new(service.clone())).await.unwrap();

    let mut names = service.blob_names("captures");
    names.sort();
    assert_eq!(names, vec!["hydrogen.sigmf-data", "hydrogen.sigmf-meta"]);

    let meta: serde_json::Value =
        serde_json::from_slice(&service.blob_data("captures", "hydrogen.sigmf-meta").unwrap())
            .unwrap();
    assert_eq!(meta["global"]["core:datatype"], "cf32_le");
    assert_eq!(meta["global"]["core:sample_rate"], 1e6);
}

#[tokio::test]
async fn test_repeat_download_with_limit() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("tone.cf32");
    let output = dir.path().join("looped.cf32");
    let data = write_capture(&input, 100);

    let service = MemoryBlobService::new();
    service.create_container("captures");
    transfer::upload(&upload_args(&input, "tone"), Arc::new(service.clone()))
        .await
        .unwrap();

    let args = DownloadArgs {
        repeat: true,
        limit: Some(250),
        items_per_call: 64,
        ..download_args(&output, "tone")
    };
    let stats = transfer::download(&args, Arc::new(service)).await.unwrap();
    assert_eq!(stats.items, 250);

    let looped = std::fs::read(&output).unwrap();
    let expected: Vec<u8> = data
        .iter()
        .chain(data.iter())
        .chain(data[..50 * 8].iter())
        .copied()
        .collect();
    assert_eq!(looped, expected);
}

#[tokio::test]
async fn test_round_trip_through_local_object_store() {
    let dir = tempfile::tempdir().unwrap();
    let store_dir = dir.path().join("store");
    std::fs::create_dir_all(&store_dir).unwrap();
    let input = dir.path().join("capture.cf32");
    let output = dir.path().join("copy.cf32");
    let data = write_capture(&input, 3_000);

    let store = Arc::new(LocalFileSystem::new_with_prefix(&store_dir).unwrap());
    let service = Arc::new(ObjectStoreBlobService::with_store(store));

    transfer::upload(&upload_args(&input, "pass-2"), service.clone())
        .await
        .unwrap();
    assert_eq!(std::fs::read(store_dir.join("pass-2")).unwrap(), data);

    transfer::download(&download_args(&output, "pass-2"), service)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[tokio::test]
async fn test_missing_blob_fails_download() {
    let dir = tempfile::tempdir().unwrap();
    let service = MemoryBlobService::new();
    service.create_container("captures");

    let err = transfer::download(
        &download_args(&dir.path().join("out.cf32"), "absent"),
        Arc::new(service),
    )
    .await
    .unwrap_err();
    assert!(format!("{:#}", err).contains("absent"));
}

#[tokio::test]
async fn test_truncated_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("truncated.cf32");
    let mut data = write_capture(&input, 10);
    data.truncate(data.len() - 3);
    std::fs::write(&input, &data).unwrap();

    let service = MemoryBlobService::new();
    service.create_container("captures");
    let result = transfer::upload(&upload_args(&input, "bad"), Arc::new(service.clone())).await;
    assert!(result.is_err());
    assert!(service.blob_data("captures", "bad").is_none());
}

// ---------------------------------------------------------------
// Binary
// ---------------------------------------------------------------

fn radioctl() -> Command {
    Command::new(env!("CARGO_BIN_EXE_radioctl"))
}

#[test]
fn test_help_flag() {
    let output = radioctl().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["upload", "download", "secret", "serve"] {
        assert!(stdout.contains(command), "missing {}", command);
    }
}

#[test]
fn test_secret_from_environment() {
    let output = radioctl()
        .args(["secret", "lo-offset", "--prefix", "radioctl_test"])
        .env("RADIOCTL_TEST_LO_OFFSET", "125000")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "125000");
}

#[test]
fn test_missing_secret_fails() {
    let output = radioctl()
        .args(["secret", "definitely-not-set", "--prefix", "radioctl_test"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_repeat_requires_limit() {
    let output = radioctl()
        .args(["download", "-c", "captures", "-b", "x", "-o", "x.cf32", "--repeat"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
