use crate::*;

use verity_core::crypto;
use verity_core::merkle::root_digest_of;
use verity_services::client::send_upload;
use verity_services::{CommandOracle, FnOracle, FormatHint};

const ORIGINAL: &str = "The quick brown fox jumps over the lazy dog.\n";

/// Upload `corrupted` while declaring the digest of `original`, as if the
/// payload had been damaged after the sender hashed it.
async fn corrupted_upload(server: &TestServer, name: &str, original: &str, corrupted: &str) -> (bool, String) {
    let digest = root_digest_of(original.as_bytes().to_vec()).unwrap();
    let envelope = crypto::seal(server.cipher.as_ref(), corrupted.as_bytes()).unwrap();
    let mut ch = server.raw().await.unwrap();
    send_upload(&mut ch, name, &envelope, &digest).await.unwrap()
}

#[tokio::test]
async fn oracle_restores_corrupted_upload() {
    let original = ORIGINAL.repeat(80);
    let expected = original.clone();
    let oracle = FnOracle(move |_: &str, _: FormatHint| Some(expected.clone()));
    let server = start_server("recovered", RecoveryPolicy::new(Arc::new(oracle), Duration::from_secs(5)))
        .await
        .unwrap();

    let corrupted = original.replace("lazy", "l@zy");
    let (verified, status) = corrupted_upload(&server, "fox.txt", &original, &corrupted).await;
    assert!(verified);
    assert_eq!(status, "File data recieved");
    assert_eq!(server.store.read("fox.txt").await.unwrap(), original.as_bytes());

    let events = server.stop().await.unwrap();
    let names = events_for(&events, "fox.txt");
    assert_eq!(names, vec!["Verifying", "RecoveryAttempt", "Recovered", "Closed", "outcome"]);
}

#[tokio::test]
async fn no_oracle_keeps_corrupted_bytes() {
    let server = start_server("unrecovered", RecoveryPolicy::unavailable()).await.unwrap();

    let corrupted = ORIGINAL.replace("fox", "f0x");
    let (verified, _) = corrupted_upload(&server, "fox.txt", ORIGINAL, &corrupted).await;
    assert!(!verified);
    assert_eq!(server.store.read("fox.txt").await.unwrap(), corrupted.as_bytes());

    let events = server.stop().await.unwrap();
    let names = events_for(&events, "fox.txt");
    assert!(names.contains(&"RecoveryAttempt"));
    assert!(names.contains(&"RecoveryFailed"));
}

#[tokio::test]
async fn unsupported_format_is_not_sent_to_oracle() {
    let oracle = FnOracle(|_: &str, _: FormatHint| -> Option<String> { panic!("oracle must not run") });
    let server = start_server("unsupported", RecoveryPolicy::new(Arc::new(oracle), Duration::from_secs(5)))
        .await
        .unwrap();

    let (verified, _) = corrupted_upload(&server, "scan.pdf", "real", "fake").await;
    assert!(!verified);

    server.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn external_command_oracle() {
    let argv: Vec<String> = ["sed", "s/f0x/fox/g"].iter().map(|s| s.to_string()).collect();
    let oracle = CommandOracle::from_argv(&argv).unwrap();
    let server = start_server("command", RecoveryPolicy::new(Arc::new(oracle), Duration::from_secs(10)))
        .await
        .unwrap();

    let original = ORIGINAL.repeat(10);
    let corrupted = original.replace("fox", "f0x");
    let (verified, _) = corrupted_upload(&server, "cmd.txt", &original, &corrupted).await;
    assert!(verified);
    assert_eq!(server.store.read("cmd.txt").await.unwrap(), original.as_bytes());

    server.stop().await.unwrap();
}
