use crate::*;

use verity_services::TransferError;

#[tokio::test]
async fn upload_then_download_multi_slice_file() {
    let server = start_server("roundtrip", RecoveryPolicy::unavailable()).await.unwrap();

    // Large enough that the envelope spans many 8 KiB slices.
    let text: String = (0..4000).map(|i| format!("line {i}: the payload keeps going\n")).collect();
    let report = server.client.upload("big.txt", text.as_bytes()).await.unwrap();
    assert!(report.verified, "server should verify an untouched upload");
    assert_eq!(report.status, "File data recieved");

    let stored = server.store.read("big.txt").await.unwrap();
    assert_eq!(stored, text.as_bytes());

    let got = server.client.download("big.txt").await.unwrap();
    assert!(got.verified);
    assert_eq!(got.text, text);
    assert_eq!(got.digest, report.digest);

    let events = server.stop().await.unwrap();
    let upload = events_for(&events, "big.txt");
    assert!(upload.starts_with(&["Verifying", "Complete", "Closed", "outcome"]));
}

#[tokio::test]
async fn empty_file_roundtrip() {
    let server = start_server("empty", RecoveryPolicy::unavailable()).await.unwrap();

    let report = server.client.upload("empty.txt", b"").await.unwrap();
    assert!(report.verified);
    let got = server.client.download("empty.txt").await.unwrap();
    assert!(got.verified);
    assert!(got.text.is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn windows_1252_upload_is_normalized() {
    let server = start_server("cp1252", RecoveryPolicy::unavailable()).await.unwrap();

    // “quoted” in Windows-1252
    let raw = [0x93, b'q', b'u', b'o', b't', b'e', b'd', 0x94];
    let report = server.client.upload("quotes.txt", &raw).await.unwrap();
    assert!(report.verified);

    let got = server.client.download("quotes.txt").await.unwrap();
    assert_eq!(got.text, "\u{201C}quoted\u{201D}");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn download_missing_file_is_not_found() {
    let server = start_server("notfound", RecoveryPolicy::unavailable()).await.unwrap();

    let err = server.client.download("nope.txt").await.unwrap_err();
    assert!(matches!(err, TransferError::NotFound(_)), "got {err:?}");

    let events = server.stop().await.unwrap();
    let names = events_for(&events, "nope.txt");
    assert!(!names.contains(&"Complete"));
    let outcome = events
        .iter()
        .find(|e| e.event == "outcome" && e.filename.as_deref() == Some("nope.txt"))
        .unwrap();
    assert_eq!(outcome.outcome, "failure");
}

#[tokio::test]
async fn listing_tracks_uploads() {
    let server = start_server("listing", RecoveryPolicy::unavailable()).await.unwrap();

    assert!(server.client.list().await.unwrap().is_empty());
    for name in ["notes.md", "a.txt", "z.py"] {
        server.client.upload(name, b"content").await.unwrap();
    }
    assert_eq!(server.client.list().await.unwrap(), vec!["a.txt", "notes.md", "z.py"]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn wrong_key_upload_is_rejected() {
    let server = start_server("wrongkey", RecoveryPolicy::unavailable()).await.unwrap();

    let other: Arc<dyn Cipher> = Arc::new(ChaChaCipher::new(&SymmetricKey::generate()));
    let client = TransferClient::new(server.addr.to_string(), other, test_channel_config());
    let report = client.upload("secret.txt", b"classified").await.unwrap();
    assert!(!report.verified);
    assert_eq!(report.status, "Upload failed");
    assert!(!server.store.exists("secret.txt").await.unwrap());

    server.stop().await.unwrap();
}
