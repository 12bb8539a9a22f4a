//! End-to-end checks over the public API: payload decode, parse, render,
//! and the batch runner.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use lyrebird::config::{DisplayMode, Settings};
use lyrebird::crypto::{self, Wrap};
use lyrebird::lyrics::{self, krc};
use lyrebird::matcher::{self, LocalTrackDescriptor, MatchOutcome};
use std::io::Write;
use tokio_util::sync::CancellationToken;

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const KRC_XOR_KEY: [u8; 16] = [
    0x40, 0x47, 0x61, 0x77, 0x5e, 0x32, 0x74, 0x47, 0x51, 0x36, 0x31, 0x2d, 0xce, 0xd2, 0x6e,
    0x69,
];

/// Wrap `text` the way the backend does: zlib, XOR, magic header.
fn krc_payload(text: &str) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(text.as_bytes()).unwrap();
    let mut body = enc.finish().unwrap();
    for (i, byte) in body.iter_mut().enumerate() {
        *byte ^= KRC_XOR_KEY[i % KRC_XOR_KEY.len()];
    }
    let mut payload = b"krc1".to_vec();
    payload.extend_from_slice(&body);
    payload
}

#[test]
fn plain_and_wrapped_payloads_decode_identically() {
    init_logs();
    let text = "[00:01.000]hello";

    // Content-type "plain": just base64 over UTF-8.
    let plain = BASE64.decode(BASE64.encode(text)).unwrap();
    assert_eq!(String::from_utf8(plain).unwrap(), text);

    // The same text through the XOR + deflate + header pipeline.
    let unwrapped = crypto::xor_unwrap(&krc_payload(text)).unwrap();
    assert_eq!(crypto::inflate(&unwrapped, Wrap::Zlib).unwrap(), text);
}

#[test]
fn krc_payload_renders_back_to_timed_text() {
    init_logs();
    let krc_text = "[ar:Artist]\n[1000,2000]<0,500,0>Hel<500,1500,0>lo";

    let unwrapped = crypto::xor_unwrap(&krc_payload(krc_text)).unwrap();
    let decoded = crypto::inflate(&unwrapped, Wrap::Zlib).unwrap();
    let doc = krc::parse(&decoded).unwrap();

    let word_synced = lyrics::render(&doc, DisplayMode::WordByWord, false);
    assert_eq!(word_synced, "[00:01.000]Hel[00:01.500]lo[00:03.000]");

    let line_synced = lyrics::render(&doc, DisplayMode::LineByLine, false);
    assert_eq!(line_synced, "[00:01.000]Hello[00:03.000]");
}

#[tokio::test]
async fn matching_without_sources_reports_no_candidate() {
    init_logs();
    let track = LocalTrackDescriptor {
        file_name: "Artist - Song Title.mp3".to_string(),
        duration_ms: 200_000,
        ..Default::default()
    };

    let outcome = matcher::match_track(&track, &[], &Settings::default()).await;
    assert!(matches!(outcome, MatchOutcome::NoCandidate));
}

#[tokio::test]
async fn batch_cancelled_mid_run_stops_after_current_item() {
    init_logs();
    let tracks = vec![
        LocalTrackDescriptor {
            file_name: "Artist - One.mp3".to_string(),
            ..Default::default()
        },
        LocalTrackDescriptor {
            file_name: "Artist - Two.mp3".to_string(),
            ..Default::default()
        },
    ];
    let settings = Settings {
        batch_delay_ms: 0,
        ..Settings::default()
    };

    let cancel = CancellationToken::new();
    let mut persisted: Vec<String> = Vec::new();

    let outcome = matcher::batch_match(
        &tracks,
        &[],
        &settings,
        &cancel,
        |progress| {
            // Pull the plug while the second item is in flight.
            if progress.index == 2 {
                cancel.cancel();
            }
        },
        |track, _, _| {
            persisted.push(track.file_name.clone());
            Ok(())
        },
    )
    .await;

    // Only the first item ran to completion; with no sources it failed,
    // and nothing that was persisted before the cancel is touched.
    assert!(outcome.cancelled);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.succeeded, 0);
    assert!(persisted.is_empty());
}
