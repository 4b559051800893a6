//! Integration tests for the batch pipeline: fan-out, draining into the
//! archive, and all-or-abort.

mod common;

use std::time::Duration;

use common::*;
use imgbatch::pipeline::{BatchFailure, BatchState, JobState};
use imgbatch_common::{BatchLimits, ConversionRequest, Error, Quality, TargetFormat, UploadedImage};
use imgbatch_convert::Converter;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

fn png_request() -> ConversionRequest {
    ConversionRequest::new(TargetFormat::Png, Quality::DEFAULT)
}

/// Fails any input containing `BAD`, copies everything else.
const FAIL_ON_BAD: &str = r#"data=$(cat); case "$data" in *BAD*) echo "corrupt input" >&2; exit 1;; esac; printf '%s' "$data""#;

/// Sleeps for the number of seconds on the first input line, then copies the rest.
const SLEEP_THEN_COPY: &str = r#"IFS= read -r delay; sleep "$delay"; cat"#;

// ---------------------------------------------------------------------------
// Success path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_input_yields_one_named_entry() {
    let orch = orchestrator(identity_converter());
    let (archive, result) = run_batch(
        &orch,
        vec![upload("holiday/beach.heic", &b"pixels"[..])],
        ConversionRequest::new(TargetFormat::Jpeg, Quality::DEFAULT),
    )
    .await;

    assert!(result.is_finalized(), "failure: {:?}", result.failure);
    let entries = read_entries(&archive);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "beach.jpg");
    assert_eq!(entries[0].1, b"pixels");
}

#[tokio::test]
async fn all_success_batch_finalizes_with_every_entry() {
    let orch = orchestrator(identity_converter()).with_max_concurrent_jobs(3);
    let images: Vec<UploadedImage> = (0..10)
        .map(|i| upload(&format!("img{i}.jpeg"), format!("content {i}").into_bytes()))
        .collect();

    let (archive, result) = run_batch(&orch, images, png_request()).await;

    assert_eq!(result.state, BatchState::Finalized);
    assert!(result.failure.is_none());
    assert_eq!(result.entries_written, 10);
    assert_eq!(result.succeeded(), 10);
    assert_eq!(result.bytes_written, archive.len() as u64);
    assert!(has_trailer(&archive));

    let mut entries = read_entries(&archive);
    entries.sort();
    for (i, (name, data)) in entries.iter().enumerate() {
        assert_eq!(name, &format!("img{i}.png"));
        assert_eq!(data, format!("content {i}").as_bytes());
    }

    for job in &result.jobs {
        assert_eq!(job.state(), JobState::Succeeded);
        assert_eq!(job.entry().map(|e| e.name.as_str()), Some(job.entry_name.as_str()));
    }
}

#[tokio::test]
async fn duplicate_output_names_are_kept() {
    let orch = orchestrator(identity_converter());
    let (archive, result) = run_batch(
        &orch,
        vec![upload("a.png", &b"first"[..]), upload("other/a.jpg", &b"second"[..])],
        png_request(),
    )
    .await;

    assert!(result.is_finalized());
    let mut entries = read_entries(&archive);
    entries.sort();
    assert_eq!(
        entries,
        vec![
            ("a.png".to_string(), b"first".to_vec()),
            ("a.png".to_string(), b"second".to_vec()),
        ]
    );
}

#[tokio::test]
async fn same_batch_twice_gives_identical_bytes() {
    let orch = orchestrator(identity_converter()).with_max_concurrent_jobs(1);
    let images = || {
        vec![
            upload("x.png", vec![7u8; 100_000]),
            upload("y.png", &b"small"[..]),
        ]
    };

    let (first, r1) = run_batch(&orch, images(), png_request()).await;
    let (second, r2) = run_batch(&orch, images(), png_request()).await;

    assert!(r1.is_finalized() && r2.is_finalized());
    assert_eq!(first, second);
}

#[tokio::test]
async fn randomized_completion_order_never_corrupts_entries() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x1a2b_3c4d);

    for round in 0..3 {
        let orch = orchestrator(script_converter(SLEEP_THEN_COPY)).with_max_concurrent_jobs(4);

        let mut expected = Vec::new();
        let mut images = Vec::new();
        for i in 0..12 {
            let delay_ms: u32 = rng.gen_range(0..150);
            let len: usize = rng.gen_range(1..150_000);
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();

            let mut input = format!("0.{delay_ms:03}\n").into_bytes();
            input.extend_from_slice(&payload);
            images.push(upload(&format!("r{round}_{i:02}.png"), input));
            expected.push((format!("r{round}_{i:02}.webp"), payload));
        }

        let (archive, result) = run_batch(
            &orch,
            images,
            ConversionRequest::new(TargetFormat::Webp, Quality::DEFAULT),
        )
        .await;

        assert!(result.is_finalized(), "round {round}: {:?}", result.failure);
        let mut entries = read_entries(&archive);
        entries.sort();
        assert_eq!(entries.len(), expected.len());
        for ((name, data), (want_name, want_data)) in entries.iter().zip(&expected) {
            assert_eq!(name, want_name);
            assert!(data == want_data, "round {round}: {name} corrupted");
        }
    }
}

// ---------------------------------------------------------------------------
// Abort path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_failing_job_aborts_the_batch() {
    let orch = orchestrator(script_converter(FAIL_ON_BAD));
    let (archive, result) = run_batch(
        &orch,
        vec![upload("good.png", &b"fine"[..]), upload("bad.png", &b"BAD data"[..])],
        png_request(),
    )
    .await;

    assert_eq!(result.state, BatchState::Aborted);
    assert!(!has_trailer(&archive));
    assert!(zip::ZipArchive::new(std::io::Cursor::new(&archive)).is_err());

    match &result.failure {
        Some(BatchFailure::Job(err)) => {
            assert_eq!(err.filename, "bad.png");
            match &err.cause {
                Error::ConversionFailed { stderr, .. } => assert!(stderr.contains("corrupt input")),
                other => panic!("expected ConversionFailed, got {other:?}"),
            }
        }
        other => panic!("expected job failure, got {other:?}"),
    }

    let bad = &result.jobs[1];
    assert_eq!(bad.state(), JobState::Failed);
    assert!(result.jobs.iter().all(|j| j.state().is_terminal()));
}

#[tokio::test]
async fn failure_after_partial_output_leaves_no_trailer() {
    let orch = orchestrator(script_converter("cat >/dev/null; printf partial; exit 3"));
    let (archive, result) = run_batch(&orch, vec![upload("a.png", &b"x"[..])], png_request()).await;

    assert_eq!(result.state, BatchState::Aborted);
    assert_eq!(result.entries_written, 0);
    // The local header and some of the body were already streamed.
    assert!(!archive.is_empty());
    assert_eq!(&archive[..4], b"PK\x03\x04");
    assert!(!has_trailer(&archive));
    assert_eq!(result.jobs[0].state(), JobState::Failed);
}

#[tokio::test]
async fn overlong_entry_name_aborts_instead_of_finalizing() {
    let orch = orchestrator(identity_converter());
    let filename = format!("{}.jpg", "a".repeat(70_000));
    let (archive, result) = run_batch(&orch, vec![upload(&filename, &b"pixels"[..])], png_request()).await;

    assert!(!result.is_finalized());
    assert_eq!(result.state, BatchState::Aborted);
    assert!(!has_trailer(&archive));
    assert_eq!(result.entries_written, 0);
    assert!(matches!(
        result.failure.as_ref().map(|f| f.cause()),
        Some(Error::Rejected(_))
    ));
    assert_eq!(result.jobs[0].state(), JobState::Failed);
}

#[tokio::test]
async fn abort_cancels_jobs_still_waiting() {
    let script = r#"data=$(cat); case "$data" in *BAD*) exit 1;; esac; sleep 5; printf '%s' "$data""#;
    let orch = orchestrator(script_converter(script)).with_max_concurrent_jobs(2);

    let mut images = vec![upload("bad.png", &b"BAD"[..])];
    images.extend((0..6).map(|i| upload(&format!("slow{i}.png"), &b"ok"[..])));

    let started = std::time::Instant::now();
    let (archive, result) = run_batch(&orch, images, png_request()).await;

    assert_eq!(result.state, BatchState::Aborted);
    assert!(started.elapsed() < Duration::from_secs(4), "slow jobs were not killed");
    assert!(!has_trailer(&archive));
    assert_eq!(result.failed(), 7);
    assert_eq!(result.succeeded(), 0);
    let cancelled = result
        .jobs
        .iter()
        .filter(|j| matches!(j.error().map(|e| &e.cause), Some(Error::Cancelled)))
        .count();
    assert!(cancelled >= 5, "cancelled: {cancelled}");
}

#[tokio::test]
async fn cancellation_aborts_the_batch() {
    let orch = orchestrator(Converter::new("sleep").arg("10"));
    let batch = orch
        .prepare(vec![upload("a.png", &b"x"[..]), upload("b.png", &b"y"[..])], png_request())
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let mut out = Vec::new();
    let result = orch.run(batch, &mut out, cancel).await;

    assert_eq!(result.state, BatchState::Aborted);
    assert!(matches!(result.failure, Some(BatchFailure::Batch(Error::Cancelled))));
    assert!(out.is_empty());
    assert_eq!(result.failed(), 2);
}

#[tokio::test]
async fn hung_converter_times_out() {
    let converter = Converter::new("sleep")
        .arg("10")
        .timeout(Duration::from_millis(200));
    let orch = orchestrator(converter);
    let (_, result) = run_batch(&orch, vec![upload("a.png", &b"x"[..])], png_request()).await;

    assert_eq!(result.state, BatchState::Aborted);
    assert!(matches!(
        result.failure.as_ref().map(|f| f.cause()),
        Some(Error::Timeout { .. })
    ));
}

// ---------------------------------------------------------------------------
// Collecting: rejection before anything starts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn too_many_files_rejected_before_any_process_starts() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let converter = script_converter(r#"touch "$0"; cat"#).arg(marker.to_string_lossy().to_string());
    let orch = orchestrator(converter);

    let images: Vec<UploadedImage> = (0..51).map(|i| upload(&format!("{i}.png"), &b"x"[..])).collect();
    let err = orch.prepare(images, png_request()).unwrap_err();

    assert!(matches!(err, Error::Rejected(_)));
    assert!(err.to_string().contains("too many files"));
    assert_eq!(err.http_status(), 413);

    // Give a wrongly launched process time to leave its mark.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!marker.exists());
}

#[tokio::test]
async fn custom_limits_are_enforced() {
    let orch = orchestrator(identity_converter()).with_limits(BatchLimits {
        max_files: 2,
        max_file_bytes: 4,
    });

    let err = orch
        .prepare(vec![upload("a.png", &b"12345"[..])], png_request())
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));

    let err = orch
        .prepare(
            (0..3).map(|i| upload(&format!("{i}.png"), &b"1"[..])).collect(),
            png_request(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));

    assert!(orch.prepare(vec![upload("a.png", &b"1234"[..])], png_request()).is_ok());
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let orch = orchestrator(identity_converter());
    let err = orch.prepare(Vec::new(), png_request()).unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));
}

#[tokio::test]
async fn non_image_input_is_rejected() {
    let orch = orchestrator(identity_converter());
    let err = orch
        .prepare(
            vec![
                upload("a.png", &b"x"[..]),
                UploadedImage::new(&b"hello"[..], "notes.txt", "text/plain"),
            ],
            png_request(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
    assert!(err.to_string().contains("notes.txt"));
}

#[tokio::test]
async fn missing_converter_is_a_launch_error() {
    let orch = orchestrator(Converter::new("nonexistent_converter_xyz_12345"));
    let err = orch
        .prepare(vec![upload("a.png", &b"x"[..])], png_request())
        .unwrap_err();
    assert!(matches!(err, Error::Launch { .. }));
    assert_eq!(err.http_status(), 503);
}

// ---------------------------------------------------------------------------
// With ImageMagick installed
// ---------------------------------------------------------------------------

fn magick_orchestrator() -> imgbatch::PipelineOrchestrator {
    orchestrator(
        Converter::new("magick").args(["-", "-quality", "{quality}", "{format}:-"]),
    )
}

#[tokio::test]
async fn magick_converts_two_jpegs_to_png() {
    if !magick_available() {
        eprintln!("magick not installed, skipping");
        return;
    }

    let images = vec![
        UploadedImage::new(encoded_image(32, 16, image::ImageFormat::Jpeg), "one.jpg", "image/jpeg"),
        UploadedImage::new(encoded_image(20, 40, image::ImageFormat::Jpeg), "two.jpeg", "image/jpeg"),
    ];
    let (archive, result) = run_batch(&magick_orchestrator(), images, png_request()).await;

    assert!(result.is_finalized(), "failure: {:?}", result.failure);
    let mut entries = read_entries(&archive);
    entries.sort();
    assert_eq!(entries.len(), 2);

    let dims: Vec<(String, (u32, u32))> = entries
        .iter()
        .map(|(name, data)| {
            assert_eq!(image::guess_format(data).unwrap(), image::ImageFormat::Png);
            let decoded = image::load_from_memory(data).unwrap();
            (name.clone(), (decoded.width(), decoded.height()))
        })
        .collect();
    assert_eq!(
        dims,
        vec![
            ("one.png".to_string(), (32, 16)),
            ("two.png".to_string(), (20, 40)),
        ]
    );
}

async fn magick_png_pixels(input: &[u8]) -> image::RgbaImage {
    let (archive, result) = run_batch(
        &magick_orchestrator(),
        vec![UploadedImage::new(input.to_vec(), "a.png", "image/png")],
        png_request(),
    )
    .await;
    assert!(result.is_finalized(), "failure: {:?}", result.failure);
    let entries = read_entries(&archive);
    image::load_from_memory(&entries[0].1).unwrap().to_rgba8()
}

#[tokio::test]
async fn magick_conversion_is_pixel_idempotent() {
    if !magick_available() {
        eprintln!("magick not installed, skipping");
        return;
    }

    let input = encoded_image(24, 24, image::ImageFormat::Png);

    // PNG metadata may carry timestamps, so compare decoded pixels.
    let first = magick_png_pixels(&input).await;
    let second = magick_png_pixels(&input).await;
    assert_eq!(first.dimensions(), second.dimensions());
    assert!(first.as_raw() == second.as_raw());
}

#[tokio::test]
async fn magick_rejects_garbage_and_aborts() {
    if !magick_available() {
        eprintln!("magick not installed, skipping");
        return;
    }

    let images = vec![
        UploadedImage::new(encoded_image(8, 8, image::ImageFormat::Png), "ok.png", "image/png"),
        UploadedImage::new(&b"definitely not an image"[..], "broken.png", "image/png"),
    ];
    let (archive, result) = run_batch(&magick_orchestrator(), images, png_request()).await;

    assert_eq!(result.state, BatchState::Aborted);
    assert!(!has_trailer(&archive));
}
