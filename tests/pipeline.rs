//! End-to-end runs of the threaded pipeline

use crossbeam_channel::unbounded;
use glim_flux::upload::{UploadError, UploadPayload};
use glim_flux::{ArousalReading, Band, GlimPipeline, HrSample, PipelineConfig, Workers};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn capture(values: &[&str]) -> Vec<u8> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("{},-0.02,0.98,0.10,3.88,31.5,{},0\r\n", i, v))
        .collect::<String>()
        .into_bytes()
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_threaded_run_batches_and_classifies() {
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let uploads_clone = Arc::clone(&uploads);
    let sink = move |payload: &UploadPayload| -> Result<(), UploadError> {
        uploads_clone.lock().push(payload.clone());
        Ok(())
    };

    let config = PipelineConfig {
        batch_capacity: 4,
        upload_queue_depth: 16,
        ..Default::default()
    };
    let pipeline = Arc::new(GlimPipeline::with_upload_sink(config, sink).unwrap());

    let bands = Arc::new(Mutex::new(Vec::new()));
    let bands_clone = Arc::clone(&bands);
    pipeline.add_display(move |reading: &ArousalReading| {
        bands_clone.lock().push((reading.sequence, reading.band));
    });

    let values = ["1.5", "1.52", "1.55", "1.6", "1.7", "1.8", "1.9", "1.95", "2.0", "2.2"];
    let (hr_tx, hr_rx) = unbounded();
    let workers = Workers::start(Arc::clone(&pipeline), Cursor::new(capture(&values)), hr_rx).unwrap();

    hr_tx.send(HrSample::new(80.0, 0.0)).unwrap();
    hr_tx.send(HrSample::new(120.0, 1.2)).unwrap();
    drop(hr_tx);

    let totals = workers.join().unwrap();
    assert_eq!(totals.eda_frames, 10);
    assert_eq!(totals.hr_packets, 2);

    // EDA 2.2 is +46% (level 4), HR 120 is +50% (level 5)
    let reading = pipeline.reading();
    assert_eq!(reading.latest_hr, 120.0);
    assert_eq!(reading.latest_eda, 2.2);
    assert_eq!(reading.total_shift, 9);
    assert_eq!(reading.band, Band::Saturated);

    // Displays see a strictly newer reading each time and end on the final state
    let bands = bands.lock();
    assert!(!bands.is_empty() && bands.len() <= 12);
    assert!(bands.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(bands.last().map(|(_, band)| *band), Some(Band::Saturated));

    // Ten samples at capacity four: two full batches flushed, two left live
    assert_eq!(pipeline.buffered().len(), 2);
    let metrics = pipeline.close().unwrap().unwrap();
    assert_eq!(metrics.delivered, 2);
    assert_eq!(metrics.dropped, 0);

    let uploads = uploads.lock();
    let values_uploaded: Vec<Vec<String>> = uploads
        .iter()
        .map(|payload| match payload {
            UploadPayload::Data(batch) => batch.samples.iter().map(|s| s.value.clone()).collect(),
            other => panic!("unexpected payload: {:?}", other),
        })
        .collect();
    assert_eq!(
        values_uploaded,
        vec![
            vec!["1.5", "1.52", "1.55", "1.6"],
            vec!["1.7", "1.8", "1.9", "1.95"],
        ]
    );
}

#[test]
fn test_corrupt_lines_do_not_stop_ingestion() {
    let pipeline = Arc::new(GlimPipeline::new(PipelineConfig::default()).unwrap());

    let mut bytes = capture(&["1.6"]);
    bytes.extend_from_slice(b"garbage\n");
    bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
    bytes.extend(vec![b'x'; 2048]);
    bytes.push(b'\n');
    bytes.extend(capture(&["1.65"]));

    let (_hr_tx, hr_rx) = unbounded();
    let workers = Workers::start(Arc::clone(&pipeline), Cursor::new(bytes), hr_rx).unwrap();

    assert!(wait_for(|| pipeline.eda_summary().frames_decoded == 2));
    let totals = workers.stop_and_join().unwrap();
    assert_eq!(totals.eda_frames, 2);

    let summary = pipeline.eda_summary();
    assert_eq!(summary.decode_failures, 3);
    assert_eq!(summary.samples, 2);
    assert_eq!(pipeline.reading().latest_eda, 1.65);
}

#[test]
fn test_decomposition_window_tracks_stream() {
    let config = PipelineConfig {
        display_window: 3,
        ..Default::default()
    };
    let pipeline = GlimPipeline::new(config).unwrap();
    pipeline.ingest_eda(&capture(&["2.0", "2.0", "3.0", "3.0", "3.0"]));

    let trace = pipeline.trace();
    assert_eq!(trace.len(), 3);
    assert_eq!(trace[0].raw, 3.0);
    assert!(trace.iter().all(|p| (p.tonic + p.phasic - p.raw).abs() < 1e-5));
    // Tonic lags the step, so the phasic part stays positive
    assert!(trace.iter().all(|p| p.phasic > 0.0));
}
