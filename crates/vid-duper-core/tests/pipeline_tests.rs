mod common;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

use common::{config_for, file_name, write_video, FakeSampler};
use vid_duper_core::{
    DecodeError, Error, ProgressReporter, ScanEngine, ScanPhase, ScanReport, SilentReporter,
};

fn scan(root: &Path, threshold: f64) -> (ScanReport, Arc<FakeSampler>) {
    let sampler = Arc::new(FakeSampler::new());
    let mut config = config_for(root, None);
    config.threshold = threshold;
    let report = ScanEngine::new(config)
        .with_sampler(sampler.clone())
        .run(&SilentReporter)
        .unwrap();
    (report, sampler)
}

fn group_names(report: &ScanReport) -> Vec<Vec<String>> {
    report
        .groups
        .iter()
        .map(|g| g.members.iter().map(|m| file_name(&m.path)).collect())
        .collect()
}

#[test]
fn test_byte_identical_copies_form_one_group() {
    let tmp = tempdir().unwrap();
    write_video(tmp.path(), "holiday.mp4", "seed=11");
    write_video(tmp.path(), "holiday (copy).mp4", "seed=11");

    let (report, _) = scan(tmp.path(), 0.8);
    assert_eq!(report.groups.len(), 1);
    let group = &report.groups[0];
    assert_eq!(group.len(), 2);
    assert!(group.members.iter().all(|m| m.similarity == 1.0));
    assert!(group.pairs.iter().all(|p| p.score == 1.0));
}

#[test]
fn test_lower_resolution_reencode_is_grouped() {
    let tmp = tempdir().unwrap();
    write_video(tmp.path(), "concert_hd.mp4", "seed=21 w=720 h=400 noise=2");
    write_video(tmp.path(), "concert_small.mp4", "seed=21 w=360 h=200 noise=3");

    let (report, _) = scan(tmp.path(), 0.8);
    assert_eq!(report.groups.len(), 1);
    let group = &report.groups[0];
    assert_eq!(file_name(&group.representative), "concert_hd.mp4");

    let small = group
        .members
        .iter()
        .find(|m| file_name(&m.path) == "concert_small.mp4")
        .unwrap();
    assert!(small.similarity >= 0.85, "similarity was {}", small.similarity);
    assert_eq!(small.width, 360);
}

#[test]
fn test_unrelated_video_stays_ungrouped() {
    let tmp = tempdir().unwrap();
    write_video(tmp.path(), "a.mp4", "seed=31");
    write_video(tmp.path(), "a_copy.mp4", "seed=31");
    write_video(tmp.path(), "b.mp4", "seed=99");

    let (report, _) = scan(tmp.path(), 0.8);
    assert_eq!(group_names(&report), vec![vec!["a.mp4", "a_copy.mp4"]]);
    assert_eq!(report.hashed, 3);
}

#[test]
fn test_corrupt_file_is_skipped_and_rest_cluster() {
    let tmp = tempdir().unwrap();
    for i in 0..5 {
        write_video(tmp.path(), &format!("clip{}_a.mp4", i), &format!("seed={}", 40 + i));
        write_video(tmp.path(), &format!("clip{}_b.mov", i), &format!("seed={}", 40 + i));
    }
    write_video(tmp.path(), "broken.avi", "CORRUPT header");

    let (report, sampler) = scan(tmp.path(), 0.8);
    assert_eq!(sampler.calls(), 11);
    assert_eq!(report.enumerated, 11);
    assert_eq!(report.hashed, 10);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.enumerated, report.hashed + report.skipped.len());
    assert_eq!(file_name(&report.skipped[0].record.path), "broken.avi");
    assert!(matches!(report.skipped[0].error, DecodeError::Unreadable { .. }));

    assert_eq!(report.groups.len(), 5);
    assert!(report.groups.iter().all(|g| g.len() == 2));
}

#[test]
fn test_partially_decodable_video_is_hashed_not_skipped() {
    let tmp = tempdir().unwrap();
    write_video(tmp.path(), "full.mkv", "seed=51");
    write_video(tmp.path(), "truncated.mkv", "seed=51 frames=4");
    write_video(tmp.path(), "empty_stream.mkv", "seed=51 frames=0");

    let (report, _) = scan(tmp.path(), 0.8);
    assert_eq!(report.hashed, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(file_name(&report.skipped[0].record.path), "empty_stream.mkv");
    assert!(matches!(report.skipped[0].error, DecodeError::NoFrames { .. }));
}

#[test]
fn test_results_do_not_depend_on_thread_count() {
    let tmp = tempdir().unwrap();
    for i in 0..6 {
        write_video(tmp.path(), &format!("x{}.mp4", i), &format!("seed={}", i % 3));
    }

    let run = |threads: usize| {
        let mut config = config_for(tmp.path(), None);
        config.thread_count = threads;
        ScanEngine::new(config)
            .with_sampler(Arc::new(FakeSampler::new()))
            .run(&SilentReporter)
            .unwrap()
            .groups
    };
    assert_eq!(run(1), run(4));
}

#[test]
fn test_worker_pool_bounds_concurrent_decodes() {
    let tmp = tempdir().unwrap();
    for i in 0..8 {
        write_video(tmp.path(), &format!("v{}.mp4", i), &format!("seed={}", i));
    }
    let sampler = Arc::new(FakeSampler::with_delay(Duration::from_millis(30)));
    let mut config = config_for(tmp.path(), None);
    config.thread_count = 2;

    ScanEngine::new(config)
        .with_sampler(sampler.clone())
        .run(&SilentReporter)
        .unwrap();
    assert_eq!(sampler.calls(), 8);
    assert!(sampler.max_concurrency() <= 2);
}

#[test]
fn test_timed_out_decodes_stay_within_the_pool() {
    let tmp = tempdir().unwrap();
    for i in 0..3 {
        write_video(tmp.path(), &format!("slow{}.mp4", i), &format!("seed={}", i));
    }
    let sampler = Arc::new(FakeSampler::with_delay(Duration::from_millis(2500)));
    let mut config = config_for(tmp.path(), None);
    config.thread_count = 1;
    config.decode_timeout_secs = Some(1);

    let report = ScanEngine::new(config)
        .with_sampler(sampler.clone())
        .run(&SilentReporter)
        .unwrap();
    assert_eq!(report.skipped.len(), 3);
    assert!(report
        .skipped
        .iter()
        .all(|s| matches!(s.error, DecodeError::Timeout { .. })));
    assert_eq!(sampler.max_concurrency(), 1);
    assert_eq!(sampler.active(), 0, "no decode may outlive the scan");
}

#[test]
fn test_group_members_carry_quality_details() {
    let tmp = tempdir().unwrap();
    write_video(tmp.path(), "talk_full.mp4", "seed=71 w=720 h=400 fps=30 secs=60");
    write_video(tmp.path(), "talk_cut.mp4", "seed=71 w=360 h=200 fps=25 secs=60");

    let (report, _) = scan(tmp.path(), 0.8);
    assert_eq!(report.groups.len(), 1);
    let group = &report.groups[0];
    let kept = group.representative_member().unwrap();
    assert_eq!(file_name(&kept.path), "talk_full.mp4");
    assert_eq!(kept.fps, 30.0);
    assert!(kept.differences.is_empty());

    let cut = group
        .members
        .iter()
        .find(|m| file_name(&m.path) == "talk_cut.mp4")
        .unwrap();
    assert_eq!(cut.fps, 25.0);
    assert!(cut.bitrate_kbps > 0.0);
    assert_eq!(
        cut.differences[0].to_string(),
        "kept copy has higher resolution (720x400 vs 360x200)"
    );
    assert!(kept.quality_score > cut.quality_score);
}

#[derive(Default)]
struct RecordingReporter {
    progress: Mutex<Vec<(usize, usize)>>,
    skipped: Mutex<Vec<String>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ProgressReporter for RecordingReporter {
    fn on_hash_progress(&self, completed: usize, total: usize) {
        self.progress.lock().unwrap().push((completed, total));
        if let Some((after, token)) = &self.cancel_after {
            if completed >= *after {
                token.store(true, Ordering::SeqCst);
            }
        }
    }

    fn on_file_skipped(&self, path: &Path, _error: &DecodeError) {
        self.skipped.lock().unwrap().push(file_name(path));
    }
}

#[test]
fn test_progress_is_monotonic_and_complete() {
    let tmp = tempdir().unwrap();
    for i in 0..12 {
        write_video(tmp.path(), &format!("v{:02}.mp4", i), &format!("seed={}", i));
    }
    write_video(tmp.path(), "zz.mp4", "CORRUPT");

    let reporter = RecordingReporter::default();
    let engine = ScanEngine::new(config_for(tmp.path(), None))
        .with_sampler(Arc::new(FakeSampler::new()));
    engine.run(&reporter).unwrap();

    let progress = reporter.progress.lock().unwrap().clone();
    assert_eq!(progress.len(), 13);
    assert!(progress.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(progress.last(), Some(&(13, 13)));
    assert_eq!(*reporter.skipped.lock().unwrap(), vec!["zz.mp4".to_string()]);

    let snapshot = engine.status().snapshot();
    assert_eq!(snapshot.phase, ScanPhase::Done);
    assert_eq!((snapshot.completed, snapshot.total), (13, 13));
}

#[test]
fn test_cancellation_stops_new_work_and_keeps_cache() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("videos");
    for i in 0..20 {
        write_video(&root, &format!("v{:02}.mp4", i), &format!("seed={}", i));
    }
    let cache_path = tmp.path().join("cache.db");
    let sampler = Arc::new(FakeSampler::new());
    let mut config = config_for(&root, Some(&cache_path));
    config.thread_count = 1;

    let engine = ScanEngine::new(config).with_sampler(sampler.clone());
    let reporter = RecordingReporter {
        cancel_after: Some((3, engine.cancel_token())),
        ..RecordingReporter::default()
    };

    let result = engine.run(&reporter);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(engine.status().phase(), ScanPhase::Cancelled);
    let decoded = sampler.calls();
    assert!((3..20).contains(&decoded), "decoded {} files", decoded);

    // Work finished before cancelling is reused by the next scan.
    let report = ScanEngine::new(config_for(&root, Some(&cache_path)))
        .with_sampler(sampler.clone())
        .run(&SilentReporter)
        .unwrap();
    assert_eq!(report.cache.hits, decoded);
    assert_eq!(sampler.calls(), 20);
}

#[test]
fn test_spawned_scan_reports_through_handle() {
    let tmp = tempdir().unwrap();
    write_video(tmp.path(), "a.mp4", "seed=61");
    write_video(tmp.path(), "b.mp4", "seed=61");

    let engine = ScanEngine::new(config_for(tmp.path(), None))
        .with_sampler(Arc::new(FakeSampler::with_delay(Duration::from_millis(20))));
    let handle = engine.spawn(Arc::new(SilentReporter)).unwrap();

    while !handle.is_finished() {
        let progress = handle.poll_progress();
        assert!(progress.completed <= progress.total || progress.total == 0);
        std::thread::sleep(Duration::from_millis(5));
    }

    let report = handle.get_result().expect("finished scan must have a report");
    assert_eq!(report.groups.len(), 1);
    assert_eq!(handle.poll_progress().phase, ScanPhase::Done);
    assert_eq!(handle.wait().unwrap(), report);
}

#[test]
fn test_cancelled_handle_has_no_result() {
    let tmp = tempdir().unwrap();
    for i in 0..30 {
        write_video(tmp.path(), &format!("v{:02}.mp4", i), &format!("seed={}", i));
    }
    let mut config = config_for(tmp.path(), None);
    config.thread_count = 1;

    let engine = ScanEngine::new(config)
        .with_sampler(Arc::new(FakeSampler::with_delay(Duration::from_millis(50))));
    let handle = engine.spawn(Arc::new(SilentReporter)).unwrap();
    vid_duper_core::cancel(&handle);

    while !handle.is_finished() {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(vid_duper_core::poll_progress(&handle).phase, ScanPhase::Cancelled);
    assert!(vid_duper_core::get_result(&handle).is_none());
    assert!(matches!(handle.wait(), Err(Error::Cancelled)));
}
