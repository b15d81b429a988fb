use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use scenecap::{
    AppendOutcome, CaptureConfig, CaptureController, CaptureError, EncoderState, ErrorKind,
    FfmpegWriter, FrameEncoder, FrameRGBA, FrameSize, MediaTime, SceneGraph, TrackConfig,
    TrackWriter, TrackingMode, WriterKind, is_ffmpeg_on_path,
};

fn scratch(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("ffmpeg_mp4").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn ffprobe_on_path() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Decode the file and return `(video streams, total streams, decoded video frames)`.
fn decoded_streams(path: &Path) -> (usize, usize, u64) {
    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-count_frames",
            "-show_entries",
            "stream=codec_type,nb_read_frames",
            "-of",
            "csv=p=0",
        ])
        .arg(path)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let text = String::from_utf8(out.stdout).unwrap();
    let streams: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let video: Vec<&str> = streams
        .iter()
        .copied()
        .filter(|l| l.split(',').any(|f| f.trim() == "video"))
        .collect();
    let frames = video
        .iter()
        .flat_map(|l| l.split(','))
        .filter_map(|f| f.trim().parse::<u64>().ok())
        .sum();
    (video.len(), streams.len(), frames)
}

fn wait_until_ready(w: &FfmpegWriter) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !w.is_ready_for_more_media_data() {
        assert!(Instant::now() < deadline, "ffmpeg never drained its pipe");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn has_mp4_header(path: &Path) -> bool {
    std::fs::read(path)
        .map(|b| b.len() > 12 && &b[4..8] == b"ftyp")
        .unwrap_or(false)
}

#[test]
fn encoder_writes_playable_mp4() {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let size = FrameSize::new(64, 36);
    let out = scratch("encoder").join("recording.mp4");
    let enc = FrameEncoder::open(TrackConfig::new(size, &out, 30), &WriterKind::Ffmpeg).unwrap();

    for i in 0..10u8 {
        let frame = FrameRGBA::filled(size, [i * 20, 64, 128, 255], true);
        enc.write(&frame, MediaTime::new(i64::from(i), 30).unwrap());
        // The pipe holds only a couple of frames; give ffmpeg time to take them.
        std::thread::sleep(Duration::from_millis(15));
    }

    let (tx, rx) = mpsc::channel();
    enc.finalize(move |s| tx.send(s).unwrap());
    assert_eq!(rx.recv().unwrap(), EncoderState::Completed);
    assert!(has_mp4_header(&out));
    assert!(!enc.session().staging_path.exists());
    let s = enc.session();
    assert_eq!(s.frames_appended + s.frames_dropped, 10);
    assert!(s.frames_appended >= 1);
}

#[test]
fn writer_drops_frames_that_do_not_advance_the_grid() {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let size = FrameSize::new(16, 16);
    let out = scratch("grid").join("recording.mp4");
    let mut w = FfmpegWriter::create(&TrackConfig::new(size, &out, 30)).unwrap();
    w.start_writing(MediaTime::ZERO).unwrap();

    let frame = FrameRGBA::filled(size, [0, 0, 0, 255], true);
    assert_eq!(w.append(&frame, MediaTime::ZERO).unwrap(), AppendOutcome::Appended);
    // 5 ms later still rounds to slot 0.
    assert_eq!(
        w.append(&frame, MediaTime::from_micros(5_000)).unwrap(),
        AppendOutcome::Dropped
    );
    assert_eq!(
        w.append(&frame, MediaTime::from_micros(-40_000)).unwrap(),
        AppendOutcome::Dropped
    );
    w.cancel();
    assert!(!out.exists());
}

#[test]
fn odd_view_sizes_are_rounded_for_recording() {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    let dir = scratch("controller");
    let cfg = CaptureConfig {
        output_dir: dir,
        target_fps: 30,
        writer: WriterKind::Ffmpeg,
        ..CaptureConfig::default()
    };
    let scene = SceneGraph::new(TrackingMode::World).shared();
    let renderer = Arc::new(Mutex::new(scenecap::CpuSceneRenderer::new(
        scene,
        cfg.render_settings(),
    )));
    let c = CaptureController::new(&cfg, renderer).unwrap();
    let errors = Arc::new(Mutex::new(Vec::<ErrorKind>::new()));
    let sink = Arc::clone(&errors);
    c.set_error_callback(Some(Arc::new(move |e: &CaptureError| {
        sink.lock().unwrap().push(e.kind());
    })));
    c.set_view_size(101.0, 57.0);

    c.start_recording();
    assert!(c.is_recording());
    std::thread::sleep(Duration::from_millis(300));
    let (tx, rx) = mpsc::channel();
    c.stop_recording(move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(30)).unwrap();

    assert!(errors.lock().unwrap().is_empty(), "{:?}", errors.lock().unwrap());
    assert!(c.has_preview());
    assert!(has_mp4_header(c.output_path()));
    assert_eq!(c.last_session().unwrap().size, FrameSize::new(100, 56));
}

#[test]
fn each_appended_frame_is_one_sample_even_when_timestamps_skip_slots() {
    if !is_ffmpeg_on_path() {
        eprintln!("skipping: ffmpeg not on PATH");
        return;
    }
    // A 30 Hz host feeding a 60 fps track lands on every other slot.
    let size = FrameSize::new(16, 16);
    let out = scratch("skipped_slots").join("recording.mp4");
    let mut w = FfmpegWriter::create(&TrackConfig::new(size, &out, 60)).unwrap();
    w.start_writing(MediaTime::ZERO).unwrap();

    for i in 0..10u8 {
        wait_until_ready(&w);
        let frame = FrameRGBA::filled(size, [i * 20, 0, 0, 255], true);
        let pts = MediaTime::new(i64::from(i), 30).unwrap();
        assert_eq!(w.append(&frame, pts).unwrap(), AppendOutcome::Appended);
    }
    w.finish_writing().unwrap();
    assert_eq!(w.frames_written(), 10);

    let staging = TrackConfig::new(size, &out, 60).staging_path();
    if ffprobe_on_path() {
        let (video, total, frames) = decoded_streams(&staging);
        assert_eq!((video, total), (1, 1));
        assert_eq!(frames, 10);
    }
    let _ = std::fs::remove_file(staging);
}

#[test]
fn hd_recording_at_the_default_rate_never_adds_samples() {
    if !is_ffmpeg_on_path() || !ffprobe_on_path() {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }
    let size = FrameSize::new(1280, 720);
    let fps = CaptureConfig::default().target_fps;
    let out = scratch("hd_default_rate").join("recording.mp4");
    let enc = FrameEncoder::open(TrackConfig::new(size, &out, fps), &WriterKind::Ffmpeg).unwrap();

    for i in 0..10u8 {
        let frame = FrameRGBA::filled(size, [i * 20, 90, 160, 255], true);
        enc.write(&frame, MediaTime::new(i64::from(i), 30).unwrap());
        std::thread::sleep(Duration::from_millis(33));
    }

    let (tx, rx) = mpsc::channel();
    enc.finalize(move |s| tx.send(s).unwrap());
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(60)).unwrap(),
        EncoderState::Completed
    );

    let s = enc.session();
    assert_eq!(s.frames_appended + s.frames_dropped, 10);
    assert!(s.frames_appended >= 1);

    let (video, total, frames) = decoded_streams(&out);
    assert_eq!((video, total), (1, 1));
    assert!(frames <= 10, "{frames} samples from 10 frames");
    assert_eq!(frames, s.frames_appended);
}
