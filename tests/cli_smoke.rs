use std::path::PathBuf;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_scenecap")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "scenecap.exe"
            } else {
                "scenecap"
            });
            p
        })
}

#[test]
fn cli_snapshot_writes_png() {
    let dir = PathBuf::from("target").join("cli_smoke").join("snapshot");
    let _ = std::fs::remove_dir_all(&dir);
    let out_path = dir.join("frame.png");

    let status = std::process::Command::new(exe())
        .args(["--out-dir"])
        .arg(&dir)
        .args(["snapshot", "--width", "64", "--height", "48", "--out"])
        .arg(&out_path)
        .env_remove("SCENECAP_OUTPUT_DIR")
        .status()
        .unwrap();

    assert!(status.success());
    let img = image::open(&out_path).unwrap();
    assert_eq!((img.width(), img.height()), (64, 48));
}

#[test]
fn cli_record_export_clear_with_manifest_writer() {
    let dir = PathBuf::from("target").join("cli_smoke").join("record");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();

    let config_path = dir.join("config.json");
    let out_dir = dir.join("out");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "output_dir": out_dir,
            "file_name": "recording.json",
            "target_fps": 30,
            "writer": "manifest",
        })
        .to_string(),
    )
    .unwrap();

    let run = |args: &[&str]| {
        std::process::Command::new(exe())
            .arg("--config")
            .arg(&config_path)
            .args(args)
            .env_remove("SCENECAP_OUTPUT_DIR")
            .output()
            .unwrap()
    };

    let rec = run(&[
        "record", "--seconds", "0.4", "--width", "96", "--height", "54",
    ]);
    assert!(rec.status.success(), "{}", String::from_utf8_lossy(&rec.stderr));
    let manifest = scenecap::TrackManifest::read(out_dir.join("recording.json")).unwrap();
    assert_eq!(manifest.size(), scenecap::FrameSize::new(96, 54));
    assert!(!manifest.samples.is_empty());

    let status = run(&["status"]);
    assert!(status.status.success());
    assert!(String::from_utf8_lossy(&status.stdout).contains("present"));

    let copy = dir.join("copy.json");
    let export = run(&["export", "--to", copy.to_str().unwrap()]);
    assert!(export.status.success());
    assert!(copy.exists());

    let clear = run(&["clear"]);
    assert!(clear.status.success());
    assert!(!out_dir.join("recording.json").exists());

    let export_again = run(&["export", "--to", copy.to_str().unwrap()]);
    assert!(!export_again.status.success());
}
