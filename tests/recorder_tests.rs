use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use ztrack::{fields, ArtifactOptions, Event, EventKind, EventRecorder, Fields, Meta, RecorderConfig, TrackError};

fn lines(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn track_event(n: i64) -> Event {
    Event::new(EventKind::Track, 0, Meta::new(), fields([("n", n)]))
}

#[test]
fn test_ids_increase_across_clones() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = ztrack::create(dir.path(), false).unwrap();

    let mut a = tracker.clone();
    let mut b = tracker.with_fields(fields([("who", "b")]));
    for _ in 0..4 {
        a.track(fields([("who", "a")])).unwrap();
        b.track(Fields::new()).unwrap();
    }
    drop(a);
    drop(b);
    drop(tracker);

    let ids: Vec<String> = lines(&dir.path().join("default.event.json"))
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = (1..=8).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_flush_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecorderConfig::new(dir.path()).with_flush_threshold(3);
    let mut tracker = ztrack::create_with(config).unwrap();
    let path = dir.path().join("default.event.json");

    for i in 0..3 {
        tracker.track(fields([("i", i)])).unwrap();
    }
    assert!(lines(&path).is_empty(), "Buffer at threshold must not flush yet");

    tracker.track(fields([("i", 3)])).unwrap();
    assert_eq!(lines(&path).len(), 4, "Exceeding the threshold flushes everything");

    tracker.track(fields([("i", 4)])).unwrap();
    tracker.finalize().unwrap();
    let written = lines(&path);
    assert_eq!(written.len(), 5);
    assert_eq!(written[4]["data"]["i"], 4);
}

#[test]
fn test_event_line_shape() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = ztrack::create(dir.path(), false).unwrap();
    tracker
        .with_meta(fields([("step", 2)]))
        .track(fields([("nested", ztrack::Value::from(fields([("k", vec![1, 2])])))]))
        .unwrap();
    tracker.finalize().unwrap();

    let written = lines(&dir.path().join("default.event.json"));
    let obj = written[0].as_object().unwrap();
    let mut keys: Vec<&str> = obj.keys().map(|k| k.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["data", "id", "meta", "perf_ts", "ts", "type"]);
    assert_eq!(obj["type"], "z.tk");
    assert_eq!(obj["meta"]["step"], 2);
    assert_eq!(obj["data"]["nested"]["k"], serde_json::json!([1, 2]));
}

#[test]
fn test_append_preserves_previous_runs() {
    let dir = tempfile::tempdir().unwrap();
    for run in 0..2 {
        let mut tracker = ztrack::create(dir.path(), false).unwrap();
        tracker.track(fields([("run", run)])).unwrap();
        tracker.finalize().unwrap();
    }

    let written = lines(&dir.path().join("default.event.json"));
    assert_eq!(written.len(), 2);
    assert_eq!(written[0]["data"]["run"], 0);
    assert_eq!(written[1]["data"]["run"], 1);

    let ids: Vec<&str> = written.iter().map(|v| v["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["1", "2"], "Ids continue across runs in one file");
}

#[test]
fn test_ids_resume_after_highest_existing_id() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.event.json");
    let mut previous = track_event(0);
    previous.id = "41".to_string();
    let mut content = serde_json::to_string(&previous).unwrap();
    content.push_str("\nnot json\n\n");
    fs::write(&path, content).unwrap();

    let mut tracker = ztrack::create(dir.path(), false).unwrap();
    tracker.track(fields([("n", 1)])).unwrap();
    tracker.finalize().unwrap();

    let content = fs::read_to_string(&path).unwrap();
    let last: serde_json::Value = serde_json::from_str(content.lines().last().unwrap()).unwrap();
    assert_eq!(last["id"], "42");
}

#[test]
fn test_refcount_finalizes_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut root = ztrack::create(dir.path(), false).unwrap();
    let recorder = Rc::clone(root.recorder());

    let mut clones: Vec<ztrack::Tracker> = (0..5).map(|_| root.clone()).collect();
    assert_eq!(recorder.borrow().share_count(), 6);

    for (i, t) in clones.iter_mut().enumerate() {
        t.with_reporter(if i % 2 == 0 { "even" } else { "odd" })
            .track(fields([("i", i)]))
            .unwrap();
    }
    root.finalize().unwrap();
    for t in clones.iter_mut().skip(1) {
        t.finalize().unwrap();
    }

    // One clone still alive: nothing closed yet
    assert!(!recorder.borrow().is_finalized());
    assert_eq!(recorder.borrow().reporter_names(), vec!["even", "odd"]);
    assert!(lines(&dir.path().join("even.event.json")).is_empty());

    clones[0].finalize().unwrap();
    assert!(recorder.borrow().is_finalized());
    assert!(recorder.borrow().reporter_names().is_empty());
    assert_eq!(recorder.borrow().share_count(), 0);
    assert_eq!(lines(&dir.path().join("even.event.json")).len(), 3);
    assert_eq!(lines(&dir.path().join("odd.event.json")).len(), 2);

    // Redundant finalize on a released tracker stays harmless
    clones[0].finalize().unwrap();
}

#[test]
fn test_drop_releases_share() {
    let dir = tempfile::tempdir().unwrap();
    let root = ztrack::create(dir.path(), false).unwrap();
    let recorder = Rc::clone(root.recorder());
    {
        let mut scoped = root.with_fields(fields([("scope", 1)]));
        scoped.track(Fields::new()).unwrap();
        assert_eq!(recorder.borrow().share_count(), 2);
    }
    assert_eq!(recorder.borrow().share_count(), 1);
    drop(root);
    assert!(recorder.borrow().is_finalized());
    assert_eq!(lines(&dir.path().join("default.event.json")).len(), 1);
}

#[test]
fn test_use_after_finalize_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = ztrack::create(dir.path(), false).unwrap();
    let recorder = Rc::clone(tracker.recorder());
    tracker.finalize().unwrap();

    let mut rec = recorder.borrow_mut();
    assert!(matches!(rec.record_event(track_event(1), "default"), Err(TrackError::RecorderFinalized)));
    assert!(matches!(rec.next_span_id(), Err(TrackError::RecorderFinalized)));
    assert!(matches!(rec.unshare(), Err(TrackError::RecorderFinalized)));
    let saved = rec.save_artifact("x", |_: &str, _: &Path| Ok(()), ArtifactOptions::new());
    assert!(matches!(saved, Err(TrackError::RecorderFinalized)));

    // No file was reopened
    assert!(!dir.path().join("default.event.json").exists());
}

#[test]
fn test_callback_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = EventRecorder::new(RecorderConfig::new(dir.path())).unwrap();
    recorder.share();

    let calls = Rc::new(RefCell::new(Vec::new()));
    let c1 = Rc::clone(&calls);
    let c2 = Rc::clone(&calls);
    recorder
        .register_callback(Box::new(|_: &Event, _: &str| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("observer down"))
        }))
        .unwrap();
    recorder
        .register_callback(Box::new(move |evt: &Event, _: &str| -> anyhow::Result<()> {
            c1.borrow_mut().push(format!("second:{}", evt.id));
            panic!("observer bug");
        }))
        .unwrap();
    recorder
        .register_callback(Box::new(move |evt: &Event, reporter: &str| -> anyhow::Result<()> {
            c2.borrow_mut().push(format!("third:{}:{}", reporter, evt.id));
            Ok(())
        }))
        .unwrap();

    recorder.record_event(track_event(1), "metrics").unwrap();
    recorder.record_event(track_event(2), "metrics").unwrap();

    assert_eq!(
        *calls.borrow(),
        vec!["second:1", "third:metrics:1", "second:2", "third:metrics:2"]
    );
    recorder.unshare().unwrap();
    assert_eq!(lines(&dir.path().join("metrics.event.json")).len(), 2);
}

#[test]
fn test_span_and_artifact_ids_are_separate() {
    let mut recorder = EventRecorder::new(RecorderConfig::new("unused").with_dry_run(true)).unwrap();
    recorder.share();

    assert_eq!(recorder.next_span_id().unwrap(), "1");
    let a = recorder
        .save_artifact("a", |_: &str, _: &Path| Ok(()), ArtifactOptions::new())
        .unwrap();
    assert_eq!(a.url, "data_1001.bin");
    assert_eq!(recorder.next_span_id().unwrap(), "2");
}

#[test]
fn test_dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("preview");
    let mut tracker = ztrack::create(&run_dir, true).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    tracker
        .register_event_callback(move |evt: &Event, _: &str| {
            sink.borrow_mut().push(evt.clone());
            Ok(())
        })
        .unwrap();

    let saves = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&saves);
    let artifact = tracker
        .artifact(
            "payload",
            move |_: &str, _: &Path| {
                *counter.borrow_mut() += 1;
                Ok(())
            },
            ArtifactOptions::new().prefix("img").format("png"),
        )
        .unwrap();
    assert_eq!(artifact.url, "img_1001.png");
    assert_eq!(*saves.borrow(), 0, "Save function must not run in dry-run mode");

    tracker.track(fields([("image", artifact)])).unwrap();
    tracker.finalize().unwrap();

    assert!(!run_dir.exists(), "Dry run must not create directories");
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1, "Callbacks still fire in dry-run mode");
    assert!(seen[0].id.is_empty(), "No reporter assigns ids in dry-run mode");
    assert_eq!(seen[0].data["image"].as_artifact().unwrap().format, "png");
}

#[test]
fn test_directories_created_on_construction() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("a").join("b");
    let recorder = EventRecorder::new(RecorderConfig::new(&run_dir)).unwrap();

    assert!(run_dir.join("artifacts").is_dir());
    assert!(recorder.reporter_names().is_empty());
    // Reporter files appear lazily
    assert_eq!(fs::read_dir(&run_dir).unwrap().count(), 1);
}
