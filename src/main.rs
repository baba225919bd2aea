use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ztrack::telemetry::sink::{channel_callback, RecordedEvent};
use ztrack::{fields, ArtifactOptions, RecorderConfig, Value};

const EPOCHS: i64 = 10;
const STEPS: i64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Setup Logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // 2. Run directory: argv[1], else env, else ./.local/tracks-<datetime>
    let default_dir = PathBuf::from(".local").join(format!("tracks-{}", ztrack::str_datetime()));
    let mut config = RecorderConfig::new(default_dir).with_env_overrides();
    if let Some(dir) = std::env::args().nth(1) {
        config.result_dir = PathBuf::from(dir);
    }
    let result_dir = config.result_dir.clone();
    tracing::info!("Recording run into {}", result_dir.display());

    // 3. Dashboard stand-in: count events flagged for tensorboard
    let (tx, mut rx) = mpsc::channel::<RecordedEvent>(1024);
    let consumer = tokio::spawn(async move {
        let mut flagged = 0u64;
        let mut total = 0u64;
        while let Some((evt, _reporter)) = rx.recv().await {
            total += 1;
            if evt.get_meta("tb").and_then(Value::as_bool).unwrap_or(false) {
                flagged += 1;
            }
        }
        (total, flagged)
    });

    record_run(config, tx)?;

    let (total, flagged) = consumer.await?;
    tracing::info!("Consumer saw {} events ({} tensorboard)", total, flagged);

    let reader = ztrack::Reader::new(&result_dir);
    if result_dir.exists() {
        for reporter in reader.reporters()? {
            let events = reader.events(&reporter)?;
            tracing::info!("{}: {} events", reporter, events.len());
        }
    }
    Ok(())
}

// Everything recorder-side is single-threaded; keep it off the async tasks.
fn record_run(config: RecorderConfig, tx: mpsc::Sender<RecordedEvent>) -> anyhow::Result<()> {
    let mut tracker = ztrack::create_with(config)?;
    tracker.register_event_callback(channel_callback(tx))?;

    tracker.track_config(
        &serde_json::json!({ "epochs": EPOCHS, "steps": STEPS, "lr": 0.001 }),
        "config",
    )?;

    for epoch in 0..EPOCHS {
        let mut step_tracker = tracker.with_settings(
            "",
            fields([("step", epoch * STEPS), ("epoch", epoch)]),
            None,
        );

        step_tracker.in_span("epoch", true, |t| -> anyhow::Result<()> {
            for idx in 0..STEPS {
                let mut t = t.with_meta(fields([("step", epoch * STEPS + idx)]));
                t.track_with(
                    Some(fields([
                        ("name", Value::from("hello, world")),
                        ("train/loss", Value::from(123)),
                    ])),
                    None,
                    false,
                )?;
                t.track_with(Some(fields([("name", "hello, world")])), None, false)?;

                t.with_fields(fields([
                    ("name", Value::from("asdf")),
                    ("age", Value::from(1)),
                    ("idx", Value::from(idx)),
                ]))
                .log_filtered(ztrack::LogLevel::Debug, "hello, world", &["image-1"], None)?
                .track(ztrack::Fields::new())?;

                t.track_with(
                    Some(fields([("train/loss", 1.23)])),
                    Some(fields([("tb", true)])),
                    true,
                )?;
            }
            Ok(())
        })?;

        let summary = format!("epoch {} done", epoch);
        let note = step_tracker.artifact(
            summary.as_str(),
            |text: &str, path: &Path| -> anyhow::Result<()> {
                std::fs::write(path, text)?;
                Ok(())
            },
            ArtifactOptions::new().prefix("note").format("txt"),
        )?;
        step_tracker.track(fields([("note", note)]))?;
        step_tracker.info("epoch finished")?;
    }

    tracker.finalize()?;
    Ok(())
}
