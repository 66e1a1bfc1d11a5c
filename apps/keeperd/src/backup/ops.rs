use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use keeper_core::{
    BackupError, BackupReport, BackupRequest, ProcessError, QuiescePhase, StoreKind,
};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use super::Engine;
use super::quiesce::{PollOutcome, QuiesceClient};
use crate::notify::Severity;
use crate::retention;
use crate::runner::redacted_command_line;
use crate::stats::{format_duration, format_size};

/// End-to-end backup run: sweep, hold, poll until acknowledged, copy,
/// resume, compress, report. Exactly one run may be in flight; a second
/// request is rejected up front.
pub async fn run_backup(engine: &Engine, request: BackupRequest) -> Result<BackupReport, BackupError> {
    let _flight = engine.try_begin()?;
    let recipient = request.requester.as_deref();

    engine
        .notifier
        .notify(Severity::Info, "starting backup...", recipient);

    match drive(engine, &request).await {
        Ok(report) => {
            engine.notifier.notify(
                Severity::Info,
                &format!(
                    "backup finished in {}, archive size {}",
                    format_duration(report.duration),
                    format_size(report.size_bytes)
                ),
                recipient,
            );
            Ok(report)
        }
        Err(err) => {
            engine
                .notifier
                .notify(Severity::Error, &format!("backup failed: {err}"), recipient);
            Err(err)
        }
    }
}

async fn drive(engine: &Engine, request: &BackupRequest) -> Result<BackupReport, BackupError> {
    let started = Instant::now();
    let config = engine.config();

    // Pre-sweep is best effort and only ever applies to the normal store.
    if request.store.is_permanent() {
        debug!("permanent backup requested; retention does not apply");
    } else if config.retention().is_enabled() {
        if let Err(err) = retention::sweep(
            engine.runner.as_ref(),
            &config.helper,
            config.store_dir(StoreKind::Normal),
            config.retention(),
            config.format,
        )
        .await
        {
            warn!("{err}");
        }
    } else {
        debug!("retention disabled; skipping sweep");
    }

    reset_scratch(engine.scratch_dir()).await?;
    tokio::fs::create_dir_all(config.store_dir(request.store))
        .await
        .map_err(|err| BackupError::io("creating store directory", err))?;

    let quiesce = QuiesceClient::new(engine.console.clone(), engine.pattern.clone());

    if let Err(err) = quiesce.hold().await {
        warn!("{err}");
        // Some servers leave internal hold flags set even when the hold
        // fails; resume is an idempotent no-op when nothing is held.
        if let Err(err) = quiesce.resume().await {
            warn!("{err}");
        }
        trace_phase(QuiescePhase::Failed);
        return Err(BackupError::HoldRejected);
    }
    trace_phase(QuiescePhase::Held);

    // Every stage that requires the freeze runs in one place, so resume is
    // issued exactly once no matter which of them fails.
    let held = copy_while_held(engine, &quiesce).await;
    if let Err(err) = quiesce.resume().await {
        warn!("{err}");
    }
    trace_phase(QuiescePhase::Resumed);
    let attempts = held?;

    let archive = compress_scratch(engine, request.store).await?;
    let size_bytes = tokio::fs::metadata(&archive)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);

    // The scratch copy is only discarded once the archive exists; any
    // failure above leaves it in place for diagnostics. The archive is
    // already finished here, so a cleanup failure cannot fail the run.
    if let Err(err) = reset_scratch(engine.scratch_dir()).await {
        warn!("failed to clear scratch after archiving: {err}");
    }

    info!("backup created: {}", archive.display());
    Ok(BackupReport {
        archive,
        size_bytes,
        duration: started.elapsed(),
        attempts,
    })
}

/// Poll until the server acknowledges the freeze, then copy the acknowledged
/// files into the scratch area. Runs entirely inside the hold/resume bracket.
async fn copy_while_held(engine: &Engine, quiesce: &QuiesceClient) -> Result<u32, BackupError> {
    let config = engine.config();
    sleep(Duration::from_millis(config.initial_delay_ms)).await;

    let mut attempt = 1u32;
    let artifacts = loop {
        trace_phase(QuiescePhase::Querying(attempt));
        match quiesce.poll_ready().await {
            PollOutcome::Ready(list) => break list,
            PollOutcome::NotReady => debug!("save query not ready on attempt {attempt}"),
            PollOutcome::ProtocolError(err) => {
                warn!("save query attempt {attempt} failed: {err}")
            }
        }
        if attempt >= config.query_retries {
            return Err(BackupError::QueryExhausted {
                attempts: attempt,
                pattern: quiesce.pattern().as_str().to_string(),
            });
        }
        attempt += 1;
        sleep(Duration::from_millis(config.retry_delay_ms)).await;
    };
    trace_phase(QuiescePhase::Acknowledged);

    // The acknowledgement is `name:length, name:length, ...`; the helper
    // takes it as a list file rather than a command-line argument.
    let list_file = engine.scratch_dir().join("db_list.txt");
    tokio::fs::write(&list_file, format!("{artifacts}\n"))
        .await
        .map_err(|err| BackupError::io("writing artifact list", err))?;

    let args: Vec<String> = vec![
        "copy_db".to_string(),
        engine.world_dir().display().to_string(),
        engine.scratch_dir().display().to_string(),
        list_file.display().to_string(),
    ];
    info!("running {}", redacted_command_line(&config.helper, &args, &[]));
    engine
        .runner
        .run(&config.helper, &args, None)
        .await
        .map_err(|err| BackupError::CopyFailed(err.to_string()))?;

    Ok(attempt)
}

async fn compress_scratch(engine: &Engine, store: StoreKind) -> Result<PathBuf, BackupError> {
    let config = engine.config();
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let name = format!(
        "{}_{}.{}",
        engine.world_name(),
        timestamp,
        config.format.extension()
    );
    let archive = config.store_dir(store).join(&name);
    // Second-resolution names can collide when runs start back to back;
    // reject rather than overwrite a finished artifact.
    if tokio::fs::try_exists(&archive).await.unwrap_or(false) {
        return Err(BackupError::NameCollision(name));
    }

    let args: Vec<String> = vec![
        "a".to_string(),
        config.format.type_switch().to_string(),
        format!("-mx={}", config.compress_level),
        archive.display().to_string(),
        format!("{}/*", engine.scratch_dir().display()),
    ];
    let deadline = config.compress_deadline();
    info!(
        "running {}",
        redacted_command_line(&config.seven_zip, &args, &[])
    );
    match engine
        .runner
        .run(&config.seven_zip, &args, Some(deadline))
        .await
    {
        Ok(_) => Ok(archive),
        Err(ProcessError::Timeout { seconds, .. }) => {
            Err(BackupError::CompressTimeout { seconds })
        }
        Err(err) => Err(BackupError::CompressFailed(err.to_string())),
    }
}

/// The scratch area is exclusive to the running backup: deleted and
/// recreated at the start of every run and again after a successful one.
pub(crate) async fn reset_scratch(scratch: &Path) -> Result<(), BackupError> {
    if tokio::fs::try_exists(scratch).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(scratch)
            .await
            .map_err(|err| BackupError::io("clearing scratch directory", err))?;
    }
    tokio::fs::create_dir_all(scratch)
        .await
        .map_err(|err| BackupError::io("creating scratch directory", err))
}

fn trace_phase(phase: QuiescePhase) {
    debug!("quiesce phase: {phase:?}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use crate::testutil::{FakeConsole, FakeRunner, RecordingNotifier, test_engine};
    use keeper_core::ArchiveFormat;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    const READY: &str = "Data saved. Files are now ready to be copied. level.dat:100, db/CURRENT:50";

    #[tokio::test]
    async fn ready_on_second_attempt_records_two_attempts_and_lists_once() {
        let console = FakeConsole::new(true, &["Saving...", READY]);
        let runner = FakeRunner::new().touching_compress_target();
        let (engine, root) = test_engine("ready-2", console.clone(), runner.clone());

        let report = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect("backup should succeed");

        assert_eq!(report.attempts, 2);
        assert_eq!(console.query_calls.load(Ordering::SeqCst), 2);
        assert_eq!(console.resumes.load(Ordering::SeqCst), 1);
        assert!(report.archive.exists());
        assert!(report.size_bytes > 0);

        // Exactly one artifact, carrying the configured extension.
        let listed = store::list(engine.store_dir(StoreKind::Normal), ArchiveFormat::Zip)
            .await
            .expect("list store");
        assert_eq!(listed.len(), 1);
        assert!(listed[0].name.ends_with(".zip"));

        // Scratch was reset after success: present but empty.
        let mut entries = tokio::fs::read_dir(&engine.config().scratch_dir)
            .await
            .expect("scratch dir exists");
        assert!(entries.next_entry().await.expect("read scratch").is_none());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn copy_receives_the_stripped_acknowledgement() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new().touching_compress_target();
        let (engine, root) = test_engine("ack-list", console, runner.clone());

        engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect("backup should succeed");

        let calls = runner.calls.lock().expect("runner calls");
        let copy = calls
            .iter()
            .find(|(_, args)| args.first().map(String::as_str) == Some("copy_db"))
            .expect("copy_db invoked");
        assert!(copy.1[1].ends_with("level"), "source is the world dir");
        // The list file content was captured before the scratch reset.
        let captured = runner.copy_list.lock().expect("copy list");
        assert_eq!(
            captured.as_deref().map(str::trim),
            Some("level.dat:100, db/CURRENT:50")
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn hold_rejection_resumes_before_surfacing() {
        let console = FakeConsole::new(false, &[]);
        let runner = FakeRunner::new();
        let (engine, root) = test_engine("hold-fail", console.clone(), runner);

        let err = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect_err("hold must fail");
        assert!(matches!(err, BackupError::HoldRejected));
        assert_eq!(console.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(console.query_calls.load(Ordering::SeqCst), 0);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn poll_exhaustion_resumes_once_and_reports_attempts() {
        // Console never becomes ready; the default reply is the hold banner.
        let console = FakeConsole::new(true, &[]);
        let runner = FakeRunner::new();
        let (mut engine, root) = test_engine("exhaust", console.clone(), runner.clone());
        engine.config.query_retries = 4;

        let err = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect_err("poll loop must exhaust");
        match err {
            BackupError::QueryExhausted { attempts, pattern } => {
                assert_eq!(attempts, 4);
                assert!(pattern.starts_with("Data saved."));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(console.query_calls.load(Ordering::SeqCst), 4);
        assert_eq!(console.resumes.load(Ordering::SeqCst), 1);

        // Never got as far as copying.
        let calls = runner.calls.lock().expect("runner calls");
        assert!(
            calls
                .iter()
                .all(|(_, args)| args.first().map(String::as_str) != Some("copy_db"))
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn copy_failure_still_resumes_exactly_once() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new().failing_verb("copy_db");
        let (engine, root) = test_engine("copy-fail", console.clone(), runner.clone());

        let err = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect_err("copy must fail");
        assert!(matches!(err, BackupError::CopyFailed(_)));
        assert_eq!(console.resumes.load(Ordering::SeqCst), 1);

        // Compression never ran.
        let calls = runner.calls.lock().expect("runner calls");
        assert!(
            calls
                .iter()
                .all(|(_, args)| args.first().map(String::as_str) != Some("a"))
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn compress_timeout_kills_and_leaves_scratch_intact() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new().timing_out_compress();
        let (mut engine, root) = test_engine("zip-timeout", console.clone(), runner);
        engine.config.max_wait_for_zip_secs = 5;

        let err = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect_err("compression must time out");
        match err {
            BackupError::CompressTimeout { seconds } => assert_eq!(seconds, 5),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(console.resumes.load(Ordering::SeqCst), 1);

        // Scratch is preserved for diagnostics, copied list file included.
        assert!(engine.config().scratch_dir.join("db_list.txt").exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_the_first_is_in_flight() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new().touching_compress_target();
        let (engine, root) = test_engine("single-flight", console.clone(), runner);

        let guard = engine.try_begin().expect("acquire flight guard");
        let err = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect_err("second run must be rejected");
        assert!(matches!(err, BackupError::AlreadyInProgress));
        // The rejected run never touched the server.
        assert_eq!(console.holds.load(Ordering::SeqCst), 0);

        // Releasing the guard lets the next run proceed normally.
        drop(guard);
        engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect("run after release succeeds");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn permanent_runs_skip_the_sweep_and_use_the_permanent_store() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new().touching_compress_target();
        let (engine, root) = test_engine("permanent", console, runner.clone());

        let report = engine
            .run_backup(BackupRequest::new(StoreKind::Permanent, None))
            .await
            .expect("permanent backup succeeds");
        assert!(report.archive.starts_with(&engine.config().permanent_dir));

        let calls = runner.calls.lock().expect("runner calls");
        assert!(
            calls
                .iter()
                .all(|(_, args)| args.first().map(String::as_str) != Some("cleanup")),
            "retention must not run for permanent backups"
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn normal_runs_sweep_before_holding() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new().touching_compress_target();
        let (engine, root) = test_engine("pre-sweep", console, runner.clone());

        engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect("backup succeeds");

        let calls = runner.calls.lock().expect("runner calls");
        let cleanup_idx = calls
            .iter()
            .position(|(_, args)| args.first().map(String::as_str) == Some("cleanup"))
            .expect("cleanup invoked");
        let copy_idx = calls
            .iter()
            .position(|(_, args)| args.first().map(String::as_str) == Some("copy_db"))
            .expect("copy invoked");
        assert!(cleanup_idx < copy_idx, "sweep precedes the hold/copy");
        assert_eq!(calls[cleanup_idx].1[2], "7");
        assert_eq!(calls[cleanup_idx].1[3], "zip");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn sweep_failure_never_aborts_the_backup() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new()
            .failing_verb("cleanup")
            .touching_compress_target();
        let (engine, root) = test_engine("sweep-fail", console, runner);

        engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect("backup proceeds past a failed sweep");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn scratch_cleanup_failure_does_not_fail_a_finished_backup() {
        let console = FakeConsole::new(true, &[READY]);
        let runner = FakeRunner::new()
            .touching_compress_target()
            .jamming_scratch_reset();
        let (engine, root) = test_engine("scratch-jam", console.clone(), runner);

        let report = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, None))
            .await
            .expect("finished archive outweighs a cleanup failure");
        assert!(report.archive.exists());
        assert_eq!(console.resumes.load(Ordering::SeqCst), 1);

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn every_failure_produces_exactly_one_error_notification() {
        let console = FakeConsole::new(true, &[]);
        let runner = FakeRunner::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut engine, root) = test_engine("notify-once", console, runner);
        engine.notifier = notifier.clone();
        engine.config.query_retries = 2;

        let _ = engine
            .run_backup(BackupRequest::new(StoreKind::Normal, Some("steve".into())))
            .await
            .expect_err("run fails");

        let messages = notifier.messages.lock().expect("messages");
        let errors: Vec<_> = messages
            .iter()
            .filter(|(severity, _, _)| *severity == Severity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].2.as_deref(), Some("steve"));

        let _ = std::fs::remove_dir_all(root);
    }
}
