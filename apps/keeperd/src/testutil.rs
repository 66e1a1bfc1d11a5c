//! Shared fakes for the engine and command tests: a scripted console, a
//! recording process runner and a capturing notifier.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use keeper_core::ProcessError;
use keeper_rcon::ServerConsole;

use crate::backup::Engine;
use crate::backup::quiesce::{DEFAULT_SUCCESS_MESSAGE, SuccessPattern};
use crate::config::KeeperConfig;
use crate::notify::{LogNotifier, Notifier, Severity};
use crate::runner::{ProcessOutput, ProcessRunner};

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("keeper-{prefix}-{nanos}"))
}

/// Console fake scripted with a queue of `save query` replies. Once the
/// queue runs dry it keeps answering with the in-progress banner.
pub struct FakeConsole {
    hold_ok: bool,
    replies: Mutex<VecDeque<String>>,
    pub holds: AtomicU32,
    pub query_calls: AtomicU32,
    pub resumes: AtomicU32,
    pub kicks: AtomicU32,
    pub stops: AtomicU32,
}

impl FakeConsole {
    pub fn new(hold_ok: bool, replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            hold_ok,
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            holds: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
            resumes: AtomicU32::new(0),
            kicks: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ServerConsole for FakeConsole {
    async fn execute(&self, command: &str) -> anyhow::Result<String> {
        match command {
            "save hold" => {
                self.holds.fetch_add(1, Ordering::SeqCst);
                if self.hold_ok {
                    Ok("Saving...".to_string())
                } else {
                    Err(anyhow::anyhow!("The command is already running"))
                }
            }
            "save query" => {
                self.query_calls.fetch_add(1, Ordering::SeqCst);
                let reply = self
                    .replies
                    .lock()
                    .expect("replies")
                    .pop_front()
                    .unwrap_or_else(|| "Saving...".to_string());
                Ok(reply)
            }
            "save resume" => {
                self.resumes.fetch_add(1, Ordering::SeqCst);
                Ok("Changes to the world are resumed.".to_string())
            }
            "stop" => {
                self.stops.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }
            kick if kick.starts_with("kick ") => {
                self.kicks.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }
            other => Err(anyhow::anyhow!("unscripted command: {other}")),
        }
    }
}

/// Process-runner fake that records every invocation and can be configured
/// per verb to fail, time out or materialize the compression target.
pub struct FakeRunner {
    pub calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    /// Content of the artifact list file at `copy_db` time, captured before
    /// the scratch reset can delete it.
    pub copy_list: Mutex<Option<String>>,
    failing: Mutex<Vec<String>>,
    touch_compress: AtomicBool,
    timeout_compress: AtomicBool,
    jam_scratch: AtomicBool,
    stats_stdout: Mutex<Option<String>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            copy_list: Mutex::new(None),
            failing: Mutex::new(Vec::new()),
            touch_compress: AtomicBool::new(false),
            timeout_compress: AtomicBool::new(false),
            jam_scratch: AtomicBool::new(false),
            stats_stdout: Mutex::new(None),
        })
    }

    /// Write the archive file named by the `a` verb, as real compression
    /// would.
    pub fn touching_compress_target(self: Arc<Self>) -> Arc<Self> {
        self.touch_compress.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_verb(self: Arc<Self>, verb: &str) -> Arc<Self> {
        self.failing.lock().expect("failing").push(verb.to_string());
        self
    }

    pub fn timing_out_compress(self: Arc<Self>) -> Arc<Self> {
        self.timeout_compress.store(true, Ordering::SeqCst);
        self
    }

    /// Replace the scratch directory with a plain file while compressing,
    /// so the post-archive cleanup cannot remove it as a directory.
    pub fn jamming_scratch_reset(self: Arc<Self>) -> Arc<Self> {
        self.jam_scratch.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_stats_stdout(self: Arc<Self>, payload: &str) -> Arc<Self> {
        *self.stats_stdout.lock().expect("stats stdout") = Some(payload.to_string());
        self
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[String],
        deadline: Option<Duration>,
    ) -> Result<ProcessOutput, ProcessError> {
        self.calls
            .lock()
            .expect("calls")
            .push((program.to_path_buf(), args.to_vec()));

        let verb = args.first().map(String::as_str).unwrap_or("");
        if self.failing.lock().expect("failing").iter().any(|f| f == verb) {
            return Err(ProcessError::NonZeroExit {
                program: program.display().to_string(),
                code: 1,
                stderr: format!("scripted failure for {verb}"),
            });
        }
        match verb {
            "a" if self.timeout_compress.load(Ordering::SeqCst) => {
                return Err(ProcessError::Timeout {
                    program: program.display().to_string(),
                    seconds: deadline.map(|d| d.as_secs()).unwrap_or(0),
                });
            }
            "a" if self.touch_compress.load(Ordering::SeqCst) => {
                std::fs::write(&args[3], b"archive bytes").map_err(|source| {
                    ProcessError::LaunchFailed {
                        program: program.display().to_string(),
                        source,
                    }
                })?;
                if self.jam_scratch.load(Ordering::SeqCst) {
                    if let Some(scratch) = args[4].strip_suffix("/*") {
                        let _ = std::fs::remove_dir_all(scratch);
                        let _ = std::fs::write(scratch, b"not a directory");
                    }
                }
            }
            "copy_db" => {
                *self.copy_list.lock().expect("copy list") =
                    std::fs::read_to_string(&args[3]).ok();
            }
            _ => {}
        }

        let stdout = match verb {
            "stats" => self
                .stats_stdout
                .lock()
                .expect("stats stdout")
                .clone()
                .unwrap_or_default(),
            _ => String::new(),
        };
        Ok(ProcessOutput {
            exit_code: 0,
            stdout,
            stderr: String::new(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(Severity, String, Option<String>)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, severity: Severity, message: &str, recipient: Option<&str>) {
        self.messages.lock().expect("messages").push((
            severity,
            message.to_string(),
            recipient.map(str::to_string),
        ));
    }
}

/// Engine wired to the given fakes over a fresh temp root. Delays are
/// shortened so poll loops finish in milliseconds.
pub fn test_engine(
    prefix: &str,
    console: Arc<FakeConsole>,
    runner: Arc<FakeRunner>,
) -> (Engine, PathBuf) {
    let root = unique_temp_dir(prefix);
    let config = KeeperConfig {
        backup_dir: root.join("backup"),
        permanent_dir: root.join("backup").join("permanent_backup"),
        scratch_dir: root.join("backup_tmp"),
        server_root: root.join("server"),
        helper: root.join("keeper-helper"),
        seven_zip: root.join("7za"),
        retry_delay_ms: 1,
        initial_delay_ms: 1,
        ..KeeperConfig::default()
    };
    std::fs::create_dir_all(config.server_root.join("worlds").join("level"))
        .expect("create world dir");
    std::fs::create_dir_all(&config.backup_dir).expect("create store dir");

    let engine = Engine::new(
        config,
        "level".to_string(),
        runner,
        console,
        Arc::new(LogNotifier),
        SuccessPattern::new(DEFAULT_SUCCESS_MESSAGE),
    );
    (engine, root)
}
