//! Drive the interactive Codex CLI in a pseudo-terminal and capture `/status`.
//!
//! The CLI probes the terminal (cursor position, device attributes, colors)
//! before drawing its prompt, so the session answers those queries itself.
//! Once the prompt is up and has settled, `/status` is typed exactly once and
//! the transcript is handed to the output parser.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::FetchError;
use super::parser::parse_transcript;
use super::strategy::UsageStrategy;
use super::types::{Source, UsageSnapshot};
use crate::config::{PtySettings, Settings};
use crate::utils::{find_in_path, strip_ansi};

/// Reads taken after the status heading appears, to catch the rest of the panel
const DRAIN_READS: usize = 5;

const STATUS_COMMAND: &[u8] = b"/status\n";

/// Terminal queries and the canned answers sent back
const TERMINAL_REPLIES: &[(&[u8], &[u8])] = &[
    // Cursor position report
    (b"\x1b[6n", b"\x1b[30;1R"),
    // Primary device attributes
    (b"\x1b[c", b"\x1b[?62;1;2;6;7;8;9;15;18;21;22c"),
    // Secondary device attributes
    (b"\x1b[>", b"\x1b[?62;1;2;6;7;8;9;15;18;21;22c"),
    // Foreground color
    (b"\x1b]10;?", b"\x1b]10;rgb:ffff/ffff/ffff\x1b\\"),
    // Background color
    (b"\x1b]11;?", b"\x1b]11;rgb:0000/0000/0000\x1b\\"),
];

/// Answers owed for the terminal queries contained in `chunk`.
///
/// Both device-attribute forms map to the same reply; it is sent once.
pub fn terminal_replies(chunk: &[u8]) -> Vec<&'static [u8]> {
    let mut replies: Vec<&'static [u8]> = Vec::new();
    for (query, reply) in TERMINAL_REPLIES {
        if contains(chunk, query) && !replies.contains(reply) {
            replies.push(*reply);
        }
    }
    replies
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Progress of one `/status` capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the prompt to appear
    Starting,
    /// Prompt seen; letting the UI settle before typing
    AwaitingReady { since: Instant },
    /// `/status` typed; waiting for the limits panel
    StatusSent { at: Instant },
    /// Limits panel seen
    Completed,
    /// Gave up waiting
    TimedOut,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::TimedOut)
    }
}

/// Transcript plus phase machine, free of any pty handles
#[derive(Debug)]
pub struct StatusProbe {
    phase: Phase,
    raw: Vec<u8>,
    settle: Duration,
    status_wait: Duration,
}

impl StatusProbe {
    pub fn new(settings: &PtySettings) -> Self {
        Self {
            phase: Phase::Starting,
            raw: Vec::new(),
            settle: Duration::from_millis(settings.settle_ms),
            status_wait: Duration::from_millis(settings.status_wait_ms),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Append raw pty output
    pub fn feed(&mut self, chunk: &[u8]) {
        self.raw.extend_from_slice(chunk);
    }

    /// Raw transcript, escape sequences included
    pub fn transcript(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Step the phase machine. Returns true when `/status` must be typed now;
    /// that happens at most once per probe.
    pub fn advance(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::Starting => {
                if is_ready(&strip_ansi(&self.transcript())) {
                    debug!("Codex prompt ready");
                    self.phase = Phase::AwaitingReady { since: now };
                }
                false
            }
            Phase::AwaitingReady { since } => {
                if now.saturating_duration_since(since) >= self.settle {
                    self.phase = Phase::StatusSent { at: now };
                    true
                } else {
                    false
                }
            }
            Phase::StatusSent { at } => {
                if has_status_heading(&strip_ansi(&self.transcript())) {
                    debug!("Status panel captured");
                    self.phase = Phase::Completed;
                } else if now.saturating_duration_since(at) >= self.status_wait {
                    debug!("No status panel {:?} after sending /status", self.status_wait);
                    self.phase = Phase::TimedOut;
                }
                false
            }
            Phase::Completed | Phase::TimedOut => false,
        }
    }

    /// Session ceiling reached
    pub fn expire(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = Phase::TimedOut;
        }
    }
}

fn is_ready(text: &str) -> bool {
    text.contains('›') && text.contains("context left")
}

fn has_status_heading(text: &str) -> bool {
    text.contains("5h limit") || text.contains("Weekly limit")
}

/// Child and master side of one pty; dropping kills and reaps the child
struct PtySession {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("pty child kill failed: {}", e);
            #[cfg(unix)]
            if let Some(pid) = self.child.process_id() {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
        let _ = self.child.wait();
    }
}

/// Spawn `program` in a pty and run the capture loop on the current thread.
///
/// Returns the final phase and the raw transcript.
fn capture_status(
    program: &Path,
    args: &[String],
    settings: &PtySettings,
    cancel: &CancellationToken,
) -> Result<(Phase, String), FetchError> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: settings.rows,
            cols: settings.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| FetchError::subprocess("failed to open pty", e))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.env("TERM", "xterm-256color");
    cmd.env("COLORTERM", "truecolor");
    cmd.env("LINES", settings.rows.to_string());
    cmd.env("COLUMNS", settings.cols.to_string());
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| FetchError::subprocess("failed to spawn codex in pty", e))?;
    // Only the child holds the slave from here on, so its exit reaches the reader
    drop(pair.slave);

    let session = PtySession {
        child,
        master: pair.master,
    };
    let mut reader = session
        .master
        .try_clone_reader()
        .map_err(|e| FetchError::subprocess("failed to clone pty reader", e))?;
    let mut writer = session
        .master
        .take_writer()
        .map_err(|e| FetchError::subprocess("failed to take pty writer", e))?;
    debug!("Spawned {:?} in pty (pid {:?})", program, session.child.process_id());

    let (tx, chunks) = mpsc::channel::<Vec<u8>>();
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("pty read ended: {}", e);
                    break;
                }
            }
        }
    });

    let poll = Duration::from_millis(settings.poll_ms);
    let ceiling = Duration::from_millis(settings.ceiling_ms);
    let started = Instant::now();
    let mut probe = StatusProbe::new(settings);

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if started.elapsed() >= ceiling {
            debug!("pty session hit {:?} ceiling in {:?}", ceiling, probe.phase());
            probe.expire();
            break;
        }

        match chunks.recv_timeout(poll) {
            Ok(chunk) => {
                for reply in terminal_replies(&chunk) {
                    writer
                        .write_all(reply)
                        .and_then(|_| writer.flush())
                        .map_err(|e| FetchError::subprocess("failed to answer terminal query", e))?;
                }
                probe.feed(&chunk);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("pty closed in {:?}", probe.phase());
                break;
            }
        }

        if probe.advance(Instant::now()) {
            debug!("Sending /status");
            writer
                .write_all(STATUS_COMMAND)
                .and_then(|_| writer.flush())
                .map_err(|e| FetchError::subprocess("failed to send /status", e))?;
        }
        if probe.phase().is_terminal() {
            break;
        }
    }

    if probe.phase() == Phase::Completed {
        for _ in 0..DRAIN_READS {
            match chunks.recv_timeout(poll) {
                Ok(chunk) => probe.feed(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    drop(session);
    Ok((probe.phase(), probe.transcript()))
}

/// Strategy wrapper: one pty session per attempt
#[derive(Debug, Clone)]
pub struct PtyClient {
    command: String,
    args: Vec<String>,
    settings: PtySettings,
}

impl PtyClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            command: settings.codex_command.clone(),
            args: Vec::new(),
            settings: settings.pty.clone(),
        }
    }

    /// Client for an arbitrary interactive program (used by tests and tooling)
    pub fn with_program(command: impl Into<String>, args: Vec<String>, settings: PtySettings) -> Self {
        Self {
            command: command.into(),
            args,
            settings,
        }
    }

    /// Run `/status` and return the raw transcript with its final phase
    pub async fn capture(&self, cancel: &CancellationToken) -> Result<(Phase, String), FetchError> {
        let program = find_in_path(&self.command).ok_or_else(|| FetchError::ToolNotFound {
            tool: self.command.clone(),
        })?;
        let args = self.args.clone();
        let settings = self.settings.clone();
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || capture_status(&program, &args, &settings, &cancel))
            .await
            .map_err(|e| FetchError::subprocess("pty task failed", e))?
    }

    pub async fn fetch(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        let (phase, transcript) = self.capture(cancel).await?;
        match parse_transcript(&transcript) {
            Ok(snapshot) => Ok(snapshot),
            Err(_) if phase == Phase::TimedOut => Err(FetchError::Timeout(
                "codex did not show the status panel".to_string(),
            )),
            Err(_) if transcript.trim().is_empty() => Err(FetchError::Subprocess(
                "no output from codex".to_string(),
            )),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl UsageStrategy for PtyClient {
    fn source(&self) -> Source {
        Source::Cli
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Result<UsageSnapshot, FetchError> {
        self.fetch(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::types::{Bucket, PercentKind};
    #[cfg(unix)]
    use crate::usage::test_support::{exited_within, read_pid, record_pid};

    const PROMPT: &[u8] = "\x1b[1m›\x1b[0m Ask Codex to do anything\r\n  \x1b[2m100% context left\x1b[0m\r\n".as_bytes();

    fn fast_settings() -> PtySettings {
        PtySettings {
            settle_ms: 50,
            status_wait_ms: 2_000,
            ceiling_ms: 5_000,
            poll_ms: 20,
            ..PtySettings::default()
        }
    }

    #[test]
    fn test_terminal_replies() {
        assert_eq!(terminal_replies(b"\x1b[6n"), vec![&b"\x1b[30;1R"[..]]);
        assert_eq!(
            terminal_replies(b"\x1b[c\x1b[>c"),
            vec![&b"\x1b[?62;1;2;6;7;8;9;15;18;21;22c"[..]]
        );
        assert_eq!(
            terminal_replies(b"\x1b]10;?\x1b\\\x1b]11;?\x1b\\"),
            vec![
                &b"\x1b]10;rgb:ffff/ffff/ffff\x1b\\"[..],
                &b"\x1b]11;rgb:0000/0000/0000\x1b\\"[..],
            ]
        );
        assert!(terminal_replies(b"plain output").is_empty());
    }

    #[test]
    fn test_waits_for_prompt() {
        let mut probe = StatusProbe::new(&PtySettings::default());
        let t0 = Instant::now();

        probe.feed(b"\x1b[?2004hLoading codex...\r\n");
        assert!(!probe.advance(t0));
        assert_eq!(probe.phase(), Phase::Starting);

        // Prompt glyph alone is not enough
        probe.feed("› ".as_bytes());
        assert!(!probe.advance(t0));
        assert_eq!(probe.phase(), Phase::Starting);

        probe.feed(b"  100% context left\r\n");
        assert!(!probe.advance(t0));
        assert_eq!(probe.phase(), Phase::AwaitingReady { since: t0 });
    }

    #[test]
    fn test_status_sent_once_after_settle() {
        let mut probe = StatusProbe::new(&PtySettings::default());
        let t0 = Instant::now();
        probe.feed(PROMPT);
        probe.advance(t0);

        assert!(!probe.advance(t0 + Duration::from_millis(500)));
        assert!(probe.advance(t0 + Duration::from_millis(800)));
        assert!(matches!(probe.phase(), Phase::StatusSent { .. }));

        let sends = (1..20)
            .filter(|i| probe.advance(t0 + Duration::from_millis(800 + i * 100)))
            .count();
        assert_eq!(sends, 0);
    }

    #[test]
    fn test_completes_on_heading() {
        let mut probe = StatusProbe::new(&PtySettings::default());
        let t0 = Instant::now();
        probe.feed(PROMPT);
        probe.advance(t0);
        probe.advance(t0 + Duration::from_secs(1));

        probe.feed("\x1b[2m  Weekly limit:\x1b[0m [██░] 90% left\r\n".as_bytes());
        probe.advance(t0 + Duration::from_secs(2));
        assert_eq!(probe.phase(), Phase::Completed);

        probe.expire();
        assert_eq!(probe.phase(), Phase::Completed);
    }

    #[test]
    fn test_times_out_without_heading() {
        let mut probe = StatusProbe::new(&PtySettings::default());
        let t0 = Instant::now();
        probe.feed(PROMPT);
        probe.advance(t0);
        let sent = t0 + Duration::from_millis(800);
        assert!(probe.advance(sent));

        probe.advance(sent + Duration::from_millis(4_900));
        assert!(matches!(probe.phase(), Phase::StatusSent { .. }));
        probe.advance(sent + Duration::from_secs(5));
        assert_eq!(probe.phase(), Phase::TimedOut);
    }

    #[test]
    fn test_expire_before_prompt() {
        let mut probe = StatusProbe::new(&PtySettings::default());
        probe.expire();
        assert_eq!(probe.phase(), Phase::TimedOut);
        assert!(!probe.advance(Instant::now()));
    }

    #[test]
    fn test_split_utf8_prompt_glyph() {
        let mut probe = StatusProbe::new(&PtySettings::default());
        let glyph = "›".as_bytes();
        probe.feed(&glyph[..1]);
        probe.feed(&glyph[1..]);
        probe.feed(b" context left");
        probe.advance(Instant::now());
        assert!(matches!(probe.phase(), Phase::AwaitingReady { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let client = PtyClient::with_program("codex-binary-that-does-not-exist", vec![], fast_settings());
        let err = client.fetch(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::ToolNotFound { .. }));
    }

    #[cfg(unix)]
    fn fake_codex(script: &str, settings: PtySettings) -> PtyClient {
        PtyClient::with_program(
            "/bin/sh",
            vec!["-c".to_string(), script.to_string()],
            settings,
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scripted_status_session() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("codex.pid");
        let script = format!(
            r#"
            {}
            echo '› Ask Codex to do anything'
            echo '  100% context left'
            read line
            echo '  5h limit:     [████████████████░░░░] 72% left (resets 03:31)'
            echo '  Weekly limit: [██████████████████░░] 90% left (resets 16:22 on 10 Feb)'
            exec sleep 5
        "#,
            record_pid(&pid_file)
        );
        let started = Instant::now();
        let snap = fake_codex(&script, fast_settings())
            .fetch(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(snap.source, Source::Cli);
        assert_eq!(snap.percent_kind, PercentKind::Used);
        assert_eq!(snap.percentage, 28);
        assert_eq!(snap.color, Bucket::Healthy);
        assert_eq!(snap.weekly_limit.percentage, 10);
        assert_eq!(
            snap.weekly_limit.reset_descriptor.as_deref(),
            Some("16:22 on 10 Feb")
        );
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(exited_within(read_pid(&pid_file), Duration::from_secs(2)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_never_ready_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("codex.pid");
        let settings = PtySettings {
            ceiling_ms: 400,
            ..fast_settings()
        };
        let script = format!("{}; echo 'booting'; exec sleep 5", record_pid(&pid_file));
        let started = Instant::now();
        let err = fake_codex(&script, settings)
            .fetch(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(exited_within(read_pid(&pid_file), Duration::from_secs(2)).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_at_poll_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("codex.pid");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let script = format!("{}; exec sleep 5", record_pid(&pid_file));
        let err = fake_codex(&script, fast_settings())
            .fetch(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
        assert!(exited_within(read_pid(&pid_file), Duration::from_secs(2)).await);
    }
}
