//! Running one handler process per request
//!
//! The child gets the CGI variables as its whole environment, the request
//! body on stdin and its own process group. Its stdout is carried to the
//! caller over a bounded channel by a reader thread; stderr goes to the log.
//! Whatever happens to the request, dropping the `Invocation` kills the
//! process group and reaps the child.

use super::environment::CgiEnvironment;
use super::input::InputChannel;
use crate::cgi::{ParsedResponse, ResponseParser};
use crate::errors::{Error, Result};
use crate::log_util::ascii_escape;

use log::{debug, warn};

use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// `PATH` for handlers; the gateway's own environment is never passed on
pub const HANDLER_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How many stdout chunks may wait for the parser before the handler blocks
const OUTPUT_QUEUE_DEPTH: usize = 16;
const OUTPUT_CHUNK: usize = 8192;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Longest piece of handler stderr logged as one line
const STDERR_LINE: u64 = 1024;
/// Handler stderr past this many bytes is read and discarded
const STDERR_LOGGED: u64 = 64 * 1024;

/// A handler program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub path: PathBuf,
    /// Program that runs `path`, e.g. `/usr/bin/python3`. Without one, `path`
    /// is executed directly.
    pub interpreter: Option<PathBuf>,
    /// Defaults to the directory holding `path`
    pub working_dir: Option<PathBuf>
}

impl Script {
    pub fn new<P: Into<PathBuf>>(path: P) -> Script {
        Script { path: path.into(), interpreter: None, working_dir: None }
    }

    pub fn interpreted_by<P: Into<PathBuf>>(mut self, interpreter: P) -> Script {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// The program actually launched
    pub fn program(&self) -> &Path {
        self.interpreter.as_ref().unwrap_or(&self.path)
    }

    fn command(&self) -> Command {
        let mut command = match self.interpreter {
            Some(ref interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.path);
                command
            },
            None => Command::new(&self.path)
        };

        match self.working_dir {
            Some(ref dir) => { command.current_dir(dir); },
            None => if let Some(dir) = self.path.parent() {
                if !dir.as_os_str().is_empty() {
                    command.current_dir(dir);
                }
            }
        }

        command
    }
}

/// Per-invocation resource limits, supplied by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget for producing output and exiting
    pub timeout: Option<Duration>,
    /// Bound on everything the handler writes to stdout
    pub max_output_bytes: usize,
    /// Bound on the header block
    pub max_header_bytes: usize
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            timeout: Some(Duration::from_secs(30)),
            max_output_bytes: 16 * 1024 * 1024,
            max_header_bytes: 64 * 1024
        }
    }
}

impl Limits {
    pub fn parser(&self) -> ResponseParser {
        ResponseParser::new(self.max_header_bytes, self.max_output_bytes)
    }
}

/// The child process, killed and reaped when dropped
struct Process {
    child: Child,
    program: PathBuf,
    reaped: bool
}

impl Process {
    fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(status)
    }

    /// Kills the whole process group, then reaps the child
    fn kill(&mut self) {
        if self.reaped {
            return;
        }

        let group = self.child.id() as libc::pid_t;
        if unsafe { libc::killpg(group, libc::SIGKILL) } != 0 {
            let _ = self.child.kill();
        }

        match self.child.wait() {
            Ok(status) => debug!("Killed handler {} ({})",
                                 self.program.display(), status),
            Err(e) => warn!("Could not reap handler {}: {}",
                            self.program.display(), e)
        }
        self.reaped = true;
    }

    fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.kill();
    }
}

/// The handler's stdout, read with the invocation's deadline
pub struct Output {
    chunks: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    deadline: Option<Instant>,
    closed: bool,
    timed_out: bool
}

impl Output {
    fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let received = match self.deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    self.timed_out = true;
                    return Err(timed_out());
                }
                match self.chunks.recv_timeout(deadline - now) {
                    Ok(chunk) => Some(chunk),
                    Err(RecvTimeoutError::Timeout) => {
                        self.timed_out = true;
                        return Err(timed_out());
                    },
                    Err(RecvTimeoutError::Disconnected) => None
                }
            },
            None => self.chunks.recv().ok()
        };

        match received {
            Some(chunk) => chunk.map(Some),
            None => Ok(None)
        }
    }

    /// Whether reading stopped because the deadline passed
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "handler deadline passed")
}

impl Read for Output {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.offset >= self.pending.len() {
            if self.closed {
                return Ok(0);
            }
            match self.next_chunk()? {
                Some(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                },
                None => self.closed = true
            }
        }

        let pending = &self.pending[self.offset ..];
        let count = pending.len().min(buf.len());
        buf[.. count].copy_from_slice(&pending[.. count]);
        self.offset += count;
        Ok(count)
    }
}

/// One running handler
pub struct Invocation {
    process: Process,
    output: Output,
    feeder: Option<Feeder>,
    timeout: Option<Duration>,
    deadline: Option<Instant>
}

/// The thread copying the request body into the handler's stdin
///
/// It is never joined: a client that stops sending leaves it blocked until
/// the socket gives up, long after the request has been answered.
struct Feeder {
    done: Receiver<Result<u64>>,
    progress: Arc<AtomicU64>,
    declared: u64
}

impl Feeder {
    fn start(input: InputChannel, stdin: ChildStdin) -> Result<Feeder> {
        let progress = input.progress();
        let declared = input.declared();
        let (sender, done) = mpsc::channel();

        thread::Builder::new()
            .name(String::from("cgi-stdin"))
            .spawn(move || {
                let _ = sender.send(input.pump(stdin));
            })?;

        Ok(Feeder { done, progress, declared })
    }

    /// Whether part of the body has still not arrived
    fn starved(&self) -> bool {
        self.progress.load(Ordering::Relaxed) < self.declared
    }

    fn short_body(&self) -> Error {
        Error::ShortBody {
            declared: self.declared,
            received: self.progress.load(Ordering::Relaxed)
        }
    }

    /// The number of bytes fed, once the whole body is in or `deadline`
    /// passes
    fn wait(self, deadline: Option<Instant>) -> Result<u64> {
        let outcome = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                match self.done.recv_timeout(left) {
                    Ok(outcome) => Some(outcome),
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(self.short_body());
                    },
                    Err(RecvTimeoutError::Disconnected) => None
                }
            },
            None => self.done.recv().ok()
        };

        outcome.unwrap_or_else(|| Err(Error::Io(io::Error::new(
            io::ErrorKind::Other, "request body feeder panicked"))))
    }
}

/// How a handler ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: ExitStatus,
    /// Request body bytes handed to the handler
    pub input_bytes: u64
}

impl Completion {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Starts `script` with `env` as its environment and `input` on its stdin
pub fn invoke(script: &Script, env: &CgiEnvironment, input: InputChannel,
              limits: &Limits) -> Result<Invocation>
{
    let deadline = limits.timeout.map(|timeout| Instant::now() + timeout);

    let mut command = script.command();
    command.env_clear()
        .env("PATH", HANDLER_PATH)
        .envs(env.iter().map(|(name, value)| (name, value)))
        .stdin(if input.is_empty() { Stdio::null() } else { Stdio::piped() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let child = command.spawn().map_err(|cause| Error::HandlerStart {
        program: script.program().to_path_buf(),
        cause
    })?;
    let mut process = Process {
        child,
        program: script.path.clone(),
        reaped: false
    };
    debug!("Started handler {} as pid {}", script.path.display(), process.id());

    let stdout = process.child.stdout.take()
        .ok_or_else(|| missing_pipe("stdout"))?;
    let (sender, chunks) = mpsc::sync_channel(OUTPUT_QUEUE_DEPTH);
    thread::Builder::new()
        .name(String::from("cgi-stdout"))
        .spawn(move || carry_output(stdout, sender))?;

    if let Some(stderr) = process.child.stderr.take() {
        let program = script.path.clone();
        thread::Builder::new()
            .name(String::from("cgi-stderr"))
            .spawn(move || log_errors(stderr, &program))?;
    }

    let feeder = match process.child.stdin.take() {
        Some(stdin) => Some(Feeder::start(input, stdin)?),
        None => None
    };

    Ok(Invocation {
        process,
        output: Output {
            chunks,
            pending: Vec::new(),
            offset: 0,
            deadline,
            closed: false,
            timed_out: false
        },
        feeder,
        timeout: limits.timeout,
        deadline
    })
}

fn missing_pipe(name: &str) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::Other,
                             format!("handler {} was not captured", name)))
}

fn carry_output(mut stdout: ChildStdout, sender: SyncSender<io::Result<Vec<u8>>>) {
    let mut chunk = [0u8; OUTPUT_CHUNK];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => return,
            Ok(read) => {
                if sender.send(Ok(chunk[.. read].to_vec())).is_err() {
                    // Nobody is reading any more
                    return;
                }
            },
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => {
                let _ = sender.send(Err(e));
                return;
            }
        }
    }
}

/// Logs handler stderr line by line, in pieces of at most `STDERR_LINE`
/// bytes, until `STDERR_LOGGED` bytes have been logged. Returns how many
/// bytes were read in total.
fn log_errors<R: Read>(stderr: R, program: &Path) -> u64 {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::with_capacity(STDERR_LINE as usize);
    let mut logged = 0;

    while logged < STDERR_LOGGED {
        line.clear();
        let read = match reader.by_ref().take(STDERR_LINE).read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => return logged,
            Ok(read) => read as u64
        };
        logged += read;

        if line.last() == Some(&b'\n') {
            line.pop();
        }
        warn!("Handler {}: {}", program.display(), ascii_escape(&line));
    }

    warn!("Handler {} wrote over {} bytes to stderr; discarding the rest",
          program.display(), STDERR_LOGGED);
    logged + io::copy(&mut reader, &mut io::sink()).unwrap_or(0)
}

impl Invocation {
    /// The handler's stdout, for callers that parse it themselves
    pub fn output(&mut self) -> &mut Output {
        &mut self.output
    }

    pub fn pid(&self) -> u32 {
        self.process.id()
    }

    /// Parses the handler's output.
    ///
    /// A passed deadline kills the handler and yields `HandlerTimeout`; an
    /// oversized output kills it too.
    pub fn read_response(&mut self, parser: &ResponseParser)
                         -> Result<ParsedResponse>
    {
        match parser.parse(&mut self.output) {
            Ok(parsed) => Ok(parsed),
            Err(_) if self.output.timed_out() => {
                self.process.kill();
                match self.feeder {
                    // Waiting on a body that never came
                    Some(ref feeder) if feeder.starved() =>
                        Err(feeder.short_body()),
                    _ => Err(self.timeout_error())
                }
            },
            Err(e) => {
                self.process.kill();
                Err(e)
            }
        }
    }

    /// Waits for the handler to exit within the deadline.
    ///
    /// Any output not read by now is discarded. Fails with `ShortBody` if
    /// the request body turned out shorter than declared, after the handler
    /// has been reaped.
    pub fn finish(self) -> Result<Completion> {
        let timeout = self.timeout_error();
        let Invocation { mut process, output, feeder, deadline, .. } = self;
        drop(output);

        let status = match deadline {
            Some(deadline) => loop {
                if let Some(status) = process.try_wait()? {
                    break status;
                }
                if Instant::now() >= deadline {
                    process.kill();
                    return Err(match feeder {
                        Some(ref feeder) if feeder.starved() => feeder.short_body(),
                        _ => timeout
                    });
                }
                thread::sleep(EXIT_POLL_INTERVAL);
            },
            None => process.wait()?
        };

        let input_bytes = match feeder {
            Some(feeder) => feeder.wait(deadline)?,
            None => 0
        };

        Ok(Completion { status, input_bytes })
    }

    fn timeout_error(&self) -> Error {
        Error::HandlerTimeout(self.timeout.unwrap_or_default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::gateway::environment::EnvironmentBuilder;
    use crate::gateway::RequestContext;
    use crate::http::Method;

    fn shell(body: &str) -> (tempfile::TempDir, Script) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handler.sh");
        std::fs::write(&path, body).unwrap();
        (dir, Script::new(path).interpreted_by("/bin/sh"))
    }

    fn env() -> CgiEnvironment {
        EnvironmentBuilder::new("test")
            .build(&RequestContext::new(Method::Get, "/t"))
    }

    fn limits(timeout_ms: u64) -> Limits {
        Limits {
            timeout: Some(Duration::from_millis(timeout_ms)),
            ..Limits::default()
        }
    }

    #[test]
    fn captures_output_and_status() {
        let (_dir, script) = shell("printf 'X-A: 1\\n\\nhi'; exit 3");
        let mut invocation = invoke(&script,
                                    &env(), InputChannel::empty(),
                                    &limits(5000)).unwrap();

        let parsed = invocation.read_response(&Limits::default().parser()).unwrap();
        let completion = invocation.finish().unwrap();

        assert_eq!(parsed.body, b"hi");
        assert_eq!(completion.status.code(), Some(3));
        assert!(!completion.success());
    }

    #[test]
    fn environment_is_exactly_the_cgi_variables() {
        let (_dir, script) = shell("printf '\\n'; env");
        let mut invocation = invoke(&script, &env(),
                                    InputChannel::empty(), &limits(5000)).unwrap();
        let parsed = invocation.read_response(&Limits::default().parser()).unwrap();
        invocation.finish().unwrap();

        let listed = String::from_utf8(parsed.body).unwrap();
        assert!(listed.lines().any(|l| l == "REQUEST_METHOD=GET"));
        assert!(listed.lines().any(|l| l == "CONTENT_LENGTH="));
        assert!(!listed.lines().any(|l| l.starts_with("HOME=")));
    }

    #[test]
    fn missing_program_fails_to_start() {
        let script = Script::new("/nonexistent/handler.cgi");
        match invoke(&script, &env(), InputChannel::empty(), &limits(1000)) {
            Err(Error::HandlerStart { .. }) => (),
            Err(e) => panic!("{:?}", e),
            Ok(_) => panic!("started a missing program")
        }
    }

    #[test]
    fn deadline_kills_the_handler() {
        let started = Instant::now();
        let (_dir, script) = shell("printf 'A: b\\n'; sleep 30");
        let mut invocation = invoke(&script, &env(),
                                    InputChannel::empty(), &limits(200)).unwrap();
        let pid = invocation.pid() as libc::pid_t;

        match invocation.read_response(&Limits::default().parser()) {
            Err(Error::HandlerTimeout(_)) => (),
            other => panic!("{:?}", other)
        }
        drop(invocation);

        assert!(started.elapsed() < Duration::from_secs(10));
        // Reaped: the pid no longer names a process
        assert_eq!(unsafe { libc::kill(pid, 0) }, -1);
    }

    #[test]
    fn deadline_covers_exit_after_closing_stdout() {
        let (_dir, script) = shell("printf '\\nok'; exec >&-; sleep 30");
        let mut invocation = invoke(&script,
                                    &env(), InputChannel::empty(),
                                    &limits(1000)).unwrap();

        let parsed = invocation.read_response(&Limits::default().parser()).unwrap();
        assert_eq!(parsed.body, b"ok");
        match invocation.finish() {
            Err(Error::HandlerTimeout(_)) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn body_reaches_stdin() {
        let input = InputChannel::for_request(&Method::Post, 10,
                                              Box::new(&b"input=test"[..]));
        let (_dir, script) = shell("printf '\\n'; cat");
        let mut invocation = invoke(&script, &env(),
                                    input, &limits(5000)).unwrap();

        let parsed = invocation.read_response(&Limits::default().parser()).unwrap();
        let completion = invocation.finish().unwrap();
        assert_eq!(parsed.body, b"input=test");
        assert_eq!(completion.input_bytes, 10);
    }

    #[test]
    fn short_body_reported_after_exit() {
        let input = InputChannel::for_request(&Method::Post, 11,
                                              Box::new(&b"input=tes"[..]));
        let (_dir, script) = shell("printf '\\n'; cat");
        let mut invocation = invoke(&script, &env(),
                                    input, &limits(5000)).unwrap();

        let parsed = invocation.read_response(&Limits::default().parser()).unwrap();
        assert_eq!(parsed.body, b"input=tes");
        match invocation.finish() {
            Err(Error::ShortBody { declared: 11, received: 9 }) => (),
            other => panic!("{:?}", other)
        }
    }

    /// Yields its bytes, then hangs for `pause` before timing out, like a
    /// client that stops sending mid-body
    struct Stall {
        data: &'static [u8],
        pause: Duration
    }

    impl Read for Stall {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.is_empty() {
                thread::sleep(self.pause);
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"));
            }
            let count = self.data.len().min(buf.len());
            buf[.. count].copy_from_slice(&self.data[.. count]);
            self.data = &self.data[count ..];
            Ok(count)
        }
    }

    fn stalled_input() -> InputChannel {
        InputChannel::for_request(&Method::Post, 11, Box::new(Stall {
            data: b"input=tes",
            pause: Duration::from_secs(4)
        }))
    }

    #[test]
    fn stalled_body_gives_up_at_the_deadline() {
        let started = Instant::now();
        let (_dir, script) = shell("printf '\\nok'");
        let mut invocation = invoke(&script, &env(),
                                    stalled_input(), &limits(300)).unwrap();

        let parsed = invocation.read_response(&Limits::default().parser()).unwrap();
        assert_eq!(parsed.body, b"ok");
        match invocation.finish() {
            Err(Error::ShortBody { declared: 11, received: 9 }) => (),
            other => panic!("{:?}", other)
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn handler_waiting_on_a_stalled_body_is_a_short_body() {
        let started = Instant::now();
        let (_dir, script) = shell("printf '\\n'; cat");
        let mut invocation = invoke(&script, &env(),
                                    stalled_input(), &limits(300)).unwrap();

        match invocation.read_response(&Limits::default().parser()) {
            Err(Error::ShortBody { declared: 11, received: 9 }) => (),
            other => panic!("{:?}", other)
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn stderr_without_newlines_is_drained_in_pieces() {
        let noise = vec![b'e'; 4 * 1024 * 1024];
        let drained = log_errors(&noise[..], Path::new("noisy.sh"));
        assert_eq!(drained, noise.len() as u64);
    }
}
