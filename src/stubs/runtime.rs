use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    constants::{
        APPEND_CHUNK_SCRIPT, DECODE_FILE_SCRIPT, PIPE_INPUT_SCRIPT, REDIRECT_INPUT_SCRIPT,
        WRITE_CHUNK_SCRIPT,
    },
    core::traits::runtime::{
        ExecId, ExecStream, RuntimeError, SandboxId, SandboxRuntime, SandboxSpec,
    },
};

/// What a program started inside the stub sandbox gets to see.
#[derive(Clone, Debug)]
pub struct ProgramCall {
    pub argv: Vec<String>,
    pub stdin: Vec<u8>,
    pub files: HashMap<String, Vec<u8>>,
}

impl ProgramCall {
    pub fn stdin_str(&self) -> String {
        String::from_utf8_lossy(&self.stdin).into_owned()
    }

    pub fn file_str(&self, path: &str) -> Option<String> {
        self.files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[derive(Clone, Debug)]
pub enum ProgramReply {
    Exit { code: Option<i64>, output: Vec<u8> },
    /// Emits `chunk` `chunks` times, then exits with `code`.
    Flood { code: i64, chunk: Vec<u8>, chunks: usize },
    /// Emits `output` and then never finishes.
    Hang { output: Vec<u8> },
}

impl ProgramReply {
    pub fn ok(output: &str) -> Self {
        Self::exit(0, output)
    }

    pub fn exit(code: i64, output: &str) -> Self {
        Self::Exit {
            code: Some(code),
            output: output.as_bytes().to_vec(),
        }
    }
}

type Program = dyn Fn(&ProgramCall) -> ProgramReply + Send + Sync;

/// In-memory sandbox runtime. It understands the judge's staging scripts
/// (keeping a per-sandbox file map) and hands every other command to
/// `program`.
pub struct ScriptedRuntime {
    program: Box<Program>,
    files: DashMap<String, HashMap<String, Vec<u8>>>,
    exit_codes: DashMap<String, Option<i64>>,
    specs: Mutex<Vec<SandboxSpec>>,
    execs: Mutex<Vec<Vec<String>>>,
    hung: Mutex<Vec<mpsc::Sender<Result<Vec<u8>, RuntimeError>>>>,
    next_id: AtomicUsize,
    created: AtomicUsize,
    stopped: AtomicUsize,
    fail_create: bool,
    fail_start: bool,
    fail_stop: bool,
    staging_fault: Option<StagingFault>,
}

/// How writes into the sandbox misbehave for destinations under `prefix`.
#[derive(Clone, Debug)]
struct StagingFault {
    prefix: String,
    hang: bool,
}

impl fmt::Debug for ScriptedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRuntime")
            .field("created", &self.created)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl ScriptedRuntime {
    pub fn new<F>(program: F) -> Self
    where
        F: Fn(&ProgramCall) -> ProgramReply + Send + Sync + 'static,
    {
        Self {
            program: Box::new(program),
            files: DashMap::new(),
            exit_codes: DashMap::new(),
            specs: Mutex::new(Vec::new()),
            execs: Mutex::new(Vec::new()),
            hung: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
            fail_create: false,
            fail_start: false,
            fail_stop: false,
            staging_fault: None,
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Makes every write into the sandbox fail, as on a full or read-only
    /// scratch area.
    pub fn failing_staging(self) -> Self {
        self.failing_staging_at("")
    }

    /// Like [`ScriptedRuntime::failing_staging`], limited to files whose
    /// path starts with `prefix`.
    pub fn failing_staging_at(mut self, prefix: &str) -> Self {
        self.staging_fault = Some(StagingFault {
            prefix: prefix.to_string(),
            hang: false,
        });
        self
    }

    /// Makes every write into the sandbox block forever.
    pub fn hanging_staging(mut self) -> Self {
        self.staging_fault = Some(StagingFault {
            prefix: String::new(),
            hang: true,
        });
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<SandboxSpec> {
        self.specs.lock().unwrap().clone()
    }

    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.execs.lock().unwrap().clone()
    }

    /// Commands that reached the program, i.e. everything but staging.
    pub fn program_runs(&self) -> usize {
        self.exec_log()
            .iter()
            .filter(|cmd| match cmd.as_slice() {
                [sh, c, script, ..] if sh == "sh" && c == "-c" => {
                    script == PIPE_INPUT_SCRIPT || script == REDIRECT_INPUT_SCRIPT
                }
                _ => true,
            })
            .count()
    }

    fn interpret(&self, sandbox: &str, command: &[String]) -> ProgramReply {
        match command {
            [sh, c, script, _, args @ ..] if sh == "sh" && c == "-c" => {
                self.interpret_script(sandbox, script, args)
            }
            argv => self.call_program(sandbox, argv.to_vec(), Vec::new()),
        }
    }

    fn interpret_script(&self, sandbox: &str, script: &str, args: &[String]) -> ProgramReply {
        if script == WRITE_CHUNK_SCRIPT || script == APPEND_CHUNK_SCRIPT {
            let target = args.get(1).map(String::as_str).unwrap_or_default();
            match &self.staging_fault {
                Some(fault) if target.starts_with(&fault.prefix) && fault.hang => {
                    return ProgramReply::Hang { output: Vec::new() };
                }
                Some(fault) if target.starts_with(&fault.prefix) => {
                    return ProgramReply::exit(1, "sh: can't create: Read-only file system");
                }
                _ => {}
            }
        }

        let mut files = self.files.entry(sandbox.to_string()).or_default();
        match (script, args) {
            (WRITE_CHUNK_SCRIPT, [chunk, path]) => {
                files.insert(path.clone(), chunk.as_bytes().to_vec());
                ProgramReply::ok("")
            }
            (APPEND_CHUNK_SCRIPT, [chunk, path]) => {
                files
                    .entry(path.clone())
                    .or_default()
                    .extend_from_slice(chunk.as_bytes());
                ProgramReply::ok("")
            }
            (DECODE_FILE_SCRIPT, [scratch, dest]) => {
                let decoded = files
                    .remove(scratch)
                    .and_then(|encoded| STANDARD.decode(encoded).ok());
                match decoded {
                    Some(bytes) => {
                        files.insert(dest.clone(), bytes);
                        ProgramReply::ok("")
                    }
                    None => ProgramReply::exit(1, "base64: invalid input"),
                }
            }
            (PIPE_INPUT_SCRIPT, [input, program @ ..]) => match STANDARD.decode(input) {
                Ok(stdin) => {
                    drop(files);
                    self.call_program(sandbox, program.to_vec(), stdin)
                }
                Err(_) => ProgramReply::exit(1, "base64: invalid input"),
            },
            (REDIRECT_INPUT_SCRIPT, [path, program @ ..]) => {
                let staged = files.get(path).cloned();
                drop(files);
                match staged {
                    Some(stdin) => self.call_program(sandbox, program.to_vec(), stdin),
                    None => ProgramReply::exit(2, "sh: can't open input file"),
                }
            }
            _ => ProgramReply::exit(127, "sh: unknown script"),
        }
    }

    fn call_program(&self, sandbox: &str, argv: Vec<String>, stdin: Vec<u8>) -> ProgramReply {
        let files = self
            .files
            .get(sandbox)
            .map(|files| files.value().clone())
            .unwrap_or_default();
        (self.program)(&ProgramCall { argv, stdin, files })
    }
}

fn refused(what: &str) -> RuntimeError {
    RuntimeError::Request {
        msg: format!("{what} refused by stub"),
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for ScriptedRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<SandboxId, RuntimeError> {
        if self.fail_create {
            return Err(refused("create"));
        }
        let id = format!("sandbox-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.files.insert(id.clone(), HashMap::new());
        self.specs.lock().unwrap().push(spec.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxId(id))
    }

    async fn start(&self, _id: &SandboxId) -> Result<(), RuntimeError> {
        if self.fail_start {
            return Err(refused("start"));
        }
        Ok(())
    }

    async fn exec(&self, id: &SandboxId, command: &[String]) -> Result<ExecStream, RuntimeError> {
        self.execs.lock().unwrap().push(command.to_vec());
        let exec_id = format!("exec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        let output = match self.interpret(&id.0, command) {
            ProgramReply::Exit { code, output } => {
                self.exit_codes.insert(exec_id.clone(), code);
                stream::iter(vec![Ok(output)]).boxed()
            }
            ProgramReply::Flood {
                code,
                chunk,
                chunks,
            } => {
                self.exit_codes.insert(exec_id.clone(), Some(code));
                stream::iter((0..chunks).map(move |_| Ok(chunk.clone()))).boxed()
            }
            ProgramReply::Hang { output } => {
                let (tx, rx) = mpsc::channel(1);
                let _ = tx.try_send(Ok(output));
                // Keep the sender alive so the stream never ends
                self.hung.lock().unwrap().push(tx);
                ReceiverStream::new(rx).boxed()
            }
        };

        Ok(ExecStream {
            id: ExecId(exec_id),
            output,
        })
    }

    async fn exec_exit_code(&self, exec: &ExecId) -> Result<Option<i64>, RuntimeError> {
        Ok(self.exit_codes.get(&exec.0).and_then(|code| *code))
    }

    async fn stop(&self, id: &SandboxId) -> Result<(), RuntimeError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        self.files.remove(&id.0);
        if self.fail_stop {
            return Err(refused("stop"));
        }
        Ok(())
    }
}
