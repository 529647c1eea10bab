use anyhow::{Context, Result, anyhow};
use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::warn;

/// Spawns `cmd` with piped output and waits, killing it after `timeout` if given.
pub fn run_captured(cmd: &mut Command, timeout: Option<Duration>) -> Result<Output> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {:?}", cmd.get_program()))?;
    wait(&mut child, timeout)
}

pub fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<Output> {
    match timeout {
        Some(t) => wait_with_timeout(child, t),
        None => {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (stdout, stderr) = drain(stdout, stderr);
            let status = child.wait().with_context(|| "waiting for child")?;
            Ok(Output {
                status,
                stdout: join(stdout, "stdout")?,
                stderr: join(stderr, "stderr")?,
            })
        }
    }
}

type Reader = std::thread::JoinHandle<Result<Vec<u8>>>;

// Drain pipes on helper threads so a chatty child can't deadlock on a full
// stdout/stderr buffer.
fn drain(
    stdout: Option<std::process::ChildStdout>,
    stderr: Option<std::process::ChildStderr>,
) -> (Reader, Reader) {
    let out = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut r) = stdout {
            r.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });
    let err = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut r) = stderr {
            r.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });
    (out, err)
}

fn join(handle: Reader, what: &str) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("{what} reader thread panicked"))?
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    let (stdout, stderr) = drain(child.stdout.take(), child.stderr.take());

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            return Ok(Output {
                status,
                stdout: join(stdout, "stdout")?,
                stderr: join(stderr, "stderr")?,
            });
        }

        if start.elapsed() > timeout {
            warn!("child process timed out after {:?}", timeout);
            let _ = child.kill();
            child.wait().with_context(|| "wait after kill")?;
            let _ = join(stdout, "stdout");
            let stderr = join(stderr, "stderr").unwrap_or_default();
            return Err(anyhow!(
                "process exceeded timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr)
            ));
        }

        std::thread::sleep(Duration::from_millis(50));
    }
}

/// `None` for a zero timeout, matching the config convention.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
