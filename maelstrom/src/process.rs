use crate::checker::ExceptionTrack;
use crate::client::Client;
use crate::message::{Message, NodeId};
use crate::net::Net;
use crate::rpc::Registry;
use crate::{info, log, warn};
use color_eyre::eyre::{eyre, Report, WrapErr};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long a node gets to answer the init handshake.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a node gets to exit after its stdin closes, before being killed.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Poll interval for the supervisor loops.
const TICK: Duration = Duration::from_secs(1);

/// A running user process bridged to the net: its stdout lines become sends,
/// its mailbox drains into its stdin, its stderr is copied to a log file.
pub struct NodeHandle {
    id: NodeId,
    child: Child,
    net: Net,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

#[allow(clippy::too_many_arguments)]
pub fn start_node(
    net: &Net,
    registry: &Arc<Registry>,
    id: &str,
    node_ids: &[NodeId],
    bin: &str,
    args: &[String],
    log_file: &Path,
    exceptions: &ExceptionTrack,
) -> Result<NodeHandle, Report> {
    // open the stderr log first; failing late would leak the child
    let mut log = std::fs::File::create(log_file)
        .wrap_err_with(|| format!("creating node log {:?}", log_file))?;

    net.add_node(id);

    let mut child = match Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .wrap_err_with(|| format!("spawning node {} from {:?}", id, bin))
    {
        Ok(child) => child,
        Err(e) => {
            net.remove_node(id);
            return Err(e);
        }
    };
    info!("node {}: started {:?} (pid {})", id, bin, child.id());

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut threads = Vec::with_capacity(3);

    // stdin-writer: drain the node's mailbox into its stdin, one JSON object
    // per line. Write errors on a closed pipe are ignored.
    {
        let net = net.clone();
        let id = id.to_string();
        let shutdown = shutdown.clone();
        let mut stdin = child.stdin.take().expect("child stdin is piped");
        threads.push(std::thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                if let Some(msg) = net.recv(&id, TICK) {
                    let mut line = match serde_json::to_string(&msg) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!("node {}: serializing message: {}", id, e);
                            continue;
                        }
                    };
                    line.push('\n');
                    if stdin.write_all(line.as_bytes()).is_err() {
                        log!("node {}: stdin closed", id);
                    }
                }
            }
        }));
    }

    // stdout-reader: parse each line as a message and hand it to the net.
    // Malformed lines are a harness error for this test, never a crash.
    {
        let net = net.clone();
        let id = id.to_string();
        let exceptions = exceptions.clone();
        let stdout = child.stdout.take().expect("child stdout is piped");
        threads.push(std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                match serde_json::from_str::<Message>(&line) {
                    Ok(msg) => {
                        if let Err(e) = net.send(msg) {
                            warn!("node {}: send failed: {}", id, e);
                        }
                    }
                    Err(e) => {
                        warn!("node {}: malformed stdout line {:?}: {}", id, line, e);
                        exceptions.record(format!(
                            "node {}: malformed stdout line {:?}: {}",
                            id, line, e
                        ));
                    }
                }
            }
            log!("node {}: stdout closed", id);
        }));
    }

    // stderr-copier: tee the node's stderr into its per-node log file.
    {
        let id = id.to_string();
        let stderr = child.stderr.take().expect("child stderr is piped");
        threads.push(std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(_) => break,
                };
                log!("node {} stderr: {}", id, line);
                if writeln!(log, "{}", line).is_err() {
                    break;
                }
            }
        }));
    }

    let mut handle = NodeHandle {
        id: id.to_string(),
        child,
        net: net.clone(),
        shutdown,
        threads,
    };

    // the init handshake declares the node healthy
    let init_client = Client::open(net, registry.clone());
    let init = json!({
        "type": "init",
        "node_id": id,
        "node_ids": node_ids,
    });
    let reply = init_client.rpc_with_timeout(id, init, INIT_TIMEOUT);
    init_client.close();
    match reply {
        Ok(body) if crate::message::body_type(&body) == Some("init_ok") => {
            info!("node {}: initialized", id);
            Ok(handle)
        }
        Ok(body) => {
            handle.stop();
            Err(eyre!("node {} answered init with {}", id, body))
        }
        Err(e) => {
            handle.stop();
            Err(eyre!("node {} failed init: {}", id, e))
        }
    }
}

impl NodeHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Orderly shutdown: stop draining the mailbox (which closes the node's
    /// stdin), give the process a grace period, kill it if needed, join the
    /// bridge threads and unregister the mailbox.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let give_up = Instant::now() + STOP_GRACE;
        let exited = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if Instant::now() >= give_up {
                        break None;
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!("node {}: wait failed: {}", self.id, e);
                    break None;
                }
            }
        };
        match exited {
            Some(status) => info!("node {}: exited with {}", self.id, status),
            None => {
                warn!("node {}: did not exit in time, killing", self.id);
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }

        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.net.remove_node(&self.id);
    }
}
