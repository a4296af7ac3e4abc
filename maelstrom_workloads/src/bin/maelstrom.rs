use clap::{App, Arg, ArgMatches, SubCommand};
use color_eyre::eyre::{eyre, Report, WrapErr};
use maelstrom::checker::Validity;
use maelstrom::config::Config;
use maelstrom::rpc::Registry;
use maelstrom::runner::{run_test, TestSpec};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn main() {
    maelstrom::logging::init();
    if let Err(e) = color_eyre::install() {
        eprintln!("color-eyre install failed: {}", e);
    }
    let exit = match dispatch() {
        Ok(exit) => exit,
        Err(e) => {
            eprintln!("harness failure: {:?}", e);
            3
        }
    };
    std::process::exit(exit);
}

fn dispatch() -> Result<i32, Report> {
    let matches = App::new("maelstrom")
        .version("0.1")
        .about("A workbench for learning distributed systems by writing your own.")
        .subcommand(test_args(
            SubCommand::with_name("test").about("Runs one workload test"),
            true,
        ))
        .subcommand(test_args(
            SubCommand::with_name("test-all").about("Runs every workload against one binary"),
            false,
        ))
        .subcommand(
            SubCommand::with_name("doc").about("Emits the workload RPC reference"),
        )
        .subcommand(
            SubCommand::with_name("serve")
                .about("Serves the artifact store over HTTP")
                .arg(
                    Arg::with_name("store")
                        .long("store")
                        .value_name("DIR")
                        .help("artifact store to serve")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("port")
                        .long("port")
                        .value_name("PORT")
                        .help("port to listen on")
                        .takes_value(true),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        ("test", Some(sub)) => {
            let spec = parse_spec(sub)?;
            let workload_name = sub.value_of("workload").expect("workload is required");
            let workload = maelstrom_workloads::workload(workload_name)
                .ok_or_else(|| eyre!("unknown workload {:?}", workload_name))?;
            let outcome = run_test(&spec, workload)?;
            info!("results in {:?}", outcome.store);
            Ok(exit_code(outcome.valid))
        }
        ("test-all", Some(sub)) => {
            let base = parse_spec(sub)?;
            let mut worst = 0;
            for workload in maelstrom_workloads::workloads() {
                let mut spec = base.clone();
                spec.name = workload.name().to_string();
                let outcome = run_test(&spec, workload)?;
                info!("{}: {:?} ({:?})", spec.name, outcome.valid, outcome.store);
                worst = worst.max(exit_code(outcome.valid));
            }
            Ok(worst)
        }
        ("doc", _) => {
            // workloads share RPC names (read, add, txn), so each gets its
            // own registry
            for workload in maelstrom_workloads::workloads() {
                let mut registry = Registry::standard();
                workload.register(&mut registry);
                println!("# Workload: {}\n", workload.name());
                println!("{}", registry.doc());
            }
            Ok(0)
        }
        ("serve", Some(sub)) => {
            let store = PathBuf::from(sub.value_of("store").unwrap_or("store"));
            let port: u16 = sub
                .value_of("port")
                .unwrap_or("8080")
                .parse()
                .wrap_err("parsing --port")?;
            serve(&store, port)?;
            Ok(0)
        }
        _ => Err(eyre!("missing subcommand; try test, test-all, doc or serve")),
    }
}

fn test_args<'a, 'b>(app: App<'a, 'b>, workload_required: bool) -> App<'a, 'b> {
    app.arg(
        Arg::with_name("workload")
            .short("w")
            .long("workload")
            .value_name("NAME")
            .help("workload to run")
            .required(workload_required)
            .takes_value(true),
    )
    .arg(
        Arg::with_name("bin")
            .long("bin")
            .value_name("PATH")
            .help("node binary; omit for service-only workloads")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("node-count")
            .long("node-count")
            .value_name("N")
            .help("number of nodes to spawn")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("concurrency")
            .long("concurrency")
            .value_name("N")
            .help("number of client threads")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("time-limit")
            .long("time-limit")
            .value_name("SECONDS")
            .help("main-phase duration")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("rate")
            .long("rate")
            .value_name("OPS_PER_SEC")
            .help("target operation rate across all clients")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("latency")
            .long("latency")
            .value_name("MILLIS")
            .help("mean network latency")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("p-loss")
            .long("p-loss")
            .value_name("PROBABILITY")
            .help("message loss probability")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("nemesis")
            .long("nemesis")
            .value_name("KIND")
            .help("fault injector: partition or none")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("nemesis-interval")
            .long("nemesis-interval")
            .value_name("SECONDS")
            .help("time between nemesis transitions")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("seed")
            .long("seed")
            .value_name("SEED")
            .help("seed for all randomness in the run")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("store")
            .long("store")
            .value_name("DIR")
            .help("artifact store root")
            .takes_value(true),
    )
    .arg(
        Arg::with_name("log-net-send")
            .long("log-net-send")
            .help("log every message sent"),
    )
    .arg(
        Arg::with_name("log-net-recv")
            .long("log-net-recv")
            .help("log every message received"),
    )
}

fn parse_spec(sub: &ArgMatches<'_>) -> Result<TestSpec, Report> {
    let node_count: usize = sub.value_of("node-count").unwrap_or("1").parse()?;
    let mut config = Config::new(node_count);
    if let Some(concurrency) = sub.value_of("concurrency") {
        config.set_concurrency(concurrency.parse()?);
    }
    if let Some(limit) = sub.value_of("time-limit") {
        config.set_time_limit(Duration::from_secs_f64(limit.parse()?));
    }
    if let Some(rate) = sub.value_of("rate") {
        config.set_rate(rate.parse()?);
    }
    if let Some(latency) = sub.value_of("latency") {
        config.set_latency(Duration::from_millis(latency.parse()?));
    }
    if let Some(p_loss) = sub.value_of("p-loss") {
        config.set_p_loss(p_loss.parse()?);
    }
    if let Some(seed) = sub.value_of("seed") {
        config.set_seed(seed.parse()?);
    }
    match sub.value_of("nemesis") {
        None | Some("none") => {}
        Some("partition") => {
            let interval: f64 = sub.value_of("nemesis-interval").unwrap_or("10").parse()?;
            config.set_nemesis_interval(Some(Duration::from_secs_f64(interval)));
        }
        Some(other) => return Err(eyre!("unknown nemesis {:?}", other)),
    }
    config.set_log_net_send(sub.is_present("log-net-send"));
    config.set_log_net_recv(sub.is_present("log-net-recv"));

    Ok(TestSpec {
        name: sub.value_of("workload").unwrap_or("suite").to_string(),
        bin: sub.value_of("bin").unwrap_or("").to_string(),
        args: Vec::new(),
        store_root: PathBuf::from(sub.value_of("store").unwrap_or("store")),
        config,
    })
}

fn exit_code(valid: Validity) -> i32 {
    match valid {
        Validity::True => 0,
        Validity::False => 1,
        Validity::Unknown => 2,
    }
}

/// A very small viewer over the artifact store: directory listings and raw
/// files, enough to browse results from a browser.
fn serve(store: &std::path::Path, port: u16) -> Result<(), Report> {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    let listener =
        TcpListener::bind(("127.0.0.1", port)).wrap_err_with(|| format!("binding :{}", port))?;
    info!("serving {:?} on http://127.0.0.1:{}", store, port);

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(_) => continue,
        };
        let request_line = {
            let mut reader = BufReader::new(&mut stream);
            let mut line = String::new();
            let _ = reader.read_line(&mut line);
            line
        };
        let path = request_line.split_whitespace().nth(1).unwrap_or("/");
        let relative = path.trim_start_matches('/');
        // refuse to escape the store
        let target = if relative.split('/').any(|part| part == "..") {
            None
        } else {
            Some(store.join(relative))
        };

        let (status, content_type, body) = match target {
            Some(target) if target.is_dir() => (200, "text/html", listing(store, &target)),
            Some(target) if target.is_file() => {
                let content_type = if target.extension().map(|e| e == "html").unwrap_or(false) {
                    "text/html"
                } else {
                    "text/plain; charset=utf-8"
                };
                match std::fs::read_to_string(&target) {
                    Ok(body) => (200, content_type, body),
                    Err(_) => (404, "text/plain", "unreadable".to_string()),
                }
            }
            _ => (404, "text/plain", "not found".to_string()),
        };
        let reason = if status == 200 { "OK" } else { "Not Found" };
        let _ = write!(
            stream,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            reason,
            content_type,
            body.len(),
            body
        );
    }
    Ok(())
}

fn listing(store: &std::path::Path, dir: &std::path::Path) -> String {
    let mut entries: Vec<String> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let relative = path.strip_prefix(store).ok()?.to_string_lossy().into_owned();
            let name = entry.file_name().to_string_lossy().into_owned();
            Some(format!("<li><a href=\"/{}\">{}</a></li>", relative, name))
        })
        .collect();
    entries.sort();
    format!(
        "<!DOCTYPE html><html><body><h1>{}</h1><ul>{}</ul></body></html>",
        dir.display(),
        entries.join("")
    )
}
