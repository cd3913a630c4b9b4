#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::io::Write;
use std::path::Path;

use jls_tunnel::config;
use jls_tunnel::mkcert::system_time;
use jls_tunnel::tcp_server::start_tcp_server;
use log::debug;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Builder;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;

#[derive(Debug)]
struct ConfigChanged;

fn start_notify_thread(
    config_paths: &[String],
) -> notify::Result<(RecommendedWatcher, UnboundedReceiver<ConfigChanged>)> {
    let (tx, rx) = unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(event.kind, EventKind::Modify(..)) {
                let _ = tx.send(ConfigChanged);
            }
        }
        Err(e) => eprintln!("watch error: {e:?}"),
    })?;

    for config_path in config_paths {
        watcher.watch(Path::new(config_path), RecursiveMode::NonRecursive)?;
    }

    Ok((watcher, rx))
}

async fn start_servers(
    configs: Vec<config::RuntimeConfig>,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    let mut join_handles = Vec::with_capacity(configs.len());
    for config in configs {
        match start_tcp_server(config).await {
            Ok(handle) => join_handles.push(handle),
            Err(e) => {
                for join_handle in join_handles {
                    join_handle.abort();
                }
                return Err(e);
            }
        }
    }
    Ok(join_handles)
}

fn print_usage_and_exit(arg0: String) {
    eprintln!(
        "Usage: {arg0} [--threads/-t N] [--dry-run/-d] [--no-reload] <config filename> [config filename] [..]"
    );
    std::process::exit(1);
}

fn main() {
    env_logger::builder()
        .format(|buf, record| {
            let timestamp = buf.timestamp();
            let level_style = buf.default_level_style(record.level());
            let sanitized_args = format!("{}", record.args())
                .chars()
                .map(|c| {
                    if c.is_ascii_graphic() || c == ' ' {
                        c
                    } else {
                        '?'
                    }
                })
                .collect::<String>();

            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}] {}",
                timestamp,
                record.level(),
                record.target(),
                sanitized_args
            )
        })
        .init();

    let mut args: Vec<String> = std::env::args().collect();
    let arg0 = args.remove(0);
    let mut num_threads = 0usize;
    let mut dry_run = false;
    let mut no_reload = false;

    while !args.is_empty() && args[0].starts_with("-") {
        if args[0] == "--threads" || args[0] == "-t" {
            args.remove(0);
            if args.is_empty() {
                eprintln!("Missing threads argument.");
                print_usage_and_exit(arg0);
                return;
            }
            num_threads = match args.remove(0).parse::<usize>() {
                Ok(n) => n,
                Err(e) => {
                    eprintln!("Invalid thread count: {e}");
                    print_usage_and_exit(arg0);
                    return;
                }
            };
        } else if args[0] == "--dry-run" || args[0] == "-d" {
            args.remove(0);
            dry_run = true;
        } else if args[0] == "--no-reload" {
            args.remove(0);
            no_reload = true;
        } else {
            eprintln!("Invalid argument: {}", args[0]);
            print_usage_and_exit(arg0);
            return;
        }
    }

    if args.is_empty() {
        println!("No config specified, assuming loading from file config.jls.yaml");
        args.push("config.jls.yaml".to_string())
    }

    if dry_run {
        println!("Starting dry run.");
    }

    if num_threads == 0 {
        num_threads = std::cmp::max(
            2,
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        );
        debug!("Runtime threads: {num_threads}");
    } else {
        println!("Using custom thread count ({num_threads})");
    }

    let mut builder = if num_threads == 1 {
        Builder::new_current_thread()
    } else {
        let mut mt = Builder::new_multi_thread();
        mt.worker_threads(num_threads);
        mt
    };

    let runtime = match builder.enable_io().enable_time().build() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    runtime.block_on(async move {
        let mut reload_state = if no_reload || dry_run {
            None
        } else {
            match start_notify_thread(&args) {
                Ok(state) => Some(state),
                Err(e) => {
                    eprintln!("Failed to watch config files: {e}\n");
                    print_usage_and_exit(arg0);
                    return;
                }
            }
        };

        let time_fn = system_time();

        loop {
            let configs = match config::load_configs(&args).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to load configs: {e}\n");
                    print_usage_and_exit(arg0);
                    return;
                }
            };

            for config in configs.iter() {
                debug!("================================================================================");
                debug!("{config:#?}");
            }
            debug!("================================================================================");

            let runtime_configs = match config::create_runtime_configs(configs, &time_fn).await {
                Ok(c) => c,
                Err(e) => {
                    if dry_run {
                        eprintln!("Dry run failed, could not create configs: {e}\n");
                        return;
                    }
                    eprintln!("Failed to create configs: {e}\n");
                    print_usage_and_exit(arg0);
                    return;
                }
            };

            if dry_run {
                println!("Finishing dry run, config parsed successfully.");
                return;
            }

            println!("\nStarting {} listener(s)..", runtime_configs.len());

            let join_handles = match start_servers(runtime_configs).await {
                Ok(handles) => handles,
                Err(e) => {
                    eprintln!("Failed to start listeners: {e}\n");
                    std::process::exit(1);
                }
            };

            match reload_state.as_mut() {
                Some((_watcher, rx)) => {
                    // Wait for config change
                    if rx.recv().await.is_none() {
                        futures::future::pending::<()>().await;
                    }

                    println!("Configs changed, restarting listeners in 3 seconds..");

                    for join_handle in join_handles {
                        join_handle.abort();
                    }

                    tokio::time::sleep(std::time::Duration::from_secs(3)).await;

                    // Remove any extra events
                    while rx.try_recv().is_ok() {}
                }
                None => {
                    futures::future::pending::<()>().await;
                }
            }
        }
    });
}
