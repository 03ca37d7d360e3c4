use std::io::Write;

use log::debug;
use tokio::runtime::Builder;

use wsrelay::config::{self, Config};
use wsrelay::tcp::start_tcp_server;
use wsrelay::uuid_util::generate_uuid;

fn print_usage_and_exit(arg0: String) {
    eprintln!("Usage: {arg0} [--threads/-t N] [--dry-run/-d] [config filename] [config filename] [..]");
    eprintln!("       {arg0} generate-uuid");
    eprintln!();
    eprintln!("Without a config file, UUID, PROXY and BIND_ADDRESS are read from the environment.");
    std::process::exit(1);
}

async fn load_configs(args: &[String]) -> std::io::Result<Vec<Config>> {
    if args.is_empty() {
        println!("No config specified, reading configuration from the environment");
        return config::config_from_env().map(|c| vec![c]);
    }
    config::load_configs(args).await
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
        } else {
            eprintln!("Invalid argument: {}", args[0]);
            print_usage_and_exit(arg0);
            return;
        }
    }

    if args.iter().any(|s| s == "generate-uuid") {
        match generate_uuid() {
            Ok(uuid) => println!("{uuid}"),
            Err(e) => {
                eprintln!("Failed to generate UUID: {e}");
                std::process::exit(1);
            }
        }
        return;
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
        let configs = match load_configs(&args).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load server configs: {e}\n");
                print_usage_and_exit(arg0);
                return;
            }
        };

        for config in configs.iter() {
            debug!("================================================================================");
            debug!("{config:#?}");
        }
        debug!("================================================================================");

        let server_configs = match config::create_server_configs(configs) {
            Ok(c) => c,
            Err(e) => {
                if dry_run {
                    eprintln!("Dry run failed, could not create server configs: {e}\n");
                    return;
                }
                eprintln!("Failed to create server configs: {e}\n");
                print_usage_and_exit(arg0);
                return;
            }
        };

        if dry_run {
            println!("Finishing dry run, config parsed successfully.");
            return;
        }

        println!("\nStarting {} server(s)..", server_configs.len());

        let mut join_handles = vec![];
        for server_config in server_configs {
            match start_tcp_server(server_config).await {
                Ok(handle) => join_handles.push(handle),
                Err(e) => {
                    eprintln!("Failed to start server: {e}");
                    for join_handle in join_handles {
                        join_handle.abort();
                    }
                    std::process::exit(1);
                }
            }
        }

        futures::future::join_all(join_handles).await;
    });
}
