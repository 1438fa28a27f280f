use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arcfind::cache::DiskCache;
use arcfind::config;
use arcfind::drivers;
use arcfind::models::SearchParams;
use arcfind::search::{search, SearchOptions};
use arcfind::utils;

/// Command line input / 命令行输入
struct CliArgs {
    params: SearchParams,
    save_dir: Option<String>,
}

fn print_usage() {
    eprintln!("usage: arcfind [--from YYYYMMDD] [--to YYYYMMDD] [--save DIR] <directory> <pattern>...");
    eprintln!("       remote server, cache and concurrency settings live in config.json");
}

/// Hand-rolled argument parsing; the surface is small enough.
/// 手写参数解析；参数面足够小。
fn parse_args(args: Vec<String>) -> Option<CliArgs> {
    let mut directory: Option<String> = None;
    let mut from_date: Option<String> = None;
    let mut to_date: Option<String> = None;
    let mut save_dir: Option<String> = None;
    let mut patterns: Vec<String> = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--from" => from_date = Some(iter.next()?),
            "--to" => to_date = Some(iter.next()?),
            "--save" => save_dir = Some(iter.next()?),
            "--help" | "-h" => return None,
            _ => {
                if directory.is_none() {
                    directory = Some(utils::fix_and_clean_path(&arg));
                } else {
                    patterns.push(arg);
                }
            }
        }
    }

    let directory = directory?;
    if patterns.is_empty() {
        return None;
    }

    Some(CliArgs {
        params: SearchParams {
            directory,
            from_date,
            to_date,
            patterns,
        },
        save_dir,
    })
}

/// File name for one saved match / 单条命中保存时的文件名
fn saved_name(archive_path: &str, entry_name: &str) -> String {
    format!(
        "{}_{}",
        utils::base_name(archive_path),
        entry_name.replace('/', "_")
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arcfind=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "arcfind {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME")
    );

    let Some(cli) = parse_args(std::env::args().skip(1).collect()) else {
        print_usage();
        std::process::exit(2);
    };

    let app_config = config::load_config().map_err(anyhow::Error::msg)?;

    let cache = Arc::new(DiskCache::open(
        app_config.get_cache_dir(),
        app_config.cache.capacity,
    )?);

    if let Some(dir) = &cli.save_dir {
        std::fs::create_dir_all(dir)?;
    }

    let conn = drivers::connect(&app_config.remote).await?;

    let mut stream = search(
        conn,
        cache,
        cli.params,
        SearchOptions::from(&app_config.search),
        &app_config.remote.username,
        &app_config.remote.password,
    )
    .await?;

    let mut total = 0usize;
    while let Some(hit) = stream.recv().await {
        total += 1;
        println!(
            "{} :: {} :: {} ({} bytes)",
            hit.archive_path,
            hit.entry_name,
            hit.pattern,
            hit.content.len()
        );

        if let Some(dir) = &cli.save_dir {
            let target = std::path::Path::new(dir)
                .join(saved_name(&hit.archive_path, &hit.entry_name));
            std::fs::write(&target, &hit.content)?;
            tracing::debug!("saved {:?}", target);
        }
    }

    if let Some(err) = stream.failure() {
        tracing::error!("search aborted: {}", err);
        std::process::exit(1);
    }

    tracing::info!("search finished with {} matches", total);
    Ok(())
}
