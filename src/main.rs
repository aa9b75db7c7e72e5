use anyhow::{anyhow, Result};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yaolist_fileio::config;
use yaolist_fileio::storage::FileIORegistry;
use yaolist_fileio::Options;

const USAGE: &str = "\
usage: yaolist-fileio <command> <target> [key=value ...]

commands:
  required <scheme>   print the options that must be supplied
  ls <uri>            list a directory
  exists <uri>        check whether a path exists
  cat <uri>           write a file to stdout";

/// Parse trailing key=value arguments / 解析配置参数
fn parse_options(args: &[String]) -> Result<Options> {
    let options = Options::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid option (expected key=value): {}", arg))?;
        options.set(key.trim(), value.trim());
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yaolist_fileio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }
    let (command, target) = (args[0].as_str(), args[1].as_str());
    let options = parse_options(&args[2..])?;

    // Load configuration / 加载配置
    config::init_config().map_err(|e| anyhow!(e))?;
    tracing::debug!(
        "yaolist-fileio {} (built {}, plugins in {:?})",
        yaolist_fileio::CORE_VERSION,
        yaolist_fileio::BUILD_TIME,
        config::config().get_plugins_dir()
    );

    let registry = FileIORegistry::new();
    yaolist_fileio::register_loaders(&registry).await?;

    match command {
        "required" => {
            let required = registry.required_options(target).await?;
            println!("{}", serde_json::to_string_pretty(&required)?);
        }
        "ls" => {
            let fileio = registry.create(target, options).await?;
            for entry in fileio.list(target).await? {
                let kind = if entry.is_dir { "d" } else { "-" };
                println!("{} {:>12} {}", kind, entry.size, entry.path);
            }
        }
        "exists" => {
            let fileio = registry.create(target, options).await?;
            println!("{}", fileio.exists(target).await?);
        }
        "cat" => {
            let fileio = registry.create(target, options).await?;
            let data = fileio.read_bytes(target).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        other => {
            return Err(anyhow!("Unknown command '{}'\n{}", other, USAGE));
        }
    }

    Ok(())
}
