use clap::Parser;
use std::fs;
use storctl::config::{self, CatArgs, Cli, Command, LsArgs, PutArgs, RmArgs};
use storctl::error::{StorageError, StorageResult};
use storctl::session::{DirEntry, EntryKind, Session};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match config::Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            report_error(&err);
            std::process::exit(1);
        }
    };
    init_logging(&config.logging);

    if let Err(err) = run(&cli, &config).await {
        report_error(&err);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, config: &config::Config) -> StorageResult<()> {
    let session = Session::open(&config.connection, &config.timing).await?;
    let result = match &cli.command {
        Command::Ls(args) => run_ls(&session, args).await,
        Command::Cat(args) => run_cat(&session, args).await,
        Command::Put(args) => run_put(&session, args).await,
        Command::Rm(args) => run_rm(&session, args).await,
    };
    session.disconnect().await;
    result
}

async fn run_ls(session: &Session, args: &LsArgs) -> StorageResult<()> {
    let entries = session.list_directory(&args.path).await?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).unwrap_or_default()
        );
    } else {
        print_entries(&entries);
    }
    Ok(())
}

fn print_entries(entries: &[DirEntry]) {
    for entry in entries {
        match entry.kind {
            EntryKind::Directory => println!("{:>10}  {}/", "dir", entry.name),
            EntryKind::File => match entry.size {
                Some(size) => println!("{size:>10}  {}", entry.name),
                None => println!("{:>10}  {}", "?", entry.name),
            },
        }
    }
}

async fn run_cat(session: &Session, args: &CatArgs) -> StorageResult<()> {
    let content = session.read_file(&args.remote).await?;
    if !content.is_empty() {
        println!("{content}");
    }
    Ok(())
}

async fn run_put(session: &Session, args: &PutArgs) -> StorageResult<()> {
    let content = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => std::io::read_to_string(std::io::stdin())?,
    };
    session.write_file(&args.remote, &content).await?;
    println!("Wrote {} bytes to {}", content.len(), args.remote);
    Ok(())
}

async fn run_rm(session: &Session, args: &RmArgs) -> StorageResult<()> {
    session.delete_file(&args.remote).await?;
    println!("Removed {}", args.remote);
    Ok(())
}

fn init_logging(logging: &config::LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&logging.level))
        .with_writer(std::io::stderr);
    match logging.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

fn report_error(err: &StorageError) {
    eprintln!("Error: {err}");
    if let Some(details) = err.details() {
        eprintln!("Details: {details}");
    }
}
