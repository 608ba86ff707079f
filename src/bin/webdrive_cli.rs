//! WebDrive CLI - command-line front end for the storage service
//!
//! Usage:
//!   webdrive-cli login <username>          Log in and remember the session
//!   webdrive-cli ls [path]                 List a directory
//!   webdrive-cli get <remote> [dir]        Download a file
//!   webdrive-cli put <local> [remote-dir]  Upload a file
//!   webdrive-cli mkdir <path>              Create a directory
//!   webdrive-cli rm <path> / rmdir <path>  Delete a file / directory
//!   webdrive-cli browse                    Interactive shell

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use webdrive::listing::LoadState;
use webdrive::transfer::TransferProgress;
use webdrive::{
    path, ClientConfig, ClientError, DirectoryEntryList, DirectorySink, FileBrowser, LocalFile, MutationCoordinator,
    ProgressCallback, Route,
};

#[derive(Parser)]
#[command(
    name = "webdrive-cli",
    about = "WebDrive CLI - browse and transfer files on a WebDrive server",
    version
)]
struct Cli {
    /// Server URL (overrides config and WEBDRIVE_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Debug logging (otherwise RUST_LOG, default warn)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and persist the session
    Login {
        username: String,
        /// Password (read from WEBDRIVE_PASSWORD or prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Download a remote file
    Get {
        /// Remote file path
        remote: String,
        /// Local directory (default: configured download dir)
        dir: Option<PathBuf>,
    },
    /// Upload a local file
    Put {
        /// Local file path
        local: PathBuf,
        /// Remote directory (default: root)
        #[arg(default_value = "/")]
        remote: String,
    },
    /// Create a remote directory (parents included)
    Mkdir { path: String },
    /// Delete a remote file
    Rm { path: String },
    /// Delete a remote directory and its contents
    Rmdir { path: String },
    /// Interactive browser
    Browse,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(label: &str, total: Option<u64>) -> (ProgressBar, ProgressCallback) {
    let bar = ProgressBar::new(total.unwrap_or(0));
    let style = ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar.set_message(label.to_string());
    let handle = bar.clone();
    let callback: ProgressCallback = Arc::new(move |p: TransferProgress| {
        if let Some(total) = p.total {
            handle.set_length(total);
        }
        handle.set_position(p.transferred);
    });
    (bar, callback)
}

fn print_listing(path: &str, entries: &DirectoryEntryList) {
    if entries.is_empty() {
        println!("(empty: /{})", path);
        return;
    }
    for dir in &entries.directories {
        println!("{:>12}  {}/", "<dir>", dir.name);
    }
    for file in &entries.files {
        let size = file.size.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!("{:>12}  {}", size, file.name);
    }
}

/// Turn session loss into a hint about how to get back in.
fn explain(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::AuthExpired => anyhow::anyhow!("Session expired. Run `webdrive-cli login <username>` again."),
        ClientError::NotAuthenticated => anyhow::anyhow!("Not logged in. Run `webdrive-cli login <username>` first."),
        other => other.into(),
    }
}

fn read_password() -> Result<SecretString> {
    if let Ok(pw) = std::env::var("WEBDRIVE_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    eprint!("Password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(SecretString::from(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Split `docs/a.txt` into its directory and file name.
fn remote_file(remote: &str) -> Result<(String, String)> {
    match path::split_last(remote) {
        (dir, Some(name)) => Ok((dir, name)),
        _ => bail!("'{}' does not name a file", remote),
    }
}

async fn download(browser: &FileBrowser, remote: &str, dir: PathBuf) -> Result<()> {
    let (parent, name) = remote_file(remote)?;
    let sink = DirectorySink::new(dir);
    let (bar, cb) = progress_bar(&name, None);
    let result = browser.transfers().download(&name, &parent, &sink, Some(cb)).await;
    bar.finish_and_clear();
    let saved = result.map_err(explain)?;
    println!("Saved {} ({} bytes)", saved.location, saved.bytes);
    Ok(())
}

async fn upload(browser: &FileBrowser, local: &Path, remote_dir: &str) -> Result<()> {
    let source = LocalFile::open(local)
        .await
        .with_context(|| format!("Cannot read {}", local.display()))?;
    let size = webdrive::FileSource::size(&source);
    let (bar, cb) = progress_bar(&local.display().to_string(), size);
    let result = browser.transfers().begin_upload(source, remote_dir, Some(cb)).await;
    bar.finish_and_clear();
    let report = result.map_err(explain)?;
    println!("Uploaded {} to /{}", report.file_name, report.target_path);
    Ok(())
}

async fn run_command(browser: &FileBrowser, config: &ClientConfig, command: Commands) -> Result<()> {
    let mutations = MutationCoordinator::new(browser.transport().clone());
    match command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(pw) => SecretString::from(pw),
                None => read_password()?,
            };
            browser.login(&username, &password).await?;
            println!("Logged in as {}", username.trim());
        }
        Commands::Logout => {
            browser.logout();
            println!("Logged out");
        }
        Commands::Whoami => match browser.auth().identity() {
            Some(user) => println!("{}", user),
            None => println!("Not logged in"),
        },
        Commands::Ls { path: dir } => {
            let dir = path::normalize(&dir);
            let entries = browser.transport().list(&dir).await.map_err(explain)?;
            print_listing(&dir, &entries);
        }
        Commands::Get { remote, dir } => {
            download(browser, &remote, dir.unwrap_or_else(|| config.download_dir.clone())).await?;
        }
        Commands::Put { local, remote } => upload(browser, &local, &path::normalize(&remote)).await?,
        Commands::Mkdir { path: target } => {
            let (parent, name) = remote_file(&target)?;
            mutations.create_directory(&name, &parent).await.map_err(explain)?;
            println!("Created /{}", path::join(&parent, &name));
        }
        Commands::Rm { path: target } => {
            let (parent, name) = remote_file(&target)?;
            mutations.delete_file(&name, &parent).await.map_err(explain)?;
            println!("Deleted /{}", path::join(&parent, &name));
        }
        Commands::Rmdir { path: target } => {
            let (parent, name) = remote_file(&target)?;
            mutations.delete_directory(&name, &parent).await.map_err(explain)?;
            println!("Deleted /{}/", path::join(&parent, &name));
        }
        Commands::Browse => browse(browser, config).await?,
    }
    Ok(())
}

const BROWSE_HELP: &str = "\
  ls | refresh           list the current directory
  cd <name> | cd .. | cd /
  jump <index>           go to breadcrumb <index>
  pwd                    show the breadcrumb trail
  get <name> [dir]       download from the current directory
  put <local-path>       upload into the current directory
  mkdir <name> | rm <name> | rmdir <name>
  logout | quit";

fn print_trail(browser: &FileBrowser) {
    let trail: Vec<String> = browser
        .trail()
        .iter()
        .enumerate()
        .map(|(i, crumb)| format!("[{}] {}", i, crumb.name))
        .collect();
    println!("{}", trail.join(" > "));
}

fn show_listing(browser: &FileBrowser) {
    let snap = browser.snapshot();
    if let LoadState::Error(cause) = &snap.listing.status {
        println!("! {}", cause);
    }
    if snap.listing.shows_other_directory() {
        println!("(showing /{})", snap.listing.entries_path);
    }
    print_listing(&snap.listing.entries_path, &snap.listing.entries);
}

/// One shell command. Returns false when the shell should exit.
async fn browse_step(browser: &FileBrowser, config: &ClientConfig, line: &str) -> Result<bool> {
    let mut parts = line.splitn(2, ' ');
    let cmd = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();
    match cmd {
        "" => {}
        "help" | "?" => println!("{}", BROWSE_HELP),
        "quit" | "exit" => return Ok(false),
        "pwd" => print_trail(browser),
        "ls" | "refresh" => {
            browser.refresh().await.map_err(explain)?;
            show_listing(browser);
        }
        "cd" => {
            let moved = match arg {
                ".." => browser.ascend().await,
                "/" | "" => browser.jump_to(0).await,
                name => browser.descend(name).await,
            };
            moved.map_err(explain)?;
            print_trail(browser);
            show_listing(browser);
        }
        "jump" => {
            let index: usize = arg.parse().context("jump expects a breadcrumb index")?;
            browser.jump_to(index).await.map_err(explain)?;
            print_trail(browser);
            show_listing(browser);
        }
        "get" => {
            let mut args = arg.splitn(2, ' ');
            let name = args.next().unwrap_or_default();
            let dir = args
                .next()
                .map(PathBuf::from)
                .unwrap_or_else(|| config.download_dir.clone());
            download(browser, &path::join(&browser.current_path(), name), dir).await?;
        }
        "put" => {
            let source = LocalFile::open(arg)
                .await
                .with_context(|| format!("Cannot read {}", arg))?;
            let (bar, cb) = progress_bar(arg, webdrive::FileSource::size(&source));
            let result = browser.upload(source, Some(cb)).await;
            bar.finish_and_clear();
            result.map_err(explain)?;
            show_listing(browser);
        }
        "mkdir" => {
            browser.create_directory(arg).await.map_err(explain)?;
            show_listing(browser);
        }
        "rm" => {
            browser.delete_file(arg).await.map_err(explain)?;
            show_listing(browser);
        }
        "rmdir" => {
            browser.delete_directory(arg).await.map_err(explain)?;
            show_listing(browser);
        }
        "logout" => {
            browser.logout();
            println!("Logged out");
            return Ok(false);
        }
        other => println!("Unknown command '{}'. Type help.", other),
    }
    Ok(true)
}

async fn browse(browser: &FileBrowser, config: &ClientConfig) -> Result<()> {
    if browser.route() == Route::Login {
        bail!("Not logged in. Run `webdrive-cli login <username>` first.");
    }
    browser.refresh().await.map_err(explain)?;
    print_trail(browser);
    show_listing(browser);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("webdrive:/{}> ", browser.current_path());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match browse_step(browser, config, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("Error: {:#}", e),
        }
        if browser.route() == Route::Login {
            eprintln!("Session expired. Run `webdrive-cli login <username>` again.");
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ClientConfig::load();
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    let browser = FileBrowser::from_config(&config).context("Invalid configuration")?;

    run_command(&browser, &config, cli.command).await
}
