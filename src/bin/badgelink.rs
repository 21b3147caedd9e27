//! Command-line tool for talking to a badge over USB, a serial port, or a
//! pair of host pipes. Organizes subcommands by domain: app launch, NVS,
//! AppFS, and FS.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;

use badgelink::appfs::AppfsMetadata;
use badgelink::connection::Connection;
use badgelink::nvs::{NvsValue, NvsValueType};
use badgelink::progress::Progress;
use badgelink::transport::{PipeTransport, SerialTransport, Transport, UsbTransport};
use badgelink::{Badgelink, Error};

#[derive(Parser)]
#[command(name = "badgelink", about = "CLI tool for managing a badge over Badgelink")]
struct Cli {
    /// Serial port device path, e.g. /dev/ttyACM0. Defaults to USB if omitted.
    #[arg(long, global = true)]
    port: Option<String>,

    /// Input pipe path; must be paired with --outpipe.
    #[arg(long, global = true, requires = "outpipe")]
    inpipe: Option<String>,

    /// Output pipe path; must be paired with --inpipe.
    #[arg(long, global = true, requires = "inpipe")]
    outpipe: Option<String>,

    /// USB vendor ID override (hex, e.g. 16d0).
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    vid: Option<u16>,

    /// USB product ID override (hex, e.g. 0f9a).
    #[arg(long, global = true, value_parser = parse_hex_u16)]
    pid: Option<u16>,

    /// Log every frame sent and received, in hex.
    #[arg(long, global = true)]
    dump_raw_bytes: bool,

    /// Per-request timeout, in milliseconds.
    #[arg(long, global = true, default_value_t = 250)]
    timeout: u64,

    /// Per-chunk timeout during bulk transfers, in milliseconds.
    #[arg(long, global = true, default_value_t = 500)]
    chunk_timeout: u64,

    /// Timeout for transfer initiate/finalize round trips, in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    xfer_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch an app on the badge.
    Start {
        #[arg(value_parser = parse_appfs_slug)]
        slug: String,
        #[arg(default_value = "", value_parser = parse_app_arg)]
        arg: String,
    },

    /// Non-volatile key/value storage.
    Nvs {
        #[command(subcommand)]
        action: NvsCommand,
    },

    /// The application-image filesystem.
    Appfs {
        #[command(subcommand)]
        action: AppfsCommand,
    },

    /// The general-purpose hierarchical filesystem.
    Fs {
        #[command(subcommand)]
        action: FsCommand,
    },

    /// Print shell completions to stdout.
    Completions { shell: clap_complete::Shell },
}

#[derive(Subcommand)]
enum NvsCommand {
    /// Read a value.
    Read {
        #[arg(value_parser = parse_nvs_ns_key)]
        namespace: String,
        #[arg(value_parser = parse_nvs_ns_key)]
        key: String,
        #[arg(value_enum)]
        r#type: NvsTypeArg,
        /// Write the value to this file instead of stdout (for blob/string).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Write a value.
    Write {
        #[arg(value_parser = parse_nvs_ns_key)]
        namespace: String,
        #[arg(value_parser = parse_nvs_ns_key)]
        key: String,
        #[arg(value_enum)]
        r#type: NvsTypeArg,
        /// Literal value; ignored for blob if --file is given.
        value: Option<String>,
        /// Read the value from this file instead of the `value` argument.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List entries, optionally within one namespace.
    List { namespace: Option<String> },
    /// Delete a value.
    Delete {
        #[arg(value_parser = parse_nvs_ns_key)]
        namespace: String,
        #[arg(value_parser = parse_nvs_ns_key)]
        key: String,
    },
}

#[derive(Subcommand)]
enum AppfsCommand {
    List,
    Stat {
        #[arg(value_parser = parse_appfs_slug)]
        slug: String,
    },
    Crc32 {
        #[arg(value_parser = parse_appfs_slug)]
        slug: String,
    },
    Delete {
        #[arg(value_parser = parse_appfs_slug)]
        slug: String,
    },
    Upload {
        #[arg(value_parser = parse_appfs_slug)]
        slug: String,
        #[arg(value_parser = parse_appfs_title)]
        title: String,
        #[arg(value_parser = parse_appfs_version)]
        version: u16,
        local_path: PathBuf,
    },
    Download {
        #[arg(value_parser = parse_appfs_slug)]
        slug: String,
        local_path: PathBuf,
    },
    Usage,
}

#[derive(Subcommand)]
enum FsCommand {
    List {
        #[arg(value_parser = parse_fs_path, default_value = "/")]
        path: String,
    },
    Stat {
        #[arg(value_parser = parse_fs_path)]
        path: String,
    },
    Crc32 {
        #[arg(value_parser = parse_fs_path)]
        path: String,
    },
    Delete {
        #[arg(value_parser = parse_fs_path)]
        path: String,
    },
    Mkdir {
        #[arg(value_parser = parse_fs_path)]
        path: String,
    },
    Rmdir {
        #[arg(value_parser = parse_fs_path)]
        path: String,
    },
    Upload {
        #[arg(value_parser = parse_fs_path)]
        path: String,
        local_path: PathBuf,
    },
    Download {
        #[arg(value_parser = parse_fs_path)]
        path: String,
        local_path: PathBuf,
    },
    Usage,
}

#[derive(Clone, Copy, ValueEnum)]
enum NvsTypeArg {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    String,
    Blob,
}

impl From<NvsTypeArg> for NvsValueType {
    fn from(t: NvsTypeArg) -> Self {
        match t {
            NvsTypeArg::U8 => NvsValueType::U8,
            NvsTypeArg::I8 => NvsValueType::I8,
            NvsTypeArg::U16 => NvsValueType::U16,
            NvsTypeArg::I16 => NvsValueType::I16,
            NvsTypeArg::U32 => NvsValueType::U32,
            NvsTypeArg::I32 => NvsValueType::I32,
            NvsTypeArg::U64 => NvsValueType::U64,
            NvsTypeArg::I64 => NvsValueType::I64,
            NvsTypeArg::String => NvsValueType::String,
            NvsTypeArg::Blob => NvsValueType::Blob,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(*shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let badge = connect(&cli).await?;
    run(badge, cli.command).await
}

// ---- Connection setup -------------------------------------------------

enum AnyBadge {
    Usb(Badgelink<UsbTransport>),
    Serial(Badgelink<SerialTransport>),
    Pipe(Badgelink<PipeTransport>),
}

async fn connect(cli: &Cli) -> Result<AnyBadge> {
    let def_timeout = Duration::from_millis(cli.timeout);
    let chunk_timeout = Duration::from_millis(cli.chunk_timeout);
    let xfer_timeout = Duration::from_millis(cli.xfer_timeout);

    let badge = match (&cli.inpipe, &cli.outpipe, &cli.port) {
        (Some(inpipe), Some(outpipe), _) => {
            let transport = PipeTransport::open(inpipe, outpipe)
                .await
                .context("failed to open pipe transport")?;
            let conn = open_conn(transport, def_timeout, chunk_timeout, xfer_timeout, cli.dump_raw_bytes).await?;
            AnyBadge::Pipe(Badgelink::new(conn))
        }
        (_, _, Some(port)) => {
            let transport = SerialTransport::open(port).context("failed to open serial port")?;
            let conn = open_conn(transport, def_timeout, chunk_timeout, xfer_timeout, cli.dump_raw_bytes).await?;
            AnyBadge::Serial(Badgelink::new(conn))
        }
        _ => {
            let transport = match (cli.vid, cli.pid) {
                (Some(vid), Some(pid)) => UsbTransport::open_with_ids(vid, pid),
                (None, None) => UsbTransport::open(),
                _ => bail!("--vid and --pid must be given together"),
            }
            .context("failed to open USB badge")?;
            let conn = open_conn(transport, def_timeout, chunk_timeout, xfer_timeout, cli.dump_raw_bytes).await?;
            AnyBadge::Usb(Badgelink::new(conn))
        }
    };
    Ok(badge)
}

async fn open_conn<T: Transport>(
    transport: T,
    def_timeout: Duration,
    chunk_timeout: Duration,
    xfer_timeout: Duration,
    dump_raw: bool,
) -> Result<Connection<T>> {
    let mut conn = Connection::open_with_timeouts(transport, def_timeout, chunk_timeout, xfer_timeout)
        .await
        .context("failed to sync with badge")?;
    conn.set_dump_raw(dump_raw);
    Ok(conn)
}

/// Dispatch on the connected transport kind, then on the subcommand.
/// `clap`'s enum can't be generic over `Transport`, so the match widens into
/// three near-identical bodies; kept thin and mechanical.
async fn run(badge: AnyBadge, command: Commands) -> Result<()> {
    match badge {
        AnyBadge::Usb(b) => run_on(b, command).await,
        AnyBadge::Serial(b) => run_on(b, command).await,
        AnyBadge::Pipe(b) => run_on(b, command).await,
    }
}

async fn run_on<T: Transport>(mut badge: Badgelink<T>, command: Commands) -> Result<()> {
    match command {
        Commands::Start { slug, arg } => {
            badge.start_app(&slug, &arg).await?;
            println!("{}", "app started".green());
        }
        Commands::Nvs { action } => run_nvs(&mut badge, action).await?,
        Commands::Appfs { action } => run_appfs(&mut badge, action).await?,
        Commands::Fs { action } => run_fs(&mut badge, action).await?,
        Commands::Completions { .. } => unreachable!("handled before connecting"),
    }
    Ok(())
}

// ---- NVS ---------------------------------------------------------------

async fn run_nvs<T: Transport>(badge: &mut Badgelink<T>, action: NvsCommand) -> Result<()> {
    match action {
        NvsCommand::Read {
            namespace,
            key,
            r#type,
            file,
        } => {
            let value = badge.nvs_read(&namespace, &key, r#type.into()).await?;
            print_nvs_value(&value, file.as_deref())?;
        }
        NvsCommand::Write {
            namespace,
            key,
            r#type,
            value,
            file,
        } => {
            let value = parse_nvs_value(r#type.into(), value.as_deref(), file.as_deref())?;
            badge.nvs_write(&namespace, &key, value).await?;
            println!("{}", "ok".green());
        }
        NvsCommand::List { namespace } => {
            let entries = badge.nvs_list(namespace.as_deref()).await?;
            print_table(
                &["namespace", "key", "type"],
                entries
                    .iter()
                    .map(|e| vec![e.namespace.clone(), e.key.clone(), e.value_type.to_string()]),
            );
        }
        NvsCommand::Delete { namespace, key } => {
            badge.nvs_delete(&namespace, &key).await?;
            println!("{}", "deleted".green());
        }
    }
    Ok(())
}

fn print_nvs_value(value: &NvsValue, file: Option<&std::path::Path>) -> Result<()> {
    match (value, file) {
        (NvsValue::Blob(bytes), Some(path)) => {
            std::fs::write(path, bytes)?;
            println!("wrote {} bytes to {}", bytes.len(), path.display());
        }
        (NvsValue::String(s), Some(path)) => {
            std::fs::write(path, s)?;
            println!("wrote {} bytes to {}", s.len(), path.display());
        }
        (NvsValue::Blob(bytes), None) => println!("{}", hex_string(bytes)),
        (NvsValue::String(s), None) => println!("{s}"),
        (other, _) => println!("{other:?}"),
    }
    Ok(())
}

fn parse_nvs_value(
    ty: NvsValueType,
    value: Option<&str>,
    file: Option<&std::path::Path>,
) -> Result<NvsValue> {
    if let Some(path) = file {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok(match ty {
            NvsValueType::String => NvsValue::String(String::from_utf8(bytes)?),
            NvsValueType::Blob => NvsValue::Blob(bytes),
            _ => bail!("--file is only valid for string or blob values"),
        });
    }
    let value = value.context("a value argument or --file is required")?;
    Ok(match ty {
        NvsValueType::U8 => NvsValue::U8(value.parse()?),
        NvsValueType::I8 => NvsValue::I8(value.parse()?),
        NvsValueType::U16 => NvsValue::U16(value.parse()?),
        NvsValueType::I16 => NvsValue::I16(value.parse()?),
        NvsValueType::U32 => NvsValue::U32(value.parse()?),
        NvsValueType::I32 => NvsValue::I32(value.parse()?),
        NvsValueType::U64 => NvsValue::U64(value.parse()?),
        NvsValueType::I64 => NvsValue::I64(value.parse()?),
        NvsValueType::String => NvsValue::String(value.to_string()),
        NvsValueType::Blob => NvsValue::Blob(value.as_bytes().to_vec()),
    })
}

// ---- AppFS ---------------------------------------------------------------

async fn run_appfs<T: Transport>(badge: &mut Badgelink<T>, action: AppfsCommand) -> Result<()> {
    match action {
        AppfsCommand::List => {
            let entries = badge.appfs_list().await?;
            print_table(
                &["slug", "title", "version", "size"],
                entries.iter().map(|e| {
                    vec![
                        e.slug.clone(),
                        e.title.clone(),
                        e.version.to_string(),
                        e.size.to_string(),
                    ]
                }),
            );
        }
        AppfsCommand::Stat { slug } => {
            let meta = badge.appfs_stat(&slug).await?;
            println!("{meta:#?}");
        }
        AppfsCommand::Crc32 { slug } => {
            let crc = badge.appfs_crc32(&slug).await?;
            println!("{crc:#010x}");
        }
        AppfsCommand::Delete { slug } => {
            badge.appfs_delete(&slug).await?;
            println!("{}", "deleted".green());
        }
        AppfsCommand::Upload {
            slug,
            title,
            version,
            local_path,
        } => {
            let size = std::fs::metadata(&local_path)?.len();
            let mut bar = progress_bar(size, "uploading");
            let metadata = AppfsMetadata {
                slug,
                title,
                version,
                size: 0,
            };
            badge
                .appfs_upload(metadata, &local_path, &mut bar)
                .await
                .map_err(annotate_device_error)?;
            bar.finish("upload complete");
        }
        AppfsCommand::Download { slug, local_path } => {
            let mut bar = progress_bar(0, "downloading");
            let data = badge
                .appfs_download(&slug, &mut bar)
                .await
                .map_err(annotate_device_error)?;
            std::fs::write(&local_path, data)?;
            bar.finish("download complete");
        }
        AppfsCommand::Usage => print_usage(badge.appfs_usage().await?),
    }
    Ok(())
}

// ---- FS ---------------------------------------------------------------

async fn run_fs<T: Transport>(badge: &mut Badgelink<T>, action: FsCommand) -> Result<()> {
    match action {
        FsCommand::List { path } => {
            let entries = badge.fs_list(&path).await?;
            print_table(
                &["name", "kind"],
                entries
                    .iter()
                    .map(|e| vec![e.name.clone(), if e.is_dir { "dir".into() } else { "file".into() }]),
            );
        }
        FsCommand::Stat { path } => {
            let stat = badge.fs_stat(&path).await?;
            println!("{stat:#?}");
        }
        FsCommand::Crc32 { path } => {
            let crc = badge.fs_crc32(&path).await?;
            println!("{crc:#010x}");
        }
        FsCommand::Delete { path } => {
            badge.fs_delete(&path).await?;
            println!("{}", "deleted".green());
        }
        FsCommand::Mkdir { path } => {
            badge.fs_mkdir(&path).await?;
            println!("{}", "created".green());
        }
        FsCommand::Rmdir { path } => {
            badge.fs_rmdir(&path).await?;
            println!("{}", "removed".green());
        }
        FsCommand::Upload { path, local_path } => {
            let size = std::fs::metadata(&local_path)?.len();
            let mut bar = progress_bar(size, "uploading");
            badge
                .fs_upload(&path, &local_path, &mut bar)
                .await
                .map_err(annotate_device_error)?;
            bar.finish("upload complete");
        }
        FsCommand::Download { path, local_path } => {
            let mut bar = progress_bar(0, "downloading");
            let data = badge
                .fs_download(&path, &mut bar)
                .await
                .map_err(annotate_device_error)?;
            std::fs::write(&local_path, data)?;
            bar.finish("download complete");
        }
        FsCommand::Usage => print_usage(badge.fs_usage().await?),
    }
    Ok(())
}

fn print_usage(usage: badgelink::fs::FsUsage) {
    println!("{} / {} bytes used", usage.used, usage.size);
}

fn annotate_device_error(err: Error) -> anyhow::Error {
    anyhow::anyhow!(err).context("transfer aborted")
}

// ---- Display helpers -----------------------------------------------------

struct ProgressBar(indicatif::ProgressBar);

fn progress_bar(total: u64, verb: &str) -> ProgressBar {
    let bar = indicatif::ProgressBar::new(total.max(1));
    bar.set_style(
        indicatif::ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar()),
    );
    bar.set_message(verb.to_string());
    ProgressBar(bar)
}

impl ProgressBar {
    fn finish(&self, msg: &str) {
        self.0.finish_with_message(msg.to_string());
    }
}

impl Progress for ProgressBar {
    fn on_progress(&mut self, done: u64, total: u64) {
        if total > self.0.length().unwrap_or(0) {
            self.0.set_length(total);
        }
        self.0.set_position(done);
    }
}

fn print_table<I, R>(headers: &[&str], rows: I)
where
    I: Iterator<Item = R>,
    R: AsRef<[String]>,
{
    let rows: Vec<Vec<String>> = rows.map(|r| r.as_ref().to_vec()).collect();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:<width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_line.join("  ").bold());

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", rule.join("  "));

    for row in &rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect();
        println!("{}", line.join("  "));
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join("")
}

// ---- Argument validators -------------------------------------------------

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16).map_err(|e| e.to_string())
}

fn warn_if_suspicious(field: &str, s: &str) {
    if s.chars().any(|c| c.is_whitespace() || !c.is_ascii_graphic()) {
        log::warn!("{field} '{s}' contains whitespace or non-printable characters");
    }
}

fn parse_nvs_ns_key(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("must not be empty".into());
    }
    if s.len() > badgelink::nvs::MAX_NS_KEY_LEN {
        return Err(format!("must be at most {} bytes", badgelink::nvs::MAX_NS_KEY_LEN));
    }
    warn_if_suspicious("NVS namespace/key", s);
    Ok(s.to_string())
}

fn parse_appfs_slug(s: &str) -> Result<String, String> {
    if s.is_empty() || s.len() > badgelink::appfs::MAX_SLUG_LEN {
        return Err(format!(
            "must be 1-{} bytes",
            badgelink::appfs::MAX_SLUG_LEN
        ));
    }
    warn_if_suspicious("AppFS slug", s);
    Ok(s.to_string())
}

fn parse_appfs_title(s: &str) -> Result<String, String> {
    if s.is_empty() || s.len() > badgelink::appfs::MAX_TITLE_LEN {
        return Err(format!(
            "must be 1-{} bytes",
            badgelink::appfs::MAX_TITLE_LEN
        ));
    }
    Ok(s.to_string())
}

fn parse_appfs_version(s: &str) -> Result<u16, String> {
    s.parse::<u16>().map_err(|e| e.to_string())
}

fn parse_fs_path(s: &str) -> Result<String, String> {
    if s.contains('\0') {
        return Err("must not contain null bytes".into());
    }
    if s.len() > badgelink::fs::MAX_PATH_LEN {
        return Err(format!("must be at most {} bytes", badgelink::fs::MAX_PATH_LEN));
    }
    Ok(s.to_string())
}

fn parse_app_arg(s: &str) -> Result<String, String> {
    if s.contains('\0') {
        return Err("must not contain null bytes".into());
    }
    if s.len() > badgelink::appfs::MAX_ARG_LEN {
        return Err(format!("must be at most {} bytes", badgelink::appfs::MAX_ARG_LEN));
    }
    Ok(s.to_string())
}
