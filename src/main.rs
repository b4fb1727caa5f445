// src/main.rs
//
// slcanlog command line: list ports, monitor the bus, send a frame,
// replay a trace, convert trace files.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use slcanlog_lib::io::serial::list_serial_ports;
use slcanlog_lib::io::slcan::{run_source, SlcanConfig};
use slcanlog_lib::io::timeline::{
    self, export_file_name, load_trace_file, save_trace_file, ReplayControl, ReplayOptions,
    ReplayOutcome,
};
use slcanlog_lib::io::{SourceMessage, TransmitHandle};
use slcanlog_lib::logging::{init_file_logging, stop_file_logging};
use slcanlog_lib::settings::{load_settings, save_settings};
use slcanlog_lib::transmit::{transmit, TransmitIntent, TxKind};
use slcanlog_lib::{tlog, AppSettings, CanFrame, CaptureSession, FrameKind, FrameLog};

/// Depth of the chunk channel between the serial thread and the session
const SOURCE_CHANNEL_DEPTH: usize = 256;

/// SLCAN CAN / CAN FD adapter console
#[derive(Parser)]
#[command(name = "slcanlog", version)]
#[command(about = "Capture, send and replay CAN / CAN FD traffic through an slcan adapter")]
struct Cli {
    /// Also write log messages to a file in the configured log directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Adapter options shared by every command that opens the port
#[derive(clap::Args, Clone, Debug, Default)]
struct AdapterArgs {
    /// Serial port (defaults to the saved setting)
    #[arg(short, long)]
    port: Option<String>,
    /// CAN bitrate in bit/s
    #[arg(short, long)]
    bitrate: Option<u32>,
    /// CAN FD data-phase bitrate index (Y command)
    #[arg(long)]
    fd_bitrate: Option<u8>,
    /// Listen only (M1); transmitting is not possible
    #[arg(long)]
    silent: bool,
    /// Remember these adapter options as the new defaults
    #[arg(long)]
    save: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports
    Ports,

    /// Print received frames until Ctrl-C
    Monitor {
        #[command(flatten)]
        adapter: AdapterArgs,
        /// Export the captured log on exit (to this file, or the dump directory)
        #[arg(long)]
        export: Option<Option<PathBuf>>,
    },

    /// Send one frame
    Send {
        #[command(flatten)]
        adapter: AdapterArgs,
        /// Hex CAN ID
        #[arg(short, long)]
        id: String,
        /// Payload, e.g. "01 02 FF" or "0102FF"
        #[arg(short, long, default_value = "")]
        data: String,
        /// Frame type: std, rtr, fd, fd_brs
        #[arg(short, long, default_value = "std")]
        kind: TxKind,
        /// Extended (29-bit) ID
        #[arg(short = 'x', long)]
        extended: bool,
    },

    /// Replay a trace file at a fixed interval
    Replay {
        #[command(flatten)]
        adapter: AdapterArgs,
        /// Trace file (CSV, CanHacker or PEAK)
        file: PathBuf,
        /// Milliseconds between frames
        #[arg(long)]
        interval: Option<u64>,
        /// Start over after the last frame until Ctrl-C
        #[arg(long = "loop")]
        looped: bool,
    },

    /// Convert a trace file to the generic CSV format
    Convert {
        /// Trace file (CSV, CanHacker or PEAK)
        input: PathBuf,
        /// Output file (stdout when omitted)
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = load_settings().and_then(|settings| {
        if cli.log_file {
            init_file_logging(Path::new(&settings.log_dir))?;
        }
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| format!("Failed to start runtime: {}", e))?;
        runtime.block_on(run(cli.command, settings))
    });

    stop_file_logging();
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, settings: AppSettings) -> Result<(), String> {
    match command {
        Commands::Ports => list_ports(),
        Commands::Monitor { adapter, export } => {
            let settings = apply_adapter_args(settings, &adapter)?;
            monitor(&settings, export).await
        }
        Commands::Send {
            adapter,
            id,
            data,
            kind,
            extended,
        } => {
            let settings = apply_adapter_args(settings, &adapter)?;
            let intent = TransmitIntent {
                id,
                extended,
                data,
                kind,
            };
            send(&settings, &intent).await
        }
        Commands::Replay {
            adapter,
            file,
            interval,
            looped,
        } => {
            let settings = apply_adapter_args(settings, &adapter)?;
            let options = ReplayOptions {
                interval_ms: interval.unwrap_or(settings.replay_interval_ms),
                looped: looped || settings.replay_loop,
            };
            replay(&settings, &file, &options).await
        }
        Commands::Convert { input, output } => convert(&input, output.as_deref()),
    }
}

fn apply_adapter_args(mut settings: AppSettings, args: &AdapterArgs) -> Result<AppSettings, String> {
    if let Some(port) = &args.port {
        settings.port = port.clone();
    }
    if let Some(bitrate) = args.bitrate {
        settings.bitrate = bitrate;
    }
    if args.fd_bitrate.is_some() {
        settings.fd_bitrate_index = args.fd_bitrate;
    }
    if args.silent {
        settings.silent_mode = true;
    }
    if settings.port.is_empty() {
        return Err("No serial port given (use --port or `slcanlog ports`)".to_string());
    }
    if args.save {
        save_settings(&settings)?;
    }
    Ok(settings)
}

// ============================================================================
// Adapter connection
// ============================================================================

/// An open adapter: the chunk stream, the transmit handle (if not silent) and
/// the flag that stops the serial thread.
struct Connection {
    rx: mpsc::Receiver<SourceMessage>,
    writer: Option<TransmitHandle>,
    stop_flag: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Connection {
    async fn open(config: SlcanConfig) -> Result<Self, String> {
        let (tx, mut rx) = mpsc::channel(SOURCE_CHANNEL_DEPTH);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let device = config.device_label();
        let silent = config.silent_mode;
        let task = tokio::spawn(run_source(config, stop_flag.clone(), tx));

        let mut writer = None;
        loop {
            match rx.recv().await {
                Some(SourceMessage::Connected(port)) => {
                    tlog!("[slcanlog] Connected to {}", port);
                    if silent {
                        break;
                    }
                }
                Some(SourceMessage::TransmitReady(sender)) => {
                    writer = Some(TransmitHandle::new(device.clone(), sender));
                    break;
                }
                Some(SourceMessage::Error(e)) => return Err(e),
                Some(SourceMessage::Ended(reason)) => {
                    return Err(format!("{} ended before connecting: {}", device, reason))
                }
                Some(SourceMessage::Chunk(_)) => {}
                None => return Err(format!("{} closed before connecting", device)),
            }
        }

        Ok(Self {
            rx,
            writer,
            stop_flag,
            task,
        })
    }

    fn writer(&self) -> Result<&TransmitHandle, String> {
        self.writer
            .as_ref()
            .ok_or_else(|| "Adapter is in silent mode; transmitting is disabled".to_string())
    }

    /// Ask the serial thread to close the channel and wait for it
    async fn close(self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let Connection { mut rx, task, .. } = self;
        // Keep draining so the serial thread is never stuck on a full channel
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let _ = task.await;
        let _ = drain.await;
    }
}

/// Feed chunks from `rx` into the session until the source ends.
/// Returns the receiver so the connection can be closed cleanly.
fn spawn_ingest(
    mut rx: mpsc::Receiver<SourceMessage>,
    session: Arc<Mutex<CaptureSession>>,
) -> JoinHandle<mpsc::Receiver<SourceMessage>> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                SourceMessage::Chunk(chunk) => {
                    session.lock().await.ingest(&chunk);
                }
                SourceMessage::Error(e) => tlog!("[slcanlog] {}", e),
                SourceMessage::Ended(reason) => {
                    tlog!("[slcanlog] Source ended: {}", reason);
                    break;
                }
                _ => {}
            }
        }
        rx
    })
}

// ============================================================================
// Commands
// ============================================================================

fn list_ports() -> Result<(), String> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in ports {
        let usb = match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => format!(" [{:04X}:{:04X}]", vid, pid),
            _ => String::new(),
        };
        println!(
            "{}  {}{}  {}",
            p.port_name,
            p.port_type,
            usb,
            p.product.unwrap_or_default()
        );
    }
    Ok(())
}

async fn monitor(settings: &AppSettings, export: Option<Option<PathBuf>>) -> Result<(), String> {
    let log = Arc::new(FrameLog::with_capacity(settings.log_capacity));
    let mut session = CaptureSession::new(log.clone());
    let mut connection = Connection::open(settings.to_slcan_config()).await?;

    println!("Monitoring {} (Ctrl-C to stop)", settings.port);
    loop {
        tokio::select! {
            message = connection.rx.recv() => match message {
                Some(SourceMessage::Chunk(chunk)) => {
                    let summary = session.ingest(&chunk);
                    for frame in log.tail(summary.frames) {
                        println!("{}", format_frame(&frame));
                    }
                    for raw in summary.unknown {
                        println!("? {}", raw.escape_debug());
                    }
                }
                Some(SourceMessage::Error(e)) => eprintln!("error: {}", e),
                Some(SourceMessage::Ended(reason)) => {
                    tlog!("[slcanlog] Source ended: {}", reason);
                    break;
                }
                Some(_) => {}
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    connection.close().await;

    tlog!(
        "[slcanlog] Captured {} frames ({} malformed lines dropped)",
        log.len(),
        session.dropped_lines()
    );

    if let Some(path) = export {
        let path = path.unwrap_or_else(|| Path::new(&settings.dump_dir).join(export_file_name()));
        save_trace_file(&path, &log.snapshot())?;
        println!("Saved {} frames to {}", log.len(), path.display());
    }
    Ok(())
}

async fn send(settings: &AppSettings, intent: &TransmitIntent) -> Result<(), String> {
    let log = Arc::new(FrameLog::with_capacity(settings.log_capacity));
    let session = Arc::new(Mutex::new(CaptureSession::new(log.clone())));
    let Connection {
        rx,
        writer,
        stop_flag,
        task,
    } = Connection::open(settings.to_slcan_config()).await?;
    let ingest = spawn_ingest(rx, session.clone());

    let result = match writer.as_ref() {
        Some(writer) => transmit(intent, writer, &session).await,
        None => Err("Adapter is in silent mode; transmitting is disabled".to_string()),
    };

    stop_flag.store(true, Ordering::SeqCst);
    let _ = task.await;
    let _ = ingest.await;

    let frame = result?;
    println!("{}", format_frame(&frame));
    Ok(())
}

async fn replay(settings: &AppSettings, file: &Path, options: &ReplayOptions) -> Result<(), String> {
    let (format, frames) = load_trace_file(file)?;
    println!(
        "Loaded {} frames ({}) from {}",
        frames.len(),
        format.name(),
        file.display()
    );

    let log = Arc::new(FrameLog::with_capacity(settings.log_capacity));
    let session = Arc::new(Mutex::new(CaptureSession::new(log.clone())));
    let connection = Connection::open(settings.to_slcan_config()).await?;
    let writer = connection.writer()?.clone();
    let Connection {
        rx,
        stop_flag,
        task,
        ..
    } = connection;
    let ingest = spawn_ingest(rx, session);

    let control = ReplayControl::new();
    let ctrl_c = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                control.cancel();
            }
        })
    };

    let total = frames.len();
    let result = timeline::replay(&frames, &writer, &log, options, &control, |position, _| {
        eprint!("\r{} / {}", position, total);
    })
    .await;
    eprintln!();

    ctrl_c.abort();
    stop_flag.store(true, Ordering::SeqCst);
    let _ = task.await;
    let _ = ingest.await;

    match result.map_err(String::from)? {
        ReplayOutcome::Completed { sent } => println!("Done: {} frames sent", sent),
        ReplayOutcome::Cancelled { sent } => println!("Stopped: {} frames sent", sent),
    }
    Ok(())
}

fn convert(input: &Path, output: Option<&Path>) -> Result<(), String> {
    let (format, frames) = load_trace_file(input)?;
    match output {
        Some(path) => {
            save_trace_file(path, &frames)?;
            println!(
                "Converted {} frames ({} -> csv) to {}",
                frames.len(),
                format.name(),
                path.display()
            );
        }
        None => println!("{}", timeline::serialize_trace(&frames)),
    }
    Ok(())
}

/// One console line per frame: time, delta, direction, ID, length, payload
fn format_frame(frame: &CanFrame) -> String {
    let id = if frame.extended {
        format!("{:08X}", frame.id)
    } else {
        format!("{:03X}", frame.id)
    };
    let payload = match frame.kind {
        FrameKind::RemoteRequest => "RTR".to_string(),
        _ => frame
            .data
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" "),
    };
    let len = match frame.kind {
        FrameKind::RemoteRequest => frame.dlc as usize,
        _ => frame.declared_len(),
    };
    let fd = match frame.kind {
        FrameKind::FdData => " FD",
        FrameKind::FdDataBrs => " FD+BRS",
        _ => "",
    };
    format!(
        "{} {:>10.6} {:<6} {} [{}]{} {}",
        frame.timestamp,
        frame.delta,
        frame.direction,
        id,
        len,
        fd,
        payload
    )
}
