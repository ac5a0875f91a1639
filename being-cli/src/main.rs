use being_core::being::{Being, Role};
use being_core::block::BlockIdAllocator;
use being_core::blocks::{Sine, Trafo};
use being_core::canopen::backend::CanBackend;
use being_core::canopen::{NmtState, TransportError};
use being_core::config::RuntimeConfig;
use being_core::connect::pipe;
use being_core::scheduler::{Scheduler, TelemetrySink};
use being_core::telemetry::{TelemetryRecord, TelemetrySampler};
use chrono::Local;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use log::info;
use std::io::Write;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file overriding INTERVAL/WEB_INTERVAL.
    #[clap(short, long)]
    config: Option<String>,

    #[clap(flatten)]
    verbose: Verbosity,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo sine-into-trafo network at a fixed rate until SIGTERM.
    Run {
        /// Run for this many ticks instead of forever (0 = forever).
        #[clap(short, long, default_value_t = 0)]
        ticks: u64,
    },
    /// Print the execution order of the demo network and exit.
    Order,
}

/// A backend with no CAN bus attached; `single_cycle`/`update()` are
/// no-ops. Used by the `run`/`order` demo commands, which exercise the
/// block network and scheduler without real hardware.
struct NullBackend;

impl CanBackend for NullBackend {
    fn scan_for_node_ids(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }

    fn send_pdo(&mut self, _node: u8, _index: u16, _bytes: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn read_pdo(&mut self, _node: u8, _index: u16) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }

    fn sdo_read(&mut self, _node: u8, _index: u16, _subindex: u8) -> Result<Vec<u8>, TransportError> {
        Ok(Vec::new())
    }

    fn sdo_write(&mut self, _node: u8, _index: u16, _subindex: u8, _bytes: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    fn nmt_set(&mut self, _node: u8, _state: NmtState) -> Result<(), TransportError> {
        Ok(())
    }

    fn emcy_consume(&mut self, _node: u8) -> Vec<being_core::canopen::EmcyRecord> {
        Vec::new()
    }

    fn update(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct LoggingSink;

impl TelemetrySink for LoggingSink {
    fn send(&mut self, record: TelemetryRecord) {
        info!("telemetry: {:?}", record);
    }
}

fn build_demo_network(interval: f64) -> Being {
    let mut alloc = BlockIdAllocator::new();
    let sine_id = alloc.alloc();
    let trafo_id = alloc.alloc();

    let mut sine = Sine::new(sine_id, 1.0, 0.0, interval);
    let mut trafo = Trafo::new(trafo_id, 2.0, 0.5);
    pipe(sine.ports(), trafo.ports_mut()).expect("demo network has unambiguous sole ports");

    Being::new(
        vec![Role::Behavior(Box::new(sine)), Role::Behavior(Box::new(trafo))],
        vec![(sine_id, trafo_id)],
        interval,
    )
}

fn init_logging(verbosity: &Verbosity) {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .filter_level(verbosity.log_level_filter())
        .init();
}

#[quit::main]
fn main() {
    let cli = Cli::parse();
    init_logging(&cli.verbose);

    let config = match &cli.config {
        Some(path) => match RuntimeConfig::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("{err}");
                quit::with_code(1);
            }
        },
        None => RuntimeConfig::default(),
    };

    match cli.command.unwrap_or(Commands::Run { ticks: 0 }) {
        Commands::Order => {
            let being = build_demo_network(config.interval);
            for id in being.execution_order() {
                println!("{id:?}");
            }
        }
        Commands::Run { ticks } => {
            let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
            runtime.block_on(run_demo(config, ticks));
        }
    }
}

async fn run_demo(config: RuntimeConfig, ticks: u64) {
    let mut being = build_demo_network(config.interval);
    let mut backend = NullBackend;
    let mut sampler = TelemetrySampler::new();
    let mut sink = LoggingSink;
    let mut scheduler = Scheduler::new(config);

    let shutdown: std::pin::Pin<Box<dyn std::future::Future<Output = ()>>> = if ticks > 0 {
        let interval = config.interval_duration();
        Box::pin(async move {
            tokio::time::sleep(interval * ticks as u32).await;
        })
    } else {
        Box::pin(async {
            #[cfg(unix)]
            {
                let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("install SIGTERM handler");
                term.recv().await;
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        })
    };

    scheduler.run(&mut being, &mut backend, &mut sampler, &mut sink, shutdown).await;
}
