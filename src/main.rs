use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lora_pkt_fwd::concentrator::{ConcentratorHal, MockConcentrator};
use lora_pkt_fwd::{gateway, init_logger};

/// Bridges a LoRa radio concentrator to a LoRaWAN network server over the
/// Semtech UDP gateway protocol.
#[derive(Parser)]
#[command(name = "lora_pkt_fwd")]
#[command(about = "LoRaWAN packet forwarder daemon")]
struct Cli {
    /// Path to the global configuration file.
    #[arg(short = 'c', long = "config", default_value = "global_conf.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_logger();

    let cli = Cli::parse();

    // The out-of-scope concentrator HAL crate is not linked in; this
    // software-only backend lets the daemon start and exercise the wire
    // protocol/scheduling paths without real radio hardware.
    let concentrator: Arc<dyn ConcentratorHal> = Arc::new(MockConcentrator::new());

    if let Err(e) = gateway::run(&cli.config, concentrator).await {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }
}
