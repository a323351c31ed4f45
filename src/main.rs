//! Energy Market CLI
//!
//! Runs contract operations against a SQLite world state (or an in-memory
//! one) as a given caller identity.
//!
//! Usage:
//!   energy-market --db ./world.db --identity ./admin.toml register-seller seller1 Org1MSP meter1 --solar-panels 3
//!   energy-market --db ./world.db --identity ./meter.toml publish-generation --t0 1700000000 --t1 1700000900 --claim solar=15
//!   energy-market simulate --seed 42 --sell-bids 100 --buy-bids 100

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use energy_market::bids::{self, BuyBidRequest, SellBidRequest};
use energy_market::contract::{EnergyContract, Invocation, Operation};
use energy_market::generation::{GenerationClaim, SellerRegistration};
use energy_market::identity::CallerIdentity;
use energy_market::ledger::{Ledger, MemoryLedger, SqliteLedger};
use energy_market::records::{BuyBid, EnergyType, SellBid};
use energy_market::sensors::ReadingInput;
use energy_market::stats::CallStats;
use energy_market::MarketConfig;

#[derive(Parser, Debug)]
#[command(name = "energy-market")]
#[command(about = "Peer-to-peer energy market contract")]
struct Cli {
    /// SQLite world state (in-memory if omitted)
    #[arg(long, env = "ENERGY_DB_PATH")]
    db: Option<PathBuf>,

    /// Market configuration TOML (falls back to ENERGY_CONFIG_PATH and env overrides)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Caller identity TOML (id, msp, attributes)
    #[arg(long, env = "ENERGY_IDENTITY_PATH")]
    identity: Option<PathBuf>,

    /// Ledger time in epoch seconds (default: current time)
    #[arg(long)]
    now: Option<u64>,

    /// Transaction proposal timestamp (default: ledger time)
    #[arg(long)]
    tx_timestamp: Option<u64>,

    /// Print per-operation call statistics
    #[arg(long)]
    timing: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Declare the calling sensor active at its certified position
    DeclareSensor,

    /// Disable sensors of the caller's organization
    DisableSensors {
        #[arg(required = true)]
        sensor_ids: Vec<String>,
    },

    /// Re-enable sensors of the caller's organization
    EnableSensors {
        #[arg(required = true)]
        sensor_ids: Vec<String>,
    },

    /// List active sensors of the caller's organization
    ListSensors,

    /// Trust sensors, given as OWNER_MSP/SENSOR_ID
    Trust {
        #[arg(required = true, value_parser = parse_asset)]
        sensors: Vec<(String, String)>,
    },

    /// Distrust sensors, given as OWNER_MSP/SENSOR_ID
    Distrust {
        #[arg(required = true, value_parser = parse_asset)]
        sensors: Vec<(String, String)>,
    },

    /// List sensors trusted by the caller's organization
    TrustedSensors,

    /// Publish a reading from the calling sensor
    PublishReading {
        /// Unit descriptor, decimal or 0x-prefixed hex
        #[arg(long, value_parser = parse_u32)]
        unit: u32,
        #[arg(long)]
        timestamp: u64,
        #[arg(long)]
        value: f64,
        #[arg(long, default_value = "1")]
        version: i32,
        #[arg(long, default_value = "0")]
        error: u32,
        #[arg(long, default_value = "0")]
        confidence: u32,
        #[arg(long, default_value = "0")]
        device: u32,
    },

    /// Dump readings of the caller organization's sensors
    Readings {
        #[arg(required = true)]
        sensor_ids: Vec<String>,
    },

    /// Register a seller of the caller's organization and its meter
    RegisterSeller {
        seller_id: String,
        meter_msp: String,
        meter_id: String,
        #[arg(long, default_value = "0")]
        wind_turbines: u64,
        #[arg(long, default_value = "0")]
        solar_panels: u64,
    },

    /// Claim generated energy for [t0, t1) as the calling meter
    PublishGeneration {
        #[arg(long)]
        t0: u64,
        #[arg(long)]
        t1: u64,
        /// TYPE=KWH, repeatable
        #[arg(long = "claim", required = true, value_parser = parse_claim)]
        claims: Vec<(String, f64)>,
    },

    /// Offer validated generation for sale
    SellBid {
        quantity_kwh: f64,
        price_per_kwh: f64,
        energy_type: String,
    },

    /// Place an anonymous buy bid
    BuyBid {
        payment_msp: String,
        token: String,
        utility_msp: String,
        quantity_kwh: f64,
        price_per_kwh: f64,
        energy_type: String,
    },

    /// Confirm payment cover for a buy bid token
    ValidateBuyBid {
        token: String,
        max_payment_cover: f64,
    },

    /// Clear every energy type
    Auction,

    /// Energy settled for a buy bid token
    TokenQuantity { payment_msp: String, token: String },

    /// Transactions of a buy bid token
    TokenTransactions { payment_msp: String, token: String },

    /// The calling seller's transactions for the given sell bid sequences
    SellBidTransactions {
        #[arg(required = true)]
        sequences: Vec<u64>,
    },

    /// A seller's transactions from a sell bid sequence onward
    SellerTransactions {
        seller_msp: String,
        seller_id: String,
        #[arg(default_value = "1")]
        first_sequence: u64,
    },

    /// Show the caller identity as the contract sees it
    WhoAmI,

    /// Seed random validated bids, run one auction and print the result
    Simulate {
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(long, default_value = "100")]
        sell_bids: u64,
        #[arg(long, default_value = "100")]
        buy_bids: u64,
        #[arg(long, default_value = "solar")]
        energy_type: String,
        #[arg(long, default_value = "1.0")]
        min_quantity: f64,
        #[arg(long, default_value = "10.0")]
        max_quantity: f64,
        #[arg(long, default_value = "1.0")]
        min_price: f64,
        #[arg(long, default_value = "10.0")]
        max_price: f64,
    },
}

fn parse_asset(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('/') {
        Some((owner, id)) if !owner.is_empty() && !id.is_empty() => {
            Ok((owner.to_string(), id.to_string()))
        }
        _ => Err(format!("expected OWNER_MSP/SENSOR_ID, got {:?}", s)),
    }
}

fn parse_claim(s: &str) -> std::result::Result<(String, f64), String> {
    let (energy_type, kwh) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=KWH, got {:?}", s))?;
    let kwh = kwh.parse::<f64>().map_err(|e| format!("{}: {}", kwh, e))?;
    Ok((energy_type.to_string(), kwh))
}

fn parse_u32(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("{}: {}", s, e))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "energy_market=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn unzip_assets(sensors: Vec<(String, String)>) -> (Vec<String>, Vec<String>) {
    sensors.into_iter().unzip()
}

fn to_operation(command: Commands) -> Operation {
    match command {
        Commands::DeclareSensor => Operation::DeclareSensorActive,
        Commands::DisableSensors { sensor_ids } => Operation::DisableSensors { sensor_ids },
        Commands::EnableSensors { sensor_ids } => Operation::EnableSensors { sensor_ids },
        Commands::ListSensors => Operation::ListActiveSensors,
        Commands::Trust { sensors } => {
            let (owner_msps, sensor_ids) = unzip_assets(sensors);
            Operation::TrustSensors { owner_msps, sensor_ids }
        }
        Commands::Distrust { sensors } => {
            let (owner_msps, sensor_ids) = unzip_assets(sensors);
            Operation::DistrustSensors { owner_msps, sensor_ids }
        }
        Commands::TrustedSensors => Operation::TrustedSensors,
        Commands::PublishReading {
            unit,
            timestamp,
            value,
            version,
            error,
            confidence,
            device,
        } => Operation::PublishSensorReading(ReadingInput {
            version,
            unit,
            timestamp,
            value,
            error_measure: error,
            confidence,
            device,
        }),
        Commands::Readings { sensor_ids } => Operation::SensorReadings { sensor_ids },
        Commands::RegisterSeller {
            seller_id,
            meter_msp,
            meter_id,
            wind_turbines,
            solar_panels,
        } => Operation::RegisterSeller(SellerRegistration {
            seller_id,
            meter_msp,
            meter_id,
            wind_turbines,
            solar_panels,
        }),
        Commands::PublishGeneration { t0, t1, claims } => {
            Operation::PublishEnergyGeneration(GenerationClaim {
                t0,
                t1,
                claims: claims.into_iter().collect::<BTreeMap<_, _>>(),
            })
        }
        Commands::SellBid {
            quantity_kwh,
            price_per_kwh,
            energy_type,
        } => Operation::RegisterSellBid(SellBidRequest {
            quantity_kwh,
            price_per_kwh,
            energy_type,
        }),
        Commands::BuyBid {
            payment_msp,
            token,
            utility_msp,
            quantity_kwh,
            price_per_kwh,
            energy_type,
        } => Operation::RegisterBuyBid(BuyBidRequest {
            payment_msp,
            token,
            utility_msp,
            quantity_kwh,
            price_per_kwh,
            energy_type,
        }),
        Commands::ValidateBuyBid {
            token,
            max_payment_cover,
        } => Operation::ValidateBuyBid {
            token,
            max_payment_cover,
        },
        Commands::Auction | Commands::Simulate { .. } => Operation::Auction,
        Commands::TokenQuantity { payment_msp, token } => {
            Operation::EnergyQuantityForToken { payment_msp, token }
        }
        Commands::TokenTransactions { payment_msp, token } => {
            Operation::TransactionsForToken { payment_msp, token }
        }
        Commands::SellBidTransactions { sequences } => {
            Operation::TransactionsForSellBids { sequences }
        }
        Commands::SellerTransactions {
            seller_msp,
            seller_id,
            first_sequence,
        } => Operation::TransactionsForSellerSince {
            seller_msp,
            seller_id,
            first_sequence,
        },
        Commands::WhoAmI => Operation::CallerInfo,
    }
}

struct SimulationParams {
    seed: u64,
    sell_bids: u64,
    buy_bids: u64,
    energy_type: EnergyType,
    quantity: (f64, f64),
    price: (f64, f64),
}

/// Write random validated bids straight into the world state.
fn seed_bids(ledger: &mut dyn Ledger, params: &SimulationParams) -> Result<()> {
    let (min_q, max_q) = params.quantity;
    let (min_p, max_p) = params.price;
    if !(min_q > 0.0 && min_q <= max_q && min_p > 0.0 && min_p <= max_p) {
        bail!("quantity and price ranges must be positive and ordered");
    }

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    for sequence in 1..=params.sell_bids {
        let bid = SellBid {
            seller_msp: "SimMSP".to_string(),
            seller_id: format!("seller{}", rng.gen_range(1..=10)),
            sequence,
            quantity_kwh: rng.gen_range(min_q..=max_q),
            price_per_kwh: rng.gen_range(min_p..=max_p),
            energy_type: params.energy_type,
        };
        bids::put_sell_bid(ledger, &bid)?;
    }
    for n in 1..=params.buy_bids {
        let bid = BuyBid {
            payment_msp: "SimPayMSP".to_string(),
            token: format!("{}-{:08}", params.seed, n),
            utility_msp: "SimUtilityMSP".to_string(),
            quantity_kwh: rng.gen_range(min_q..=max_q),
            price_per_kwh: rng.gen_range(min_p..=max_p),
            energy_type: params.energy_type,
            validated: true,
        };
        bids::put_buy_bid(ledger, &bid)?;
    }

    info!(
        seed = params.seed,
        sell_bids = params.sell_bids,
        buy_bids = params.buy_bids,
        energy_type = %params.energy_type,
        "Simulation bids seeded"
    );
    Ok(())
}

fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MarketConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => MarketConfig::from_env(),
    };

    let identity = match &cli.identity {
        Some(path) => CallerIdentity::load(path)
            .with_context(|| format!("Failed to load identity: {}", path.display()))?,
        None => CallerIdentity::new("LocalMSP", "cli"),
    };

    let mut ledger: Box<dyn Ledger> = match &cli.db {
        Some(path) => Box::new(SqliteLedger::open(path)?),
        None => Box::new(MemoryLedger::new()),
    };

    let now = cli
        .now
        .unwrap_or_else(|| Utc::now().timestamp().max(0) as u64);
    let mut invocation = Invocation::new(&identity, now);
    if let Some(tx_timestamp) = cli.tx_timestamp {
        invocation = invocation.with_tx_timestamp(tx_timestamp);
    }

    if let Commands::Simulate {
        seed,
        sell_bids,
        buy_bids,
        energy_type,
        min_quantity,
        max_quantity,
        min_price,
        max_price,
    } = &cli.command
    {
        let params = SimulationParams {
            seed: *seed,
            sell_bids: *sell_bids,
            buy_bids: *buy_bids,
            energy_type: energy_type.parse()?,
            quantity: (*min_quantity, *max_quantity),
            price: (*min_price, *max_price),
        };
        seed_bids(ledger.as_mut(), &params)?;
    }

    let contract = EnergyContract::new(config);
    let operation = to_operation(cli.command);
    let mut stats = CallStats::new();

    let (elapsed, result) = contract.invoke_timed(ledger.as_mut(), &invocation, &operation);
    stats.record(operation.name(), elapsed);

    let response = result.with_context(|| format!("{} failed", operation.name()))?;

    println!("{}", serde_json::to_string_pretty(&response.payload)?);
    if let Some(event) = response.event {
        println!("event: {}", event);
    }
    println!("writes: {} digest: {}", response.write_set.len(), response.digest());

    if cli.timing {
        for (name, op_stats) in stats.iter() {
            println!(
                "{:<28} calls={:<6} avg={:.3}ms",
                name, op_stats.calls, op_stats.average_ms
            );
        }
    }

    Ok(())
}
