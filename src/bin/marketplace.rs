use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use grocery_market::{
    config::{create_default_config_file, AppConfig},
    logging,
    simulation::{Marketplace, Scenario},
    OrderOutcome,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "marketplace")]
#[command(about = "Grocery marketplace negotiation between clients, deliveries and markets")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario to completion and print every client's outcome
    Run {
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "grocery")]
        scenario: ScenarioChoice,

        #[arg(long, default_value = "100")]
        clients: usize,

        #[arg(long, default_value = "100")]
        deliveries: usize,

        #[arg(long, default_value = "100")]
        markets: usize,

        #[arg(long)]
        seed: Option<u64>,
    },
    /// Write the default configuration file
    InitConfig { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScenarioChoice {
    Grocery,
    Crowded,
    Luxury,
    SingleDelivery,
    Random,
    /// The `[scenario]` section of the configuration file
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::InitConfig { path } => {
            create_default_config_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Default configuration written to {}", path.display());
        }
        Command::Run {
            config,
            scenario,
            clients,
            deliveries,
            markets,
            seed,
        } => {
            let config = match config {
                Some(path) => AppConfig::load_with_env_overrides(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => AppConfig::default(),
            };
            config.validate()?;
            logging::init(&config.logging);

            let scenario = match scenario {
                ScenarioChoice::Grocery => Scenario::grocery(),
                ScenarioChoice::Crowded => Scenario::crowded(),
                ScenarioChoice::Luxury => Scenario::luxury(),
                ScenarioChoice::SingleDelivery => Scenario::single_delivery(),
                ScenarioChoice::Random => {
                    let mut rng = match seed {
                        Some(seed) => StdRng::seed_from_u64(seed),
                        None => StdRng::from_entropy(),
                    };
                    Scenario::random(&mut rng, clients, deliveries, markets)
                }
                ScenarioChoice::Config => config.scenario.clone(),
            };

            let report = Marketplace::new(config).run(&scenario).await?;

            for client in &report.clients {
                match &client.outcome {
                    OrderOutcome::Fulfilled { winner, price, note } => {
                        println!("{}: delivered by {} for {:.2} ({})", client.client, winner, price, note)
                    }
                    OrderOutcome::NoOffers => println!("{}: no offers", client.client),
                    OrderOutcome::FulfillmentTimedOut { winner, price } => println!(
                        "{}: {} accepted at {:.2} but never delivered",
                        client.client, winner, price
                    ),
                    OrderOutcome::Failed { reason } => println!("{}: failed ({})", client.client, reason),
                }
            }
            println!(
                "{} of {} orders fulfilled, {} market purchases",
                report.fulfilled_count(),
                report.clients.len(),
                report.purchase_count()
            );
        }
    }

    Ok(())
}
