use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use shared::domain::{DeviceIdentity, DispenseAction, Slot, DEFAULT_SLOT_COUNT, MAX_SLOTS};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/remote.db")]
    database_url: String,
    /// Operate on another remote's records instead of this install's identity.
    #[arg(long)]
    device: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print (creating if needed) this install's device identity.
    Identity,
    Names {
        #[arg(long, default_value_t = DEFAULT_SLOT_COUNT)]
        slots: usize,
    },
    /// Rename dispenser N (1-based).
    Rename {
        dispenser: usize,
        name: String,
    },
    Log,
    ClearLog,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;
    let device = match cli.device {
        Some(raw) => DeviceIdentity::new(raw)?,
        None => storage.load_or_create_identity().await?,
    };

    match cli.command {
        Command::Identity => println!("{device}"),
        Command::Names { slots } => {
            if !(1..=MAX_SLOTS).contains(&slots) {
                bail!("slots must be between 1 and {MAX_SLOTS}");
            }
            for (index, name) in storage
                .dispenser_names(&device, slots)
                .await?
                .iter()
                .enumerate()
            {
                println!("{}: {name}", index + 1);
            }
        }
        Command::Rename { dispenser, name } => {
            let Some(slot) = Slot::from_wire_number(dispenser).filter(|s| s.0 < MAX_SLOTS) else {
                bail!("dispenser must be between 1 and {MAX_SLOTS}");
            };
            let current = storage.dispenser_name(&device, slot).await?;
            if storage.rename_dispenser(&device, slot, &name).await? {
                let name = name.trim();
                storage
                    .append_log(
                        &device,
                        DispenseAction::Rename,
                        &format!("\"{current}\" → \"{name}\""),
                    )
                    .await?;
                println!("renamed dispenser {dispenser}: {current} -> {name}");
            } else {
                println!("name unchanged");
            }
        }
        Command::Log => {
            for entry in storage.recent_log(&device).await? {
                println!(
                    "{}  {:<16}  {}",
                    entry.recorded_at.to_rfc3339(),
                    entry.action.label(),
                    entry.detail
                );
            }
        }
        Command::ClearLog => {
            let removed = storage.clear_log(&device).await?;
            println!("removed {removed} log entries for {device}");
        }
    }

    Ok(())
}
