use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;
use volume_ledger::{
    config::{self, AppConfig},
    db,
    models::{NewPosition, NewVolume, Position, Volume, VolumeEvent, VolumeType},
    services::{ClassificationRequest, LabelLayout, PrintFormat, PrintOutcome},
    store::{InMemoryStore, ResourceStore, SeaOrmStore},
    AppServices,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Volume(command) => handle_volume_command(&context, command, cli.json).await?,
        Commands::Position(command) => {
            handle_position_command(&context, command, cli.json).await?
        }
        Commands::Label(command) => handle_label_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "volume-cli", about = "Volume label and storage position management", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand)]
    Volume(VolumeCommands),
    #[command(subcommand)]
    Position(PositionCommands),
    #[command(subcommand)]
    Label(LabelCommands),
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// Register a volume described by a JSON file
    Create(FileArgs),
    Show(VolumeIdArgs),
    /// List the volumes of a document
    List(ListVolumesArgs),
    /// Record a shipment movement
    Transition(TransitionArgs),
    Invalidate(InvalidateArgs),
    Classify(ClassifyArgs),
    Delete(VolumeIdArgs),
}

#[derive(Subcommand)]
enum PositionCommands {
    Ensure(EnsurePositionArgs),
    Available(AvailableArgs),
    Assign(AssignArgs),
    Release(PositionCodeArgs),
    /// Create the E/C/D positions of a truck layout
    Layout(LayoutArgs),
}

#[derive(Subcommand)]
enum LabelCommands {
    /// Print a document's labels from a JSON file holding a volume and its siblings
    Print(PrintArgs),
    Reprint(ReprintArgs),
}

#[derive(Args)]
struct FileArgs {
    #[arg(long, help = "Path to the JSON payload")]
    file: PathBuf,
}

#[derive(Args)]
struct VolumeIdArgs {
    #[arg(long, help = "Volume id")]
    id: Uuid,
}

#[derive(Args)]
struct ListVolumesArgs {
    #[arg(long, help = "Document (nota fiscal) id")]
    nota_fiscal_id: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Movement {
    Ship,
    Receive,
}

impl From<Movement> for VolumeEvent {
    fn from(movement: Movement) -> Self {
        match movement {
            Movement::Ship => VolumeEvent::Ship,
            Movement::Receive => VolumeEvent::Receive,
        }
    }
}

#[derive(Args)]
struct TransitionArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long, value_enum)]
    event: Movement,
}

#[derive(Args)]
struct InvalidateArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long, help = "Why the label is being invalidated")]
    reason: String,
}

#[derive(Args)]
struct ClassifyArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long, help = "Storage area")]
    area: String,
    #[arg(long, action = ArgAction::SetTrue, help = "Mark the volume as chemical")]
    chemical: bool,
    #[arg(long)]
    codigo_onu: Option<String>,
    #[arg(long)]
    codigo_risco: Option<String>,
    #[arg(long)]
    classificacao: Option<String>,
}

#[derive(Args)]
struct EnsurePositionArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    area: Option<String>,
    #[arg(long)]
    capacity_class: Option<String>,
}

#[derive(Args)]
struct AvailableArgs {
    #[arg(long, help = "Restrict to one area")]
    area: Option<String>,
    #[arg(long, help = "List positions in the area of this volume", conflicts_with = "area")]
    volume: Option<Uuid>,
}

#[derive(Args)]
struct AssignArgs {
    #[arg(long)]
    code: String,
    #[arg(long)]
    volume: Uuid,
}

#[derive(Args)]
struct PositionCodeArgs {
    #[arg(long)]
    code: String,
}

#[derive(Args)]
struct LayoutArgs {
    #[arg(long)]
    carregamento_id: String,
    #[arg(long, default_value_t = 10)]
    rows: u32,
}

#[derive(Args)]
struct PrintArgs {
    #[arg(long, help = "JSON file with `volume` and `siblings`")]
    file: PathBuf,
    #[arg(long, help = "Paper format: a4, 100x150 or 50x100")]
    format: Option<PrintFormat>,
    #[arg(long, help = "Layout: default, compact or enhanced")]
    layout: Option<LabelLayout>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Print even if labels already exist for the document"
    )]
    confirm: bool,
}

#[derive(Args)]
struct ReprintArgs {
    #[arg(long)]
    id: Uuid,
    #[arg(long = "sibling", help = "Additional volume ids to reprint")]
    siblings: Vec<Uuid>,
    #[arg(long)]
    format: Option<PrintFormat>,
    #[arg(long)]
    layout: Option<LabelLayout>,
}

#[derive(serde::Deserialize)]
struct PrintFile {
    volume: NewVolume,
    #[serde(default)]
    siblings: Vec<NewVolume>,
}

struct CliContext {
    config: AppConfig,
    services: AppServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(&config.log_level, config.log_json);

        let store: Arc<dyn ResourceStore> = if config.uses_memory_store() {
            Arc::new(InMemoryStore::new())
        } else {
            let db_pool = db::establish_connection_with_config(&db::DbConfig::from(&config))
                .await
                .context("failed to connect to database")?;
            if config.auto_migrate {
                db::run_migrations(&db_pool)
                    .await
                    .context("failed to run migrations")?;
            }
            Arc::new(SeaOrmStore::new(Arc::new(db_pool)))
        };

        let services = AppServices::from_config(store, &config);
        Ok(Self { config, services })
    }

    fn print_options(
        &self,
        format: Option<PrintFormat>,
        layout: Option<LabelLayout>,
    ) -> (PrintFormat, LabelLayout) {
        (
            format.unwrap_or_else(|| self.config.print_format()),
            layout.unwrap_or_else(|| self.config.label_layout()),
        )
    }
}

async fn handle_volume_command(
    context: &CliContext,
    command: VolumeCommands,
    json: bool,
) -> Result<()> {
    let registry = &context.services.registry;
    match command {
        VolumeCommands::Create(args) => {
            let candidate: NewVolume = read_json(&args.file)?;
            let volume = registry.create(candidate).await?;
            emit_volume(&volume, json)
        }
        VolumeCommands::Show(args) => {
            let volume = registry.get(args.id).await?;
            emit_volume(&volume, json)
        }
        VolumeCommands::List(args) => {
            let volumes = registry.list_by_document(&args.nota_fiscal_id).await?;
            if json {
                return print_json(&volumes);
            }
            if volumes.is_empty() {
                println!("No volumes for document {}", args.nota_fiscal_id);
            }
            volumes.iter().for_each(render_volume);
            Ok(())
        }
        VolumeCommands::Transition(args) => {
            let volume = registry.transition(args.id, args.event.into()).await?;
            emit_volume(&volume, json)
        }
        VolumeCommands::Invalidate(args) => {
            let volume = registry.invalidate(args.id, &args.reason).await?;
            emit_volume(&volume, json)
        }
        VolumeCommands::Classify(args) => {
            let request = ClassificationRequest {
                tipo_volume: if args.chemical {
                    VolumeType::Chemical
                } else {
                    VolumeType::General
                },
                area: args.area,
                codigo_onu: args.codigo_onu,
                codigo_risco: args.codigo_risco,
                classificacao: args.classificacao,
            };
            let volume = context
                .services
                .classification
                .classify(args.id, request)
                .await?;
            emit_volume(&volume, json)
        }
        VolumeCommands::Delete(args) => {
            registry.delete(args.id).await?;
            if !json {
                println!("Volume {} deleted", args.id);
            }
            Ok(())
        }
    }
}

async fn handle_position_command(
    context: &CliContext,
    command: PositionCommands,
    json: bool,
) -> Result<()> {
    let allocator = &context.services.allocator;
    match command {
        PositionCommands::Ensure(args) => {
            let position = allocator
                .ensure_position(NewPosition {
                    posicao: args.code,
                    area: args.area,
                    classe_capacidade: args.capacity_class,
                    carregamento_id: None,
                })
                .await?;
            emit_positions(&[position], json)
        }
        PositionCommands::Available(args) => {
            let positions = match args.volume {
                Some(volume_id) => allocator.list_available_for_volume(volume_id).await?,
                None => allocator.list_available(args.area.as_deref()).await?,
            };
            emit_positions(&positions, json)
        }
        PositionCommands::Assign(args) => {
            let assignment = allocator.assign(args.volume, &args.code).await?;
            if json {
                return print_json(&assignment);
            }
            println!(
                "Volume {} stored at {}",
                assignment.volume.codigo, assignment.position.posicao
            );
            Ok(())
        }
        PositionCommands::Release(args) => {
            allocator.release(&args.code).await?;
            let position = allocator.get_position(&args.code).await?;
            emit_positions(&[position], json)
        }
        PositionCommands::Layout(args) => {
            let positions = allocator
                .provision_layout(&args.carregamento_id, args.rows)
                .await?;
            emit_positions(&positions, json)
        }
    }
}

async fn handle_label_command(
    context: &CliContext,
    command: LabelCommands,
    json: bool,
) -> Result<()> {
    let printing = &context.services.printing;
    match command {
        LabelCommands::Print(args) => {
            let file: PrintFile = read_json(&args.file)?;
            let (format, layout) = context.print_options(args.format, args.layout);
            let mut outcome = printing
                .request_print(file.volume, file.siblings, format, layout)
                .await?;

            if let PrintOutcome::NeedsConfirmation {
                existing_count,
                pending,
            } = outcome
            {
                if !args.confirm {
                    return Err(anyhow!(
                        "{} labels already exist for document {}; rerun with --confirm",
                        existing_count,
                        pending.nota_fiscal_id
                    ));
                }
                outcome = printing.confirm_and_print(pending, format, layout).await?;
            }

            if json {
                return print_json(&outcome);
            }
            if let PrintOutcome::Printed {
                updated_volumes,
                artifact,
            } = &outcome
            {
                println!(
                    "Printed {} labels on {} pages (job {})",
                    artifact.label_count, artifact.page_count, artifact.job_id
                );
                updated_volumes.iter().for_each(render_volume);
            }
            Ok(())
        }
        LabelCommands::Reprint(args) => {
            let (format, layout) = context.print_options(args.format, args.layout);
            printing
                .reprint(args.id, &args.siblings, format, layout)
                .await?;
            if !json {
                println!("Reprinted {} labels", args.siblings.len() + 1);
            }
            Ok(())
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn emit_volume(volume: &Volume, json: bool) -> Result<()> {
    if json {
        return print_json(volume);
    }
    render_volume(volume);
    Ok(())
}

fn emit_positions(positions: &[Position], json: bool) -> Result<()> {
    if json {
        return print_json(&positions);
    }
    for position in positions {
        let occupant = position
            .volume_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "free".to_string());
        println!(
            "- {} • area {} • {} • {}",
            position.posicao,
            position.area.as_deref().unwrap_or("-"),
            position.classe_capacidade,
            occupant
        );
    }
    Ok(())
}

fn render_volume(volume: &Volume) {
    println!(
        "- {} • {} • {}/{} • {} • position {}",
        volume.codigo,
        volume.id,
        volume.volume_numero,
        volume.total_volumes,
        volume.status,
        volume.posicao.as_deref().unwrap_or("-")
    );
}
