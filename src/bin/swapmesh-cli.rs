//! Demo CLI driving a local [`swapmesh::Engine`] end to end: create
//! intents, run matching, accept proposals, walk a cycle through
//! settlement, and manage vault holdings and delegations.
//!
//! Every run loads its snapshot from `--state-file` (default
//! `~/.swapmesh/state.json`) and saves back to it after each mutation, so
//! a sequence of CLI invocations behaves like a persistent session.
//! `--ephemeral` uses an in-memory store instead and discards state on
//! exit.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use swapmesh::config::EngineConfig;
use swapmesh::crypto::keys::KeyRings;
use swapmesh::delivery::WebhookEnvelope;
use swapmesh::engine::{Engine, RequestContext};
use swapmesh::model::{Actor, ActorType, Asset, AssetValues, Delegation, SwapIntent};
use swapmesh::settlement::VaultBinding;
use swapmesh::store::{FileStateStore, MemoryStateStore, StateStore};

#[derive(Parser)]
#[command(name = "swapmesh", version, about = "Multi-reciprocity swap marketplace engine")]
struct Cli {
    /// Snapshot file to load from and save to. Defaults to ~/.swapmesh/state.json.
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Use an in-memory store instead of `--state-file`; state is lost on exit.
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Calling actor as "<user|agent|partner>:<id>", e.g. "user:alice".
    #[arg(long, global = true, default_value = "user:demo")]
    actor: String,

    /// OAuth-style scope presented with the request. Repeatable.
    #[arg(long = "scope", global = true)]
    scopes: Vec<String>,

    /// Idempotency key for mutation operations. Defaults to a fixed demo key;
    /// pass a fresh one per call to avoid replaying a prior response.
    #[arg(long, global = true, default_value = "cli-demo")]
    idempotency_key: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Intent lifecycle: create, list, get, cancel.
    Intent {
        #[command(subcommand)]
        command: IntentCommand,
    },
    /// Run the matching engine and inspect past runs.
    Matching {
        #[command(subcommand)]
        command: MatchingCommand,
    },
    /// Cycle proposal lifecycle: list, get, accept, decline.
    Proposal {
        #[command(subcommand)]
        command: ProposalCommand,
    },
    /// Settlement state machine: start, confirm deposits, execute, complete, status.
    Settlement {
        #[command(subcommand)]
        command: SettlementCommand,
    },
    /// Read a settlement receipt.
    Receipt { receipt_id: String },
    /// Vault holding lifecycle: deposit, reserve, release, withdraw, get, list.
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },
    /// Agent delegation lifecycle: mint, revoke, list.
    Delegation {
        #[command(subcommand)]
        command: DelegationCommand,
    },
    /// Ingest a partner-signed proposal webhook.
    Webhook {
        /// Path to a JSON file: {"event_id", "partner_id", "proposal", "signature"}.
        file: PathBuf,
    },
    /// Engine liveness and snapshot size.
    Health,
}

#[derive(Subcommand)]
enum IntentCommand {
    /// Create an intent from a JSON file matching `SwapIntent`.
    Create { file: PathBuf },
    /// List the caller's intents.
    List,
    Get { intent_id: String },
    Cancel { intent_id: String },
}

#[derive(Subcommand)]
enum MatchingCommand {
    /// Run matching over all active intents. `values_file` maps
    /// "platform:asset_key" to a USD value, as JSON.
    Run { run_id: String, values_file: PathBuf },
    Get { run_id: String },
}

#[derive(Subcommand)]
enum ProposalCommand {
    List,
    Get { proposal_id: String },
    Accept { proposal_id: String, intent_id: String },
    Decline { proposal_id: String, intent_id: String },
}

#[derive(Subcommand)]
enum SettlementCommand {
    /// Start settlement. `bindings` is repeated "intent_id:holding_id:reservation_id".
    Start {
        cycle_id: String,
        #[arg(long = "binding")]
        bindings: Vec<String>,
    },
    ConfirmDeposit { cycle_id: String, intent_id: String, deposit_ref: String },
    BeginExecution { cycle_id: String },
    Complete { cycle_id: String },
    Status { cycle_id: String },
}

#[derive(Subcommand)]
enum VaultCommand {
    /// Deposit an asset into the vault. `asset_file` is a JSON `Asset`.
    Deposit { holding_id: String, vault_id: String, asset_file: PathBuf },
    Reserve { holding_id: String, reservation_id: String },
    Release { holding_id: String },
    Withdraw { holding_id: String },
    Get { holding_id: String },
    List,
}

#[derive(Subcommand)]
enum DelegationCommand {
    /// Mint a delegation from a JSON file matching `Delegation`.
    Mint { file: PathBuf },
    Revoke { delegation_id: String },
    List,
}

fn parse_actor(spec: &str) -> anyhow::Result<Actor> {
    let (kind, id) = spec
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("actor must be \"<user|agent|partner>:<id>\", got {spec:?}"))?;
    let actor_type = match kind {
        "user" => ActorType::User,
        "agent" => ActorType::Agent,
        "partner" => ActorType::Partner,
        other => anyhow::bail!("unknown actor type {other:?}, expected user, agent, or partner"),
    };
    Ok(Actor::new(actor_type, id))
}

fn parse_binding(spec: &str) -> anyhow::Result<VaultBinding> {
    let mut parts = spec.splitn(3, ':');
    let intent_id = parts.next().ok_or_else(|| anyhow::anyhow!("empty binding"))?;
    let holding_id = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("binding {spec:?} missing holding_id"))?;
    let reservation_id = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("binding {spec:?} missing reservation_id"))?;
    Ok(VaultBinding {
        intent_id: intent_id.to_string(),
        holding_id: holding_id.to_string(),
        reservation_id: reservation_id.to_string(),
    })
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json(value: &impl serde::Serialize) {
    println!("{}", serde_json::to_string_pretty(value).expect("response always serializes"));
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry().with(filter).with(fmt::layer()).try_init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let store: Box<dyn StateStore> = if cli.ephemeral {
        Box::new(MemoryStateStore::new())
    } else {
        Box::new(FileStateStore::new(
            cli.state_file.clone().unwrap_or_else(FileStateStore::default_path),
        ))
    };
    let config = if cli.ephemeral { EngineConfig::ephemeral() } else { EngineConfig::default() };
    let engine = Engine::new(store, KeyRings::deterministic_for_tests(), config)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let actor = parse_actor(&cli.actor)?;
    let now = chrono::Utc::now();
    let ctx = || {
        RequestContext::new(actor.clone())
            .with_scopes(cli.scopes.clone())
            .with_idempotency_key(&cli.idempotency_key)
    };

    match cli.command {
        Command::Intent { command } => match command {
            IntentCommand::Create { file } => {
                let intent: SwapIntent = load_json(&file)?;
                print_json(&engine.create_intent(&ctx(), intent, now).map_err(to_anyhow)?.body)
            }
            IntentCommand::List => print_json(&engine.list_intents(&ctx(), now).map_err(to_anyhow)?),
            IntentCommand::Get { intent_id } => print_json(&engine.get_intent(&ctx(), &intent_id, now).map_err(to_anyhow)?),
            IntentCommand::Cancel { intent_id } => {
                print_json(&engine.cancel_intent(&ctx(), &intent_id, now).map_err(to_anyhow)?.body)
            }
        },
        Command::Matching { command } => match command {
            MatchingCommand::Run { run_id, values_file } => {
                let values: AssetValues = load_json(&values_file)?;
                print_json(
                    &engine
                        .create_matching_run(&ctx(), &run_id, &values, now)
                        .map_err(to_anyhow)?
                        .body,
                )
            }
            MatchingCommand::Get { run_id } => print_json(&engine.get_matching_run(&ctx(), &run_id, now).map_err(to_anyhow)?),
        },
        Command::Proposal { command } => match command {
            ProposalCommand::List => print_json(&engine.list_proposals(&ctx(), now).map_err(to_anyhow)?),
            ProposalCommand::Get { proposal_id } => {
                print_json(&engine.get_proposal(&ctx(), &proposal_id, now).map_err(to_anyhow)?)
            }
            ProposalCommand::Accept { proposal_id, intent_id } => print_json(
                &engine
                    .accept_proposal(&ctx(), &proposal_id, &intent_id, now)
                    .map_err(to_anyhow)?
                    .body,
            ),
            ProposalCommand::Decline { proposal_id, intent_id } => print_json(
                &engine
                    .decline_proposal(&ctx(), &proposal_id, &intent_id, now)
                    .map_err(to_anyhow)?
                    .body,
            ),
        },
        Command::Settlement { command } => match command {
            SettlementCommand::Start { cycle_id, bindings } => {
                let bindings = bindings.iter().map(|b| parse_binding(b)).collect::<anyhow::Result<Vec<_>>>()?;
                print_json(
                    &engine
                        .start_settlement(&ctx(), &cycle_id, &bindings, now)
                        .map_err(to_anyhow)?
                        .body,
                )
            }
            SettlementCommand::ConfirmDeposit { cycle_id, intent_id, deposit_ref } => print_json(
                &engine
                    .confirm_deposit(&ctx(), &cycle_id, &intent_id, &deposit_ref, now)
                    .map_err(to_anyhow)?
                    .body,
            ),
            SettlementCommand::BeginExecution { cycle_id } => {
                print_json(&engine.begin_execution(&ctx(), &cycle_id, now).map_err(to_anyhow)?.body)
            }
            SettlementCommand::Complete { cycle_id } => {
                print_json(&engine.complete_settlement(&ctx(), &cycle_id, now).map_err(to_anyhow)?.body)
            }
            SettlementCommand::Status { cycle_id } => {
                print_json(&engine.settlement_status(&ctx(), &cycle_id, now).map_err(to_anyhow)?)
            }
        },
        Command::Receipt { receipt_id } => print_json(&engine.get_receipt(&ctx(), &receipt_id, now).map_err(to_anyhow)?),
        Command::Vault { command } => match command {
            VaultCommand::Deposit { holding_id, vault_id, asset_file } => {
                let asset: Asset = load_json(&asset_file)?;
                print_json(
                    &engine
                        .vault_deposit(&ctx(), &holding_id, &vault_id, asset, now)
                        .map_err(to_anyhow)?
                        .body,
                )
            }
            VaultCommand::Reserve { holding_id, reservation_id } => print_json(
                &engine
                    .vault_reserve(&ctx(), &holding_id, &reservation_id, now)
                    .map_err(to_anyhow)?
                    .body,
            ),
            VaultCommand::Release { holding_id } => {
                print_json(&engine.vault_release(&ctx(), &holding_id, now).map_err(to_anyhow)?.body)
            }
            VaultCommand::Withdraw { holding_id } => {
                print_json(&engine.vault_withdraw(&ctx(), &holding_id, now).map_err(to_anyhow)?.body)
            }
            VaultCommand::Get { holding_id } => print_json(&engine.vault_get(&ctx(), &holding_id, now).map_err(to_anyhow)?),
            VaultCommand::List => print_json(&engine.vault_list(&ctx(), now).map_err(to_anyhow)?),
        },
        Command::Delegation { command } => match command {
            DelegationCommand::Mint { file } => {
                let delegation: Delegation = load_json(&file)?;
                print_json(&engine.mint_delegation(&ctx(), delegation, now).map_err(to_anyhow)?.body)
            }
            DelegationCommand::Revoke { delegation_id } => {
                print_json(&engine.revoke_delegation(&ctx(), &delegation_id, now).map_err(to_anyhow)?.body)
            }
            DelegationCommand::List => print_json(&engine.list_delegations(&ctx(), now).map_err(to_anyhow)?),
        },
        Command::Webhook { file } => {
            #[derive(serde::Deserialize)]
            struct WebhookFile {
                event_id: String,
                partner_id: String,
                proposal: swapmesh::model::CycleProposal,
                signature: swapmesh::crypto::Signature,
            }
            let parsed: WebhookFile = load_json(&file)?;
            let envelope = WebhookEnvelope {
                event_id: parsed.event_id,
                partner_id: parsed.partner_id,
                proposal: parsed.proposal,
                signature: parsed.signature,
            };
            let outcome = engine.ingest_webhook(&ctx(), envelope, now).map_err(to_anyhow)?;
            print_json(&format!("{outcome:?}"));
        }
        Command::Health => print_json(&engine.health()),
    }

    Ok(())
}

fn to_anyhow(err: swapmesh::EngineError) -> anyhow::Error {
    anyhow::anyhow!(err.to_wire().message)
}
