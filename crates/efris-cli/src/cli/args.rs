use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "efris",
    version,
    about = "EFRIS integration gateway: connection test, key rotation, taxpayer lookup, UOM sync and stock inquiry"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// YAML settings file. Without it, settings come from EFRIS_* variables
    #[arg(long, global = true, env = "EFRIS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the key, catalog, taxpayer records and integration log
    /// (default: ~/.efris)
    #[arg(long, global = true, env = "EFRIS_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the Authority is reachable (T101)
    TestConnection,
    /// Force a new symmetric key from the Authority (T104)
    RefreshKey,
    /// Show the current key state without contacting the Authority
    KeyStatus,
    /// Mirror the Authority's units of measure into the local catalog (T115)
    SyncUoms,
    /// Delete one local UOM record by Authority id
    RemoveUom(RemoveUomArgs),
    /// Look up a taxpayer by TIN (T119)
    ResolveTaxpayer(ResolveTaxpayerArgs),
    /// Query stock for one item (T127)
    QueryStock(QueryStockArgs),
}

#[derive(Args, Debug)]
pub struct RemoveUomArgs {
    /// Authority id of the record
    pub id: String,
}

#[derive(Args, Debug)]
pub struct ResolveTaxpayerArgs {
    /// Taxpayer identification number
    pub tin: String,

    /// Customer name recorded with the integration log entry
    #[arg(long)]
    pub customer: Option<String>,

    /// Save the resolved record into the taxpayer store
    #[arg(long)]
    pub store: bool,
}

#[derive(Args, Debug)]
pub struct QueryStockArgs {
    /// Item code as registered with the Authority
    pub item_code: String,

    #[arg(long)]
    pub name: Option<String>,

    /// Commodity category name
    #[arg(long)]
    pub category: Option<String>,
}
