//! Prints the relaxation plan for a set of content types.
//!
//! Usage:
//!   contentshift-plan content_types.json --missing author,legacy_page
//!
//! Reads a JSON array of content type definitions (`-` for stdin) and
//! reports, per content type, the constraint flags relaxation produces and
//! whether the type would be altered on the target. No repository is
//! contacted; `--missing` names content types to treat as absent there.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use contentshift_core::{ConstraintFlags, ContentTypeDefinition};
use contentshift_migrate::logging::{init_tracing, LogFormat};
use contentshift_migrate::schema::{global_fields_needing_repair, prune_missing_references, relax};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "contentshift-plan")]
#[command(about = "Show how content types would be relaxed before migration")]
struct Args {
    /// JSON file holding an array of content type definitions, or `-`
    input: PathBuf,

    /// Content types absent on the target repository
    #[arg(long, value_delimiter = ',')]
    missing: Vec<String>,

    /// Log line format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "CONTENTSHIFT_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Debug, Serialize)]
struct PlanRow {
    content_type: String,
    altered: bool,
    flags: ConstraintFlags,
    fields_before: usize,
    fields_after: usize,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pending_global_fields: BTreeSet<String>,
}

#[derive(Debug, Serialize)]
struct Plan {
    altered: Vec<String>,
    content_types: Vec<PlanRow>,
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn plan_row(definition: &ContentTypeDefinition, missing: &BTreeSet<String>) -> PlanRow {
    let mut schema = definition.schema.clone();
    let mut flags = ConstraintFlags::default();
    relax(&mut schema, &mut flags);
    prune_missing_references(&mut schema, missing, &mut flags);
    debug!(content_type = %definition.uid, suppressed = flags.suppressed, "planned");
    PlanRow {
        content_type: definition.uid.clone(),
        altered: flags.suppressed,
        flags,
        fields_before: definition.schema.len(),
        fields_after: schema.len(),
        pending_global_fields: global_fields_needing_repair(&definition.schema),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let raw = read_input(&args.input)?;
    let definitions: Vec<ContentTypeDefinition> =
        serde_json::from_str(&raw).context("parsing content type definitions")?;
    let missing: BTreeSet<String> = args.missing.into_iter().collect();

    let rows: Vec<PlanRow> = definitions
        .iter()
        .map(|definition| plan_row(definition, &missing))
        .collect();
    let altered = rows
        .iter()
        .filter(|row| row.altered)
        .map(|row| row.content_type.clone())
        .collect::<Vec<_>>();
    info!(
        content_types = rows.len(),
        altered = altered.len(),
        "relaxation plan ready"
    );

    let plan = Plan {
        altered,
        content_types: rows,
    };
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
