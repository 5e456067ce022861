use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use fhirpath_sql::{config, FhirPathCompiler};

/// fhirpath-sql - compile a FHIRPath expression to one SQL statement
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// FHIRPath expression to compile
    expression: String,

    /// Target SQL dialect (duckdb or postgres)
    #[arg(long)]
    dialect: Option<String>,

    /// Type schema YAML (defaults to the bundled FHIR R4 schema)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Compiler configuration YAML
    #[arg(long)]
    config: Option<PathBuf>,

    /// Table holding the JSON documents
    #[arg(long)]
    table: Option<String>,

    /// Resource type assumed when the expression does not start with one
    #[arg(long)]
    context_type: Option<String>,

    /// Print the SQL with the result type as JSON
    #[arg(long)]
    json: bool,
}

impl From<&Cli> for config::CliConfig {
    fn from(cli: &Cli) -> Self {
        config::CliConfig {
            config_file: cli.config.clone(),
            dialect: cli.dialect.clone(),
            table_name: cli.table.clone(),
            schema_path: cli.schema.clone(),
            context_type: cli.context_type.clone(),
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = config::CompilerConfig::from_cli(cli.into()).context("invalid configuration")?;
    let compiler = FhirPathCompiler::from_config(&config)?;

    if !cli.json {
        return compiler
            .compile(&cli.expression)
            .with_context(|| format!("cannot compile '{}'", cli.expression));
    }

    let ast = fhirpath_sql::fhirpath_parser::parse_expression(&cli.expression)
        .with_context(|| format!("cannot parse '{}'", cli.expression))?;
    let translation = compiler.translate(&ast)?;
    let sql = translation.to_sql()?;
    let result = translation.result();
    let output = serde_json::json!({
        "dialect": config.dialect.to_string(),
        "sql": sql,
        "fhir_type": result.and_then(|r| r.fhir_type()),
        "collection": result.is_some_and(|r| r.is_collection()),
    });
    Ok(serde_json::to_string_pretty(&output)?)
}

fn main() {
    // Optional .env with FHIRPATH_SQL_* settings
    dotenvy::dotenv().ok();
    // Initialize logger - defaults to WARN level, can be overridden with RUST_LOG env var
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(sql) => println!("{}", sql),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
