use anyhow::{Context, Result, bail};
use clap::Parser;
use rustyrag::config::{Config, VectorBackend};
use rustyrag::logging;
use rustyrag::pipeline::{PipelineService, QueryRequest};

#[derive(Parser)]
#[command(
    name = "rustyrag-ask",
    about = "Answer questions about a PDF or DOCX document from the command line"
)]
struct Cli {
    /// URL of the document to query.
    #[arg(long)]
    document: String,
    /// Question to ask; repeat for several questions.
    #[arg(long = "question", short = 'q', required = true)]
    questions: Vec<String>,
    /// Keep vectors in process memory instead of Qdrant.
    #[arg(long)]
    memory: bool,
    /// Print the response as JSON instead of numbered lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing("warn");

    dotenvy::dotenv().ok();
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if cli.memory {
        config.vector_backend = VectorBackend::Memory;
    }

    let service = PipelineService::from_config(&config)
        .await
        .context("Failed to initialize pipeline")?;
    let response = match service
        .run(QueryRequest::new(cli.document, cli.questions.clone()))
        .await
    {
        Ok(response) => response,
        Err(error) => bail!("{error} (stage: {}, kind: {:?})", error.stage, error.kind),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        let pairs = cli.questions.iter().zip(&response.answers);
        for (position, (question, answer)) in pairs.enumerate() {
            println!("{}. {question}\n   {answer}\n", position + 1);
        }
    }
    Ok(())
}
